// SPDX-License-Identifier: Apache-2.0
//! Task computation: the execution pipelines and the local collaborators
//! they use (result store, dataset decryption, secrets service).

mod dataset;
pub use dataset::LocalDatasetService;
mod orchestrator;
pub use orchestrator::*;
mod results;
pub use results::*;
mod sms;
pub use sms::SmsClient;
