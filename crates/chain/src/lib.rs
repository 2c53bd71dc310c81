// SPDX-License-Identifier: Apache-2.0
//! Hub contract access: reads, the serialized transaction queue and the
//! reveal decision.

mod bindings;
pub use bindings::IexecHubABILegacy;
mod client;
pub use client::RpcChainClient;
mod service;
pub use service::ChainService;
mod validator;
pub use validator::{ConsensusValidator, RevealConditions};
