// SPDX-License-Identifier: Apache-2.0
//! In-memory collaborators and fixtures for worker tests.

#![warn(unused_crate_dependencies)]

mod chain;
pub use chain::*;
mod coordinator;
pub use coordinator::*;
mod docker;
pub use docker::*;
mod fixtures;
pub use fixtures::*;
mod pubsub;
pub use pubsub::*;
mod results;
pub use results::*;
