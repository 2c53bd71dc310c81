// SPDX-License-Identifier: Apache-2.0
//! Shared types for the compute worker.
//!
//! The data model exchanged between the coordinator, the chain and the
//! execution engine, the seam traits every collaborator implements, and the
//! task/shutdown primitives used to run the node.

mod chain;
mod container;
mod error;
mod notification;
mod notifier;
mod status;
mod task;
mod task_manager;
mod traits;
pub use chain::*;
pub use container::*;
pub use error::*;
pub use notification::*;
pub use notifier::*;
pub use status::*;
pub use task::*;
pub use task_manager::*;
pub use traits::*;

// re-exports for easier maintainability
pub use alloy::primitives::{keccak256, Address, B256, U256};

/// Return the current unix timestamp in seconds.
pub fn now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
