//! Crate for configuring a worker.
//!
//! The YAML worker configuration, the data directory layout and the wallet
//! key used to sign transactions.
mod dirs;
pub use dirs::*;
mod error;
pub use error::*;
mod key_config;
pub use key_config::*;
mod network;
pub use network::*;
mod worker_config;
pub use worker_config::*;
