//! Enclave support: the attestation sidecar and per-task enclave containers.

mod session;
pub use session::*;
