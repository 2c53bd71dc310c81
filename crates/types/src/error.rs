// SPDX-License-Identifier: Apache-2.0
//! Errors returned across the seam traits.
//!
//! Collaborator implementations (RPC, container engine, HTTP, websocket)
//! convert their library errors into these enums so the core never depends on
//! a particular client library.

use crate::{ChainContributionStatus, B256};
use thiserror::Error;

/// Result alias for [`ChainError`].
pub type ChainResult<T> = Result<T, ChainError>;

/// Failures while reading chain state or submitting transactions.
#[derive(Debug, Error)]
pub enum ChainError {
    /// The RPC transport failed.
    #[error("RPC failure: {0}")]
    Rpc(String),

    /// The contract call reverted or could not be decoded.
    #[error("Contract call {call} failed: {message}")]
    Contract { call: &'static str, message: String },

    /// The receipt did not carry the expected protocol event.
    #[error("No {0} event found in receipt for task {1}")]
    MissingEvent(&'static str, B256),

    /// The pending receipt never became visible on-chain.
    #[error("Task {task_id} did not reach contribution status {expected:?} within the wait budget")]
    PendingTimeout { task_id: B256, expected: ChainContributionStatus },

    /// No local result is stored for the task.
    #[error("No local result for task {0}")]
    MissingResult(B256),

    /// The transaction queue worker is gone.
    #[error("Transaction queue closed")]
    QueueClosed,

    /// The transaction queue is full.
    #[error("Transaction queue full")]
    QueueFull,
}

impl<T> From<tokio::sync::mpsc::error::TrySendError<T>> for ChainError {
    fn from(err: tokio::sync::mpsc::error::TrySendError<T>) -> Self {
        match err {
            tokio::sync::mpsc::error::TrySendError::Full(_) => ChainError::QueueFull,
            tokio::sync::mpsc::error::TrySendError::Closed(_) => ChainError::QueueClosed,
        }
    }
}

/// Result alias for [`DockerError`].
pub type DockerResult<T> = Result<T, DockerError>;

/// Failures from the container engine.
#[derive(Debug, Error)]
pub enum DockerError {
    /// The engine reported the object does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The engine returned an error.
    #[error("Container engine error: {0}")]
    Engine(String),

    /// The worker network could not be created.
    #[error("Failed to create network {0}")]
    Network(String),

    /// Image pull failed or the image is absent.
    #[error("Image {0} is not available")]
    ImageUnavailable(String),

    /// The container did not exit before its deadline and was stopped.
    #[error("Container {name} exceeded max execution time of {max_secs}s")]
    Timeout { name: String, max_secs: u64 },

    /// Log capture failed after the container finished.
    #[error("Failed to capture logs of container {0}")]
    Logs(String),

    /// Local filesystem failure while preparing binds.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result alias for [`PubSubError`].
pub type PubSubResult<T> = Result<T, PubSubError>;

/// Failures of the push-notification session.
#[derive(Debug, Error)]
pub enum PubSubError {
    /// The websocket connection failed.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// A frame could not be parsed.
    #[error("Malformed frame: {0}")]
    Frame(String),

    /// The session writer is gone.
    #[error("Session closed")]
    SessionClosed,
}

/// Result alias for [`CoordinatorError`].
pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

/// Failures calling the coordinator or the result repository.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// HTTP transport failure.
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// Non-success status code.
    #[error("Unexpected status {status} from {endpoint}")]
    Status { endpoint: String, status: u16 },
}

/// Result alias for [`ResultStoreError`].
pub type ResultStoreResult<T> = Result<T, ResultStoreError>;

/// Failures reading or writing local task results.
#[derive(Debug, Error)]
pub enum ResultStoreError {
    /// No result is stored for the task.
    #[error("No result found for task {0}")]
    NotFound(B256),

    /// The stored enclave signature is unreadable.
    #[error("Invalid enclave signature for task {0}: {1}")]
    InvalidSignature(B256, String),

    /// Filesystem failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result alias for [`SecretsError`].
pub type SecretsResult<T> = Result<T, SecretsError>;

/// Failures from the secrets and session service.
#[derive(Debug, Error)]
pub enum SecretsError {
    /// HTTP transport failure.
    #[error("Secrets service request failed: {0}")]
    Http(String),

    /// The service did not return a session.
    #[error("No TEE session created for task {0}")]
    NoSession(B256),

    /// Writing fetched secrets to disk failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result alias for [`DatasetError`].
pub type DatasetResult<T> = Result<T, DatasetError>;

/// Failures decrypting a task dataset.
#[derive(Debug, Error)]
pub enum DatasetError {
    /// Dataset or key file missing.
    #[error("Missing dataset file {0}")]
    Missing(String),

    /// Key material is malformed.
    #[error("Invalid dataset key: {0}")]
    InvalidKey(String),

    /// AEAD decryption failed.
    #[error("Failed to decrypt dataset {0}")]
    Decryption(String),

    /// Filesystem failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
