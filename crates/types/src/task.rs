//! Task offers, authorizations and computation results.

use crate::{keccak256, Address, Signature, B256};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Grant issued by the coordinator allowing this worker to contribute to one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskAuthorization {
    pub worker_wallet: Address,
    pub chain_task_id: B256,
    pub enclave_challenge: Address,
    pub sign_r: B256,
    pub sign_s: B256,
    pub sign_v: u8,
}

impl TaskAuthorization {
    /// The scheduler signature carried by this authorization.
    pub fn signature(&self) -> Signature {
        Signature { v: self.sign_v, r: self.sign_r, s: self.sign_s }
    }

    /// True if the task was scheduled for enclave execution.
    pub fn has_enclave_challenge(&self) -> bool {
        self.enclave_challenge != Address::ZERO
    }
}

/// A replicate offered to this worker by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskOffer {
    pub contribution_authorization: TaskAuthorization,
    /// Container image of the application.
    pub app_uri: String,
    #[serde(default)]
    pub cmd: String,
    /// Milliseconds.
    pub max_execution_time: u64,
    #[serde(default)]
    pub is_trusted_execution: bool,
    #[serde(default)]
    pub dataset_uri: Option<String>,
}

impl TaskOffer {
    /// The on-chain task id.
    pub fn chain_task_id(&self) -> B256 {
        self.contribution_authorization.chain_task_id
    }

    /// Upper bound for the task container.
    pub fn max_execution_time(&self) -> Duration {
        Duration::from_millis(self.max_execution_time)
    }

    /// File name of the dataset, taken from the last segment of its uri.
    pub fn dataset_filename(&self) -> Option<String> {
        let uri = self.dataset_uri.as_deref()?.trim_end_matches('/');
        let name = uri.rsplit('/').next()?;
        (!name.is_empty()).then(|| name.to_string())
    }

    /// Split the command line into container arguments.
    pub fn cmd_args(&self) -> Vec<String> {
        self.cmd.split_whitespace().map(String::from).collect()
    }
}

/// Hashes derived from a finished computation.
///
/// `result_hash` commits to the output for one task, `result_seal` binds that
/// commitment to the worker who produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComputationResult {
    pub deterministic_hash: B256,
    pub result_hash: B256,
    pub result_seal: B256,
}

impl ComputationResult {
    /// Derive the hash and seal from the output's deterministic hash.
    pub fn new(worker: Address, chain_task_id: B256, deterministic_hash: B256) -> Self {
        Self {
            deterministic_hash,
            result_hash: result_hash(chain_task_id, deterministic_hash),
            result_seal: result_seal(worker, chain_task_id, deterministic_hash),
        }
    }
}

/// `keccak256(taskId ‖ deterministicHash)`
pub fn result_hash(chain_task_id: B256, deterministic_hash: B256) -> B256 {
    let mut buf = Vec::with_capacity(64);
    buf.extend_from_slice(chain_task_id.as_slice());
    buf.extend_from_slice(deterministic_hash.as_slice());
    keccak256(buf)
}

/// `keccak256(worker ‖ taskId ‖ deterministicHash)`
pub fn result_seal(worker: Address, chain_task_id: B256, deterministic_hash: B256) -> B256 {
    let mut buf = Vec::with_capacity(84);
    buf.extend_from_slice(worker.as_slice());
    buf.extend_from_slice(chain_task_id.as_slice());
    buf.extend_from_slice(deterministic_hash.as_slice());
    keccak256(buf)
}
