//! Task results on the local filesystem.
//!
//! ```text
//! <base>/<taskId>/input/
//! <base>/<taskId>/output/stdout.txt
//! <base>/<taskId>/output/determinism.iexec
//! <base>/<taskId>/output/enclave-signature.json
//! <base>/<taskId>/secrets/dataset.key
//! ```

use async_trait::async_trait;
use cw_types::{keccak256, ResultStore, ResultStoreError, ResultStoreResult, Signature, B256};
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};

pub const STDOUT_FILE: &str = "stdout.txt";
/// Written by tasks whose stdout is not deterministic.
pub const DETERMINISM_FILE: &str = "determinism.iexec";
pub const ENCLAVE_SIGNATURE_FILE: &str = "enclave-signature.json";
pub const DATASET_KEY_FILE: &str = "dataset.key";

/// Layout of task directories under a base directory.
#[derive(Debug, Clone)]
pub struct TaskDirs {
    base_dir: PathBuf,
}

impl TaskDirs {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self { base_dir: base_dir.into() }
    }

    pub fn task_dir(&self, chain_task_id: B256) -> PathBuf {
        self.base_dir.join(chain_task_id.to_string())
    }

    pub fn input_dir(&self, chain_task_id: B256) -> PathBuf {
        self.task_dir(chain_task_id).join("input")
    }

    pub fn output_dir(&self, chain_task_id: B256) -> PathBuf {
        self.task_dir(chain_task_id).join("output")
    }

    pub fn secrets_dir(&self, chain_task_id: B256) -> PathBuf {
        self.task_dir(chain_task_id).join("secrets")
    }

    /// Hex key provisioned for the task dataset.
    pub fn dataset_key_path(&self, chain_task_id: B256) -> PathBuf {
        self.secrets_dir(chain_task_id).join(DATASET_KEY_FILE)
    }
}

/// [ResultStore] writing under a base directory.
#[derive(Debug, Clone)]
pub struct LocalResultStore {
    dirs: TaskDirs,
}

impl LocalResultStore {
    /// Create a new instance of [Self].
    pub fn new(dirs: TaskDirs) -> Self {
        Self { dirs }
    }

    /// Read `path`, mapping a missing file to `None`.
    async fn read_optional(path: &Path) -> ResultStoreResult<Option<Vec<u8>>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ResultStore for LocalResultStore {
    fn input_dir(&self, chain_task_id: B256) -> PathBuf {
        self.dirs.input_dir(chain_task_id)
    }

    fn output_dir(&self, chain_task_id: B256) -> PathBuf {
        self.dirs.output_dir(chain_task_id)
    }

    async fn save_stdout(&self, chain_task_id: B256, stdout: &str) -> ResultStoreResult<()> {
        let output = self.output_dir(chain_task_id);
        tokio::fs::create_dir_all(&output).await?;
        tokio::fs::write(output.join(STDOUT_FILE), stdout).await?;
        debug!(target: "worker::results", %chain_task_id, bytes = stdout.len(), "stdout saved");
        Ok(())
    }

    async fn deterministic_hash(&self, chain_task_id: B256) -> ResultStoreResult<B256> {
        let output = self.output_dir(chain_task_id);
        if let Some(bytes) = Self::read_optional(&output.join(DETERMINISM_FILE)).await? {
            return Ok(keccak256(bytes));
        }
        Self::read_optional(&output.join(STDOUT_FILE))
            .await?
            .map(keccak256)
            .ok_or(ResultStoreError::NotFound(chain_task_id))
    }

    async fn enclave_signature(&self, chain_task_id: B256) -> ResultStoreResult<Option<Signature>> {
        let path = self.output_dir(chain_task_id).join(ENCLAVE_SIGNATURE_FILE);
        let Some(bytes) = Self::read_optional(&path).await? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| ResultStoreError::InvalidSignature(chain_task_id, e.to_string()))
    }

    async fn archive(&self, chain_task_id: B256) -> ResultStoreResult<Vec<u8>> {
        let output = self.output_dir(chain_task_id);
        if !tokio::fs::try_exists(&output).await? {
            return Err(ResultStoreError::NotFound(chain_task_id));
        }
        let archive = tokio::task::spawn_blocking(move || {
            let mut builder = tar::Builder::new(Vec::new());
            builder.append_dir_all("output", &output)?;
            builder.into_inner()
        })
        .await
        .map_err(|e| std::io::Error::other(e.to_string()))??;
        info!(target: "worker::results", %chain_task_id, bytes = archive.len(), "result archived");
        Ok(archive)
    }

    async fn remove(&self, chain_task_id: B256) -> ResultStoreResult<()> {
        match tokio::fs::remove_dir_all(self.dirs.task_dir(chain_task_id)).await {
            Ok(()) => {
                info!(target: "worker::results", %chain_task_id, "local result removed");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!(target: "worker::results", %chain_task_id, ?e, "failed to remove local result");
                Err(e.into())
            }
        }
    }
}
