//! In-memory results, secrets and datasets.

use async_trait::async_trait;
use cw_types::{
    keccak256, DatasetError, DatasetResult, DatasetService, ResultStore, ResultStoreError,
    ResultStoreResult, SecretsClient, SecretsError, SecretsResult, Signature, TaskAuthorization,
    B256,
};
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    path::PathBuf,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};
use tempfile::TempDir;

/// Result store keeping stdout in memory.
///
/// Task directories live under a temporary directory removed on drop.
#[derive(Debug)]
pub struct MockResultStore {
    root: TempDir,
    stdout: Mutex<HashMap<B256, String>>,
    hashes: Mutex<HashMap<B256, B256>>,
    removed: Mutex<Vec<B256>>,
}

impl Default for MockResultStore {
    fn default() -> Self {
        Self {
            root: tempfile::tempdir().expect("temp dir"),
            stdout: Mutex::default(),
            hashes: Mutex::default(),
            removed: Mutex::default(),
        }
    }
}

impl MockResultStore {
    /// Force the deterministic hash returned for a task.
    pub fn set_deterministic_hash(&self, chain_task_id: B256, hash: B256) {
        self.hashes.lock().insert(chain_task_id, hash);
    }

    pub fn stdout(&self, chain_task_id: B256) -> Option<String> {
        self.stdout.lock().get(&chain_task_id).cloned()
    }

    /// Tasks whose results were discarded.
    pub fn removed(&self) -> Vec<B256> {
        self.removed.lock().clone()
    }
}

#[async_trait]
impl ResultStore for MockResultStore {
    fn input_dir(&self, chain_task_id: B256) -> PathBuf {
        self.root.path().join(chain_task_id.to_string()).join("input")
    }

    fn output_dir(&self, chain_task_id: B256) -> PathBuf {
        self.root.path().join(chain_task_id.to_string()).join("output")
    }

    async fn save_stdout(&self, chain_task_id: B256, stdout: &str) -> ResultStoreResult<()> {
        self.stdout.lock().insert(chain_task_id, stdout.to_string());
        Ok(())
    }

    async fn deterministic_hash(&self, chain_task_id: B256) -> ResultStoreResult<B256> {
        if let Some(hash) = self.hashes.lock().get(&chain_task_id) {
            return Ok(*hash);
        }
        self.stdout
            .lock()
            .get(&chain_task_id)
            .map(keccak256)
            .ok_or(ResultStoreError::NotFound(chain_task_id))
    }

    async fn enclave_signature(
        &self,
        _chain_task_id: B256,
    ) -> ResultStoreResult<Option<Signature>> {
        Ok(None)
    }

    async fn archive(&self, chain_task_id: B256) -> ResultStoreResult<Vec<u8>> {
        self.stdout
            .lock()
            .get(&chain_task_id)
            .map(|s| s.as_bytes().to_vec())
            .ok_or(ResultStoreError::NotFound(chain_task_id))
    }

    async fn remove(&self, chain_task_id: B256) -> ResultStoreResult<()> {
        self.stdout.lock().remove(&chain_task_id);
        self.removed.lock().push(chain_task_id);
        Ok(())
    }
}

/// Secrets service with a fixed answer.
#[derive(Debug, Default)]
pub struct MockSecretsClient {
    /// Session id returned by `create_tee_session`, none means failure.
    pub session: Mutex<Option<String>>,
    secrets_available: AtomicBool,
    fetches: AtomicUsize,
}

impl MockSecretsClient {
    pub fn with_session(session: &str) -> Self {
        let client = Self::default();
        *client.session.lock() = Some(session.to_string());
        client
    }

    pub fn set_secrets_available(&self, available: bool) {
        self.secrets_available.store(available, Ordering::SeqCst);
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SecretsClient for MockSecretsClient {
    async fn fetch_task_secrets(&self, auth: &TaskAuthorization) -> SecretsResult<()> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.secrets_available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SecretsError::Http(format!("no secrets for {}", auth.chain_task_id)))
        }
    }

    async fn create_tee_session(&self, auth: &TaskAuthorization) -> SecretsResult<String> {
        self.session.lock().clone().ok_or(SecretsError::NoSession(auth.chain_task_id))
    }
}

/// Dataset service with fixed answers.
#[derive(Debug, Default)]
pub struct MockDatasetService {
    needs_decryption: AtomicBool,
    fail_decryption: AtomicBool,
    decryptions: AtomicUsize,
}

impl MockDatasetService {
    pub fn set_needs_decryption(&self, needed: bool) {
        self.needs_decryption.store(needed, Ordering::SeqCst);
    }

    pub fn set_fail_decryption(&self, fail: bool) {
        self.fail_decryption.store(fail, Ordering::SeqCst);
    }

    pub fn decryptions(&self) -> usize {
        self.decryptions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DatasetService for MockDatasetService {
    async fn is_decryption_needed(&self, _chain_task_id: B256) -> bool {
        self.needs_decryption.load(Ordering::SeqCst)
    }

    async fn decrypt(&self, _chain_task_id: B256, dataset_name: &str) -> DatasetResult<PathBuf> {
        self.decryptions.fetch_add(1, Ordering::SeqCst);
        if self.fail_decryption.load(Ordering::SeqCst) {
            return Err(DatasetError::Decryption(dataset_name.to_string()));
        }
        Ok(PathBuf::from(dataset_name))
    }
}
