//! Decryption of task datasets with the key provisioned by the secrets service.

use crate::TaskDirs;
use aes_gcm_siv::{
    aead::{Aead, KeyInit},
    Aes256GcmSiv, Nonce,
};
use async_trait::async_trait;
use cw_types::{DatasetError, DatasetResult, DatasetService, B256};
use std::{io::ErrorKind, path::PathBuf};
use tracing::{info, warn};

/// Length of the nonce prepended to every encrypted dataset.
const NONCE_LEN: usize = 12;

/// Suffix of an encrypted dataset file.
pub const ENCRYPTED_SUFFIX: &str = "enc";

/// [DatasetService] decrypting AES-256-GCM-SIV files in the task input directory.
#[derive(Debug, Clone)]
pub struct LocalDatasetService {
    dirs: TaskDirs,
}

impl LocalDatasetService {
    /// Create a new instance of [Self].
    pub fn new(dirs: TaskDirs) -> Self {
        Self { dirs }
    }

    async fn read_key(&self, chain_task_id: B256) -> DatasetResult<Vec<u8>> {
        let path = self.dirs.dataset_key_path(chain_task_id);
        let raw = tokio::fs::read_to_string(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => DatasetError::Missing(path.display().to_string()),
            _ => e.into(),
        })?;
        let key = hex::decode(raw.trim().trim_start_matches("0x"))
            .map_err(|e| DatasetError::InvalidKey(e.to_string()))?;
        if key.len() != 32 {
            return Err(DatasetError::InvalidKey(format!("expected 32 bytes, got {}", key.len())));
        }
        Ok(key)
    }
}

/// Decrypt `data` laid out as `nonce ‖ ciphertext`.
fn decrypt_bytes(key: &[u8], data: &[u8], name: &str) -> DatasetResult<Vec<u8>> {
    let cipher =
        Aes256GcmSiv::new_from_slice(key).map_err(|e| DatasetError::InvalidKey(e.to_string()))?;
    if data.len() < NONCE_LEN {
        return Err(DatasetError::Decryption(name.to_string()));
    }
    let (nonce, ciphertext) = data.split_at(NONCE_LEN);
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| DatasetError::Decryption(name.to_string()))
}

#[async_trait]
impl DatasetService for LocalDatasetService {
    async fn is_decryption_needed(&self, chain_task_id: B256) -> bool {
        let path = self.dirs.dataset_key_path(chain_task_id);
        tokio::fs::try_exists(&path).await.unwrap_or_else(|e| {
            warn!(target: "worker::dataset", %chain_task_id, ?e, "failed to check dataset key");
            false
        })
    }

    async fn decrypt(&self, chain_task_id: B256, dataset_name: &str) -> DatasetResult<PathBuf> {
        let key = self.read_key(chain_task_id).await?;
        let input = self.dirs.input_dir(chain_task_id);
        let encrypted = input.join(format!("{dataset_name}.{ENCRYPTED_SUFFIX}"));
        let data = tokio::fs::read(&encrypted).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => DatasetError::Missing(encrypted.display().to_string()),
            _ => e.into(),
        })?;

        let plaintext = decrypt_bytes(&key, &data, dataset_name)?;
        let target = input.join(dataset_name);
        tokio::fs::write(&target, plaintext).await?;
        info!(target: "worker::dataset", %chain_task_id, dataset = dataset_name, "dataset decrypted");
        Ok(target)
    }
}
