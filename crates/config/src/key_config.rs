//! The wallet key used by the worker.

use crate::{ConfigError, ConfigResult, WorkerDirs};
use alloy::{primitives::Address, signers::local::PrivateKeySigner};
use std::str::FromStr as _;
use tracing::info;

/// Environment variable holding the hex wallet key.
pub const WALLET_KEY_ENV: &str = "CW_WALLET_PRIVATE_KEY";

/// Wallet key loaded once for the lifetime of the worker.
#[derive(Debug, Clone)]
pub struct KeyConfig {
    signer: PrivateKeySigner,
}

impl KeyConfig {
    /// Read the key from [WALLET_KEY_ENV] or, if unset, from the data dir.
    pub fn read_config<P: WorkerDirs>(dirs: &P) -> ConfigResult<Self> {
        let raw = match std::env::var(WALLET_KEY_ENV) {
            Ok(key) => key,
            Err(_) => {
                let path = dirs.wallet_key_path();
                std::fs::read_to_string(&path)
                    .map_err(|_| ConfigError::MissingKey(WALLET_KEY_ENV, path))?
            }
        };
        let config = Self::from_hex(raw.trim())?;
        info!(target: "worker::config", address = %config.address(), "wallet key loaded");
        Ok(config)
    }

    /// Parse a hex encoded private key, with or without `0x`.
    pub fn from_hex(key: &str) -> ConfigResult<Self> {
        let signer =
            PrivateKeySigner::from_str(key).map_err(|e| ConfigError::InvalidKey(e.to_string()))?;
        Ok(Self { signer })
    }

    /// The wallet address.
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// A signer for transactions.
    pub fn signer(&self) -> PrivateKeySigner {
        self.signer.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    // first anvil dev account
    const KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    #[test]
    fn test_from_hex() {
        let config = KeyConfig::from_hex(KEY).unwrap();
        let expected: Address = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266".parse().unwrap();
        assert_eq!(config.address(), expected);
        assert_matches!(KeyConfig::from_hex("not a key"), Err(ConfigError::InvalidKey(_)));
    }

    #[test]
    fn test_read_from_datadir() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().to_path_buf();
        std::fs::write(dir.wallet_key_path(), format!("{}\n", &KEY[2..])).unwrap();
        // only falls back to the file when the env var is absent
        if std::env::var(WALLET_KEY_ENV).is_err() {
            let config = KeyConfig::read_config(&dir).unwrap();
            assert_eq!(config.address(), KeyConfig::from_hex(KEY).unwrap().address());
        }
    }
}
