//! Data directory layout.

use std::path::{Path, PathBuf};

/// Default directory name under the OS data dir.
pub const DEFAULT_ROOT_DIR: &str = "compute-worker";

/// Name of the configuration file inside the data dir.
pub const CONFIG_FILE: &str = "worker.yaml";

/// Name of the wallet key file inside the data dir.
pub const WALLET_KEY_FILE: &str = "wallet.key";

/// Paths derived from the worker's data directory.
pub trait WorkerDirs {
    /// The root of the data directory.
    fn root(&self) -> &Path;

    /// Path of the YAML config.
    fn config_path(&self) -> PathBuf {
        self.root().join(CONFIG_FILE)
    }

    /// Path of the hex wallet key.
    fn wallet_key_path(&self) -> PathBuf {
        self.root().join(WALLET_KEY_FILE)
    }

    /// Default base directory of task results.
    fn results_path(&self) -> PathBuf {
        self.root().join("results")
    }
}

impl WorkerDirs for PathBuf {
    fn root(&self) -> &Path {
        self.as_path()
    }
}

impl WorkerDirs for &Path {
    fn root(&self) -> &Path {
        self
    }
}

/// The OS-specific default data directory, or `./compute-worker`.
pub fn default_datadir() -> PathBuf {
    dirs_next::data_dir()
        .map(|root| root.join(DEFAULT_ROOT_DIR))
        .unwrap_or_else(|| PathBuf::from(format!("./{DEFAULT_ROOT_DIR}")))
}
