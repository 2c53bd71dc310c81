//! The worker configuration file.

use crate::{
    ConfigError, ConfigResult, CoordinatorConfig, PushConfig, SmsConfig, WorkerDirs,
};
use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::{info, warn};

/// Name of the bridge network all task containers join.
pub const WORKER_DOCKER_NETWORK: &str = "iexec-worker-net";

/// The container for all worker configurations.
///
/// Every section has defaults so a partial (or missing) file still yields a
/// usable configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub worker: WorkerParameters,
    pub coordinator: CoordinatorConfig,
    pub push: PushConfig,
    pub chain: ChainConfig,
    pub docker: DockerConfig,
    pub tee: TeeConfig,
    pub sms: SmsConfig,
    pub results: ResultsConfig,
}

impl WorkerConfig {
    /// Load the config from the data dir, falling back to defaults if the file is absent.
    pub fn load_or_default<P: WorkerDirs>(dirs: &P) -> ConfigResult<Self> {
        let path = dirs.config_path();
        let mut config = if path.exists() {
            Self::load_from_path(&path)?
        } else {
            warn!(target: "worker::config", ?path, "no config file found, using defaults");
            Self::default()
        };
        if config.results.base_dir.is_none() {
            config.results.base_dir = Some(dirs.results_path());
        }
        Ok(config)
    }

    /// Parse a YAML config file.
    pub fn load_from_path(path: &Path) -> ConfigResult<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { file: path.to_path_buf(), source })?;
        let config = serde_yaml::from_str(&contents)
            .map_err(|source| ConfigError::Parse { file: path.to_path_buf(), source })?;
        info!(target: "worker::config", ?path, "config loaded");
        Ok(config)
    }

    /// Write this config as YAML.
    pub fn write_to_path(&self, path: &Path) -> ConfigResult<()> {
        let write_err = |message: String| ConfigError::Write { file: path.to_path_buf(), message };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| write_err(e.to_string()))?;
        }
        let yaml = self.to_yaml().map_err(|e| write_err(e.to_string()))?;
        std::fs::write(path, yaml).map_err(|e| write_err(e.to_string()))
    }

    /// This config as a YAML document.
    pub fn to_yaml(&self) -> ConfigResult<String> {
        serde_yaml::to_string(self).map_err(ConfigError::Serialize)
    }

    /// Base directory of task results.
    pub fn results_dir(&self) -> PathBuf {
        self.results.base_dir.clone().unwrap_or_else(|| PathBuf::from("results"))
    }
}

/// Parameters of the worker itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerParameters {
    pub name: String,
    /// Replicates computed at the same time.
    pub max_concurrent_tasks: usize,
    /// Enclave address sent with offer requests. Zero when the worker has none.
    pub enclave_address: Address,
    /// Period of the task intake loop.
    #[serde(with = "humantime_serde")]
    pub task_poll_interval: Duration,
    /// Period of the coordinator heartbeat.
    #[serde(with = "humantime_serde")]
    pub ping_interval: Duration,
}

impl Default for WorkerParameters {
    fn default() -> Self {
        Self {
            name: "worker".to_string(),
            max_concurrent_tasks: 1,
            enclave_address: Address::ZERO,
            task_poll_interval: Duration::from_secs(1),
            ping_interval: Duration::from_secs(10),
        }
    }
}

/// Chain access and transaction confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    pub rpc_url: String,
    /// Address of the hub contract.
    pub hub_address: Address,
    /// Gas limit for write transactions. Also used for the gas check.
    pub gas_limit: u64,
    /// Interval between contribution reads while a receipt is pending.
    #[serde(with = "humantime_serde")]
    pub pending_receipt_poll_interval: Duration,
    /// Give up on a pending receipt after this long.
    #[serde(with = "humantime_serde")]
    pub max_wait_pending_receipt: Duration,
    /// Writes that may wait in the transaction queue.
    pub tx_queue_capacity: usize,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://localhost:8545".to_string(),
            hub_address: Address::ZERO,
            gas_limit: 2_000_000,
            pending_receipt_poll_interval: Duration::from_millis(500),
            max_wait_pending_receipt: Duration::from_secs(60),
            tx_queue_capacity: 100,
        }
    }
}

/// Container engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    pub network_name: String,
    /// Interval between status reads of a running container.
    #[serde(with = "humantime_serde")]
    pub status_poll_interval: Duration,
    /// Minimum time between two "still running" logs.
    #[serde(with = "humantime_serde")]
    pub still_running_log_interval: Duration,
    /// Host path of the enclave device.
    pub sgx_device: PathBuf,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            network_name: WORKER_DOCKER_NETWORK.to_string(),
            status_poll_interval: Duration::from_secs(1),
            still_running_log_interval: Duration::from_secs(60),
            sgx_device: PathBuf::from("/dev/isgx"),
        }
    }
}

/// Trusted execution settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TeeConfig {
    /// Allow TEE tasks when the hardware supports it.
    pub enabled: bool,
    /// Image of the local attestation service.
    pub las_image: String,
    pub las_container_name: String,
    pub las_port: u16,
    /// Content addressable storage of the session service.
    pub cas_url: String,
    /// Heap size handed to enclave containers.
    pub enclave_heap_size: String,
}

impl TeeConfig {
    /// Address enclave containers use to reach the attestation service.
    pub fn las_url(&self) -> String {
        format!("{}:{}", self.las_container_name, self.las_port)
    }
}

impl Default for TeeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            las_image: "sconecuratedimages/iexec:las".to_string(),
            las_container_name: "iexec-las".to_string(),
            las_port: 18766,
            cas_url: "localhost:18765".to_string(),
            enclave_heap_size: "1G".to_string(),
        }
    }
}

/// Local results and their repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultsConfig {
    /// Defaults to `<datadir>/results`.
    pub base_dir: Option<PathBuf>,
    pub repository_url: String,
}

impl Default for ResultsConfig {
    fn default() -> Self {
        Self { base_dir: None, repository_url: "http://localhost:18090".to_string() }
    }
}
