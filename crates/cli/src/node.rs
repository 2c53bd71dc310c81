//! Main node command for launching the worker.

use clap::Args;
use cw_config::{KeyConfig, WorkerConfig, WorkerDirs as _};
use cw_types::Notifier;
use eyre::WrapErr as _;
use std::path::{Path, PathBuf};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Start the worker.
#[derive(Debug, Clone, Args)]
pub struct NodeCommand {
    /// Config file to use instead of `<datadir>/worker.yaml`.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Override `worker.max_concurrent_tasks`.
    #[arg(long, value_name = "COUNT")]
    pub max_concurrent_tasks: Option<usize>,

    /// Override `coordinator.url`.
    #[arg(long, value_name = "URL", env = "CW_COORDINATOR_URL")]
    pub coordinator_url: Option<String>,

    /// Override `chain.rpc_url`.
    #[arg(long, value_name = "URL", env = "CW_CHAIN_RPC_URL")]
    pub rpc_url: Option<String>,
}

impl NodeCommand {
    /// The config file merged with command line overrides.
    pub fn load_config(&self, datadir: &Path) -> eyre::Result<WorkerConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let mut config = WorkerConfig::load_from_path(path)?;
                if config.results.base_dir.is_none() {
                    config.results.base_dir = Some(datadir.results_path());
                }
                config
            }
            None => WorkerConfig::load_or_default(&datadir)?,
        };
        if let Some(max) = self.max_concurrent_tasks {
            config.worker.max_concurrent_tasks = max;
        }
        if let Some(url) = &self.coordinator_url {
            config.coordinator.url = url.clone();
        }
        if let Some(url) = &self.rpc_url {
            config.chain.rpc_url = url.clone();
        }
        Ok(config)
    }

    /// Load config and run the node until it exits or ctrl-c is pressed.
    pub async fn execute<L>(
        &self,
        datadir: PathBuf,
        key_config: KeyConfig,
        launcher: L,
    ) -> eyre::Result<()>
    where
        L: FnOnce(WorkerConfig, KeyConfig, Notifier) -> JoinHandle<eyre::Result<()>>,
    {
        let config = self.load_config(&datadir).wrap_err("failed to load worker config")?;
        info!(
            target: "worker::cli",
            name = %config.worker.name,
            wallet = %key_config.address(),
            ?datadir,
            "starting worker"
        );

        let shutdown = Notifier::new();
        let signal = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!(target: "worker::cli", "ctrl-c received, shutting down");
                    signal.notify();
                }
                Err(e) => warn!(target: "worker::cli", ?e, "failed to listen for ctrl-c"),
            }
        });

        launcher(config, key_config, shutdown).await?
    }
}
