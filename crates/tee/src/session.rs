//! Lifecycle of the local attestation service (LAS) and enclave sessions.
//!
//! Trusted execution is only offered when the enclave device exists and the
//! LAS container started. Anything else degrades to standard execution.

use cw_config::TeeConfig;
use cw_docker::ContainerRuntime;
use cw_types::{ContainerEngine, ContainerRunSpec, SecretsClient, TaskAuthorization, TaskOffer};
use std::{collections::BTreeMap, fmt, path::Path, sync::Arc};
use tracing::{error, info, warn};

/// Enclave configuration keys read by the enclave runtime.
pub const SCONE_CAS_ADDR: &str = "SCONE_CAS_ADDR";
pub const SCONE_LAS_ADDR: &str = "SCONE_LAS_ADDR";
pub const SCONE_CONFIG_ID: &str = "SCONE_CONFIG_ID";
pub const SCONE_HEAP: &str = "SCONE_HEAP";
pub const SCONE_LOG: &str = "SCONE_LOG";
pub const SCONE_VERSION: &str = "SCONE_VERSION";

/// Mount point of the task output inside enclave containers.
pub const ENCLAVE_OUTPUT_DIR: &str = "/iexec_out";

/// Owns the LAS sidecar and builds enclave container specs.
pub struct TeeSessionManager<E> {
    runtime: ContainerRuntime<E>,
    secrets: Arc<dyn SecretsClient>,
    config: TeeConfig,
    /// True once the LAS container was started by this manager.
    las_started: bool,
}

impl<E> fmt::Debug for TeeSessionManager<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TeeSessionManager")
            .field("config", &self.config)
            .field("las_started", &self.las_started)
            .finish_non_exhaustive()
    }
}

impl<E: ContainerEngine> TeeSessionManager<E> {
    /// Detect enclave support and start the LAS if possible.
    ///
    /// Never fails: a missing device or a LAS that cannot start leaves the
    /// manager disabled.
    pub async fn start(
        runtime: ContainerRuntime<E>,
        secrets: Arc<dyn SecretsClient>,
        config: TeeConfig,
        sgx_device: &Path,
    ) -> Self {
        let mut manager = Self { runtime, secrets, config, las_started: false };
        if !manager.config.enabled {
            info!(target: "worker::tee", "trusted execution disabled by config");
            return manager;
        }
        if !sgx_device.exists() {
            warn!(target: "worker::tee", ?sgx_device, "no enclave device, trusted execution unavailable");
            return manager;
        }
        manager.las_started = manager.start_las().await;
        manager
    }

    async fn start_las(&self) -> bool {
        let image = &self.config.las_image;
        if !self.runtime.pull_image(image).await && !self.runtime.image_exists(image).await {
            error!(target: "worker::tee", image, "LAS image unavailable");
            return false;
        }
        let spec = ContainerRunSpec::new(image.clone())
            .with_name(self.config.las_container_name.clone())
            .with_port(self.config.las_port)
            .with_sgx(true);
        match self.runtime.run(&spec).await {
            Ok(_) => {
                info!(target: "worker::tee", name = %self.config.las_container_name, port = self.config.las_port, "LAS started");
                true
            }
            Err(e) => {
                error!(target: "worker::tee", ?e, "failed to start LAS");
                false
            }
        }
    }

    /// True if enclave tasks can run on this worker.
    pub fn is_enabled(&self) -> bool {
        self.las_started
    }

    /// Ask the session service for an enclave session.
    pub async fn create_session(&self, auth: &TaskAuthorization) -> Option<String> {
        match self.secrets.create_tee_session(auth).await {
            Ok(session_id) if !session_id.is_empty() => {
                info!(target: "worker::tee", chain_task_id = %auth.chain_task_id, %session_id, "enclave session created");
                Some(session_id)
            }
            Ok(_) => {
                warn!(target: "worker::tee", chain_task_id = %auth.chain_task_id, "empty enclave session id");
                None
            }
            Err(e) => {
                error!(target: "worker::tee", chain_task_id = %auth.chain_task_id, ?e, "failed to create enclave session");
                None
            }
        }
    }

    /// Environment expected by the enclave runtime.
    pub fn build_enclave_env(
        &self,
        session_config_id: &str,
        cas_url: &str,
        heap_size: &str,
    ) -> BTreeMap<String, String> {
        BTreeMap::from([
            (SCONE_CAS_ADDR.to_string(), cas_url.to_string()),
            (SCONE_LAS_ADDR.to_string(), self.config.las_url()),
            (SCONE_CONFIG_ID.to_string(), session_config_id.to_string()),
            (SCONE_HEAP.to_string(), heap_size.to_string()),
            (SCONE_LOG.to_string(), "7".to_string()),
            (SCONE_VERSION.to_string(), "1".to_string()),
        ])
    }

    /// Spec of the enclave container running `offer` under `session_id`.
    pub fn build_container_spec(
        &self,
        session_id: &str,
        offer: &TaskOffer,
        output_dir: &Path,
    ) -> ContainerRunSpec {
        let env = self.build_enclave_env(
            session_id,
            &self.config.cas_url,
            &self.config.enclave_heap_size,
        );
        let mut spec = ContainerRunSpec::new(offer.app_uri.clone())
            .with_name(offer.chain_task_id().to_string())
            .with_cmd(offer.cmd_args())
            .with_bind(output_dir, ENCLAVE_OUTPUT_DIR)
            .with_sgx(true)
            .with_max_execution_time(offer.max_execution_time());
        spec.env = env;
        spec
    }

    /// Stop and remove the LAS if this manager started it.
    pub async fn shutdown(&self) {
        if !self.las_started {
            return;
        }
        let name = &self.config.las_container_name;
        if self.runtime.stop_and_remove(name).await {
            info!(target: "worker::tee", name, "LAS stopped");
        } else {
            warn!(target: "worker::tee", name, "failed to stop LAS");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cw_config::DockerConfig;
    use cw_test_utils::{task_offer, EngineCall, MockContainerEngine, MockSecretsClient};
    use cw_types::{Address, B256};
    use std::path::PathBuf;
    use tempfile::NamedTempFile;

    fn runtime(engine: &Arc<MockContainerEngine>) -> ContainerRuntime<MockContainerEngine> {
        ContainerRuntime::new(engine.clone(), DockerConfig::default())
    }

    #[tokio::test]
    async fn test_enabled_with_device_and_las() -> eyre::Result<()> {
        let engine = Arc::new(MockContainerEngine::default());
        engine.set_run_duration(std::time::Duration::from_secs(3600));
        let device = NamedTempFile::new()?;
        let config = TeeConfig::default();
        let manager = TeeSessionManager::start(
            runtime(&engine),
            Arc::new(MockSecretsClient::default()),
            config.clone(),
            device.path(),
        )
        .await;

        assert!(manager.is_enabled());
        let specs = engine.created_specs();
        assert_eq!(specs.len(), 1);
        assert!(specs[0].sgx);
        assert_eq!(specs[0].port, Some(config.las_port));
        assert!(specs[0].is_background_service());

        manager.shutdown().await;
        assert!(engine.calls().contains(&EngineCall::Remove(config.las_container_name.clone())));
        assert_eq!(engine.live_containers(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_disabled_without_device() {
        let engine = Arc::new(MockContainerEngine::default());
        let manager = TeeSessionManager::start(
            runtime(&engine),
            Arc::new(MockSecretsClient::default()),
            TeeConfig::default(),
            &PathBuf::from("/nonexistent/isgx"),
        )
        .await;
        assert!(!manager.is_enabled());
        assert!(engine.calls().is_empty());

        // nothing to clean up
        manager.shutdown().await;
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_when_las_fails() -> eyre::Result<()> {
        let engine = Arc::new(MockContainerEngine::default());
        engine.fail_start();
        let device = NamedTempFile::new()?;
        let manager = TeeSessionManager::start(
            runtime(&engine),
            Arc::new(MockSecretsClient::default()),
            TeeConfig::default(),
            device.path(),
        )
        .await;
        assert!(!manager.is_enabled());
        Ok(())
    }

    #[tokio::test]
    async fn test_session_and_container_spec() -> eyre::Result<()> {
        let engine = Arc::new(MockContainerEngine::default());
        let device = NamedTempFile::new()?;
        let config = TeeConfig::default();
        let manager = TeeSessionManager::start(
            runtime(&engine),
            Arc::new(MockSecretsClient::with_session("session-1")),
            config.clone(),
            device.path(),
        )
        .await;

        let mut offer = task_offer(B256::repeat_byte(1), Address::repeat_byte(2));
        offer.is_trusted_execution = true;
        let session = manager.create_session(&offer.contribution_authorization).await;
        assert_eq!(session.as_deref(), Some("session-1"));

        let spec = manager.build_container_spec("session-1", &offer, Path::new("/tmp/out"));
        assert!(spec.sgx);
        assert_eq!(spec.image, offer.app_uri);
        assert_eq!(spec.env[SCONE_CONFIG_ID], "session-1");
        assert_eq!(spec.env[SCONE_LAS_ADDR], config.las_url());
        assert_eq!(spec.env[SCONE_CAS_ADDR], config.cas_url);
        assert_eq!(spec.env[SCONE_HEAP], config.enclave_heap_size);
        assert_eq!(spec.binds[Path::new("/tmp/out")], ENCLAVE_OUTPUT_DIR);
        assert_eq!(spec.max_execution_time, offer.max_execution_time());
        Ok(())
    }

    #[tokio::test]
    async fn test_session_failure_is_none() {
        let engine = Arc::new(MockContainerEngine::default());
        let manager = TeeSessionManager::start(
            runtime(&engine),
            Arc::new(MockSecretsClient::default()),
            TeeConfig::default(),
            Path::new("/nonexistent/isgx"),
        )
        .await;
        let offer = task_offer(B256::repeat_byte(1), Address::repeat_byte(2));
        assert!(manager.create_session(&offer.contribution_authorization).await.is_none());
    }
}
