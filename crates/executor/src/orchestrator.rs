//! The two computation pipelines.
//!
//! Both end in [ReplicateStatus::Computed] with the container output, or
//! [ReplicateStatus::ComputeFailed] with a diagnostic message.

use cw_docker::ContainerRuntime;
use cw_tee::TeeSessionManager;
use cw_types::{
    ContainerEngine, ContainerRunSpec, DatasetService, ReplicateStatus, ResultStore,
    SecretsClient, TaskOffer,
};
use std::{fmt, sync::Arc};
use tracing::{error, info, warn};

/// Mount point of the task input inside standard containers.
pub const INPUT_MOUNT: &str = "/iexec_in";
/// Mount point of the task output inside standard containers.
pub const OUTPUT_MOUNT: &str = "/iexec_out";
/// Environment variable holding the dataset file name.
pub const DATASET_FILENAME_ENV: &str = "DATASET_FILENAME";

/// Result of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeOutcome {
    pub status: ReplicateStatus,
    /// Container output on success, diagnostic message on failure.
    pub stdout: String,
}

impl ComputeOutcome {
    pub fn computed(stdout: String) -> Self {
        Self { status: ReplicateStatus::Computed, stdout }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self { status: ReplicateStatus::ComputeFailed, stdout: message.into() }
    }

    pub fn is_computed(&self) -> bool {
        self.status == ReplicateStatus::Computed
    }
}

/// Runs offered tasks in containers.
pub struct ExecutionOrchestrator<E> {
    runtime: ContainerRuntime<E>,
    tee: Arc<TeeSessionManager<E>>,
    secrets: Arc<dyn SecretsClient>,
    datasets: Arc<dyn DatasetService>,
    results: Arc<dyn ResultStore>,
}

impl<E> fmt::Debug for ExecutionOrchestrator<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionOrchestrator").field("tee", &self.tee).finish_non_exhaustive()
    }
}

impl<E: ContainerEngine> ExecutionOrchestrator<E> {
    /// Create a new instance of [Self].
    pub fn new(
        runtime: ContainerRuntime<E>,
        tee: Arc<TeeSessionManager<E>>,
        secrets: Arc<dyn SecretsClient>,
        datasets: Arc<dyn DatasetService>,
        results: Arc<dyn ResultStore>,
    ) -> Self {
        Self { runtime, tee, secrets, datasets, results }
    }

    /// Run the pipeline matching the offer.
    pub async fn compute(&self, offer: &TaskOffer) -> ComputeOutcome {
        let chain_task_id = offer.chain_task_id();
        if !self.ensure_image(&offer.app_uri).await {
            return ComputeOutcome::failed(format!("Failed to download app image {}", offer.app_uri));
        }
        let outcome = if offer.is_trusted_execution {
            self.compute_tee(offer).await
        } else {
            self.compute_standard(offer).await
        };
        match outcome.status {
            ReplicateStatus::Computed => {
                info!(target: "worker::executor", %chain_task_id, bytes = outcome.stdout.len(), "computation finished")
            }
            _ => {
                error!(target: "worker::executor", %chain_task_id, reason = %outcome.stdout, "computation failed")
            }
        }
        outcome
    }

    async fn ensure_image(&self, image: &str) -> bool {
        self.runtime.image_exists(image).await || self.runtime.pull_image(image).await
    }

    /// Enclave pipeline: session, enclave container, output.
    pub async fn compute_tee(&self, offer: &TaskOffer) -> ComputeOutcome {
        let chain_task_id = offer.chain_task_id();
        if !self.tee.is_enabled() {
            return ComputeOutcome::failed("Trusted execution is not available on this worker");
        }
        let Some(session_id) = self.tee.create_session(&offer.contribution_authorization).await
        else {
            return ComputeOutcome::failed(
                "Could not generate scone secure session for tee computation",
            );
        };

        let output_dir = self.results.output_dir(chain_task_id);
        let spec = self.tee.build_container_spec(&session_id, offer, &output_dir);
        self.run(spec).await
    }

    /// Standard pipeline: secrets, dataset, container, output.
    pub async fn compute_standard(&self, offer: &TaskOffer) -> ComputeOutcome {
        let chain_task_id = offer.chain_task_id();
        if let Err(e) = self.secrets.fetch_task_secrets(&offer.contribution_authorization).await {
            warn!(target: "worker::executor", %chain_task_id, ?e, "no task secrets, continuing without");
        }

        let dataset_filename = offer.dataset_filename();
        if self.datasets.is_decryption_needed(chain_task_id).await {
            let uri = offer.dataset_uri.as_deref().unwrap_or_default();
            let Some(name) = dataset_filename.as_deref() else {
                return ComputeOutcome::failed(format!("Failed to decrypt dataset, URI:{uri}"));
            };
            if let Err(e) = self.datasets.decrypt(chain_task_id, name).await {
                error!(target: "worker::executor", %chain_task_id, ?e, "dataset decryption failed");
                return ComputeOutcome::failed(format!("Failed to decrypt dataset, URI:{uri}"));
            }
        }

        let mut spec = ContainerRunSpec::new(offer.app_uri.clone())
            .with_name(chain_task_id.to_string())
            .with_cmd(offer.cmd_args())
            .with_bind(self.results.input_dir(chain_task_id), INPUT_MOUNT)
            .with_bind(self.results.output_dir(chain_task_id), OUTPUT_MOUNT)
            .with_max_execution_time(offer.max_execution_time());
        if let Some(name) = dataset_filename {
            spec = spec.with_env(DATASET_FILENAME_ENV, name);
        }
        self.run(spec).await
    }

    async fn run(&self, spec: ContainerRunSpec) -> ComputeOutcome {
        match self.runtime.run(&spec).await {
            Ok(stdout) if stdout.is_empty() => ComputeOutcome::failed("Failed to start computation"),
            Ok(stdout) => ComputeOutcome::computed(stdout),
            Err(e) => ComputeOutcome::failed(e.to_string()),
        }
    }
}
