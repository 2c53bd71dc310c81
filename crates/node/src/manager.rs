//! The worker node.
//!
//! Builds every component, runs them on one [TaskManager] and tears them
//! down in order once shutdown is signaled.

use crate::{spawn_heartbeat, ReplicateExecutor, TaskIntakeLoop};
use cw_chain::{ChainService, ConsensusValidator, RpcChainClient};
use cw_config::{KeyConfig, WorkerConfig};
use cw_coordinator::{HttpCoordinatorClient, HttpResultRepository};
use cw_docker::{ContainerRuntime, DockerEngine};
use cw_executor::{ExecutionOrchestrator, LocalDatasetService, LocalResultStore, SmsClient, TaskDirs};
use cw_pubsub::{NotificationDispatcher, StompSession};
use cw_tee::TeeSessionManager;
use cw_types::{
    Address, ChainClient, ContainerEngine, CoordinatorClient, DatasetService, InboundMessage, Notifier,
    PushSession, ResultRepository, ResultStore, SecretsClient, TaskManager, TaskSpawner,
};
use eyre::WrapErr as _;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

/// The long-running task manager name.
const NODE_TASK_MANAGER: &str = "Worker Task Manager";

/// Everything the worker talks to.
pub struct Collaborators<E> {
    pub chain: Arc<dyn ChainClient>,
    pub engine: Arc<E>,
    pub coordinator: Arc<dyn CoordinatorClient>,
    pub repository: Arc<dyn ResultRepository>,
    pub results: Arc<dyn ResultStore>,
    pub secrets: Arc<dyn SecretsClient>,
    pub datasets: Arc<dyn DatasetService>,
    pub session: Arc<dyn PushSession>,
    /// Messages received on `session`.
    pub inbound: mpsc::Receiver<InboundMessage>,
}

/// Components of a started worker that need an orderly shutdown.
pub struct RunningWorker<E> {
    dispatcher: NotificationDispatcher,
    tee: Arc<TeeSessionManager<E>>,
    runtime: ContainerRuntime<E>,
    network_name: String,
}

impl<E: ContainerEngine> RunningWorker<E> {
    pub fn dispatcher(&self) -> &NotificationDispatcher {
        &self.dispatcher
    }

    /// Close subscriptions, remove task containers still running, stop the
    /// LAS and remove the worker network.
    ///
    /// Loops must already have noticed shutdown.
    pub async fn shutdown(&self) {
        self.dispatcher.unsubscribe_all();
        let stopped = self.runtime.stop_active().await;
        if stopped > 0 {
            info!(target: "worker::node", stopped, "removed running task containers");
        }
        self.tee.shutdown().await;
        self.runtime.remove_network(&self.network_name).await;
        info!(target: "worker::node", "worker components stopped");
    }
}

/// Wire the components over `collaborators` and spawn the worker loops.
pub async fn start_worker<E: ContainerEngine>(
    config: &WorkerConfig,
    collaborators: Collaborators<E>,
    spawner: &TaskSpawner,
    shutdown: &Notifier,
) -> eyre::Result<RunningWorker<E>> {
    let Collaborators {
        chain,
        engine,
        coordinator,
        repository,
        results,
        secrets,
        datasets,
        session,
        inbound,
    } = collaborators;
    let worker = chain.worker_address();

    let mut chain = ChainService::new(chain, config.chain.clone());
    chain.spawn_tx_queue(spawner);
    let validator = ConsensusValidator::new(chain, results.clone());

    let runtime = ContainerRuntime::new(engine, config.docker.clone());
    let network_name = config.docker.network_name.clone();
    if !runtime.ensure_network(&network_name).await {
        eyre::bail!("failed to create docker network {network_name}");
    }
    let tee = Arc::new(
        TeeSessionManager::start(
            runtime.clone(),
            secrets.clone(),
            config.tee.clone(),
            &config.docker.sgx_device,
        )
        .await,
    );
    let orchestrator = Arc::new(ExecutionOrchestrator::new(
        runtime.clone(),
        tee.clone(),
        secrets,
        datasets,
        results.clone(),
    ));

    let dispatcher = NotificationDispatcher::new(
        session,
        validator.clone(),
        coordinator.clone(),
        repository,
        results.clone(),
        spawner.clone(),
        shutdown.clone(),
    );
    dispatcher.spawn(inbound);

    let replicates = ReplicateExecutor::new(
        orchestrator,
        validator,
        coordinator.clone(),
        results,
        config.worker.max_concurrent_tasks,
        spawner.clone(),
        shutdown.clone(),
    );
    spawn_heartbeat(coordinator.clone(), config.worker.ping_interval, spawner, shutdown.subscribe());
    // without an enclave only standard tasks can be offered
    let enclave_address =
        if tee.is_enabled() { config.worker.enclave_address } else { Address::ZERO };
    TaskIntakeLoop::new(
        coordinator,
        dispatcher.clone(),
        replicates,
        worker,
        enclave_address,
        config.worker.task_poll_interval,
    )
    .spawn(spawner, shutdown.subscribe());

    info!(target: "worker::node", %worker, tee = tee.is_enabled(), "worker started");
    Ok(RunningWorker { dispatcher, tee, runtime, network_name })
}

/// The worker process: production collaborators and lifecycle.
#[derive(Debug)]
pub struct WorkerNode {
    config: WorkerConfig,
    key_config: KeyConfig,
    /// Notified to stop the worker.
    shutdown: Notifier,
}

impl WorkerNode {
    /// Create a new instance of [Self].
    pub fn new(config: WorkerConfig, key_config: KeyConfig, shutdown: Notifier) -> Self {
        Self { config, key_config, shutdown }
    }

    /// Run until shutdown is notified or a critical task ends.
    pub async fn run(&self) -> eyre::Result<()> {
        let mut task_manager = TaskManager::new(NODE_TASK_MANAGER);
        let spawner = task_manager.get_spawner();

        let collaborators = self.collaborators(&spawner).await?;
        let running = start_worker(&self.config, collaborators, &spawner, &self.shutdown).await?;

        let result = task_manager.join(self.shutdown.clone()).await;
        running.shutdown().await;
        task_manager.abort_all_tasks();
        info!(target: "worker::node", "worker stopped");
        result.map_err(Into::into)
    }

    async fn collaborators(&self, spawner: &TaskSpawner) -> eyre::Result<Collaborators<DockerEngine>> {
        let config = &self.config;
        let worker = self.key_config.address();

        let chain = RpcChainClient::new(&config.chain, self.key_config.signer())
            .wrap_err("failed to create chain client")?;
        let engine = DockerEngine::connect_local(config.docker.sgx_device.clone())
            .wrap_err("failed to connect to docker")?;
        let coordinator = HttpCoordinatorClient::new(&config.coordinator, worker)
            .wrap_err("failed to create coordinator client")?;
        let repository = HttpResultRepository::new(
            &config.results.repository_url,
            config.coordinator.request_timeout,
        )
        .wrap_err("failed to create result repository client")?;

        let dirs = TaskDirs::new(config.results_dir());
        let secrets =
            SmsClient::new(&config.sms, dirs.clone()).wrap_err("failed to create sms client")?;
        let (session, inbound) = StompSession::connect(&config.push, spawner)
            .await
            .wrap_err_with(|| format!("failed to connect to {}", config.push.url))?;

        Ok(Collaborators {
            chain: Arc::new(chain),
            engine: Arc::new(engine),
            coordinator: Arc::new(coordinator),
            repository: Arc::new(repository),
            results: Arc::new(LocalResultStore::new(dirs.clone())),
            secrets: Arc::new(secrets),
            datasets: Arc::new(LocalDatasetService::new(dirs)),
            session: Arc::new(session),
            inbound,
        })
    }
}
