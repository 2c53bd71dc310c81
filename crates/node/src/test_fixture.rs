//! Worker components wired to in-memory collaborators.

use crate::ReplicateExecutor;
use cw_chain::{ChainService, ConsensusValidator};
use cw_config::{ChainConfig, DockerConfig, TeeConfig};
use cw_docker::ContainerRuntime;
use cw_executor::ExecutionOrchestrator;
use cw_pubsub::NotificationDispatcher;
use cw_tee::TeeSessionManager;
use cw_test_utils::{
    task_offer, MockChainClient, MockContainerEngine, MockCoordinator, MockDatasetService,
    MockPushSession, MockResultRepository, MockResultStore, MockSecretsClient,
};
use cw_types::{Address, Notifier, TaskManager, B256};
use std::{path::Path, sync::Arc, time::Duration};

/// Output of every container.
pub(crate) const STDOUT: &str = "0xdeadbeef";

pub(crate) struct Fixture {
    pub worker: Address,
    pub client: Arc<MockChainClient>,
    pub engine: Arc<MockContainerEngine>,
    pub coordinator: Arc<MockCoordinator>,
    pub session: Arc<MockPushSession>,
    pub results: Arc<MockResultStore>,
    pub shutdown: Notifier,
    pub replicates: ReplicateExecutor<MockContainerEngine>,
    pub dispatcher: NotificationDispatcher,
    pub manager: TaskManager,
}

impl Fixture {
    pub async fn new(max_concurrent_tasks: usize) -> Self {
        let worker = Address::repeat_byte(0x11);
        let manager = TaskManager::new("test");
        let shutdown = Notifier::new();

        let client = Arc::new(MockChainClient::new(worker));
        let mut chain = ChainService::new(client.clone(), ChainConfig::default());
        chain.spawn_tx_queue(&manager.get_spawner());

        let engine = Arc::new(MockContainerEngine::default());
        engine.add_image(&task_offer(B256::ZERO, worker).app_uri);
        engine.set_logs(STDOUT);
        let docker = DockerConfig {
            status_poll_interval: Duration::from_millis(10),
            ..Default::default()
        };
        let runtime = ContainerRuntime::new(engine.clone(), docker);

        let secrets = Arc::new(MockSecretsClient::default());
        let tee_config = TeeConfig { enabled: false, ..Default::default() };
        let tee = Arc::new(
            TeeSessionManager::start(
                runtime.clone(),
                secrets.clone(),
                tee_config,
                Path::new("/nonexistent"),
            )
            .await,
        );
        let results = Arc::new(MockResultStore::default());
        let orchestrator = Arc::new(ExecutionOrchestrator::new(
            runtime,
            tee,
            secrets,
            Arc::new(MockDatasetService::default()),
            results.clone(),
        ));

        let validator = ConsensusValidator::new(chain, results.clone());
        let coordinator = Arc::new(MockCoordinator::default());
        let session = Arc::new(MockPushSession::default());
        let dispatcher = NotificationDispatcher::new(
            session.clone(),
            validator.clone(),
            coordinator.clone(),
            Arc::new(MockResultRepository::default()),
            results.clone(),
            manager.get_spawner(),
            shutdown.clone(),
        );
        let replicates = ReplicateExecutor::new(
            orchestrator,
            validator,
            coordinator.clone(),
            results.clone(),
            max_concurrent_tasks,
            manager.get_spawner(),
            shutdown.clone(),
        );

        Self {
            worker,
            client,
            engine,
            coordinator,
            session,
            results,
            shutdown,
            replicates,
            dispatcher,
            manager,
        }
    }
}
