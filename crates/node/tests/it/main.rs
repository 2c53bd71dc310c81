//! Node IT tests

// unused deps lint confusion
#![allow(unused_crate_dependencies)]

use assert_matches::assert_matches;
use cw_config::WorkerConfig;
use cw_node::{start_worker, Collaborators, RunningWorker};
use cw_test_utils::{
    active_task, revealing_task, task_offer, ChainCall, EngineCall, MockChainClient,
    MockContainerEngine, MockCoordinator, MockDatasetService, MockPushSession,
    MockResultRepository, MockResultStore, MockSecretsClient,
};
use cw_types::{
    now, task_topic, Address, ComputationResult, InboundMessage, Notifier, ReplicateStatus,
    ResultStore as _, SubscriptionId, TaskJoinError, TaskManager, TaskNotification,
    TaskNotificationType, B256, U256,
};
use std::{sync::Arc, time::Duration};
use tokio::{sync::mpsc, time::timeout};

const STDOUT: &str = "0x1234";

/// A worker running on in-memory collaborators.
struct Harness {
    worker: Address,
    client: Arc<MockChainClient>,
    engine: Arc<MockContainerEngine>,
    coordinator: Arc<MockCoordinator>,
    repository: Arc<MockResultRepository>,
    session: Arc<MockPushSession>,
    results: Arc<MockResultStore>,
    shutdown: Notifier,
    inbound: mpsc::Sender<InboundMessage>,
    running: RunningWorker<MockContainerEngine>,
    manager: TaskManager,
}

fn test_config() -> WorkerConfig {
    let mut config = WorkerConfig::default();
    config.worker.task_poll_interval = Duration::from_millis(20);
    config.worker.ping_interval = Duration::from_millis(100);
    config.docker.status_poll_interval = Duration::from_millis(10);
    config.tee.enabled = false;
    config.worker.enclave_address = Address::repeat_byte(0x33);
    config
}

impl Harness {
    async fn start() -> eyre::Result<Self> {
        let worker = Address::repeat_byte(0x11);
        let manager = TaskManager::new("it");
        let shutdown = Notifier::new();

        let client = Arc::new(MockChainClient::new(worker));
        let engine = Arc::new(MockContainerEngine::default());
        engine.add_image(&task_offer(B256::ZERO, worker).app_uri);
        engine.set_logs(STDOUT);
        let coordinator = Arc::new(MockCoordinator::default());
        let repository = Arc::new(MockResultRepository::default());
        let session = Arc::new(MockPushSession::default());
        let results = Arc::new(MockResultStore::default());
        let (inbound, inbound_rx) = mpsc::channel(16);

        let collaborators = Collaborators {
            chain: client.clone(),
            engine: engine.clone(),
            coordinator: coordinator.clone(),
            repository: repository.clone(),
            results: results.clone(),
            secrets: Arc::new(MockSecretsClient::default()),
            datasets: Arc::new(MockDatasetService::default()),
            session: session.clone(),
            inbound: inbound_rx,
        };
        let running =
            start_worker(&test_config(), collaborators, &manager.get_spawner(), &shutdown).await?;

        Ok(Self {
            worker,
            client,
            engine,
            coordinator,
            repository,
            session,
            results,
            shutdown,
            inbound,
            running,
            manager,
        })
    }

    /// Offer `task` and wait for the contribution.
    async fn contribute(&self, task: B256) -> eyre::Result<()> {
        self.client.set_task(active_task(task));
        self.coordinator.push_offer(task_offer(task, self.worker));
        self.wait_for(task, ReplicateStatus::Contributed).await
    }

    /// Move the task to its reveal phase with `consensus` as consensus value.
    fn start_reveal(&self, task: B256, consensus: B256) {
        self.client.set_task(revealing_task(task, consensus, now() + 3600));
    }

    async fn local_result(&self, task: B256) -> eyre::Result<ComputationResult> {
        let hash = self.results.deterministic_hash(task).await?;
        Ok(ComputationResult::new(self.worker, task, hash))
    }

    async fn notify(
        &self,
        task: B256,
        kind: TaskNotificationType,
        workers: Vec<Address>,
    ) -> eyre::Result<()> {
        let notification = TaskNotification::new(task, kind, workers);
        let message = InboundMessage {
            subscription: SubscriptionId("sub-1".to_string()),
            destination: task_topic(&task),
            body: serde_json::to_string(&notification)?,
        };
        self.inbound.send(message).await?;
        Ok(())
    }

    async fn wait_for(&self, task: B256, status: ReplicateStatus) -> eyre::Result<()> {
        timeout(Duration::from_secs(10), self.coordinator.wait_for_status(task, status)).await?;
        Ok(())
    }
}

#[tokio::test]
async fn test_replicate_lifecycle() -> eyre::Result<()> {
    let harness = Harness::start().await?;
    let task = B256::repeat_byte(1);
    let topic = task_topic(&task);

    harness.contribute(task).await?;
    assert_eq!(harness.session.active_destinations(), vec![topic.clone()]);

    let local = harness.local_result(task).await?;
    harness.start_reveal(task, local.result_hash);
    harness.notify(task, TaskNotificationType::PleaseReveal, vec![harness.worker]).await?;
    harness.wait_for(task, ReplicateStatus::Revealed).await?;
    assert_eq!(harness.client.reveals(), vec![task]);

    // broadcast to every worker of the task
    harness.notify(task, TaskNotificationType::PleaseUpload, vec![]).await?;
    harness.wait_for(task, ReplicateStatus::ResultUploaded).await?;
    assert_eq!(harness.repository.uploads(), vec![(task, STDOUT.len())]);

    harness.notify(task, TaskNotificationType::Completed, vec![harness.worker]).await?;
    harness.wait_for(task, ReplicateStatus::Completed).await?;
    assert!(harness.session.subscription_for(&topic).is_none());
    assert_eq!(harness.results.removed(), vec![task]);

    assert_eq!(
        harness.coordinator.statuses(task),
        vec![
            ReplicateStatus::Running,
            ReplicateStatus::Computed,
            ReplicateStatus::Contributing,
            ReplicateStatus::Contributed,
            ReplicateStatus::Revealing,
            ReplicateStatus::Revealed,
            ReplicateStatus::ResultUploading,
            ReplicateStatus::ResultUploaded,
            ReplicateStatus::Completed,
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_wrong_consensus_is_not_revealed() -> eyre::Result<()> {
    let harness = Harness::start().await?;
    let task = B256::repeat_byte(2);
    harness.contribute(task).await?;

    harness.start_reveal(task, B256::repeat_byte(0xee));
    harness.notify(task, TaskNotificationType::PleaseReveal, vec![harness.worker]).await?;
    harness.wait_for(task, ReplicateStatus::CantReveal).await?;
    assert!(harness.client.reveals().is_empty());
    // still subscribed, the coordinator decides what happens next
    assert!(harness.running.dispatcher().is_subscribed(task));
    Ok(())
}

#[tokio::test]
async fn test_notifications_for_other_workers_are_ignored() -> eyre::Result<()> {
    let harness = Harness::start().await?;
    let task = B256::repeat_byte(3);
    harness.contribute(task).await?;
    let local = harness.local_result(task).await?;
    harness.start_reveal(task, local.result_hash);

    let other = Address::repeat_byte(0x22);
    harness.notify(task, TaskNotificationType::PleaseReveal, vec![other]).await?;
    harness.notify(task, TaskNotificationType::PleaseAbortConsensusReached, vec![harness.worker]).await?;
    harness.wait_for(task, ReplicateStatus::AbortConsensusReached).await?;

    // notifications of one task are handled in order
    assert!(harness.client.reveals().is_empty());
    assert!(!harness.coordinator.statuses(task).contains(&ReplicateStatus::Revealing));
    assert!(!harness.running.dispatcher().is_subscribed(task));
    Ok(())
}

#[tokio::test]
async fn test_out_of_gas_stops_worker() -> eyre::Result<()> {
    let mut harness = Harness::start().await?;
    let task = B256::repeat_byte(4);
    harness.client.set_task(active_task(task));
    harness.client.set_balance(U256::ZERO);
    harness.coordinator.push_offer(task_offer(task, harness.worker));

    harness.wait_for(task, ReplicateStatus::OutOfGas).await?;
    let res = timeout(Duration::from_secs(5), harness.manager.join(harness.shutdown.clone())).await?;
    assert!(res.is_ok());
    assert!(harness.shutdown.noticed());
    assert!(!harness.client.calls().iter().any(|call| matches!(call, ChainCall::Contribute(_))));
    harness.manager.abort_all_tasks();
    Ok(())
}

#[tokio::test]
async fn test_shutdown_releases_resources() -> eyre::Result<()> {
    let mut harness = Harness::start().await?;
    let task = B256::repeat_byte(5);
    harness.contribute(task).await?;
    assert_eq!(harness.running.dispatcher().subscription_count(), 1);

    harness.shutdown.notify();
    timeout(Duration::from_secs(5), harness.manager.join(harness.shutdown.clone())).await??;
    harness.running.shutdown().await;
    harness.manager.abort_all_tasks();

    assert_eq!(harness.running.dispatcher().subscription_count(), 0);
    assert!(harness.session.active_destinations().is_empty());
    let calls = harness.engine.calls();
    assert!(calls.iter().any(|call| matches!(call, EngineCall::RemoveNetwork(_))));
    Ok(())
}

#[tokio::test]
async fn test_shutdown_removes_running_task_container() -> eyre::Result<()> {
    let mut harness = Harness::start().await?;
    let task = B256::repeat_byte(6);
    harness.engine.set_run_duration(Duration::from_secs(3600));
    harness.client.set_task(active_task(task));
    harness.coordinator.push_offer(task_offer(task, harness.worker));
    harness.wait_for(task, ReplicateStatus::Running).await?;
    timeout(Duration::from_secs(5), async {
        while harness.engine.live_containers() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;

    harness.shutdown.notify();
    timeout(Duration::from_secs(5), harness.manager.join(harness.shutdown.clone())).await??;
    harness.running.shutdown().await;
    harness.manager.abort_all_tasks();

    assert_eq!(harness.engine.live_containers(), 0);
    let calls = harness.engine.calls();
    let name = task.to_string();
    let stop = calls.iter().position(|call| *call == EngineCall::Stop(name.clone()));
    let remove_network =
        calls.iter().position(|call| matches!(call, EngineCall::RemoveNetwork(_)));
    assert_matches!((stop, remove_network), (Some(stop), Some(network)) if stop < network);
    Ok(())
}

#[tokio::test]
async fn test_no_enclave_challenge_without_tee() -> eyre::Result<()> {
    let harness = Harness::start().await?;
    timeout(Duration::from_secs(5), async {
        while harness.coordinator.offer_requests() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;
    let challenges = harness.coordinator.enclave_challenges();
    assert!(!challenges.is_empty());
    assert!(challenges.iter().all(|enclave| *enclave == Address::ZERO));
    Ok(())
}

#[tokio::test]
async fn test_closed_push_channel_stops_worker() -> eyre::Result<()> {
    let Harness { inbound, mut manager, shutdown, .. } = Harness::start().await?;
    drop(inbound);

    let res = timeout(Duration::from_secs(5), manager.join(shutdown.clone())).await?;
    assert_matches!(res, Err(TaskJoinError::CriticalExited(name)) if name == "notification dispatch");
    assert!(shutdown.noticed());
    manager.abort_all_tasks();
    Ok(())
}

#[tokio::test]
async fn test_heartbeat_runs() -> eyre::Result<()> {
    let harness = Harness::start().await?;
    timeout(Duration::from_secs(5), async {
        while harness.coordinator.pings() < 2 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await?;
    Ok(())
}
