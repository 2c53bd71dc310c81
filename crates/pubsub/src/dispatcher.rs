// SPDX-License-Identifier: Apache-2.0
//! Per-task reaction to coordinator notifications.
//!
//! The dispatcher owns one subscription per accepted task. Inbound messages
//! are decoded and filtered on the dispatch loop, then handed to a task
//! handler so one task's notifications run in order while slow chain or
//! upload work never blocks other tasks.

use cw_chain::ConsensusValidator;
use cw_types::{
    task_topic, Address, CoordinatorClient, InboundMessage, Notifier, PubSubResult, PushSession,
    ReplicateStatus, ResultRepository, ResultStore, SubscriptionId, TaskNotification,
    TaskNotificationType, TaskSpawner, B256,
};
use dashmap::{mapref::entry::Entry, DashMap};
use std::{fmt, sync::Arc};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Open subscription and the queue of its task handler.
#[derive(Debug)]
struct TaskSubscription {
    id: SubscriptionId,
    notifications: mpsc::UnboundedSender<TaskNotification>,
}

struct Inner {
    worker: Address,
    session: Arc<dyn PushSession>,
    subscriptions: DashMap<B256, TaskSubscription>,
    validator: ConsensusValidator,
    coordinator: Arc<dyn CoordinatorClient>,
    repository: Arc<dyn ResultRepository>,
    results: Arc<dyn ResultStore>,
    spawner: TaskSpawner,
    shutdown: Notifier,
}

/// Routes task notifications to the replicate state machine.
#[derive(Clone)]
pub struct NotificationDispatcher {
    inner: Arc<Inner>,
}

impl fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationDispatcher")
            .field("worker", &self.inner.worker)
            .field("subscriptions", &self.inner.subscriptions.len())
            .finish()
    }
}

impl NotificationDispatcher {
    /// Create a new instance of [Self].
    ///
    /// `shutdown` is notified when the worker runs out of gas.
    pub fn new(
        session: Arc<dyn PushSession>,
        validator: ConsensusValidator,
        coordinator: Arc<dyn CoordinatorClient>,
        repository: Arc<dyn ResultRepository>,
        results: Arc<dyn ResultStore>,
        spawner: TaskSpawner,
        shutdown: Notifier,
    ) -> Self {
        let worker = validator.chain().worker_address();
        Self {
            inner: Arc::new(Inner {
                worker,
                session,
                subscriptions: DashMap::new(),
                validator,
                coordinator,
                repository,
                results,
                spawner,
                shutdown,
            }),
        }
    }

    /// Subscribe to the task topic. No-op if already subscribed.
    pub fn subscribe(&self, chain_task_id: B256) -> PubSubResult<()> {
        match self.inner.subscriptions.entry(chain_task_id) {
            Entry::Occupied(_) => {
                debug!(target: "worker::dispatcher", %chain_task_id, "already subscribed");
            }
            Entry::Vacant(entry) => {
                let id = self.inner.session.subscribe(&task_topic(&chain_task_id))?;
                let (notifications, rx) = mpsc::unbounded_channel();
                entry.insert(TaskSubscription { id, notifications });
                let this = self.clone();
                self.inner.spawner.spawn_task(
                    format!("task notifications {chain_task_id}"),
                    this.handle_task(chain_task_id, rx),
                );
                info!(target: "worker::dispatcher", %chain_task_id, "subscribed to task");
            }
        }
        Ok(())
    }

    /// Close the task subscription. No-op if not subscribed.
    pub fn unsubscribe(&self, chain_task_id: B256) {
        let Some((_, subscription)) = self.inner.subscriptions.remove(&chain_task_id) else {
            debug!(target: "worker::dispatcher", %chain_task_id, "not subscribed");
            return;
        };
        if let Err(e) = self.inner.session.unsubscribe(&subscription.id) {
            warn!(target: "worker::dispatcher", %chain_task_id, ?e, "failed to unsubscribe");
            return;
        }
        info!(target: "worker::dispatcher", %chain_task_id, "unsubscribed from task");
    }

    pub fn is_subscribed(&self, chain_task_id: B256) -> bool {
        self.inner.subscriptions.contains_key(&chain_task_id)
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.len()
    }

    /// Close every subscription. Called on shutdown.
    pub fn unsubscribe_all(&self) {
        let tasks: Vec<B256> = self.inner.subscriptions.iter().map(|e| *e.key()).collect();
        for chain_task_id in tasks {
            self.unsubscribe(chain_task_id);
        }
    }

    /// Spawn the dispatch loop reading `inbound` until shutdown.
    pub fn spawn(&self, mut inbound: mpsc::Receiver<InboundMessage>) {
        let this = self.clone();
        let mut shutdown = self.inner.shutdown.subscribe();
        self.inner.spawner.spawn_critical_task("notification dispatch", async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown => break,
                    message = inbound.recv() => match message {
                        Some(message) => this.dispatch(message),
                        None => {
                            warn!(target: "worker::dispatcher", "push session closed");
                            break;
                        }
                    },
                }
            }
            info!(target: "worker::dispatcher", "dispatch loop stopped");
        });
    }

    /// Decode one message and queue it for its task handler.
    fn dispatch(&self, message: InboundMessage) {
        let notification: TaskNotification = match serde_json::from_str(&message.body) {
            Ok(notification) => notification,
            Err(e) => {
                warn!(target: "worker::dispatcher", destination = %message.destination, ?e, "undecodable notification");
                return;
            }
        };
        let chain_task_id = notification.chain_task_id;
        if !notification.is_addressed_to(&self.inner.worker) {
            debug!(target: "worker::dispatcher", %chain_task_id, "notification for other workers");
            return;
        }
        let Some(subscription) = self.inner.subscriptions.get(&chain_task_id) else {
            debug!(target: "worker::dispatcher", %chain_task_id, "notification for unknown task");
            return;
        };
        if subscription.notifications.send(notification).is_err() {
            debug!(target: "worker::dispatcher", %chain_task_id, "task handler gone");
        }
    }

    /// Handle one task's notifications in arrival order.
    async fn handle_task(
        self,
        chain_task_id: B256,
        mut notifications: mpsc::UnboundedReceiver<TaskNotification>,
    ) {
        let mut shutdown = self.inner.shutdown.subscribe();
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                notification = notifications.recv() => match notification {
                    Some(notification) => self.handle_notification(notification).await,
                    None => break,
                },
            }
        }
        debug!(target: "worker::dispatcher", %chain_task_id, "task handler stopped");
    }

    /// Apply one notification to the task's replicate.
    pub async fn handle_notification(&self, notification: TaskNotification) {
        let chain_task_id = notification.chain_task_id;
        let kind = notification.task_notification_type;
        info!(target: "worker::dispatcher", %chain_task_id, ?kind, "task notification");
        match kind {
            TaskNotificationType::PleaseAbortContributionTimeout => {
                self.close_task(chain_task_id, ReplicateStatus::AbortContributionTimeout).await
            }
            TaskNotificationType::PleaseAbortConsensusReached => {
                self.close_task(chain_task_id, ReplicateStatus::AbortConsensusReached).await
            }
            TaskNotificationType::PleaseReveal => self.reveal(chain_task_id).await,
            TaskNotificationType::PleaseUpload => self.upload(chain_task_id).await,
            TaskNotificationType::Completed => {
                self.close_task(chain_task_id, ReplicateStatus::Completed).await
            }
            TaskNotificationType::Unsupported => {
                warn!(target: "worker::dispatcher", %chain_task_id, "unsupported notification type");
            }
        }
    }

    /// Terminal transition: drop the subscription and the local result.
    async fn close_task(&self, chain_task_id: B256, status: ReplicateStatus) {
        self.unsubscribe(chain_task_id);
        if let Err(e) = self.inner.results.remove(chain_task_id).await {
            warn!(target: "worker::dispatcher", %chain_task_id, ?e, "failed to remove local result");
        }
        self.report(chain_task_id, status).await;
    }

    async fn reveal(&self, chain_task_id: B256) {
        let validator = &self.inner.validator;
        if !validator.can_reveal(chain_task_id).await {
            self.report(chain_task_id, ReplicateStatus::CantReveal).await;
            return;
        }
        if !validator.has_enough_gas().await {
            error!(target: "worker::dispatcher", %chain_task_id, "out of gas, stopping worker");
            self.report(chain_task_id, ReplicateStatus::OutOfGas).await;
            self.inner.shutdown.notify();
            return;
        }

        self.report(chain_task_id, ReplicateStatus::Revealing).await;
        let status = match validator.reveal(chain_task_id).await {
            Ok(receipt) => {
                info!(target: "worker::dispatcher", %chain_task_id, block = ?receipt.block_number, "revealed");
                ReplicateStatus::Revealed
            }
            Err(e) => {
                error!(target: "worker::dispatcher", %chain_task_id, ?e, "reveal failed");
                ReplicateStatus::RevealFailed
            }
        };
        self.report(chain_task_id, status).await;
    }

    async fn upload(&self, chain_task_id: B256) {
        self.report(chain_task_id, ReplicateStatus::ResultUploading).await;
        let uploaded = match self.inner.results.archive(chain_task_id).await {
            Ok(archive) => self
                .inner
                .repository
                .upload_result(chain_task_id, archive)
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        let status = match uploaded {
            Ok(()) => ReplicateStatus::ResultUploaded,
            Err(e) => {
                error!(target: "worker::dispatcher", %chain_task_id, %e, "result upload failed");
                ReplicateStatus::ResultUploadFailed
            }
        };
        self.report(chain_task_id, status).await;
    }

    async fn report(&self, chain_task_id: B256, status: ReplicateStatus) {
        if let Err(e) = self.inner.coordinator.update_replicate_status(chain_task_id, status).await {
            warn!(target: "worker::dispatcher", %chain_task_id, %status, ?e, "failed to report status");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use cw_chain::ChainService;
    use cw_config::ChainConfig;
    use cw_test_utils::{
        contribution_for, revealing_task, ChainCall, MockChainClient, MockCoordinator,
        MockPushSession, MockResultRepository, MockResultStore,
    };
    use cw_types::{now, ComputationResult, TaskManager, U256};
    use std::time::Duration;
    use tokio::time::timeout;

    const STDOUT: &str = "result 42";

    fn worker() -> Address {
        Address::repeat_byte(0x11)
    }

    struct Setup {
        client: Arc<MockChainClient>,
        session: Arc<MockPushSession>,
        coordinator: Arc<MockCoordinator>,
        repository: Arc<MockResultRepository>,
        results: Arc<MockResultStore>,
        shutdown: Notifier,
        dispatcher: NotificationDispatcher,
        _manager: TaskManager,
    }

    /// Dispatcher for a task whose consensus matches the local result.
    async fn setup(task: B256) -> Setup {
        let manager = TaskManager::new("test");
        let client = Arc::new(MockChainClient::new(worker()));
        let results = Arc::new(MockResultStore::default());
        results.save_stdout(task, STDOUT).await.unwrap();
        let hash = results.deterministic_hash(task).await.unwrap();
        let local = ComputationResult::new(worker(), task, hash);
        client.set_task(revealing_task(task, local.result_hash, now() + 3600));
        client.set_contribution(task, contribution_for(&local));

        let mut chain = ChainService::new(client.clone(), ChainConfig::default());
        chain.spawn_tx_queue(&manager.get_spawner());
        let validator = ConsensusValidator::new(chain, results.clone());
        let session = Arc::new(MockPushSession::default());
        let coordinator = Arc::new(MockCoordinator::default());
        let repository = Arc::new(MockResultRepository::default());
        let shutdown = Notifier::new();
        let dispatcher = NotificationDispatcher::new(
            session.clone(),
            validator,
            coordinator.clone(),
            repository.clone(),
            results.clone(),
            manager.get_spawner(),
            shutdown.clone(),
        );
        Setup {
            client,
            session,
            coordinator,
            repository,
            results,
            shutdown,
            dispatcher,
            _manager: manager,
        }
    }

    fn notification(task: B256, kind: TaskNotificationType) -> TaskNotification {
        TaskNotification::new(task, kind, vec![worker()])
    }

    fn message(notification: &TaskNotification) -> InboundMessage {
        InboundMessage {
            subscription: SubscriptionId("sub-1".to_string()),
            destination: task_topic(&notification.chain_task_id),
            body: serde_json::to_string(notification).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_subscribe_twice_is_single_subscription() -> eyre::Result<()> {
        let task = B256::repeat_byte(1);
        let setup = setup(task).await;
        setup.dispatcher.subscribe(task)?;
        setup.dispatcher.subscribe(task)?;
        assert_eq!(setup.session.subscribe_calls(), 1);
        assert_eq!(setup.session.active_destinations(), vec![task_topic(&task)]);
        assert_eq!(setup.dispatcher.subscription_count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_unsubscribe_absent_is_noop() {
        let setup = setup(B256::repeat_byte(1)).await;
        setup.dispatcher.unsubscribe(B256::repeat_byte(9));
        assert_eq!(setup.session.unsubscribe_calls(), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_all() -> eyre::Result<()> {
        let setup = setup(B256::repeat_byte(1)).await;
        for byte in 1..=3 {
            setup.dispatcher.subscribe(B256::repeat_byte(byte))?;
        }
        setup.dispatcher.unsubscribe_all();
        assert_eq!(setup.dispatcher.subscription_count(), 0);
        assert!(setup.session.active_destinations().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_reveal() -> eyre::Result<()> {
        let task = B256::repeat_byte(1);
        let setup = setup(task).await;
        setup.dispatcher.handle_notification(notification(task, TaskNotificationType::PleaseReveal)).await;

        assert_eq!(
            setup.coordinator.statuses(task),
            vec![ReplicateStatus::Revealing, ReplicateStatus::Revealed]
        );
        let digest = setup.results.deterministic_hash(task).await?;
        assert_eq!(setup.client.reveals(), vec![task]);
        assert_matches!(
            setup.client.calls().as_slice(),
            [ChainCall::Reveal { result_digest, .. }] if *result_digest == digest
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_cant_reveal_sends_no_transaction() {
        let task = B256::repeat_byte(1);
        let setup = setup(task).await;
        setup.client.set_task(revealing_task(task, B256::repeat_byte(0xee), now() + 3600));
        setup.dispatcher.handle_notification(notification(task, TaskNotificationType::PleaseReveal)).await;

        assert_eq!(setup.coordinator.statuses(task), vec![ReplicateStatus::CantReveal]);
        assert!(setup.client.calls().is_empty());
        assert!(!setup.shutdown.noticed());
    }

    #[tokio::test]
    async fn test_out_of_gas_stops_worker() {
        let task = B256::repeat_byte(1);
        let setup = setup(task).await;
        setup.client.set_balance(U256::ZERO);
        setup.dispatcher.handle_notification(notification(task, TaskNotificationType::PleaseReveal)).await;

        assert_eq!(setup.coordinator.statuses(task), vec![ReplicateStatus::OutOfGas]);
        assert!(setup.client.calls().is_empty());
        assert!(setup.shutdown.noticed());
    }

    #[tokio::test]
    async fn test_upload() {
        let task = B256::repeat_byte(1);
        let setup = setup(task).await;
        setup.dispatcher.handle_notification(notification(task, TaskNotificationType::PleaseUpload)).await;

        assert_eq!(
            setup.coordinator.statuses(task),
            vec![ReplicateStatus::ResultUploading, ReplicateStatus::ResultUploaded]
        );
        assert_eq!(setup.repository.uploads(), vec![(task, STDOUT.len())]);
    }

    #[tokio::test]
    async fn test_upload_failure() {
        let task = B256::repeat_byte(1);
        let setup = setup(task).await;
        setup.repository.set_failing();
        setup.dispatcher.handle_notification(notification(task, TaskNotificationType::PleaseUpload)).await;

        assert_eq!(
            setup.coordinator.statuses(task),
            vec![ReplicateStatus::ResultUploading, ReplicateStatus::ResultUploadFailed]
        );
    }

    #[tokio::test]
    async fn test_terminal_notifications_close_task() -> eyre::Result<()> {
        let cases = [
            (TaskNotificationType::Completed, ReplicateStatus::Completed),
            (
                TaskNotificationType::PleaseAbortConsensusReached,
                ReplicateStatus::AbortConsensusReached,
            ),
            (
                TaskNotificationType::PleaseAbortContributionTimeout,
                ReplicateStatus::AbortContributionTimeout,
            ),
        ];
        for (kind, status) in cases {
            let task = B256::repeat_byte(1);
            let setup = setup(task).await;
            setup.dispatcher.subscribe(task)?;
            setup.dispatcher.handle_notification(notification(task, kind)).await;

            assert!(!setup.dispatcher.is_subscribed(task));
            assert!(setup.session.active_destinations().is_empty());
            assert_eq!(setup.results.removed(), vec![task]);
            assert_eq!(setup.coordinator.statuses(task), vec![status]);
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_unsupported_is_ignored() {
        let task = B256::repeat_byte(1);
        let setup = setup(task).await;
        setup.dispatcher.handle_notification(notification(task, TaskNotificationType::Unsupported)).await;
        assert!(setup.coordinator.statuses(task).is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_loop_filters_and_routes() -> eyre::Result<()> {
        let task = B256::repeat_byte(1);
        let setup = setup(task).await;
        let (tx, rx) = mpsc::channel(10);
        setup.dispatcher.spawn(rx);
        setup.dispatcher.subscribe(task)?;

        // other worker, unknown task, garbage: all dropped
        let other = TaskNotification::new(
            task,
            TaskNotificationType::Completed,
            vec![Address::repeat_byte(0x22)],
        );
        tx.send(message(&other)).await?;
        let unknown = notification(B256::repeat_byte(7), TaskNotificationType::Completed);
        tx.send(message(&unknown)).await?;
        tx.send(InboundMessage { body: "not json".to_string(), ..message(&other) }).await?;

        // broadcast to all workers is accepted
        let broadcast = TaskNotification::new(task, TaskNotificationType::PleaseReveal, vec![]);
        tx.send(message(&broadcast)).await?;
        tx.send(message(&notification(task, TaskNotificationType::Completed))).await?;

        timeout(
            Duration::from_secs(5),
            setup.coordinator.wait_for_status(task, ReplicateStatus::Completed),
        )
        .await?;
        assert_eq!(
            setup.coordinator.statuses(task),
            vec![ReplicateStatus::Revealing, ReplicateStatus::Revealed, ReplicateStatus::Completed]
        );
        assert!(setup.coordinator.statuses(B256::repeat_byte(7)).is_empty());
        assert!(!setup.dispatcher.is_subscribed(task));
        Ok(())
    }

    #[tokio::test]
    async fn test_dispatch_loop_stops_on_shutdown() -> eyre::Result<()> {
        let task = B256::repeat_byte(1);
        let setup = setup(task).await;
        let (tx, rx) = mpsc::channel(10);
        setup.dispatcher.spawn(rx);
        setup.shutdown.notify();
        timeout(Duration::from_secs(5), tx.closed()).await?;
        Ok(())
    }
}
