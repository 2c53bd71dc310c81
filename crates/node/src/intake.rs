//! Periodic request for new work.

use crate::ReplicateExecutor;
use cw_pubsub::NotificationDispatcher;
use cw_types::{Address, ContainerEngine, CoordinatorClient, Noticer, TaskSpawner};
use std::{fmt, sync::Arc, time::Duration};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// What one intake tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntakeTick {
    /// No spare capacity, the coordinator was not asked.
    Full,
    /// The coordinator had nothing, or could not be reached.
    NoOffer,
    /// An offer was accepted and its replicate started.
    Accepted,
}

/// Asks the coordinator for one offer per period while there is capacity.
pub struct TaskIntakeLoop<E> {
    coordinator: Arc<dyn CoordinatorClient>,
    dispatcher: NotificationDispatcher,
    replicates: ReplicateExecutor<E>,
    worker: Address,
    enclave: Address,
    period: Duration,
}

impl<E> fmt::Debug for TaskIntakeLoop<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskIntakeLoop")
            .field("worker", &self.worker)
            .field("period", &self.period)
            .finish_non_exhaustive()
    }
}

impl<E: ContainerEngine> TaskIntakeLoop<E> {
    /// Create a new instance of [Self].
    pub fn new(
        coordinator: Arc<dyn CoordinatorClient>,
        dispatcher: NotificationDispatcher,
        replicates: ReplicateExecutor<E>,
        worker: Address,
        enclave: Address,
        period: Duration,
    ) -> Self {
        Self { coordinator, dispatcher, replicates, worker, enclave, period }
    }

    /// One intake step.
    pub async fn tick(&self) -> IntakeTick {
        if !self.replicates.has_capacity() {
            debug!(target: "worker::intake", "worker full, not asking for work");
            return IntakeTick::Full;
        }
        let offer = match self.coordinator.available_replicate(self.worker, self.enclave).await {
            Ok(Some(offer)) => offer,
            Ok(None) => return IntakeTick::NoOffer,
            Err(e) => {
                warn!(target: "worker::intake", ?e, "failed to ask for work");
                return IntakeTick::NoOffer;
            }
        };

        let chain_task_id = offer.chain_task_id();
        info!(target: "worker::intake", %chain_task_id, "received task");
        if let Err(e) = self.dispatcher.subscribe(chain_task_id) {
            // notifications for this task would never arrive
            warn!(target: "worker::intake", %chain_task_id, ?e, "failed to subscribe, dropping offer");
            return IntakeTick::NoOffer;
        }
        if !self.replicates.try_start(offer) {
            warn!(target: "worker::intake", %chain_task_id, "capacity taken while accepting offer");
            self.dispatcher.unsubscribe(chain_task_id);
            return IntakeTick::Full;
        }
        IntakeTick::Accepted
    }

    /// Tick every period until `shutdown`.
    pub fn spawn(self, spawner: &TaskSpawner, mut shutdown: Noticer) {
        spawner.spawn_task("task intake", async move {
            let mut ticker = interval(self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = &mut shutdown => break,
                    _ = ticker.tick() => {
                        self.tick().await;
                    }
                }
            }
            info!(target: "worker::intake", "task intake stopped");
        });
    }
}
