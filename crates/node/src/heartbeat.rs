//! Coordinator heartbeat.

use cw_types::{CoordinatorClient, Noticer, TaskSpawner};
use std::{sync::Arc, time::Duration};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Ping the coordinator every `period` until `shutdown`. Failures are only logged.
pub fn spawn_heartbeat(
    coordinator: Arc<dyn CoordinatorClient>,
    period: Duration,
    spawner: &TaskSpawner,
    mut shutdown: Noticer,
) {
    spawner.spawn_task("coordinator heartbeat", async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => match coordinator.ping().await {
                    Ok(()) => debug!(target: "worker::heartbeat", "ping sent"),
                    Err(e) => warn!(target: "worker::heartbeat", ?e, "ping failed"),
                },
            }
        }
        info!(target: "worker::heartbeat", "heartbeat stopped");
    });
}
