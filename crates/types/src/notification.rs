//! Push notifications sent by the coordinator on a task topic.

use crate::{Address, B256};
use serde::{Deserialize, Serialize};

/// Topic carrying notifications for one task.
pub fn task_topic(chain_task_id: &B256) -> String {
    format!("/topic/task/{chain_task_id}")
}

/// The kind of a [TaskNotification].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskNotificationType {
    /// The contribution window closed before this worker contributed.
    PleaseAbortContributionTimeout,
    /// Consensus was reached without this worker.
    PleaseAbortConsensusReached,
    /// Consensus reached, reveal the result.
    PleaseReveal,
    /// Upload the result to the result repository.
    PleaseUpload,
    /// The task is finalized.
    Completed,
    /// Any other type sent by the coordinator. Ignored.
    #[serde(other)]
    Unsupported,
}

/// Notification payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskNotification {
    pub chain_task_id: B256,
    /// Recipients. Empty means every worker on the task.
    #[serde(default)]
    pub workers_address: Vec<Address>,
    #[serde(alias = "type")]
    pub task_notification_type: TaskNotificationType,
}

impl TaskNotification {
    /// Create a notification for the given workers.
    pub fn new(
        chain_task_id: B256,
        task_notification_type: TaskNotificationType,
        workers_address: Vec<Address>,
    ) -> Self {
        Self { chain_task_id, workers_address, task_notification_type }
    }

    /// True if the notification targets `worker`, explicitly or by broadcast.
    pub fn is_addressed_to(&self, worker: &Address) -> bool {
        self.workers_address.is_empty() || self.workers_address.contains(worker)
    }
}
