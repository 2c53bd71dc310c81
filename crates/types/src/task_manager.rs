//! Ownership of the node's spawned tasks.

use crate::Notifier;
use futures::{stream::FuturesUnordered, StreamExt as _};
use std::future::Future;
use thiserror::Error;
use tokio::{
    sync::mpsc,
    task::{AbortHandle, JoinError, JoinHandle},
};
use tracing::{debug, error, info};

/// Errors returned by [TaskManager::join].
#[derive(Debug, Error)]
pub enum TaskJoinError {
    /// A critical task returned.
    #[error("Critical task {0} exited")]
    CriticalExited(String),

    /// A critical task panicked or was cancelled.
    #[error("Critical task {0} failed: {1}")]
    CriticalFailed(String, JoinError),
}

/// A spawned task as tracked by the manager.
#[derive(Debug)]
struct TaskHandle {
    name: String,
    handle: JoinHandle<()>,
    critical: bool,
}

/// Cloneable handle used to spawn tasks owned by a [TaskManager].
#[derive(Clone, Debug)]
pub struct TaskSpawner {
    new_task_tx: mpsc::UnboundedSender<TaskHandle>,
}

impl TaskSpawner {
    /// Spawn a task. Its exit does not affect the node.
    pub fn spawn_task<F>(&self, name: impl Into<String>, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.spawn(name.into(), future, false);
    }

    /// Spawn a task that must live as long as the node.
    ///
    /// If it returns, [TaskManager::join] signals shutdown.
    pub fn spawn_critical_task<F>(&self, name: impl Into<String>, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.spawn(name.into(), future, true);
    }

    fn spawn<F>(&self, name: String, future: F, critical: bool)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        debug!(target: "worker::tasks", %name, critical, "spawning task");
        let handle = tokio::spawn(future);
        if let Err(mpsc::error::SendError(task)) =
            self.new_task_tx.send(TaskHandle { name, handle, critical })
        {
            // the manager is gone so nothing would ever stop this task
            task.handle.abort();
        }
    }
}

/// Owns a group of tasks and stops them together.
#[derive(Debug)]
pub struct TaskManager {
    name: String,
    spawner: TaskSpawner,
    new_tasks: mpsc::UnboundedReceiver<TaskHandle>,
    abort_handles: Vec<(String, AbortHandle)>,
}

impl TaskManager {
    /// Create a new manager.
    pub fn new(name: impl Into<String>) -> Self {
        let (new_task_tx, new_tasks) = mpsc::unbounded_channel();
        Self {
            name: name.into(),
            spawner: TaskSpawner { new_task_tx },
            new_tasks,
            abort_handles: Vec::new(),
        }
    }

    /// Return a spawner for tasks owned by this manager.
    pub fn get_spawner(&self) -> TaskSpawner {
        self.spawner.clone()
    }

    /// See [TaskSpawner::spawn_task].
    pub fn spawn_task<F>(&self, name: impl Into<String>, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.spawner.spawn_task(name, future)
    }

    /// See [TaskSpawner::spawn_critical_task].
    pub fn spawn_critical_task<F>(&self, name: impl Into<String>, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.spawner.spawn_critical_task(name, future)
    }

    /// Wait until `shutdown` is notified or a critical task ends.
    ///
    /// A critical task ending notifies `shutdown` so the remaining tasks can
    /// clean up. Tasks are not aborted here, see [Self::abort_all_tasks].
    pub async fn join(&mut self, shutdown: Notifier) -> Result<(), TaskJoinError> {
        let mut rx_shutdown = shutdown.subscribe();
        let mut critical = FuturesUnordered::new();
        let result = loop {
            tokio::select! {
                _ = &mut rx_shutdown => break Ok(()),
                Some(task) = self.new_tasks.recv() => {
                    self.abort_handles.push((task.name.clone(), task.handle.abort_handle()));
                    if task.critical {
                        let name = task.name;
                        let handle = task.handle;
                        critical.push(async move { (name, handle.await) });
                    }
                }
                Some((name, res)) = critical.next(), if !critical.is_empty() => {
                    break match res {
                        Ok(()) => Err(TaskJoinError::CriticalExited(name)),
                        Err(e) => Err(TaskJoinError::CriticalFailed(name, e)),
                    };
                }
            }
        };

        match &result {
            Ok(()) => info!(target: "worker::tasks", manager = %self.name, "shutdown noticed"),
            Err(e) => {
                error!(target: "worker::tasks", manager = %self.name, ?e, "critical task ended");
                shutdown.notify();
            }
        }
        result
    }

    /// Abort every task spawned through this manager.
    pub fn abort_all_tasks(&mut self) {
        while let Ok(task) = self.new_tasks.try_recv() {
            task.handle.abort();
        }
        for (name, handle) in self.abort_handles.drain(..) {
            debug!(target: "worker::tasks", %name, "aborting task");
            handle.abort();
        }
    }
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new("Default Task Manager")
    }
}
