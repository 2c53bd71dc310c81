// SPDX-License-Identifier: Apache-2.0
// Library for running every worker component in a single process.

#![allow(missing_docs)]

use cw_config::{KeyConfig, WorkerConfig};
use cw_types::Notifier;
use tokio::task::JoinHandle;

mod heartbeat;
mod intake;
mod manager;
mod replicate;
#[cfg(test)]
mod test_fixture;

pub use heartbeat::spawn_heartbeat;
pub use intake::{IntakeTick, TaskIntakeLoop};
pub use manager::{start_worker, Collaborators, RunningWorker, WorkerNode};
pub use replicate::ReplicateExecutor;

/// Launch the worker.
///
/// The worker runs until `shutdown` is notified, a critical task ends, or
/// the wallet runs out of gas.
/// Note this is the "entry task" for the node and the caller needs to wait on
/// the JoinHandle then exit.
pub fn launch_node(
    config: WorkerConfig,
    key_config: KeyConfig,
    shutdown: Notifier,
) -> JoinHandle<eyre::Result<()>> {
    let node = WorkerNode::new(config, key_config, shutdown);
    tokio::spawn(async move { node.run().await })
}
