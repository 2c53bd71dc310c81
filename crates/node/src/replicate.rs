//! Compute then contribute, once per accepted offer.

use cw_chain::ConsensusValidator;
use cw_executor::ExecutionOrchestrator;
use cw_types::{
    ComputationResult, ContainerEngine, ContributeRequest, CoordinatorClient, Notifier,
    ReplicateStatus, ResultStore, TaskOffer, TaskSpawner, B256,
};
use std::{fmt, sync::Arc};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

/// Runs replicates, at most `max_concurrent_tasks` at a time.
pub struct ReplicateExecutor<E> {
    orchestrator: Arc<ExecutionOrchestrator<E>>,
    validator: ConsensusValidator,
    coordinator: Arc<dyn CoordinatorClient>,
    results: Arc<dyn ResultStore>,
    permits: Arc<Semaphore>,
    spawner: TaskSpawner,
    shutdown: Notifier,
}

impl<E> Clone for ReplicateExecutor<E> {
    fn clone(&self) -> Self {
        Self {
            orchestrator: self.orchestrator.clone(),
            validator: self.validator.clone(),
            coordinator: self.coordinator.clone(),
            results: self.results.clone(),
            permits: self.permits.clone(),
            spawner: self.spawner.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<E> fmt::Debug for ReplicateExecutor<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicateExecutor")
            .field("available", &self.permits.available_permits())
            .finish_non_exhaustive()
    }
}

impl<E: ContainerEngine> ReplicateExecutor<E> {
    /// Create a new instance of [Self].
    pub fn new(
        orchestrator: Arc<ExecutionOrchestrator<E>>,
        validator: ConsensusValidator,
        coordinator: Arc<dyn CoordinatorClient>,
        results: Arc<dyn ResultStore>,
        max_concurrent_tasks: usize,
        spawner: TaskSpawner,
        shutdown: Notifier,
    ) -> Self {
        Self {
            orchestrator,
            validator,
            coordinator,
            results,
            permits: Arc::new(Semaphore::new(max_concurrent_tasks.max(1))),
            spawner,
            shutdown,
        }
    }

    /// True if one more replicate can start now.
    pub fn has_capacity(&self) -> bool {
        self.permits.available_permits() > 0
    }

    /// Start the replicate in the background.
    ///
    /// Returns false, and does nothing, when the worker is full.
    pub fn try_start(&self, offer: TaskOffer) -> bool {
        let Ok(permit) = self.permits.clone().try_acquire_owned() else {
            return false;
        };
        let this = self.clone();
        let chain_task_id = offer.chain_task_id();
        self.spawner.spawn_task(format!("replicate {chain_task_id}"), async move {
            let status = this.run_replicate(offer).await;
            info!(target: "worker::replicate", %chain_task_id, %status, "replicate pipeline done");
            drop(permit);
        });
        true
    }

    /// Compute the offer and contribute its result. Returns the last status
    /// reported.
    pub async fn run_replicate(&self, offer: TaskOffer) -> ReplicateStatus {
        let chain_task_id = offer.chain_task_id();
        self.report(chain_task_id, ReplicateStatus::Running).await;

        let outcome = self.orchestrator.compute(&offer).await;
        if !outcome.is_computed() {
            return self.report(chain_task_id, ReplicateStatus::ComputeFailed).await;
        }
        if let Err(e) = self.results.save_stdout(chain_task_id, &outcome.stdout).await {
            warn!(target: "worker::replicate", %chain_task_id, ?e, "failed to store stdout");
        }
        self.report(chain_task_id, ReplicateStatus::Computed).await;

        let status = self.contribute(&offer).await;
        self.report(chain_task_id, status).await
    }

    async fn contribute(&self, offer: &TaskOffer) -> ReplicateStatus {
        let chain_task_id = offer.chain_task_id();
        let deterministic_hash = match self.results.deterministic_hash(chain_task_id).await {
            Ok(hash) => hash,
            Err(e) => {
                error!(target: "worker::replicate", %chain_task_id, ?e, "no deterministic hash");
                return ReplicateStatus::CantContribute;
            }
        };
        let worker = self.validator.chain().worker_address();
        let result = ComputationResult::new(worker, chain_task_id, deterministic_hash);

        if !self.validator.has_enough_gas().await {
            error!(target: "worker::replicate", %chain_task_id, "out of gas, stopping worker");
            self.shutdown.notify();
            return ReplicateStatus::OutOfGas;
        }
        if !self.validator.can_contribute(chain_task_id).await {
            return ReplicateStatus::CantContribute;
        }

        let enclave_signature = match self.results.enclave_signature(chain_task_id).await {
            Ok(signature) => signature.unwrap_or_default(),
            Err(e) => {
                warn!(target: "worker::replicate", %chain_task_id, ?e, "unreadable enclave signature");
                Default::default()
            }
        };
        let auth = &offer.contribution_authorization;
        let request = ContributeRequest {
            chain_task_id,
            result_hash: result.result_hash,
            result_seal: result.result_seal,
            enclave_challenge: auth.enclave_challenge,
            enclave_signature,
            authorization_signature: auth.signature(),
        };

        self.report(chain_task_id, ReplicateStatus::Contributing).await;
        match self.validator.chain().contribute(request).await {
            Ok(receipt) => {
                info!(target: "worker::replicate", %chain_task_id, block = ?receipt.block_number, "contributed");
                ReplicateStatus::Contributed
            }
            Err(e) => {
                error!(target: "worker::replicate", %chain_task_id, ?e, "contribution failed");
                ReplicateStatus::ContributeFailed
            }
        }
    }

    async fn report(&self, chain_task_id: B256, status: ReplicateStatus) -> ReplicateStatus {
        if let Err(e) = self.coordinator.update_replicate_status(chain_task_id, status).await {
            warn!(target: "worker::replicate", %chain_task_id, %status, ?e, "failed to report status");
        }
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixture::Fixture;
    use cw_test_utils::{active_task, task_offer, ChainCall};
    use cw_types::{Address, U256};
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_compute_then_contribute() -> eyre::Result<()> {
        let fixture = Fixture::new(1).await;
        let task = B256::repeat_byte(1);
        fixture.client.set_task(active_task(task));
        let offer = task_offer(task, fixture.worker);

        let status = fixture.replicates.run_replicate(offer).await;
        assert_eq!(status, ReplicateStatus::Contributed);
        assert_eq!(
            fixture.coordinator.statuses(task),
            vec![
                ReplicateStatus::Running,
                ReplicateStatus::Computed,
                ReplicateStatus::Contributing,
                ReplicateStatus::Contributed,
            ]
        );
        assert_eq!(fixture.results.stdout(task).as_deref(), Some(crate::test_fixture::STDOUT));

        let hash = fixture.results.deterministic_hash(task).await?;
        let expected = ComputationResult::new(fixture.worker, task, hash);
        let calls = fixture.client.calls();
        let [ChainCall::Contribute(request)] = calls.as_slice() else {
            panic!("unexpected calls {calls:?}");
        };
        assert_eq!(request.result_hash, expected.result_hash);
        assert_eq!(request.result_seal, expected.result_seal);
        assert_eq!(request.authorization_signature.v, 27);
        Ok(())
    }

    #[tokio::test]
    async fn test_compute_failure_stops_pipeline() {
        let fixture = Fixture::new(1).await;
        fixture.engine.fail_pull();
        let task = B256::repeat_byte(1);
        let offer = task_offer(task, fixture.worker);

        let status = fixture.replicates.run_replicate(offer).await;
        assert_eq!(status, ReplicateStatus::ComputeFailed);
        assert_eq!(
            fixture.coordinator.statuses(task),
            vec![ReplicateStatus::Running, ReplicateStatus::ComputeFailed]
        );
        assert!(fixture.client.calls().is_empty());
        // the failure reason is not task output
        assert_eq!(fixture.results.stdout(task), None);
    }

    #[tokio::test]
    async fn test_cant_contribute_when_task_inactive() {
        let fixture = Fixture::new(1).await;
        let task = B256::repeat_byte(1);
        // no task on chain
        let status = fixture.replicates.run_replicate(task_offer(task, fixture.worker)).await;
        assert_eq!(status, ReplicateStatus::CantContribute);
        assert!(fixture.client.calls().is_empty());
    }

    #[tokio::test]
    async fn test_out_of_gas_before_contribution() {
        let fixture = Fixture::new(1).await;
        let task = B256::repeat_byte(1);
        fixture.client.set_task(active_task(task));
        fixture.client.set_balance(U256::ZERO);

        let status = fixture.replicates.run_replicate(task_offer(task, fixture.worker)).await;
        assert_eq!(status, ReplicateStatus::OutOfGas);
        assert!(fixture.shutdown.noticed());
        assert!(fixture.client.calls().is_empty());
    }

    #[tokio::test]
    async fn test_capacity_is_bounded() -> eyre::Result<()> {
        let fixture = Fixture::new(1).await;
        fixture.engine.set_run_duration(Duration::from_millis(200));
        let first = B256::repeat_byte(1);
        assert!(fixture.replicates.has_capacity());
        assert!(fixture.replicates.try_start(task_offer(first, fixture.worker)));
        assert!(!fixture.replicates.has_capacity());
        assert!(!fixture.replicates.try_start(task_offer(B256::repeat_byte(2), Address::ZERO)));

        timeout(
            Duration::from_secs(10),
            fixture.coordinator.wait_for_status(first, ReplicateStatus::CantContribute),
        )
        .await?;
        // the permit is released right after the last report
        timeout(Duration::from_secs(5), async {
            while !fixture.replicates.has_capacity() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await?;
        Ok(())
    }
}
