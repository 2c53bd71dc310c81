//! Chain reads and the single-consumer write queue.
//!
//! Writes from the same wallet must be broadcast one at a time so nonces never
//! race. Every contribute and reveal goes through one queue drained by a
//! single task. Reads bypass the queue.

use cw_config::ChainConfig;
use cw_types::{
    Address, ChainAccount, ChainClient, ChainContribution, ChainContributionStatus, ChainError,
    ChainReceipt, ChainResult, ChainTask, ContributeRequest, TaskSpawner, TxEvent, TxOutcome,
    B256, U256,
};
use std::{
    fmt,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tokio::{
    sync::{mpsc, oneshot},
    time::{sleep, Instant},
};
use tracing::{debug, error, info, warn};

/// A write waiting in the queue.
enum TxRequest {
    Contribute(ContributeRequest),
    Reveal { chain_task_id: B256, result_digest: B256 },
}

impl TxRequest {
    fn chain_task_id(&self) -> B256 {
        match self {
            Self::Contribute(request) => request.chain_task_id,
            Self::Reveal { chain_task_id, .. } => *chain_task_id,
        }
    }
}

type TxReply = oneshot::Sender<ChainResult<ChainReceipt>>;

/// Hub access shared by the executor and the validator.
pub struct ChainService {
    client: Arc<dyn ChainClient>,
    config: ChainConfig,
    tx_queue: mpsc::Sender<(TxRequest, TxReply)>,
    /// Taken by [Self::spawn_tx_queue].
    rx_queue: Option<mpsc::Receiver<(TxRequest, TxReply)>>,
    waiting: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
}

// The receiver is taken once when the queue task is spawned, clones never carry it.
impl Clone for ChainService {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            config: self.config.clone(),
            tx_queue: self.tx_queue.clone(),
            rx_queue: None,
            waiting: self.waiting.clone(),
            in_flight: self.in_flight.clone(),
        }
    }
}

impl fmt::Debug for ChainService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChainService for worker {}", self.client.worker_address())
    }
}

impl ChainService {
    /// Create a new instance of [Self]. Writes stall until
    /// [Self::spawn_tx_queue] is called.
    pub fn new(client: Arc<dyn ChainClient>, config: ChainConfig) -> Self {
        let (tx_queue, rx_queue) = mpsc::channel(config.tx_queue_capacity.max(1));
        Self {
            client,
            config,
            tx_queue,
            rx_queue: Some(rx_queue),
            waiting: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Spawn the task broadcasting queued writes in submission order.
    ///
    /// Only the first call has an effect.
    pub fn spawn_tx_queue(&mut self, spawner: &TaskSpawner) {
        let Some(mut rx_queue) = self.rx_queue.take() else {
            warn!(target: "worker::chain", "transaction queue already spawned");
            return;
        };
        let this = self.clone();
        spawner.spawn_critical_task("chain tx-queue", async move {
            while let Some((request, reply)) = rx_queue.recv().await {
                this.waiting.fetch_sub(1, Ordering::SeqCst);
                this.in_flight.fetch_add(1, Ordering::SeqCst);
                let chain_task_id = request.chain_task_id();
                let res = this.broadcast(request).await;
                this.in_flight.fetch_sub(1, Ordering::SeqCst);
                if reply.send(res).is_err() {
                    error!(target: "worker::chain", %chain_task_id, "transaction caller dropped before the receipt");
                }
            }
        });
    }

    /// The wallet address.
    pub fn worker_address(&self) -> Address {
        self.client.worker_address()
    }

    /// Writes queued and not yet picked up.
    pub fn waiting_transactions(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Writes being broadcast, zero or one.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Queue a `contribute` and wait for its confirmed receipt.
    pub async fn contribute(&self, request: ContributeRequest) -> ChainResult<ChainReceipt> {
        self.submit(TxRequest::Contribute(request)).await
    }

    /// Queue a `reveal` and wait for its confirmed receipt.
    pub async fn reveal(&self, chain_task_id: B256, result_digest: B256) -> ChainResult<ChainReceipt> {
        self.submit(TxRequest::Reveal { chain_task_id, result_digest }).await
    }

    async fn submit(&self, request: TxRequest) -> ChainResult<ChainReceipt> {
        let (reply, rx) = oneshot::channel();
        self.waiting.fetch_add(1, Ordering::SeqCst);
        if self.tx_queue.send((request, reply)).await.is_err() {
            self.waiting.fetch_sub(1, Ordering::SeqCst);
            return Err(ChainError::QueueClosed);
        }
        rx.await.map_err(|_| ChainError::QueueClosed)?
    }

    /// Broadcast one write and wait until its effect is visible.
    async fn broadcast(&self, request: TxRequest) -> ChainResult<ChainReceipt> {
        let chain_task_id = request.chain_task_id();
        let (event_name, expected, outcome) = match request {
            TxRequest::Contribute(request) => {
                info!(target: "worker::chain", %chain_task_id, "sending contribute");
                let outcome = self.client.send_contribute(request).await;
                ("TaskContribute", ChainContributionStatus::Contributed, outcome)
            }
            TxRequest::Reveal { chain_task_id, result_digest } => {
                info!(target: "worker::chain", %chain_task_id, "sending reveal");
                let outcome = self.client.send_reveal(chain_task_id, result_digest).await;
                ("TaskReveal", ChainContributionStatus::Revealed, outcome)
            }
        };

        let TxOutcome { receipt, event } = outcome?;
        match event {
            TxEvent::Confirmed => Ok(receipt),
            TxEvent::Missing => Err(ChainError::MissingEvent(event_name, chain_task_id)),
            TxEvent::Pending => {
                debug!(target: "worker::chain", %chain_task_id, event_name, "receipt pending, waiting for status");
                if self.wait_for_contribution_status(chain_task_id, expected).await {
                    Ok(receipt)
                } else {
                    Err(ChainError::PendingTimeout { task_id: chain_task_id, expected })
                }
            }
        }
    }

    /// Poll this worker's contribution until it reaches `expected`.
    ///
    /// Gives up after `max_wait_pending_receipt`.
    pub async fn wait_for_contribution_status(
        &self,
        chain_task_id: B256,
        expected: ChainContributionStatus,
    ) -> bool {
        let deadline = Instant::now() + self.config.max_wait_pending_receipt;
        loop {
            if let Some(contribution) = self.get_chain_contribution(chain_task_id).await {
                if contribution.status == expected {
                    return true;
                }
            }
            if Instant::now() >= deadline {
                warn!(target: "worker::chain", %chain_task_id, ?expected, "status not reached before wait budget expired");
                return false;
            }
            sleep(self.config.pending_receipt_poll_interval).await;
        }
    }

    pub async fn get_chain_task(&self, chain_task_id: B256) -> Option<ChainTask> {
        self.client
            .chain_task(chain_task_id)
            .await
            .inspect_err(|e| warn!(target: "worker::chain", %chain_task_id, ?e, "failed to read task"))
            .ok()
    }

    /// This worker's contribution to the task.
    pub async fn get_chain_contribution(&self, chain_task_id: B256) -> Option<ChainContribution> {
        self.client
            .chain_contribution(chain_task_id, self.worker_address())
            .await
            .inspect_err(|e| {
                warn!(target: "worker::chain", %chain_task_id, ?e, "failed to read contribution")
            })
            .ok()
    }

    /// This worker's stake.
    pub async fn get_chain_account(&self) -> Option<ChainAccount> {
        self.client
            .chain_account(self.worker_address())
            .await
            .inspect_err(|e| warn!(target: "worker::chain", ?e, "failed to read account"))
            .ok()
    }

    pub async fn get_last_block(&self) -> Option<u64> {
        self.client
            .last_block()
            .await
            .inspect_err(|e| warn!(target: "worker::chain", ?e, "failed to read block number"))
            .ok()
    }

    /// True if the wallet can pay for one write at the current gas price.
    ///
    /// Unreadable balance or price counts as enough: a later broadcast
    /// failure is reported per task instead of stopping the worker.
    pub async fn has_enough_gas(&self) -> bool {
        let worker = self.worker_address();
        let (balance, gas_price) =
            match (self.client.balance(worker).await, self.client.gas_price().await) {
                (Ok(balance), Ok(gas_price)) => (balance, gas_price),
                (Err(e), _) | (_, Err(e)) => {
                    warn!(target: "worker::chain", ?e, "failed to read balance or gas price");
                    return true;
                }
            };
        let cost = U256::from(gas_price).saturating_mul(U256::from(self.config.gas_limit));
        let enough = balance >= cost;
        if !enough {
            error!(target: "worker::chain", %worker, %balance, %cost, "wallet balance below one transaction");
        }
        enough
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use cw_test_utils::{active_task, ChainCall, MockChainClient};
    use cw_types::{Signature, TaskManager};
    use std::time::Duration;

    fn worker() -> Address {
        Address::repeat_byte(0x11)
    }

    fn contribute_request(chain_task_id: B256) -> ContributeRequest {
        ContributeRequest {
            chain_task_id,
            result_hash: B256::repeat_byte(1),
            result_seal: B256::repeat_byte(2),
            enclave_challenge: Address::ZERO,
            enclave_signature: Signature::default(),
            authorization_signature: Signature::default(),
        }
    }

    fn spawn_service(client: Arc<MockChainClient>, manager: &TaskManager) -> ChainService {
        let mut service = ChainService::new(client, ChainConfig::default());
        service.spawn_tx_queue(&manager.get_spawner());
        service
    }

    #[tokio::test]
    async fn test_contribute_confirmed() -> eyre::Result<()> {
        let manager = TaskManager::new("test");
        let client = Arc::new(MockChainClient::new(worker()));
        let task = B256::repeat_byte(7);
        client.set_task(active_task(task));
        let service = spawn_service(client.clone(), &manager);

        let receipt = service.contribute(contribute_request(task)).await?;
        assert!(receipt.block_number.is_some());
        let contribution = service.get_chain_contribution(task).await.unwrap();
        assert_eq!(contribution.status, ChainContributionStatus::Contributed);
        assert_matches!(client.calls().as_slice(), [ChainCall::Contribute(_)]);
        Ok(())
    }

    #[tokio::test]
    async fn test_writes_never_overlap() -> eyre::Result<()> {
        let manager = TaskManager::new("test");
        let client = Arc::new(MockChainClient::new(worker()));
        client.set_send_delay(Duration::from_millis(20));
        let service = spawn_service(client.clone(), &manager);

        let tasks: Vec<B256> = (1..=4).map(B256::repeat_byte).collect();
        let reveals = tasks.iter().map(|task| service.reveal(*task, B256::repeat_byte(9)));
        let results = futures::future::join_all(reveals).await;

        assert!(results.iter().all(|res| res.is_ok()));
        assert_eq!(client.max_in_flight(), 1);
        assert_eq!(client.reveals().len(), 4);
        assert_eq!(service.waiting_transactions(), 0);
        assert_eq!(service.in_flight(), 0);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_receipt_waits_for_status() -> eyre::Result<()> {
        let manager = TaskManager::new("test");
        let client = Arc::new(MockChainClient::new(worker()));
        client.set_contribute_event(TxEvent::Pending);
        client.set_pending_delay(Duration::from_secs(3));
        let service = spawn_service(client.clone(), &manager);

        let task = B256::repeat_byte(3);
        let start = Instant::now();
        let receipt = service.contribute(contribute_request(task)).await?;
        assert!(receipt.tx_hash.is_some());
        assert!(start.elapsed() >= Duration::from_secs(3));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_receipt_times_out() {
        let manager = TaskManager::new("test");
        let client = Arc::new(MockChainClient::new(worker()));
        client.set_reveal_event(TxEvent::Pending);
        client.set_pending_delay(Duration::from_secs(3600));
        let service = spawn_service(client.clone(), &manager);

        let task = B256::repeat_byte(3);
        let res = service.reveal(task, B256::ZERO).await;
        assert_matches!(
            res,
            Err(ChainError::PendingTimeout { expected: ChainContributionStatus::Revealed, .. })
        );
    }

    #[tokio::test]
    async fn test_missing_event_is_failure() {
        let manager = TaskManager::new("test");
        let client = Arc::new(MockChainClient::new(worker()));
        client.set_reveal_event(TxEvent::Missing);
        let service = spawn_service(client, &manager);

        let task = B256::repeat_byte(5);
        assert_matches!(
            service.reveal(task, B256::ZERO).await,
            Err(ChainError::MissingEvent("TaskReveal", id)) if id == task
        );
    }

    #[tokio::test]
    async fn test_reads_default_to_none() {
        let client = Arc::new(MockChainClient::new(worker()));
        client.fail_reads();
        let service = ChainService::new(client, ChainConfig::default());

        assert!(service.get_chain_task(B256::ZERO).await.is_none());
        assert!(service.get_chain_contribution(B256::ZERO).await.is_none());
        assert!(service.get_chain_account().await.is_none());
        assert!(service.get_last_block().await.is_none());
    }

    #[tokio::test]
    async fn test_has_enough_gas() {
        let client = Arc::new(MockChainClient::new(worker()));
        let service = ChainService::new(client.clone(), ChainConfig::default());
        let gas_limit = ChainConfig::default().gas_limit;

        client.set_gas_price(10);
        client.set_balance(U256::from(10 * gas_limit));
        assert!(service.has_enough_gas().await);

        client.set_balance(U256::from(10 * gas_limit - 1));
        assert!(!service.has_enough_gas().await);
    }
}
