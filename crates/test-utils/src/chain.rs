//! In-memory hub contract.

use async_trait::async_trait;
use cw_types::{
    keccak256, Address, ChainAccount, ChainClient, ChainContribution, ChainContributionStatus,
    ChainError, ChainReceipt, ChainResult, ChainTask, ContributeRequest, TxEvent, TxOutcome, B256,
    U256,
};
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};
use tokio::time::Instant;

/// A write sent to [MockChainClient].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainCall {
    Contribute(ContributeRequest),
    Reveal { chain_task_id: B256, result_digest: B256 },
}

#[derive(Debug)]
struct ChainState {
    tasks: HashMap<B256, ChainTask>,
    contributions: HashMap<B256, ChainContribution>,
    /// Status change made visible only once the instant is reached.
    delayed: HashMap<B256, (Instant, ChainContributionStatus)>,
    account: ChainAccount,
    balance: U256,
    gas_price: u128,
    block: u64,
    contribute_event: TxEvent,
    reveal_event: TxEvent,
    pending_delay: Duration,
    send_delay: Duration,
    missing_receipt: bool,
    fail_reads: bool,
    calls: Vec<ChainCall>,
}

/// Chain client that applies writes to in-memory contract state.
///
/// Confirmed writes update the contribution immediately, pending ones after
/// the configured pending delay.
#[derive(Debug)]
pub struct MockChainClient {
    worker: Address,
    state: Mutex<ChainState>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockChainClient {
    /// Create a chain with a funded `worker`.
    pub fn new(worker: Address) -> Self {
        Self {
            worker,
            state: Mutex::new(ChainState {
                tasks: HashMap::new(),
                contributions: HashMap::new(),
                delayed: HashMap::new(),
                account: ChainAccount::default(),
                balance: U256::from(10u128.pow(18)),
                gas_price: 1_000_000_000,
                block: 100,
                contribute_event: TxEvent::Confirmed,
                reveal_event: TxEvent::Confirmed,
                pending_delay: Duration::ZERO,
                send_delay: Duration::ZERO,
                missing_receipt: false,
                fail_reads: false,
                calls: Vec::new(),
            }),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn set_task(&self, task: ChainTask) {
        self.state.lock().tasks.insert(task.chain_task_id, task);
    }

    pub fn set_contribution(&self, chain_task_id: B256, contribution: ChainContribution) {
        self.state.lock().contributions.insert(chain_task_id, contribution);
    }

    pub fn set_balance(&self, balance: U256) {
        self.state.lock().balance = balance;
    }

    pub fn set_gas_price(&self, gas_price: u128) {
        self.state.lock().gas_price = gas_price;
    }

    pub fn set_account(&self, account: ChainAccount) {
        self.state.lock().account = account;
    }

    pub fn set_contribute_event(&self, event: TxEvent) {
        self.state.lock().contribute_event = event;
    }

    pub fn set_reveal_event(&self, event: TxEvent) {
        self.state.lock().reveal_event = event;
    }

    /// Delay before a pending write becomes visible in contract state.
    pub fn set_pending_delay(&self, delay: Duration) {
        self.state.lock().pending_delay = delay;
    }

    /// Time spent inside each broadcast.
    pub fn set_send_delay(&self, delay: Duration) {
        self.state.lock().send_delay = delay;
    }

    /// Return receipts without block number and tx hash.
    pub fn set_missing_receipt(&self) {
        self.state.lock().missing_receipt = true;
    }

    pub fn fail_reads(&self) {
        self.state.lock().fail_reads = true;
    }

    pub fn calls(&self) -> Vec<ChainCall> {
        self.state.lock().calls.clone()
    }

    /// Task ids revealed so far, in broadcast order.
    pub fn reveals(&self) -> Vec<B256> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ChainCall::Reveal { chain_task_id, .. } => Some(chain_task_id),
                ChainCall::Contribute(_) => None,
            })
            .collect()
    }

    /// Highest number of broadcasts observed at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn check_reads(&self) -> ChainResult<()> {
        if self.state.lock().fail_reads {
            return Err(ChainError::Rpc("connection refused".to_string()));
        }
        Ok(())
    }

    async fn broadcast(
        &self,
        chain_task_id: B256,
        call: ChainCall,
        target: ChainContributionStatus,
        event: TxEvent,
    ) -> TxOutcome {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        let send_delay = self.state.lock().send_delay;
        if !send_delay.is_zero() {
            tokio::time::sleep(send_delay).await;
        }

        let outcome = {
            let mut state = self.state.lock();
            state.calls.push(call.clone());
            state.block += 1;
            match event {
                TxEvent::Confirmed => apply_status(&mut state, chain_task_id, &call, target),
                TxEvent::Pending => {
                    let at = Instant::now() + state.pending_delay;
                    state.delayed.insert(chain_task_id, (at, target));
                    if let ChainCall::Contribute(request) = &call {
                        apply_hashes(&mut state, request);
                    }
                }
                TxEvent::Missing => (),
            }
            let receipt = if state.missing_receipt {
                ChainReceipt::default()
            } else {
                ChainReceipt::new(state.block, keccak256(chain_task_id))
            };
            TxOutcome { receipt, event }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

fn apply_hashes(state: &mut ChainState, request: &ContributeRequest) {
    let entry = state.contributions.entry(request.chain_task_id).or_insert(ChainContribution {
        status: ChainContributionStatus::Unset,
        result_hash: B256::ZERO,
        result_seal: B256::ZERO,
        enclave_challenge: Address::ZERO,
    });
    entry.result_hash = request.result_hash;
    entry.result_seal = request.result_seal;
    entry.enclave_challenge = request.enclave_challenge;
}

fn apply_status(
    state: &mut ChainState,
    chain_task_id: B256,
    call: &ChainCall,
    target: ChainContributionStatus,
) {
    if let ChainCall::Contribute(request) = call {
        apply_hashes(state, request);
    }
    if let Some(contribution) = state.contributions.get_mut(&chain_task_id) {
        contribution.status = target;
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    fn worker_address(&self) -> Address {
        self.worker
    }

    async fn chain_task(&self, chain_task_id: B256) -> ChainResult<ChainTask> {
        self.check_reads()?;
        self.state.lock().tasks.get(&chain_task_id).cloned().ok_or(ChainError::Contract {
            call: "viewTaskABILegacy",
            message: "unknown task".to_string(),
        })
    }

    async fn chain_contribution(
        &self,
        chain_task_id: B256,
        _worker: Address,
    ) -> ChainResult<ChainContribution> {
        self.check_reads()?;
        let mut state = self.state.lock();
        if let Some((at, status)) = state.delayed.get(&chain_task_id).copied() {
            if Instant::now() >= at {
                state.delayed.remove(&chain_task_id);
                if let Some(contribution) = state.contributions.get_mut(&chain_task_id) {
                    contribution.status = status;
                }
            }
        }
        Ok(state.contributions.get(&chain_task_id).cloned().unwrap_or(ChainContribution {
            status: ChainContributionStatus::Unset,
            result_hash: B256::ZERO,
            result_seal: B256::ZERO,
            enclave_challenge: Address::ZERO,
        }))
    }

    async fn chain_account(&self, _account: Address) -> ChainResult<ChainAccount> {
        self.check_reads()?;
        Ok(self.state.lock().account)
    }

    async fn balance(&self, _account: Address) -> ChainResult<U256> {
        self.check_reads()?;
        Ok(self.state.lock().balance)
    }

    async fn gas_price(&self) -> ChainResult<u128> {
        self.check_reads()?;
        Ok(self.state.lock().gas_price)
    }

    async fn last_block(&self) -> ChainResult<u64> {
        self.check_reads()?;
        Ok(self.state.lock().block)
    }

    async fn send_contribute(&self, request: ContributeRequest) -> ChainResult<TxOutcome> {
        let event = self.state.lock().contribute_event;
        let chain_task_id = request.chain_task_id;
        Ok(self
            .broadcast(
                chain_task_id,
                ChainCall::Contribute(request),
                ChainContributionStatus::Contributed,
                event,
            )
            .await)
    }

    async fn send_reveal(
        &self,
        chain_task_id: B256,
        result_digest: B256,
    ) -> ChainResult<TxOutcome> {
        let event = self.state.lock().reveal_event;
        Ok(self
            .broadcast(
                chain_task_id,
                ChainCall::Reveal { chain_task_id, result_digest },
                ChainContributionStatus::Revealed,
                event,
            )
            .await)
    }
}
