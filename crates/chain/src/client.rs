//! [ChainClient] over JSON-RPC.

use crate::IexecHubABILegacy::{self, IexecHubABILegacyInstance, TaskContribute, TaskReveal};
use alloy::{
    providers::{DynProvider, Provider, ProviderBuilder},
    rpc::types::TransactionReceipt,
    signers::local::PrivateKeySigner,
    sol_types::SolEvent,
    transports::http::reqwest::Url,
};
use async_trait::async_trait;
use cw_config::ChainConfig;
use cw_types::{
    Address, ChainAccount, ChainClient, ChainContribution, ChainContributionStatus, ChainError,
    ChainReceipt, ChainResult, ChainTask, ChainTaskStatus, ContributeRequest, TxEvent, TxOutcome,
    B256, U256,
};
use std::fmt::Display;
use tracing::debug;

/// Hub client signing with the worker wallet.
#[derive(Clone)]
pub struct RpcChainClient {
    provider: DynProvider,
    hub: IexecHubABILegacyInstance<DynProvider>,
    worker: Address,
    gas_limit: u64,
}

impl RpcChainClient {
    /// Connect to `config.rpc_url` with a wallet built from `signer`.
    pub fn new(config: &ChainConfig, signer: PrivateKeySigner) -> ChainResult<Self> {
        let url = config
            .rpc_url
            .parse::<Url>()
            .map_err(|e| ChainError::Rpc(format!("invalid rpc url {}: {e}", config.rpc_url)))?;
        let worker = signer.address();
        let provider = ProviderBuilder::new().wallet(signer).connect_http(url).erased();
        let hub = IexecHubABILegacy::new(config.hub_address, provider.clone());
        Ok(Self { provider, hub, worker, gas_limit: config.gas_limit })
    }
}

impl std::fmt::Debug for RpcChainClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcChainClient")
            .field("hub", self.hub.address())
            .field("worker", &self.worker)
            .finish_non_exhaustive()
    }
}

fn rpc_err(e: impl Display) -> ChainError {
    ChainError::Rpc(e.to_string())
}

fn contract_err(call: &'static str) -> impl FnOnce(alloy::contract::Error) -> ChainError {
    move |e| ChainError::Contract { call, message: e.to_string() }
}

fn to_u64(value: U256) -> u64 {
    value.saturating_to()
}

fn status_byte(call: &'static str, value: U256) -> ChainResult<u8> {
    u8::try_from(value)
        .map_err(|_| ChainError::Contract { call, message: format!("unknown status {value}") })
}

/// Find the protocol event for `chain_task_id` in `receipt`.
///
/// A matching log without a block number is still pending.
fn outcome<E: SolEvent>(
    receipt: &TransactionReceipt,
    chain_task_id: B256,
    task_of: impl Fn(&E) -> B256,
) -> TxOutcome {
    let event = receipt
        .inner
        .logs()
        .iter()
        .find_map(|log| {
            let decoded = log.log_decode::<E>().ok()?;
            (task_of(&decoded.inner.data) == chain_task_id).then_some(log.block_number)
        })
        .map(|block| if block.is_some() { TxEvent::Confirmed } else { TxEvent::Pending })
        .unwrap_or(TxEvent::Missing);

    TxOutcome {
        receipt: ChainReceipt {
            block_number: receipt.block_number,
            tx_hash: Some(receipt.transaction_hash),
        },
        event,
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    fn worker_address(&self) -> Address {
        self.worker
    }

    async fn chain_task(&self, chain_task_id: B256) -> ChainResult<ChainTask> {
        const CALL: &str = "viewTaskABILegacy";
        let task = self
            .hub
            .viewTaskABILegacy(chain_task_id)
            .call()
            .await
            .map_err(contract_err(CALL))?;
        let status = ChainTaskStatus::from_u8(status_byte(CALL, task.status)?).ok_or_else(|| {
            ChainError::Contract { call: CALL, message: format!("unknown status {}", task.status) }
        })?;
        Ok(ChainTask {
            chain_task_id,
            status,
            consensus_value: task.consensusValue,
            contribution_deadline: to_u64(task.contributionDeadline),
            reveal_deadline: to_u64(task.revealDeadline),
            final_deadline: to_u64(task.finalDeadline),
        })
    }

    async fn chain_contribution(
        &self,
        chain_task_id: B256,
        worker: Address,
    ) -> ChainResult<ChainContribution> {
        const CALL: &str = "viewContributionABILegacy";
        let contribution = self
            .hub
            .viewContributionABILegacy(chain_task_id, worker)
            .call()
            .await
            .map_err(contract_err(CALL))?;
        let status = ChainContributionStatus::from_u8(status_byte(CALL, contribution.status)?)
            .ok_or_else(|| ChainError::Contract {
                call: CALL,
                message: format!("unknown status {}", contribution.status),
            })?;
        Ok(ChainContribution {
            status,
            result_hash: contribution.resultHash,
            result_seal: contribution.resultSeal,
            enclave_challenge: contribution.enclaveChallenge,
        })
    }

    async fn chain_account(&self, account: Address) -> ChainResult<ChainAccount> {
        let view = self
            .hub
            .viewAccountABILegacy(account)
            .call()
            .await
            .map_err(contract_err("viewAccountABILegacy"))?;
        Ok(ChainAccount { stake: view.stake, locked: view.locked })
    }

    async fn balance(&self, account: Address) -> ChainResult<U256> {
        self.provider.get_balance(account).await.map_err(rpc_err)
    }

    async fn gas_price(&self) -> ChainResult<u128> {
        self.provider.get_gas_price().await.map_err(rpc_err)
    }

    async fn last_block(&self) -> ChainResult<u64> {
        self.provider.get_block_number().await.map_err(rpc_err)
    }

    async fn send_contribute(&self, request: ContributeRequest) -> ChainResult<TxOutcome> {
        let ContributeRequest {
            chain_task_id,
            result_hash,
            result_seal,
            enclave_challenge,
            enclave_signature: enclave,
            authorization_signature: pool,
        } = request;
        let pending = self
            .hub
            .contributeABILegacy(
                chain_task_id,
                result_hash,
                result_seal,
                enclave_challenge,
                enclave.v,
                enclave.r,
                enclave.s,
                pool.v,
                pool.r,
                pool.s,
            )
            .gas(self.gas_limit)
            .send()
            .await
            .map_err(contract_err("contributeABILegacy"))?;
        debug!(target: "worker::chain", %chain_task_id, tx = %pending.tx_hash(), "contribute sent");
        let receipt = pending.get_receipt().await.map_err(rpc_err)?;
        Ok(outcome::<TaskContribute>(&receipt, chain_task_id, |event| event.taskid))
    }

    async fn send_reveal(
        &self,
        chain_task_id: B256,
        result_digest: B256,
    ) -> ChainResult<TxOutcome> {
        let pending = self
            .hub
            .reveal(chain_task_id, result_digest)
            .gas(self.gas_limit)
            .send()
            .await
            .map_err(contract_err("reveal"))?;
        debug!(target: "worker::chain", %chain_task_id, tx = %pending.tx_hash(), "reveal sent");
        let receipt = pending.get_receipt().await.map_err(rpc_err)?;
        Ok(outcome::<TaskReveal>(&receipt, chain_task_id, |event| event.taskid))
    }
}
