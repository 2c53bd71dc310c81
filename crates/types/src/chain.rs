//! Read-only projections of on-chain protocol state.
//!
//! These values are fetched on demand and never cached: the chain is the
//! source of truth and may change between two reads.

use crate::{Address, B256, U256};
use serde::{Deserialize, Serialize};

/// Status of a task in the hub contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChainTaskStatus {
    Unset,
    Active,
    Revealing,
    Completed,
    Failed,
}

impl ChainTaskStatus {
    /// Map the contract's numeric status.
    pub fn from_u8(value: u8) -> Option<Self> {
        let status = match value {
            0 => Self::Unset,
            1 => Self::Active,
            2 => Self::Revealing,
            3 => Self::Completed,
            4 => Self::Failed,
            _ => return None,
        };
        Some(status)
    }
}

/// On-chain task state relevant to this worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTask {
    pub chain_task_id: B256,
    pub status: ChainTaskStatus,
    /// Result hash the majority of contributors agreed on.
    pub consensus_value: B256,
    /// Unix seconds.
    pub contribution_deadline: u64,
    /// Unix seconds.
    pub reveal_deadline: u64,
    /// Unix seconds.
    pub final_deadline: u64,
}

impl ChainTask {
    /// True once `now` (unix seconds) is past the reveal deadline. A reveal
    /// in the deadline second itself is still accepted.
    pub fn is_reveal_deadline_reached(&self, now: u64) -> bool {
        now > self.reveal_deadline
    }
}

/// Status of a worker's contribution in the hub contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChainContributionStatus {
    Unset,
    Contributed,
    Revealed,
    Rejected,
}

impl ChainContributionStatus {
    /// Map the contract's numeric status.
    pub fn from_u8(value: u8) -> Option<Self> {
        let status = match value {
            0 => Self::Unset,
            1 => Self::Contributed,
            2 => Self::Revealed,
            3 => Self::Rejected,
            _ => return None,
        };
        Some(status)
    }
}

/// This worker's contribution to a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainContribution {
    pub status: ChainContributionStatus,
    pub result_hash: B256,
    pub result_seal: B256,
    pub enclave_challenge: Address,
}

/// Stake held by an account in the hub.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainAccount {
    pub stake: U256,
    pub locked: U256,
}

/// Receipt data returned for a write transaction.
///
/// Both fields are optional because some chain clients return a receipt
/// before the block is known.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainReceipt {
    pub block_number: Option<u64>,
    pub tx_hash: Option<B256>,
}

impl ChainReceipt {
    /// Create a receipt for a mined transaction.
    pub fn new(block_number: u64, tx_hash: B256) -> Self {
        Self { block_number: Some(block_number), tx_hash: Some(tx_hash) }
    }

    /// A receipt with block 0 and a zero hash.
    pub fn zero() -> Self {
        Self::new(0, B256::ZERO)
    }

    /// True when neither the block number nor the transaction hash is known.
    pub fn is_missing(&self) -> bool {
        self.block_number.is_none() && self.tx_hash.is_none()
    }
}

/// State of the protocol event found in a transaction receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxEvent {
    /// The event was emitted in a mined block.
    Confirmed,
    /// The event was returned before its block is known.
    Pending,
    /// The receipt carries no matching event.
    Missing,
}

/// Raw result of broadcasting a write transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxOutcome {
    pub receipt: ChainReceipt,
    pub event: TxEvent,
}

/// A secp256k1 signature split into its `(v, r, s)` parts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub v: u8,
    pub r: B256,
    pub s: B256,
}

/// Arguments of `contributeABILegacy`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContributeRequest {
    pub chain_task_id: B256,
    pub result_hash: B256,
    pub result_seal: B256,
    pub enclave_challenge: Address,
    pub enclave_signature: Signature,
    /// Scheduler signature authorizing this worker.
    pub authorization_signature: Signature,
}
