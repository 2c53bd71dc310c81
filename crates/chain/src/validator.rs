//! Decides whether this worker may contribute or reveal, and reveals.

use crate::ChainService;
use cw_types::{
    now, ChainContribution, ChainContributionStatus, ChainError, ChainReceipt, ChainResult,
    ChainTask, ChainTaskStatus, ComputationResult, ResultStore, B256,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The sub-conditions that must all hold before revealing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevealConditions {
    /// The task is in its reveal phase.
    pub is_task_revealing: bool,
    /// The reveal deadline has not passed.
    pub is_before_reveal_deadline: bool,
    /// Our contribution is recorded and not yet revealed.
    pub is_contributed: bool,
    /// Our contributed hash is the consensus value.
    pub is_consensus_value: bool,
    /// The local result still matches what was contributed.
    pub is_local_result_matching: bool,
}

impl RevealConditions {
    /// Evaluate every condition at `now` (unix seconds).
    pub fn evaluate(
        task: &ChainTask,
        contribution: &ChainContribution,
        local: &ComputationResult,
        now: u64,
    ) -> Self {
        Self::from_reads(Some(task), Some(contribution), Some(local), now)
    }

    /// Evaluate every condition from inputs that may have been unreadable.
    ///
    /// A condition depending on a missing input is false.
    pub fn from_reads(
        task: Option<&ChainTask>,
        contribution: Option<&ChainContribution>,
        local: Option<&ComputationResult>,
        now: u64,
    ) -> Self {
        Self {
            is_task_revealing: task.is_some_and(|t| t.status == ChainTaskStatus::Revealing),
            is_before_reveal_deadline: task.is_some_and(|t| !t.is_reveal_deadline_reached(now)),
            is_contributed: contribution
                .is_some_and(|c| c.status == ChainContributionStatus::Contributed),
            is_consensus_value: match (task, contribution) {
                (Some(t), Some(c)) => c.result_hash == t.consensus_value,
                _ => false,
            },
            is_local_result_matching: match (contribution, local) {
                (Some(c), Some(l)) => {
                    c.result_hash == l.result_hash && c.result_seal == l.result_seal
                }
                _ => false,
            },
        }
    }

    /// Names of the conditions that do not hold.
    pub fn unmet(&self) -> Vec<&'static str> {
        [
            ("is_task_revealing", self.is_task_revealing),
            ("is_before_reveal_deadline", self.is_before_reveal_deadline),
            ("is_contributed", self.is_contributed),
            ("is_consensus_value", self.is_consensus_value),
            ("is_local_result_matching", self.is_local_result_matching),
        ]
        .into_iter()
        .filter_map(|(name, met)| (!met).then_some(name))
        .collect()
    }

    pub fn all_met(&self) -> bool {
        self.is_task_revealing
            && self.is_before_reveal_deadline
            && self.is_contributed
            && self.is_consensus_value
            && self.is_local_result_matching
    }
}

/// Consensus checks made against live chain state.
#[derive(Clone)]
pub struct ConsensusValidator {
    chain: ChainService,
    results: Arc<dyn ResultStore>,
}

impl std::fmt::Debug for ConsensusValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsensusValidator").field("chain", &self.chain).finish_non_exhaustive()
    }
}

impl ConsensusValidator {
    /// Create a new instance of [Self].
    pub fn new(chain: ChainService, results: Arc<dyn ResultStore>) -> Self {
        Self { chain, results }
    }

    /// The chain service used for reads and writes.
    pub fn chain(&self) -> &ChainService {
        &self.chain
    }

    /// True if the task accepts a contribution from this worker right now.
    pub async fn can_contribute(&self, chain_task_id: B256) -> bool {
        let Some(task) = self.chain.get_chain_task(chain_task_id).await else {
            warn!(target: "worker::consensus", %chain_task_id, "cannot contribute, task unreadable");
            return false;
        };
        let Some(contribution) = self.chain.get_chain_contribution(chain_task_id).await else {
            warn!(target: "worker::consensus", %chain_task_id, "cannot contribute, contribution unreadable");
            return false;
        };
        let is_task_active = task.status == ChainTaskStatus::Active;
        let is_before_deadline = now() < task.contribution_deadline;
        let is_not_contributed = contribution.status == ChainContributionStatus::Unset;
        let can = is_task_active && is_before_deadline && is_not_contributed;
        if !can {
            warn!(
                target: "worker::consensus",
                %chain_task_id,
                is_task_active,
                is_before_deadline,
                is_not_contributed,
                "cannot contribute"
            );
        }
        can
    }

    /// True if every reveal condition holds for the task.
    ///
    /// Chain state is re-read on every call. Every condition is evaluated and
    /// logged even when an input is unreadable; conditions needing that input
    /// are false.
    pub async fn can_reveal(&self, chain_task_id: B256) -> bool {
        let task = self.chain.get_chain_task(chain_task_id).await;
        if task.is_none() {
            warn!(target: "worker::consensus", %chain_task_id, "task unreadable");
        }
        let contribution = self.chain.get_chain_contribution(chain_task_id).await;
        if contribution.is_none() {
            warn!(target: "worker::consensus", %chain_task_id, "contribution unreadable");
        }
        let local = match self.results.deterministic_hash(chain_task_id).await {
            Ok(hash) => {
                Some(ComputationResult::new(self.chain.worker_address(), chain_task_id, hash))
            }
            Err(e) => {
                warn!(target: "worker::consensus", %chain_task_id, ?e, "no local result");
                None
            }
        };

        let conditions = RevealConditions::from_reads(
            task.as_ref(),
            contribution.as_ref(),
            local.as_ref(),
            now(),
        );
        debug!(target: "worker::consensus", %chain_task_id, ?conditions, "reveal conditions evaluated");
        for condition in conditions.unmet() {
            warn!(target: "worker::consensus", %chain_task_id, condition, "reveal condition not met");
        }
        let can = conditions.all_met();
        if can {
            info!(target: "worker::consensus", %chain_task_id, "all reveal conditions met");
        }
        can
    }

    /// Reveal the local deterministic hash.
    ///
    /// Some chain clients confirm the reveal but return a receipt with neither
    /// block number nor hash. That receipt is replaced by [ChainReceipt::zero].
    pub async fn reveal(&self, chain_task_id: B256) -> ChainResult<ChainReceipt> {
        let deterministic_hash = self
            .results
            .deterministic_hash(chain_task_id)
            .await
            .map_err(|_| ChainError::MissingResult(chain_task_id))?;
        let receipt = self.chain.reveal(chain_task_id, deterministic_hash).await?;
        if receipt.is_missing() {
            let last_block = self.chain.get_last_block().await;
            warn!(target: "worker::consensus", %chain_task_id, ?last_block, "reveal receipt without block or hash, using zero receipt");
            return Ok(ChainReceipt::zero());
        }
        Ok(receipt)
    }

    pub async fn has_enough_gas(&self) -> bool {
        self.chain.has_enough_gas().await
    }
}
