//! Builders for common test values.

use cw_types::{
    Address, ChainContribution, ChainContributionStatus, ChainTask, ChainTaskStatus,
    ComputationResult, TaskAuthorization, TaskOffer, B256,
};

/// A standard (non-TEE) offer for `worker`.
pub fn task_offer(chain_task_id: B256, worker: Address) -> TaskOffer {
    TaskOffer {
        contribution_authorization: TaskAuthorization {
            worker_wallet: worker,
            chain_task_id,
            enclave_challenge: Address::ZERO,
            sign_r: B256::repeat_byte(0x04),
            sign_s: B256::repeat_byte(0x05),
            sign_v: 27,
        },
        app_uri: "docker.io/iexechub/vanityeth:1.1.1".to_string(),
        cmd: "run".to_string(),
        max_execution_time: 60_000,
        is_trusted_execution: false,
        dataset_uri: None,
    }
}

/// A task in REVEALING status whose consensus is `consensus_value`.
pub fn revealing_task(chain_task_id: B256, consensus_value: B256, reveal_deadline: u64) -> ChainTask {
    ChainTask {
        chain_task_id,
        status: ChainTaskStatus::Revealing,
        consensus_value,
        contribution_deadline: 0,
        reveal_deadline,
        final_deadline: reveal_deadline + 3600,
    }
}

/// A task still accepting contributions.
pub fn active_task(chain_task_id: B256) -> ChainTask {
    ChainTask {
        chain_task_id,
        status: ChainTaskStatus::Active,
        consensus_value: B256::ZERO,
        contribution_deadline: u64::MAX,
        reveal_deadline: 0,
        final_deadline: u64::MAX,
    }
}

/// A CONTRIBUTED contribution matching `result`.
pub fn contribution_for(result: &ComputationResult) -> ChainContribution {
    ChainContribution {
        status: ChainContributionStatus::Contributed,
        result_hash: result.result_hash,
        result_seal: result.result_seal,
        enclave_challenge: Address::ZERO,
    }
}
