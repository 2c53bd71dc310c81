//! Replicate lifecycle labels reported to the coordinator.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of this worker's replicate of a task.
///
/// Reporting metadata only. Authoritative state lives on-chain and in the
/// container runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplicateStatus {
    Running,
    Computed,
    ComputeFailed,
    CantContribute,
    Contributing,
    Contributed,
    ContributeFailed,
    Revealing,
    Revealed,
    RevealFailed,
    CantReveal,
    OutOfGas,
    ResultUploading,
    ResultUploaded,
    ResultUploadFailed,
    Completed,
    AbortConsensusReached,
    AbortContributionTimeout,
}

impl ReplicateStatus {
    /// The wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Computed => "COMPUTED",
            Self::ComputeFailed => "COMPUTE_FAILED",
            Self::CantContribute => "CANT_CONTRIBUTE",
            Self::Contributing => "CONTRIBUTING",
            Self::Contributed => "CONTRIBUTED",
            Self::ContributeFailed => "CONTRIBUTE_FAILED",
            Self::Revealing => "REVEALING",
            Self::Revealed => "REVEALED",
            Self::RevealFailed => "REVEAL_FAILED",
            Self::CantReveal => "CANT_REVEAL",
            Self::OutOfGas => "OUT_OF_GAS",
            Self::ResultUploading => "RESULT_UPLOADING",
            Self::ResultUploaded => "RESULT_UPLOADED",
            Self::ResultUploadFailed => "RESULT_UPLOAD_FAILED",
            Self::Completed => "COMPLETED",
            Self::AbortConsensusReached => "ABORT_CONSENSUS_REACHED",
            Self::AbortContributionTimeout => "ABORT_CONTRIBUTION_TIMEOUT",
        }
    }
}

impl fmt::Display for ReplicateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::ReplicateStatus;

    #[test]
    fn test_display_matches_serde() {
        for status in [
            ReplicateStatus::Running,
            ReplicateStatus::CantReveal,
            ReplicateStatus::AbortContributionTimeout,
            ReplicateStatus::ResultUploadFailed,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{status}\""));
        }
    }
}
