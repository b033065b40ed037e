#![forbid(unsafe_code)]

use thiserror::Error;

use crate::harmonization::HarmonizationSource;
use crate::ContractViolation;

/// Failures of an external collaborator. None of these are fatal to a harmonize call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CollaboratorError {
    /// Seed vault or oracle I/O failed; the current cycle counts as unresolved.
    #[error("{collaborator} unavailable: {detail}")]
    Unavailable {
        collaborator: &'static str,
        detail: String,
    },

    /// Escalation exceeded its budget; the cycle falls back to the local check.
    #[error("escalation timed out after {after_ms}ms")]
    EscalationTimeout { after_ms: u64 },

    /// Escalation was cancelled by the caller.
    #[error("escalation cancelled")]
    EscalationCancelled,

    /// Oracle health check failed; escalation is skipped.
    #[error("reasoning oracle degraded")]
    OracleDegraded,
}

impl CollaboratorError {
    pub fn unavailable(collaborator: &'static str, detail: impl Into<String>) -> Self {
        Self::Unavailable {
            collaborator,
            detail: detail.into(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum HarmonizeError {
    /// No unseen (philosopher, logic set) combination could be drawn.
    #[error(
        "seed space exhausted for {harmonizer}: space={space} used={used} attempts={attempts}"
    )]
    ExhaustedSeedSpace {
        harmonizer: HarmonizationSource,
        space: u128,
        used: usize,
        attempts: u32,
    },

    #[error("contract violation: {0:?}")]
    Contract(ContractViolation),
}

impl From<ContractViolation> for HarmonizeError {
    fn from(v: ContractViolation) -> Self {
        HarmonizeError::Contract(v)
    }
}

pub type HarmonizeResult<T> = Result<T, HarmonizeError>;
