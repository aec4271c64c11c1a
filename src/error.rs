//! Cycle error taxonomy
//!
//! Every way a cycle can end early. None of these escape a cycle: the
//! controller turns each one into a failed `CycleResult`.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CycleError {
    #[error("no improvement target found")]
    NoTargetFound,

    #[error("no hypotheses generated")]
    NoHypothesesGenerated,

    #[error("rejected by safety verifier: {0}")]
    SafetyRejected(String),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("capability not found: {0}")]
    CapabilityNotFound(String),

    /// Carries the measured delta; not a hard failure
    #[error("regression detected, rolled back")]
    RegressionDetected(f64),

    #[error("prediction unavailable: {0}")]
    PredictionUnavailable(String),

    #[error("collaborator failure: {0}")]
    Collaborator(String),
}

impl CycleError {
    /// Wrap an error from an external call
    pub fn collaborator(context: &str, err: anyhow::Error) -> Self {
        CycleError::Collaborator(format!("{}: {:#}", context, err))
    }
}

pub type CycleOutcome<T> = std::result::Result<T, CycleError>;
