//! Safety gate and change execution
//!
//! Only the top-ranked hypothesis is ever verified or applied in a cycle.
//! A rollback snapshot is always recorded before the change is applied.

use std::time::Duration;
use tracing::{info, warn};

use crate::collaborators::Collaborators;
use crate::error::{CycleError, CycleOutcome};
use crate::types::{ExecutionResult, ImprovementHypothesis};

/// Ask the safety verifier about a single hypothesis
pub async fn safety_gate(collaborators: &Collaborators, hypothesis: &ImprovementHypothesis) -> CycleOutcome<()> {
    let verdict = collaborators
        .safety
        .verify(&hypothesis.proposed_change, &hypothesis.target_location, &hypothesis.rationale)
        .await
        .map_err(|e| CycleError::collaborator("safety verification", e))?;

    if verdict.safe {
        Ok(())
    } else {
        warn!("Safety verifier rejected '{}': {}", hypothesis.description, verdict.recommendation);
        Err(CycleError::SafetyRejected(verdict.recommendation))
    }
}

pub struct Executor {
    apply_timeout: Duration,
}

impl Executor {
    pub fn new(apply_timeout: Duration) -> Self {
        Self { apply_timeout }
    }

    /// Snapshot for rollback, then apply
    ///
    /// `Applied` means the change went in, not that it helped. A timeout
    /// is reported the same way as any other application failure.
    pub async fn execute(
        &self,
        collaborators: &Collaborators,
        hypothesis: &ImprovementHypothesis,
        link_id: Option<String>,
    ) -> ExecutionResult {
        let modification = collaborators
            .rollback
            .record_modification(&hypothesis.target_location, &hypothesis.description, link_id)
            .await;
        let modification_id = match modification {
            Ok(id) => id,
            Err(e) => {
                return ExecutionResult::Failed {
                    error: format!("could not record rollback snapshot: {:#}", e),
                }
            }
        };

        let apply = collaborators.applier.apply(
            &hypothesis.target_location,
            &hypothesis.proposed_change,
            &hypothesis.description,
        );

        match tokio::time::timeout(self.apply_timeout, apply).await {
            Ok(Ok(change)) => {
                info!("Applied '{}' (modification {})", hypothesis.description, modification_id);
                ExecutionResult::Applied { change }
            }
            Ok(Err(e)) => {
                warn!("Applying '{}' failed: {:#}", hypothesis.description, e);
                ExecutionResult::Failed { error: format!("{:#}", e) }
            }
            Err(_) => {
                warn!(
                    "Applying '{}' timed out after {}s",
                    hypothesis.description,
                    self.apply_timeout.as_secs()
                );
                ExecutionResult::Failed {
                    error: format!("timed out after {}s", self.apply_timeout.as_secs()),
                }
            }
        }
    }
}
