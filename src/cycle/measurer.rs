//! Outcome measurement
//!
//! Re-assesses the target after a change. A delta beyond the threshold in
//! either direction is decisive: above it the change counts as an
//! improvement, below its negation the change is rolled back before the
//! measurement is returned.

use tracing::{info, warn};

use crate::collaborators::Collaborators;
use crate::error::{CycleError, CycleOutcome};
use crate::types::MeasurementResult;

pub const ROLLBACK_REASON: &str = "capability regression";

pub struct OutcomeMeasurer {
    threshold: f64,
}

impl OutcomeMeasurer {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Measure the effect on `capability`, given its rate before the change
    ///
    /// `before` is `None` when the pre-change snapshot lacked the
    /// capability, which is reported as `CapabilityNotFound`.
    pub async fn measure(
        &self,
        collaborators: &Collaborators,
        capability: &str,
        before: Option<f64>,
    ) -> CycleOutcome<MeasurementResult> {
        let inventory = collaborators
            .inventory
            .assess(true)
            .await
            .map_err(|e| CycleError::collaborator("re-assessment", e))?;

        let (before, after) = match (before, inventory.get(capability)) {
            (Some(before), Some(after)) => (before, after.success_rate),
            _ => return Err(CycleError::CapabilityNotFound(capability.to_string())),
        };

        let delta = after - before;
        if delta > self.threshold {
            info!("{} improved {:.3} -> {:.3} ({:+.3})", capability, before, after, delta);
            return Ok(MeasurementResult {
                improved: true,
                delta,
                reason: format!("improved by {:.3}", delta),
                rolled_back: false,
            });
        }

        if delta < -self.threshold {
            warn!("{} regressed {:.3} -> {:.3} ({:+.3}), rolling back", capability, before, after, delta);
            let (reason, rolled_back) = match collaborators.rollback.rollback_last(ROLLBACK_REASON).await {
                Ok(()) => (CycleError::RegressionDetected(delta).to_string(), true),
                Err(e) => {
                    warn!("Rollback after regression failed: {:#}", e);
                    (format!("regression detected, rollback failed: {:#}", e), false)
                }
            };
            return Ok(MeasurementResult {
                improved: false,
                delta,
                reason,
                rolled_back,
            });
        }

        Ok(MeasurementResult {
            improved: false,
            delta,
            reason: "no significant change".to_string(),
            rolled_back: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::memory::SimulatedSystem;
    use crate::collaborators::{MockInventoryProvider, MockRollbackManager};
    use crate::types::{CapabilityInventory, CapabilityRecord, Trend};
    use mockall::predicate::eq;
    use std::sync::Arc;

    fn collaborators(after: f64, rollbacks: usize) -> Collaborators {
        let mut collab = Collaborators::simulated(Arc::new(SimulatedSystem::new()));

        let mut inventory = MockInventoryProvider::new();
        inventory
            .expect_assess()
            .with(eq(true))
            .returning(move |_| {
                Ok(CapabilityInventory::from_records(vec![CapabilityRecord::new(
                    "coding",
                    after,
                    Trend::Stable,
                )]))
            });
        collab.inventory = Arc::new(inventory);

        let mut rollback = MockRollbackManager::new();
        rollback
            .expect_rollback_last()
            .with(eq(ROLLBACK_REASON))
            .times(rollbacks)
            .returning(|_| Ok(()));
        collab.rollback = Arc::new(rollback);
        collab
    }

    #[tokio::test]
    async fn test_improvement_above_threshold() {
        let collab = collaborators(0.43, 0);
        let m = OutcomeMeasurer::new(0.01).measure(&collab, "coding", Some(0.40)).await.unwrap();
        assert!(m.improved);
        assert!((m.delta - 0.03).abs() < 1e-9);
        assert!(!m.rolled_back);
    }

    #[tokio::test]
    async fn test_failed_rollback_is_not_reported_as_rolled_back() {
        let mut collab = collaborators(0.35, 0);
        let mut rollback = MockRollbackManager::new();
        rollback
            .expect_rollback_last()
            .with(eq(ROLLBACK_REASON))
            .times(1)
            .returning(|_| Err(anyhow::anyhow!("snapshot store offline")));
        collab.rollback = Arc::new(rollback);

        let m = OutcomeMeasurer::new(0.01).measure(&collab, "coding", Some(0.40)).await.unwrap();
        assert!(!m.improved);
        assert!(!m.rolled_back);
        assert!(m.reason.contains("rollback failed"), "{}", m.reason);
        assert!(m.reason.contains("snapshot store offline"), "{}", m.reason);
    }

    #[tokio::test]
    async fn test_regression_rolls_back_exactly_once() {
        let collab = collaborators(0.35, 1);
        let m = OutcomeMeasurer::new(0.01).measure(&collab, "coding", Some(0.40)).await.unwrap();
        assert!(!m.improved);
        assert!(m.rolled_back);
        assert_eq!(m.reason, "regression detected, rolled back");
    }

    #[tokio::test]
    async fn test_neutral_band_never_rolls_back() {
        for after in [0.395, 0.40, 0.405] {
            let collab = collaborators(after, 0);
            let m = OutcomeMeasurer::new(0.01).measure(&collab, "coding", Some(0.40)).await.unwrap();
            assert!(!m.improved);
            assert!(!m.rolled_back);
        }
    }

    #[tokio::test]
    async fn test_missing_capability() {
        let collab = collaborators(0.5, 0);
        let measurer = OutcomeMeasurer::new(0.01);

        let err = measurer.measure(&collab, "search", Some(0.5)).await.unwrap_err();
        assert_eq!(err, CycleError::CapabilityNotFound("search".into()));

        let err = measurer.measure(&collab, "coding", None).await.unwrap_err();
        assert_eq!(err, CycleError::CapabilityNotFound("coding".into()));
    }

    #[test]
    fn test_improved_iff_delta_above_threshold() {
        let deltas = [-0.2, -0.02, -0.005, 0.0, 0.005, 0.02, 0.3];
        for delta in deltas {
            let collab = collaborators(0.5 + delta, usize::from(delta < -0.01));
            let m = tokio_test::block_on(OutcomeMeasurer::new(0.01).measure(&collab, "coding", Some(0.5)))
                .unwrap();
            assert_eq!(m.improved, delta > 0.01, "delta {}", delta);
        }
    }
}
