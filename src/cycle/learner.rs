//! Learning updates
//!
//! Feeds a measured outcome back into the predictive model, the Bayesian
//! tracker, the experience log and meta-learning. Each update stands on its
//! own: a failing collaborator is logged and the remaining updates still run.

use serde_json::json;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::collaborators::Collaborators;
use crate::tracking::BayesianTracker;
use crate::types::{ImprovementHypothesis, PredictionError};

pub const EXPERIENCE_KIND: &str = "self_modification";

/// What a learning pass managed to update
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LearningReport {
    pub predictor_updated: bool,
    pub experience_recorded: bool,
    pub domain_learning_recorded: bool,
}

pub struct LearningUpdater {
    beliefs: Arc<RwLock<BayesianTracker>>,
    successes: u64,
    failures: u64,
}

impl LearningUpdater {
    pub fn new(beliefs: Arc<RwLock<BayesianTracker>>) -> Self {
        Self {
            beliefs,
            successes: 0,
            failures: 0,
        }
    }

    pub fn successes(&self) -> u64 {
        self.successes
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    pub async fn learn(
        &mut self,
        collaborators: &Collaborators,
        hypothesis: &ImprovementHypothesis,
        improved: bool,
        delta: f64,
        outcome: &str,
    ) -> LearningReport {
        let mut report = LearningReport::default();
        let target = hypothesis.target_capability.as_str();

        let error = PredictionError::new(hypothesis, improved, outcome);
        match collaborators.predictor.update_from_prediction_error(&error).await {
            Ok(()) => report.predictor_updated = true,
            Err(e) => warn!("Predictor recalibration failed: {:#}", e),
        }

        self.beliefs.write().await.update(target, improved);

        let metadata = json!({
            "target": target,
            "strategy": hypothesis.strategy.as_str(),
            "delta": delta,
            "improved": improved,
        });
        let content = format!("Attempted {}: {}", hypothesis.description, outcome);
        match collaborators
            .experience
            .record_experience(&content, EXPERIENCE_KIND, metadata)
            .await
        {
            Ok(()) => report.experience_recorded = true,
            Err(e) => warn!("Recording experience failed: {:#}", e),
        }

        if improved {
            self.successes += 1;
            match collaborators.meta.record_domain_learning(target, delta).await {
                Ok(()) => report.domain_learning_recorded = true,
                Err(e) => warn!("Recording domain learning failed: {:#}", e),
            }
        } else {
            self.failures += 1;
        }

        debug!(
            "Learning for {}: {} successes, {} failures so far",
            target, self.successes, self.failures
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::memory::{InMemoryExperienceStore, InMemoryPredictor, SimulatedSystem};
    use crate::collaborators::{MockExperienceStore, MockPredictiveModel};
    use crate::types::Strategy;

    fn hypothesis() -> ImprovementHypothesis {
        ImprovementHypothesis {
            description: "Apply pattern 'cache' to coding".into(),
            target_capability: "coding".into(),
            strategy: Strategy::PatternApplication,
            proposed_change: "cache results".into(),
            target_location: "capabilities/coding/pattern_application".into(),
            rationale: "worked before".into(),
            expected_improvement: 0.05,
            predicted_success: 0.7,
            prediction_confidence: 0.4,
        }
    }

    #[tokio::test]
    async fn test_improvement_updates_everything() {
        let system = Arc::new(SimulatedSystem::new());
        let predictor = Arc::new(InMemoryPredictor::new());
        let store = Arc::new(InMemoryExperienceStore::new());
        let collab = Collaborators::simulated_with(system.clone(), predictor.clone(), store.clone());
        let beliefs = Arc::new(RwLock::new(BayesianTracker::new()));
        let mut learner = LearningUpdater::new(beliefs.clone());

        let report = learner.learn(&collab, &hypothesis(), true, 0.03, "improved by 0.030").await;
        assert!(report.predictor_updated && report.experience_recorded && report.domain_learning_recorded);
        assert_eq!(learner.successes(), 1);
        assert_eq!(learner.failures(), 0);

        let belief = beliefs.read().await.belief("coding").unwrap();
        assert_eq!((belief.alpha, belief.beta), (2.0, 1.0));

        let errors = predictor.recorded_errors().await;
        assert!((errors[0].error - 0.3).abs() < 1e-9);

        let experiences = store.experiences().await;
        assert_eq!(experiences[0].kind, EXPERIENCE_KIND);
        assert_eq!(experiences[0].metadata["strategy"], "pattern_application");
        assert_eq!(system.domain_learning().await, vec![("coding".to_string(), 0.03)]);
    }

    #[tokio::test]
    async fn test_failing_collaborators_do_not_block_others() {
        let mut collab = Collaborators::simulated(Arc::new(SimulatedSystem::new()));
        let mut predictor = MockPredictiveModel::new();
        predictor
            .expect_update_from_prediction_error()
            .times(1)
            .returning(|_| Err(anyhow::anyhow!("model offline")));
        let mut store = MockExperienceStore::new();
        store
            .expect_record_experience()
            .times(1)
            .returning(|_, _, _| Err(anyhow::anyhow!("disk full")));
        collab.predictor = Arc::new(predictor);
        collab.experience = Arc::new(store);

        let beliefs = Arc::new(RwLock::new(BayesianTracker::new()));
        let mut learner = LearningUpdater::new(beliefs.clone());
        let report = learner.learn(&collab, &hypothesis(), false, 0.0, "no significant change").await;

        assert!(!report.predictor_updated);
        assert!(!report.experience_recorded);
        assert_eq!(learner.failures(), 1);
        let belief = beliefs.read().await.belief("coding").unwrap();
        assert_eq!((belief.alpha, belief.beta), (1.0, 2.0));
    }
}
