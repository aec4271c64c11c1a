//! Improvement cycle
//!
//! One cycle walks the pipeline once: select a target, generate and rank
//! hypotheses, gate the best one through the safety verifier, apply it with
//! a rollback snapshot, measure the effect and learn from it. Every early
//! exit is a `CycleError` that ends up as a failed `CycleResult`; nothing
//! escapes a cycle.

pub mod executor;
pub mod generator;
pub mod learner;
pub mod measurer;
pub mod ranker;
pub mod selector;

pub use executor::{safety_gate, Executor};
pub use generator::HypothesisGenerator;
pub use learner::{LearningReport, LearningUpdater};
pub use measurer::OutcomeMeasurer;
pub use selector::select_target;

use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::collaborators::{Collaborators, DesireStatus};
use crate::config::CycleConfig;
use crate::error::{CycleError, CycleOutcome};
use crate::tracking::{BayesianTracker, Selection, SharedTrackers};
use crate::types::{CycleResult, ExecutionResult, ImprovementHypothesis, MeasurementResult, Strategy, TargetPriority};

pub const DESIRE_KIND: &str = "self_improvement";

/// Failure-tracker pattern for attempts at a capability
pub fn improvement_pattern(capability: &str) -> String {
    format!("improve {}", capability)
}

fn desire_intensity(priority: TargetPriority) -> f64 {
    match priority {
        TargetPriority::Urgent => 0.9,
        TargetPriority::High => 0.75,
        TargetPriority::Medium => 0.6,
        TargetPriority::Low => 0.4,
    }
}

/// Bounded record of finished cycles plus running totals
#[derive(Debug, Clone, Default)]
pub struct CycleLog {
    limit: usize,
    results: VecDeque<CycleResult>,
    pub cycles_run: u64,
    pub successes: u64,
    pub failures: u64,
    pub rollbacks: u64,
    /// Sum of deltas from improving cycles
    pub improvements: f64,
}

impl CycleLog {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            ..Default::default()
        }
    }

    pub fn record(&mut self, result: &CycleResult, rolled_back: bool) {
        self.cycles_run += 1;
        if result.success {
            self.successes += 1;
            self.improvements += result.improvement_delta;
        } else {
            self.failures += 1;
        }
        if rolled_back {
            self.rollbacks += 1;
        }
        if self.results.len() == self.limit {
            self.results.pop_front();
        }
        self.results.push_back(result.clone());
    }

    /// Retained results, oldest first
    pub fn results(&self) -> Vec<CycleResult> {
        self.results.iter().cloned().collect()
    }

    /// The most recent `n` results, oldest first
    pub fn recent(&self, n: usize) -> Vec<CycleResult> {
        let skip = self.results.len().saturating_sub(n);
        self.results.iter().skip(skip).cloned().collect()
    }

    pub fn last(&self) -> Option<&CycleResult> {
        self.results.back()
    }
}

pub type SharedCycleLog = Arc<RwLock<CycleLog>>;

/// What a cycle got to before it ended
#[derive(Default)]
struct CycleProgress {
    target: Option<String>,
    hypothesis: Option<String>,
    desire_id: Option<String>,
    rolled_back: bool,
}

/// Sequences the pipeline stages, one cycle at a time
///
/// `run_cycle` takes `&mut self`, so holding the controller (or the mutex
/// around it) is what keeps cycles from overlapping.
pub struct ImprovementCycleController {
    collaborators: Collaborators,
    trackers: SharedTrackers,
    generator: HypothesisGenerator,
    executor: Executor,
    measurer: OutcomeMeasurer,
    learner: LearningUpdater,
    log: SharedCycleLog,
    cycle_index: u64,
}

impl ImprovementCycleController {
    pub fn new(
        config: &CycleConfig,
        collaborators: Collaborators,
        trackers: SharedTrackers,
        beliefs: Arc<RwLock<BayesianTracker>>,
    ) -> Self {
        Self {
            collaborators,
            trackers,
            generator: HypothesisGenerator::new(config),
            executor: Executor::new(Duration::from_secs(config.apply_timeout_secs)),
            measurer: OutcomeMeasurer::new(config.improvement_threshold),
            learner: LearningUpdater::new(beliefs),
            log: Arc::new(RwLock::new(CycleLog::new(config.history_limit))),
            cycle_index: 0,
        }
    }

    /// Shared handle to the cycle log
    pub fn log(&self) -> SharedCycleLog {
        self.log.clone()
    }

    pub fn trackers(&self) -> &SharedTrackers {
        &self.trackers
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    /// Index of the last cycle started (0 before the first)
    pub fn cycle_index(&self) -> u64 {
        self.cycle_index
    }

    pub fn learner(&self) -> &LearningUpdater {
        &self.learner
    }

    /// Run one full cycle and report what happened
    pub async fn run_cycle(&mut self) -> CycleResult {
        self.cycle_index += 1;
        let cycle = self.cycle_index;
        let mut progress = CycleProgress::default();

        let result = match self.run_stages(&mut progress).await {
            Ok(measurement) => CycleResult {
                cycle,
                success: measurement.improved,
                reason: measurement.reason,
                target: None,
                improvement_delta: measurement.delta,
                hypothesis: None,
                completed_at: chrono::Utc::now(),
            },
            Err(e) => CycleResult::failed(cycle, e.to_string()),
        };
        let result = CycleResult {
            target: progress.target.clone(),
            hypothesis: progress.hypothesis.clone(),
            ..result
        };

        if let Some(id) = &progress.desire_id {
            let status = if result.success {
                DesireStatus::Completed
            } else {
                DesireStatus::Failed
            };
            let metadata = serde_json::to_value(&result).unwrap_or_default();
            if let Err(e) = self.collaborators.experience.update_desire(id, status, metadata).await {
                warn!("Closing desire {} failed: {:#}", id, e);
            }
        }

        self.log.write().await.record(&result, progress.rolled_back);
        info!("{}", result);
        result
    }

    async fn log_unachievable(&self, target: &str, selection: Selection) {
        let Selection::Unachievable { pattern, tried } = selection else {
            return;
        };
        let content = format!(
            "Gave up on improving {} after trying {}; nothing else is left",
            target,
            if tried.is_empty() { "nothing".to_string() } else { tried.join(", ") }
        );
        let metadata = json!({ "target": target, "pattern": pattern, "tried": tried });
        if let Err(e) = self
            .collaborators
            .experience
            .record_experience(&content, "unachievable_pattern", metadata)
            .await
        {
            warn!("Recording unachievable pattern failed: {:#}", e);
        }
    }

    async fn run_stages(&mut self, progress: &mut CycleProgress) -> CycleOutcome<MeasurementResult> {
        let collab = self.collaborators.clone();

        let inventory = collab
            .inventory
            .assess(false)
            .await
            .map_err(|e| CycleError::collaborator("capability assessment", e))?;

        let plateau = match collab.meta.detect_plateau().await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!("Plateau detection unavailable: {:#}", e);
                None
            }
        };

        let target = select_target(&inventory, plateau.as_ref()).ok_or(CycleError::NoTargetFound)?;
        info!(
            "Cycle {} target: {} at {:.2} ({}, {})",
            self.cycle_index, target.name, target.current_level, target.priority, target.reason
        );
        progress.target = Some(target.name.clone());

        let pattern = improvement_pattern(&target.name);
        self.trackers.record_desire(&pattern).await;
        let desire = collab
            .experience
            .create_desire(
                &format!("Improve {}: {}", target.name, target.reason),
                DESIRE_KIND,
                desire_intensity(target.priority),
                json!({
                    "target": target.name,
                    "priority": target.priority.to_string(),
                    "cycle": self.cycle_index,
                }),
            )
            .await;
        match desire {
            Ok(id) => progress.desire_id = Some(id),
            Err(e) => warn!("Creating desire for {} failed: {:#}", target.name, e),
        }

        let labels: Vec<String> = Strategy::ALL.iter().map(|s| s.as_str().to_string()).collect();
        let strategies: Vec<Strategy> = match self.trackers.select(&pattern, &labels).await {
            Selection::Allowed(allowed) => Strategy::ALL
                .into_iter()
                .filter(|s| allowed.iter().any(|a| a == s.as_str()))
                .collect(),
            unachievable => {
                self.log_unachievable(&target.name, unachievable).await;
                return Err(CycleError::NoHypothesesGenerated);
            }
        };
        debug!("Strategies allowed for {}: {:?}", target.name, strategies);

        let hypotheses = self
            .generator
            .generate(&target, &inventory, &collab, &strategies)
            .await;
        if hypotheses.is_empty() {
            // Nothing left to try on an escalated pattern
            if let Some(unachievable) = self.trackers.give_up(&pattern).await {
                self.log_unachievable(&target.name, unachievable).await;
            }
            return Err(CycleError::NoHypothesesGenerated);
        }
        let hypotheses = self
            .trackers
            .vary(hypotheses, |h: &ImprovementHypothesis| h.strategy.as_str())
            .await;

        let top = ranker::rank(collab.predictor.as_ref(), hypotheses)
            .await?
            .into_iter()
            .next()
            .ok_or(CycleError::NoHypothesesGenerated)?;
        info!(
            "Top hypothesis: {} (score {:.3})",
            top.description,
            top.rank_key()
        );
        progress.hypothesis = Some(top.description.clone());

        safety_gate(&collab, &top).await?;

        let strategy = top.strategy.as_str();
        let execution = self
            .executor
            .execute(&collab, &top, progress.desire_id.clone())
            .await;
        self.trackers.record_action(strategy).await;
        if let ExecutionResult::Failed { error } = execution {
            self.trackers.record_failure(&pattern, Some(strategy)).await;
            return Err(CycleError::ExecutionFailed(error));
        }

        let before = inventory.get(&target.name).map(|r| r.success_rate);
        let measurement = match self.measurer.measure(&collab, &target.name, before).await {
            Ok(m) => m,
            Err(e) => {
                self.learner
                    .learn(&collab, &top, false, 0.0, &e.to_string())
                    .await;
                self.trackers.record_failure(&pattern, Some(strategy)).await;
                return Err(e);
            }
        };
        progress.rolled_back = measurement.rolled_back;

        self.learner
            .learn(&collab, &top, measurement.improved, measurement.delta, &measurement.reason)
            .await;

        if measurement.improved {
            self.trackers.record_success(&pattern).await;
        } else {
            self.trackers.record_failure(&pattern, Some(strategy)).await;
        }

        Ok(measurement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::memory::{InMemoryExperienceStore, InMemoryPredictor, SimulatedSystem};
    use crate::collaborators::{
        capability_location, Limitation, MockSafetyVerifier, SafetyVerdict, SuccessPattern,
    };
    use crate::config::DiversityConfig;
    use crate::types::Trend;

    fn system() -> SimulatedSystem {
        SimulatedSystem::new()
            .with_capability("coding", 0.4, Trend::Declining)
            .with_capability("search", 0.9, Trend::Stable)
            .with_limitation(Limitation {
                capability: "coding".into(),
                description: "long functions".into(),
                severity: 0.6,
                potential_solutions: vec!["split long functions".into()],
                location: None,
            })
            .with_pattern(
                "coding",
                SuccessPattern {
                    name: "cache".into(),
                    description: "cache intermediate results".into(),
                    average_improvement: 0.05,
                    location: None,
                },
            )
    }

    struct Harness {
        system: Arc<SimulatedSystem>,
        store: Arc<InMemoryExperienceStore>,
        beliefs: Arc<RwLock<BayesianTracker>>,
        controller: ImprovementCycleController,
    }

    fn harness(system: SimulatedSystem) -> Harness {
        let system = Arc::new(system);
        let store = Arc::new(InMemoryExperienceStore::new());
        let collab = Collaborators::simulated_with(system.clone(), Arc::new(InMemoryPredictor::new()), store.clone());
        let beliefs = Arc::new(RwLock::new(BayesianTracker::new()));
        let controller = ImprovementCycleController::new(
            &CycleConfig::default(),
            collab,
            SharedTrackers::new(&DiversityConfig::default()),
            beliefs.clone(),
        );
        Harness {
            system,
            store,
            beliefs,
            controller,
        }
    }

    #[tokio::test]
    async fn test_empty_inventory_ends_cycle() {
        let mut h = harness(SimulatedSystem::new());
        let result = h.controller.run_cycle().await;
        assert_eq!(result.cycle, 1);
        assert!(!result.success);
        assert_eq!(result.reason, "no improvement target found");
        assert!(h.store.desires().await.is_empty());
    }

    #[tokio::test]
    async fn test_improving_cycle_closes_desire() {
        let mut h = harness(system());
        h.system.push_effect(0.03).await;

        let result = h.controller.run_cycle().await;
        assert!(result.success, "{}", result);
        assert_eq!(result.target.as_deref(), Some("coding"));
        assert!((result.improvement_delta - 0.03).abs() < 1e-9);
        assert!(result.hypothesis.unwrap().starts_with("Fix coding limitation"));

        let desires = h.store.desires().await;
        assert_eq!(desires.len(), 1);
        assert_eq!(desires[0].kind, DESIRE_KIND);
        assert_eq!(desires[0].status, DesireStatus::Completed);

        let log = h.controller.log();
        let log = log.read().await;
        assert_eq!((log.cycles_run, log.successes, log.rollbacks), (1, 1, 0));
        assert_eq!(h.beliefs.read().await.belief("coding").unwrap().alpha, 2.0);
    }

    #[tokio::test]
    async fn test_regression_is_rolled_back_within_cycle() {
        let mut h = harness(system());
        h.system.push_effect(-0.1).await;

        let result = h.controller.run_cycle().await;
        assert!(!result.success);
        assert_eq!(result.reason, "regression detected, rolled back");
        assert_eq!(h.system.rollback_reasons().await, vec!["capability regression"]);
        assert!((h.system.success_rate("coding").await.unwrap() - 0.4).abs() < 1e-9);
        assert_eq!(h.controller.log().read().await.rollbacks, 1);
        assert_eq!(h.beliefs.read().await.belief("coding").unwrap().beta, 2.0);
    }

    #[tokio::test]
    async fn test_safety_rejection_is_single_shot() {
        let mut h = harness(system());
        let mut verifier = MockSafetyVerifier::new();
        verifier.expect_verify().times(1).returning(|_, _, _| {
            Ok(SafetyVerdict {
                safe: false,
                recommendation: "requires human review".into(),
            })
        });
        h.controller.collaborators.safety = Arc::new(verifier);

        let result = h.controller.run_cycle().await;
        assert_eq!(result.reason, "rejected by safety verifier: requires human review");
        assert!(h.system.applied_changes().await.is_empty());
        assert_eq!(h.system.pending_modifications().await, 0);
    }

    #[tokio::test]
    async fn test_repeated_failures_exhaust_pattern() {
        let mut h = harness(system());
        for strategy in Strategy::ALL {
            h.system.fail_location(&capability_location("coding", strategy.as_str())).await;
        }

        let mut results = Vec::new();
        for _ in 0..6 {
            results.push(h.controller.run_cycle().await);
        }

        for result in &results[..5] {
            assert!(result.reason.starts_with("execution failed"), "{}", result);
        }
        // Three limitation fixes, then each remaining strategy once
        assert!(results[3].hypothesis.as_deref().unwrap_or("").starts_with("Compose"));
        assert!(results[4].hypothesis.as_deref().unwrap_or("").starts_with("Apply pattern"));
        assert_eq!(results[5].reason, "no hypotheses generated");
        assert!(h.controller.trackers().is_unachievable("improve coding").await);

        let experiences = h.store.experiences().await;
        assert!(experiences.iter().any(|e| e.kind == "unachievable_pattern"));
    }

    fn limitation_only() -> SimulatedSystem {
        SimulatedSystem::new()
            .with_capability("coding", 0.4, Trend::Declining)
            .with_limitation(Limitation {
                capability: "coding".into(),
                description: "long functions".into(),
                severity: 0.6,
                potential_solutions: vec!["split long functions".into()],
                location: None,
            })
    }

    #[tokio::test]
    async fn test_sole_productive_strategy_keeps_running() {
        let mut h = harness(limitation_only());
        for _ in 0..12 {
            h.system.push_effect(0.03).await;
        }

        for _ in 0..12 {
            let result = h.controller.run_cycle().await;
            assert!(result.success, "{}", result);
        }
        assert_eq!(
            h.controller.trackers().overrepresented_actions().await,
            vec!["limitation_fix"]
        );
    }

    #[tokio::test]
    async fn test_dominant_strategy_yields_to_alternatives() {
        let mut h = harness(system());
        for _ in 0..6 {
            h.system.push_effect(0.03).await;
        }

        let mut results = Vec::new();
        for _ in 0..6 {
            results.push(h.controller.run_cycle().await);
        }
        for result in &results[..5] {
            assert!(result.hypothesis.as_deref().unwrap_or("").starts_with("Fix coding limitation"));
        }
        assert!(results[5].success, "{}", results[5]);
        assert!(results[5].hypothesis.as_deref().unwrap_or("").starts_with("Compose"));
    }

    #[tokio::test]
    async fn test_escalated_pattern_with_nothing_left_is_unachievable() {
        let mut h = harness(limitation_only());
        h.system
            .fail_location(&capability_location("coding", Strategy::LimitationFix.as_str()))
            .await;

        let mut results = Vec::new();
        for _ in 0..4 {
            results.push(h.controller.run_cycle().await);
        }
        for result in &results[..3] {
            assert!(result.reason.starts_with("execution failed"), "{}", result);
        }
        assert_eq!(results[3].reason, "no hypotheses generated");
        assert!(h.controller.trackers().is_unachievable("improve coding").await);

        let experiences = h.store.experiences().await;
        let given_up: Vec<_> = experiences.iter().filter(|e| e.kind == "unachievable_pattern").collect();
        assert_eq!(given_up.len(), 1);
        assert_eq!(given_up[0].metadata["tried"], serde_json::json!(["limitation_fix"]));

        // The record was cleared, so the next cycle tries again from scratch
        let result = h.controller.run_cycle().await;
        assert!(result.reason.starts_with("execution failed"), "{}", result);
    }

    #[test]
    fn test_log_is_bounded() {
        let mut log = CycleLog::new(3);
        for i in 1..=5 {
            log.record(&CycleResult::failed(i, "x"), false);
        }
        assert_eq!(log.cycles_run, 5);
        let kept: Vec<u64> = log.results().iter().map(|r| r.cycle).collect();
        assert_eq!(kept, vec![3, 4, 5]);
        let recent: Vec<u64> = log.recent(2).iter().map(|r| r.cycle).collect();
        assert_eq!(recent, vec![4, 5]);
    }
}
