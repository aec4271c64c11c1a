//! Shared types used across modules
//!
//! The data model of one improvement cycle: capability snapshots, targets,
//! hypotheses and the results each pipeline stage hands to the next.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Direction a capability's success rate is moving in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Stable,
    Declining,
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Trend::Improving => write!(f, "improving"),
            Trend::Stable => write!(f, "stable"),
            Trend::Declining => write!(f, "declining"),
        }
    }
}

/// A named skill with a tracked success rate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityRecord {
    pub name: String,
    /// Success rate in [0, 1]
    pub success_rate: f64,
    pub trend: Trend,
    /// Past success rates, oldest first
    #[serde(default)]
    pub history: Vec<f64>,
}

impl CapabilityRecord {
    pub fn new(name: impl Into<String>, success_rate: f64, trend: Trend) -> Self {
        Self {
            name: name.into(),
            success_rate: success_rate.clamp(0.0, 1.0),
            trend,
            history: Vec::new(),
        }
    }
}

/// Snapshot returned by the inventory provider
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapabilityInventory {
    pub capabilities: HashMap<String, CapabilityRecord>,
    /// Names of the weakest capabilities, weakest first
    #[serde(default)]
    pub weakest: Vec<String>,
}

impl CapabilityInventory {
    pub fn from_records(records: impl IntoIterator<Item = CapabilityRecord>) -> Self {
        let capabilities: HashMap<String, CapabilityRecord> = records
            .into_iter()
            .map(|r| (r.name.clone(), r))
            .collect();

        let mut weakest: Vec<&CapabilityRecord> = capabilities.values().collect();
        weakest.sort_by(|a, b| {
            a.success_rate
                .partial_cmp(&b.success_rate)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.name.cmp(&b.name))
        });
        let weakest = weakest.into_iter().map(|r| r.name.clone()).collect();

        Self { capabilities, weakest }
    }

    pub fn get(&self, name: &str) -> Option<&CapabilityRecord> {
        self.capabilities.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// Records sorted by name, so iteration order never depends on hashing
    pub fn sorted(&self) -> Vec<&CapabilityRecord> {
        let mut records: Vec<_> = self.capabilities.values().collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records
    }
}

/// Urgency of an improvement target
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetPriority {
    Low,
    Medium,
    High,
    Urgent,
}

impl std::fmt::Display for TargetPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetPriority::Low => write!(f, "low"),
            TargetPriority::Medium => write!(f, "medium"),
            TargetPriority::High => write!(f, "high"),
            TargetPriority::Urgent => write!(f, "urgent"),
        }
    }
}

/// The capability chosen for improvement in one cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImprovementTarget {
    pub name: String,
    pub current_level: f64,
    pub priority: TargetPriority,
    pub reason: String,
}

/// How a hypothesis was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    LimitationFix,
    PatternApplication,
    Composition,
}

impl Strategy {
    pub const ALL: [Strategy; 3] = [
        Strategy::LimitationFix,
        Strategy::PatternApplication,
        Strategy::Composition,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::LimitationFix => "limitation_fix",
            Strategy::PatternApplication => "pattern_application",
            Strategy::Composition => "composition",
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A candidate change proposed to improve a capability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImprovementHypothesis {
    pub description: String,
    pub target_capability: String,
    pub strategy: Strategy,
    pub proposed_change: String,
    pub target_location: String,
    pub rationale: String,
    /// Expected gain in success rate, [0, 1]
    pub expected_improvement: f64,
    #[serde(default)]
    pub predicted_success: f64,
    #[serde(default)]
    pub prediction_confidence: f64,
}

impl ImprovementHypothesis {
    /// Ranking key: predicted success weighted by expected gain
    pub fn rank_key(&self) -> f64 {
        self.predicted_success * self.expected_improvement
    }
}

/// Outcome of applying a change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExecutionResult {
    Applied { change: String },
    Failed { error: String },
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionResult::Applied { .. })
    }
}

/// Effect of an applied change on its target capability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementResult {
    pub improved: bool,
    pub delta: f64,
    pub reason: String,
    /// True when a rollback was issued because of a regression
    #[serde(default)]
    pub rolled_back: bool,
}

/// Externally durable summary of one cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleResult {
    pub cycle: u64,
    pub success: bool,
    pub reason: String,
    pub target: Option<String>,
    pub improvement_delta: f64,
    pub hypothesis: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl CycleResult {
    pub fn failed(cycle: u64, reason: impl Into<String>) -> Self {
        Self {
            cycle,
            success: false,
            reason: reason.into(),
            target: None,
            improvement_delta: 0.0,
            hypothesis: None,
            completed_at: Utc::now(),
        }
    }

    pub fn with_target(mut self, target: &str) -> Self {
        self.target = Some(target.to_string());
        self
    }

    pub fn with_hypothesis(mut self, description: &str) -> Self {
        self.hypothesis = Some(description.to_string());
        self
    }
}

impl std::fmt::Display for CycleResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "cycle {} [{}] target={} delta={:+.3}: {}",
            self.cycle,
            if self.success { "ok" } else { "fail" },
            self.target.as_deref().unwrap_or("-"),
            self.improvement_delta,
            self.reason
        )
    }
}

/// Prediction compared against what actually happened
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionError {
    pub action: String,
    pub predicted_success: f64,
    pub confidence: f64,
    pub actual_success: bool,
    pub actual_outcome: String,
    /// |actual - predicted| with actual mapped to 0.0/1.0
    pub error: f64,
}

impl PredictionError {
    pub fn new(hypothesis: &ImprovementHypothesis, actual_success: bool, actual_outcome: &str) -> Self {
        let actual = if actual_success { 1.0 } else { 0.0 };
        Self {
            action: hypothesis.description.clone(),
            predicted_success: hypothesis.predicted_success,
            confidence: hypothesis.prediction_confidence,
            actual_success,
            actual_outcome: actual_outcome.to_string(),
            error: (actual - hypothesis.predicted_success).abs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inventory_weakest_order() {
        let inv = CapabilityInventory::from_records(vec![
            CapabilityRecord::new("coding", 0.4, Trend::Stable),
            CapabilityRecord::new("search", 0.9, Trend::Stable),
            CapabilityRecord::new("math", 0.2, Trend::Improving),
        ]);
        assert_eq!(inv.weakest, vec!["math", "coding", "search"]);
    }

    #[test]
    fn test_prediction_error() {
        let hyp = ImprovementHypothesis {
            description: "d".into(),
            target_capability: "coding".into(),
            strategy: Strategy::Composition,
            proposed_change: String::new(),
            target_location: String::new(),
            rationale: String::new(),
            expected_improvement: 0.1,
            predicted_success: 0.75,
            prediction_confidence: 0.5,
        };
        let err = PredictionError::new(&hyp, false, "not improved");
        assert!((err.error - 0.75).abs() < 1e-12);
    }
}
