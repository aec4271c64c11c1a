//! Health metrics and stagnation detection

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::HealthConfig;
use crate::tracking::DiversitySnapshot;
use crate::types::{CapabilityInventory, CycleResult};

/// One sample of system-wide health
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthMetrics {
    /// Capability name and success rate, sorted by name
    pub capability_scores: Vec<(String, f64)>,
    pub recent_outcomes: usize,
    pub recent_failures: usize,
    pub unique_desire_patterns: usize,
    pub desires_recorded: usize,
    pub unique_action_types: usize,
    pub actions_recorded: usize,
    pub cycles_completed: u64,
    pub collected_at: Option<DateTime<Utc>>,
}

impl HealthMetrics {
    pub fn collect(
        inventory: &CapabilityInventory,
        recent: &[CycleResult],
        diversity: DiversitySnapshot,
        cycles_completed: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            capability_scores: inventory
                .sorted()
                .into_iter()
                .map(|c| (c.name.clone(), c.success_rate))
                .collect(),
            recent_outcomes: recent.len(),
            recent_failures: recent.iter().filter(|r| !r.success).count(),
            unique_desire_patterns: diversity.unique_desire_patterns,
            desires_recorded: diversity.desires_recorded,
            unique_action_types: diversity.unique_action_types,
            actions_recorded: diversity.actions_recorded,
            cycles_completed,
            collected_at: Some(now),
        }
    }

    /// Failure fraction of the recent window; 0 with no outcomes
    pub fn failure_rate(&self) -> f64 {
        if self.recent_outcomes == 0 {
            return 0.0;
        }
        self.recent_failures as f64 / self.recent_outcomes as f64
    }
}

/// A single poor-health condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StagnationSignal {
    AllScoresZero,
    HighFailureRate(f64),
    LowDesireDiversity(usize),
    LowActionDiversity(usize),
}

impl std::fmt::Display for StagnationSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StagnationSignal::AllScoresZero => write!(f, "all capability scores are zero"),
            StagnationSignal::HighFailureRate(rate) => write!(f, "failure rate {:.0}%", rate * 100.0),
            StagnationSignal::LowDesireDiversity(n) => write!(f, "only {} distinct desire patterns", n),
            StagnationSignal::LowActionDiversity(n) => write!(f, "only {} distinct action types", n),
        }
    }
}

/// Every signal that currently holds, regardless of gating
pub fn stagnation_signals(metrics: &HealthMetrics, config: &HealthConfig) -> Vec<StagnationSignal> {
    let mut signals = Vec::new();

    if !metrics.capability_scores.is_empty() && metrics.capability_scores.iter().all(|(_, s)| *s <= 0.0) {
        signals.push(StagnationSignal::AllScoresZero);
    }

    let rate = metrics.failure_rate();
    if metrics.recent_outcomes >= config.min_failure_sample && rate > config.failure_rate_threshold {
        signals.push(StagnationSignal::HighFailureRate(rate));
    }

    if metrics.unique_desire_patterns < config.min_unique_desires {
        signals.push(StagnationSignal::LowDesireDiversity(metrics.unique_desire_patterns));
    }

    if metrics.unique_action_types < config.min_unique_action_types {
        signals.push(StagnationSignal::LowActionDiversity(metrics.unique_action_types));
    }

    signals
}

/// Signals behind a stagnation verdict, or `None` when healthy
///
/// Needs more than `min_cycles_before_detection` completed cycles and at
/// least two simultaneous signals.
pub fn detect_stagnation(metrics: &HealthMetrics, config: &HealthConfig) -> Option<Vec<StagnationSignal>> {
    if metrics.cycles_completed <= config.min_cycles_before_detection {
        return None;
    }
    let signals = stagnation_signals(metrics, config);
    if signals.len() >= 2 {
        Some(signals)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn healthy() -> HealthMetrics {
        HealthMetrics {
            capability_scores: vec![("coding".into(), 0.4), ("search".into(), 0.8)],
            recent_outcomes: 10,
            recent_failures: 3,
            unique_desire_patterns: 4,
            desires_recorded: 10,
            unique_action_types: 3,
            actions_recorded: 10,
            cycles_completed: 10,
            collected_at: None,
        }
    }

    #[test]
    fn test_healthy_system_has_no_signals() {
        assert!(stagnation_signals(&healthy(), &HealthConfig::default()).is_empty());
    }

    #[test]
    fn test_single_signal_never_triggers() {
        let config = HealthConfig::default();
        let variants: Vec<HealthMetrics> = vec![
            HealthMetrics {
                capability_scores: vec![("coding".into(), 0.0)],
                ..healthy()
            },
            HealthMetrics {
                recent_failures: 9,
                ..healthy()
            },
            HealthMetrics {
                unique_desire_patterns: 1,
                ..healthy()
            },
            HealthMetrics {
                unique_action_types: 1,
                ..healthy()
            },
        ];
        for metrics in variants {
            assert_eq!(stagnation_signals(&metrics, &config).len(), 1);
            assert!(detect_stagnation(&metrics, &config).is_none());
        }
    }

    #[test]
    fn test_two_signals_trigger_after_min_cycles() {
        let config = HealthConfig::default();
        let mut metrics = HealthMetrics {
            recent_failures: 9,
            unique_action_types: 1,
            ..healthy()
        };
        let signals = detect_stagnation(&metrics, &config).unwrap();
        assert_eq!(signals.len(), 2);

        metrics.cycles_completed = config.min_cycles_before_detection;
        assert!(detect_stagnation(&metrics, &config).is_none());
    }

    #[test]
    fn test_failure_rate_needs_sample() {
        let metrics = HealthMetrics {
            recent_outcomes: 4,
            recent_failures: 4,
            ..healthy()
        };
        assert!(stagnation_signals(&metrics, &HealthConfig::default()).is_empty());
    }

    #[test]
    fn test_zero_outcomes_rate_is_zero() {
        let metrics = HealthMetrics::default();
        assert_eq!(metrics.failure_rate(), 0.0);
    }
}
