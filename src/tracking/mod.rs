//! Shared bookkeeping
//!
//! Bayesian beliefs per capability, failure escalation per pattern and the
//! recent action/desire windows. The cycle controller and the health
//! monitor both touch the failure and diversity state, so it lives behind
//! one mutex in `SharedTrackers` and is only reachable through its methods.

pub mod bayesian;
pub mod diversity;
pub mod failure;

pub use bayesian::{BayesianTracker, BetaBelief, CapabilityEstimate};
pub use diversity::ActionHistory;
pub use failure::{pattern_hash, FailureTracker, PatternRecord, Selection};

use std::sync::Arc;
use tokio::sync::Mutex;

use crate::config::DiversityConfig;

struct TrackerState {
    failures: FailureTracker,
    actions: ActionHistory,
    desires: ActionHistory,
}

/// Counts the health monitor reads each check
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiversitySnapshot {
    pub unique_action_types: usize,
    pub actions_recorded: usize,
    pub unique_desire_patterns: usize,
    pub desires_recorded: usize,
    pub failing_patterns: usize,
}

/// Failure tracker and action/desire windows under a single writer lock
#[derive(Clone)]
pub struct SharedTrackers {
    inner: Arc<Mutex<TrackerState>>,
}

impl SharedTrackers {
    pub fn new(config: &DiversityConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TrackerState {
                failures: FailureTracker::new(config.failure_threshold),
                actions: ActionHistory::new(config.action_window, config.max_action_share),
                desires: ActionHistory::new(config.action_window, config.max_action_share),
            })),
        }
    }

    pub async fn record_failure(&self, pattern: &str, tried: Option<&str>) -> u32 {
        self.inner.lock().await.failures.record_failure(pattern, tried)
    }

    pub async fn record_success(&self, pattern: &str) {
        self.inner.lock().await.failures.record_success(pattern);
    }

    pub async fn exclusions(&self, pattern: &str) -> Vec<String> {
        self.inner.lock().await.failures.exclusions(pattern)
    }

    /// Filter candidate options for `pattern` through its failure history
    pub async fn select(&self, pattern: &str, candidates: &[String]) -> Selection {
        self.inner.lock().await.failures.select(pattern, candidates)
    }

    /// Retire an escalated pattern when what is left of it produced nothing
    pub async fn give_up(&self, pattern: &str) -> Option<Selection> {
        self.inner.lock().await.failures.give_up(pattern)
    }

    /// Drop items whose action type dominates the recent window, unless
    /// every item would be dropped
    pub async fn vary<T, F>(&self, items: Vec<T>, action_type: F) -> Vec<T>
    where
        F: Fn(&T) -> &str,
    {
        self.inner.lock().await.actions.filter_by(items, action_type)
    }

    pub async fn is_unachievable(&self, pattern: &str) -> bool {
        self.inner.lock().await.failures.is_unachievable(pattern)
    }

    pub async fn record_action(&self, action_type: &str) {
        self.inner.lock().await.actions.record(action_type);
    }

    /// Remember a desire by its pattern hash
    pub async fn record_desire(&self, description: &str) {
        let hash = pattern_hash(description);
        self.inner.lock().await.desires.record(&hash);
    }

    pub async fn overrepresented_actions(&self) -> Vec<String> {
        self.inner.lock().await.actions.overrepresented()
    }

    pub async fn snapshot(&self) -> DiversitySnapshot {
        let state = self.inner.lock().await;
        DiversitySnapshot {
            unique_action_types: state.actions.unique_count(),
            actions_recorded: state.actions.len(),
            unique_desire_patterns: state.desires.unique_count(),
            desires_recorded: state.desires.len(),
            failing_patterns: state.failures.active_patterns(),
        }
    }
}
