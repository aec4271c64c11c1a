//! Intervention escalation
//!
//! The level is a function of how long stagnation has lasted, never of how
//! many checks have seen it. A single healthy check resets everything.

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::HealthConfig;

pub const MAX_LEVEL: u8 = 3;

/// Concrete tasks whose success anyone can check
pub const GROUNDING_TASKS: &[&str] = &[
    "Write a function that parses an ISO-8601 date and add a unit test for a leap day",
    "Reproduce the most recent failed cycle by hand and record the exact error",
    "Count the capabilities below 0.5 success and list one concrete failure for each",
    "Run the existing test suite and report the number of passing and failing tests",
    "Pick one limitation and write a minimal input that triggers it",
    "Summarise the last five applied changes with their measured deltas",
];

/// Problematic belief phrasing found by the level-3 audit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BeliefIssue {
    FailureReframedAsSuccess,
    ActionDiscouraging,
}

impl std::fmt::Display for BeliefIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BeliefIssue::FailureReframedAsSuccess => write!(f, "failure reframed as success"),
            BeliefIssue::ActionDiscouraging => write!(f, "action-discouraging"),
        }
    }
}

/// Phrasings the level-3 audit looks for
static AUDIT_PATTERNS: Lazy<Vec<(Regex, BeliefIssue)>> = Lazy::new(|| {
    vec![
        // "the failure was actually progress"
        (Regex::new(r"(?ix)
            \b (failure | failed | failing | mistake | error) s? \b
            .{0,40}
            \b (is | was | are | were | counts \s+ as | as) \b
            .{0,20}
            \b (success | progress | win | learning \s+ opportunity) \b
        ").unwrap(), BeliefIssue::FailureReframedAsSuccess),
        // "better not to", "don't try", "no point in"
        (Regex::new(r"(?ix)
            \b (better | best | safer | wiser) \s+ (not \s+ to | to \s+ avoid | to \s+ wait) \b
            | \b (don't | do \s+ not | never | shouldn't | should \s+ not) \s+ (try | act | change | attempt | modify) \b
            | \b no \s+ point \s+ in \b
        ").unwrap(), BeliefIssue::ActionDiscouraging),
    ]
});

pub fn audit_belief(content: &str) -> Option<BeliefIssue> {
    AUDIT_PATTERNS
        .iter()
        .find(|(pattern, _)| pattern.is_match(content))
        .map(|(_, issue)| *issue)
}

/// Something the monitor did in response to stagnation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InterventionAction {
    GroundingTaskInjected { desire_id: String, task: String },
    StaleDesiresCleared(usize),
    BeliefDecayed { id: String, issue: BeliefIssue, from: f64, to: f64 },
    SelfModificationRequested { desire_id: String },
}

/// Result of feeding one health verdict into the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelUpdate {
    pub previous: u8,
    pub level: u8,
    /// Interventions for `level` are due on this check
    pub intervene: bool,
}

/// Escalation state owned by the health monitor
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InterventionState {
    level: u8,
    stagnation_started: Option<DateTime<Utc>>,
    last_injection: Option<DateTime<Utc>>,
    last_injected_level: u8,
    grounding_cursor: usize,
    ceiling_reported: bool,
}

impl InterventionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    pub fn stagnation_started(&self) -> Option<DateTime<Utc>> {
        self.stagnation_started
    }

    /// Level implied by `elapsed` stagnation
    pub fn level_for(elapsed: Duration, config: &HealthConfig) -> u8 {
        if elapsed < Duration::minutes(config.level1_minutes) {
            1
        } else if elapsed < Duration::minutes(config.level2_minutes) {
            2
        } else {
            MAX_LEVEL
        }
    }

    /// Advance the state machine with this check's verdict
    pub fn observe(&mut self, stagnant: bool, now: DateTime<Utc>, config: &HealthConfig) -> LevelUpdate {
        let previous = self.level;

        if !stagnant {
            if previous > 0 {
                info!("Health recovered from intervention level {}", previous);
            }
            *self = Self {
                grounding_cursor: self.grounding_cursor,
                ..Self::default()
            };
            return LevelUpdate {
                previous,
                level: 0,
                intervene: false,
            };
        }

        let started = *self.stagnation_started.get_or_insert(now);
        let elapsed = now - started;
        // Clock skew must not lower the level while stagnation persists
        let level = Self::level_for(elapsed, config).max(previous).min(MAX_LEVEL);
        self.level = level;

        if elapsed >= Duration::minutes(config.level3_minutes) && !self.ceiling_reported {
            warn!(
                "Stagnant for {} minutes; staying at intervention level {}",
                elapsed.num_minutes(),
                MAX_LEVEL
            );
            self.ceiling_reported = true;
        }

        let refresh_due = self
            .last_injection
            .map(|at| now - at >= Duration::minutes(config.level1_minutes))
            .unwrap_or(true);
        let intervene = level > self.last_injected_level || refresh_due;
        if intervene {
            self.last_injection = Some(now);
            self.last_injected_level = level;
        }

        LevelUpdate {
            previous,
            level,
            intervene,
        }
    }

    /// The next `count` grounding tasks, rotating through the list
    pub fn next_grounding_tasks(&mut self, count: usize) -> Vec<&'static str> {
        let tasks: Vec<&'static str> = (0..count.min(GROUNDING_TASKS.len()))
            .map(|i| GROUNDING_TASKS[(self.grounding_cursor + i) % GROUNDING_TASKS.len()])
            .collect();
        self.grounding_cursor = (self.grounding_cursor + tasks.len()) % GROUNDING_TASKS.len();
        tasks
    }
}
