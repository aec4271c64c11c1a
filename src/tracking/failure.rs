//! Failure escalation
//!
//! Desires and improvement goals are reduced to a pattern hash. Each hash
//! accumulates consecutive failures and the options tried against it; once
//! the count reaches the threshold, tried options are excluded, and a
//! pattern with nothing left to try is declared unachievable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{info, warn};

/// Words that carry no meaning for pattern matching
const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "from", "into", "onto", "our", "your",
    "its", "are", "was", "were", "been", "being", "have", "has", "had", "will", "would",
    "should", "could", "can", "may", "might", "must", "try", "again", "please", "more",
    "some", "any", "all", "then", "than", "very", "just",
];

/// Salient tokens of a description: lowercased, alphanumeric, deduplicated
/// and sorted, so word order and repetition do not change the pattern
pub fn salient_tokens(text: &str) -> Vec<String> {
    let tokens: BTreeSet<String> = text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 3)
        .filter(|t| !t.chars().all(|c| c.is_ascii_digit()))
        .filter(|t| !STOPWORDS.contains(t))
        .map(str::to_string)
        .collect();
    tokens.into_iter().collect()
}

/// Stable fingerprint of a description
pub fn pattern_hash(text: &str) -> String {
    let normalized = salient_tokens(text).join(" ");
    let digest = Sha256::digest(normalized.as_bytes());
    hex::encode(&digest[..8])
}

/// Failure history of one pattern
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternRecord {
    /// Consecutive failures
    pub count: u32,
    /// Capabilities or strategies attempted against this pattern
    pub tried: BTreeSet<String>,
    pub first_failure: DateTime<Utc>,
    pub last_failure: DateTime<Utc>,
    /// Most recent description that produced this hash
    pub example: String,
}

/// Result of filtering candidates against a pattern's history
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    /// Candidates still worth trying, in their original order
    Allowed(Vec<String>),
    /// Everything has been tried; the pattern was retired
    Unachievable { pattern: String, tried: Vec<String> },
}

#[derive(Debug, Clone)]
pub struct FailureTracker {
    threshold: u32,
    patterns: HashMap<String, PatternRecord>,
    unachievable: HashSet<String>,
}

impl FailureTracker {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            patterns: HashMap::new(),
            unachievable: HashSet::new(),
        }
    }

    /// Record a failed attempt; returns the consecutive failure count
    pub fn record_failure(&mut self, description: &str, tried: Option<&str>) -> u32 {
        let hash = pattern_hash(description);
        let now = Utc::now();
        let record = self.patterns.entry(hash.clone()).or_insert_with(|| PatternRecord {
            count: 0,
            tried: BTreeSet::new(),
            first_failure: now,
            last_failure: now,
            example: description.to_string(),
        });
        record.count += 1;
        record.last_failure = now;
        record.example = description.to_string();
        if let Some(option) = tried {
            record.tried.insert(option.to_string());
        }

        if record.count == self.threshold {
            warn!(
                "Pattern {} reached {} consecutive failures; excluding {:?} from now on",
                hash, record.count, record.tried
            );
        }
        record.count
    }

    /// A success clears the pattern's failure history
    pub fn record_success(&mut self, description: &str) {
        let hash = pattern_hash(description);
        self.patterns.remove(&hash);
        self.unachievable.remove(&hash);
    }

    pub fn record(&self, description: &str) -> Option<&PatternRecord> {
        self.patterns.get(&pattern_hash(description))
    }

    pub fn is_escalated(&self, description: &str) -> bool {
        self.record(description)
            .map(|r| r.count >= self.threshold)
            .unwrap_or(false)
    }

    /// Options that must not be retried; empty below the threshold
    pub fn exclusions(&self, description: &str) -> Vec<String> {
        match self.record(description) {
            Some(r) if r.count >= self.threshold => r.tried.iter().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// Filter `candidates` for the next attempt at `description`.
    ///
    /// When the pattern is escalated and every candidate has already been
    /// tried, the pattern is marked unachievable and its record dropped.
    pub fn select(&mut self, description: &str, candidates: &[String]) -> Selection {
        let hash = pattern_hash(description);
        let excluded: HashSet<String> = self.exclusions(description).into_iter().collect();
        let allowed: Vec<String> = candidates
            .iter()
            .filter(|c| !excluded.contains(*c))
            .cloned()
            .collect();

        if allowed.is_empty() && !excluded.is_empty() {
            let tried = self.mark_unachievable(&hash);
            return Selection::Unachievable { pattern: hash, tried };
        }
        Selection::Allowed(allowed)
    }

    /// Retire an escalated pattern whose remaining options produced
    /// nothing to try; `None` while the pattern is below the threshold
    pub fn give_up(&mut self, description: &str) -> Option<Selection> {
        if !self.is_escalated(description) {
            return None;
        }
        let hash = pattern_hash(description);
        let tried = self.mark_unachievable(&hash);
        Some(Selection::Unachievable { pattern: hash, tried })
    }

    /// Retire a pattern by hash, returning what had been tried
    fn mark_unachievable(&mut self, hash: &str) -> Vec<String> {
        let tried = self
            .patterns
            .remove(hash)
            .map(|r| r.tried.into_iter().collect())
            .unwrap_or_default();
        self.unachievable.insert(hash.to_string());
        info!("Pattern {} marked unachievable after trying {:?}", hash, tried);
        tried
    }

    pub fn is_unachievable(&self, description: &str) -> bool {
        self.unachievable.contains(&pattern_hash(description))
    }

    /// Number of patterns currently carrying failures
    pub fn active_patterns(&self) -> usize {
        self.patterns.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_ignores_order_case_and_stopwords() {
        assert_eq!(
            pattern_hash("Improve the coding capability"),
            pattern_hash("capability CODING improve, please")
        );
        assert_ne!(pattern_hash("improve coding"), pattern_hash("improve search"));
        assert_eq!(pattern_hash("improve coding").len(), 16);
    }

    #[test]
    fn test_fourth_encounter_excludes_three_tried() {
        let mut tracker = FailureTracker::new(3);
        let desire = "learn to write parsers";
        tracker.record_failure(desire, Some("coding"));
        tracker.record_failure("write parsers, learn", Some("reasoning"));
        tracker.record_failure(desire, Some("search"));

        let candidates: Vec<String> = ["coding", "reasoning", "search", "planning"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let mut excluded = tracker.exclusions(desire);
        excluded.sort();
        assert_eq!(excluded, vec!["coding", "reasoning", "search"]);
        assert_eq!(
            tracker.select(desire, &candidates),
            Selection::Allowed(vec!["planning".to_string()])
        );
    }

    #[test]
    fn test_below_threshold_excludes_nothing() {
        let mut tracker = FailureTracker::new(3);
        tracker.record_failure("improve coding", Some("composition"));
        tracker.record_failure("improve coding", Some("limitation_fix"));
        assert!(tracker.exclusions("improve coding").is_empty());
        assert!(!tracker.is_escalated("improve coding"));
    }

    #[test]
    fn test_exhausted_pattern_becomes_unachievable() {
        let mut tracker = FailureTracker::new(3);
        for option in ["a", "b", "b"] {
            tracker.record_failure("improve coding", Some(option));
        }
        let candidates = vec!["a".to_string(), "b".to_string()];
        match tracker.select("improve coding", &candidates) {
            Selection::Unachievable { tried, .. } => assert_eq!(tried, vec!["a", "b"]),
            other => panic!("expected unachievable, got {:?}", other),
        }
        assert!(tracker.is_unachievable("improve coding"));
        assert!(tracker.record("improve coding").is_none());
    }

    #[test]
    fn test_give_up_only_when_escalated() {
        let mut tracker = FailureTracker::new(3);
        tracker.record_failure("improve coding", Some("limitation_fix"));
        assert_eq!(tracker.give_up("improve coding"), None);
        assert!(!tracker.is_unachievable("improve coding"));

        tracker.record_failure("improve coding", Some("limitation_fix"));
        tracker.record_failure("improve coding", Some("limitation_fix"));
        match tracker.give_up("improve coding") {
            Some(Selection::Unachievable { tried, .. }) => assert_eq!(tried, vec!["limitation_fix"]),
            other => panic!("expected unachievable, got {:?}", other),
        }
        assert!(tracker.is_unachievable("improve coding"));
        assert_eq!(tracker.active_patterns(), 0);
    }

    #[test]
    fn test_success_resets() {
        let mut tracker = FailureTracker::new(2);
        tracker.record_failure("improve coding", Some("a"));
        tracker.record_failure("improve coding", Some("b"));
        assert!(tracker.is_escalated("improve coding"));
        tracker.record_success("improve coding");
        assert!(!tracker.is_escalated("improve coding"));
        assert_eq!(tracker.active_patterns(), 0);
    }
}
