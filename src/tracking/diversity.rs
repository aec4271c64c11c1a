//! Action variety enforcement
//!
//! A sliding window of recent action-type labels. Labels that dominate the
//! window are excluded from the next selection regardless of whether they
//! have been failing.

use std::collections::{HashMap, VecDeque};

/// Shares are not judged until the window holds this many entries
pub const MIN_SAMPLE: usize = 5;

#[derive(Debug, Clone)]
pub struct ActionHistory {
    capacity: usize,
    max_share: f64,
    window: VecDeque<String>,
}

impl ActionHistory {
    pub fn new(capacity: usize, max_share: f64) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            max_share,
            window: VecDeque::with_capacity(capacity),
        }
    }

    pub fn record(&mut self, label: &str) {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(label.to_string());
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    fn counts(&self) -> HashMap<&str, usize> {
        let mut counts = HashMap::new();
        for label in &self.window {
            *counts.entry(label.as_str()).or_insert(0) += 1;
        }
        counts
    }

    /// Fraction of the window taken by `label`
    pub fn share(&self, label: &str) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        let count = self.window.iter().filter(|l| *l == label).count();
        count as f64 / self.window.len() as f64
    }

    /// Labels whose share exceeds the limit, sorted
    pub fn overrepresented(&self) -> Vec<String> {
        if self.window.len() < MIN_SAMPLE {
            return Vec::new();
        }
        let len = self.window.len() as f64;
        let mut flagged: Vec<String> = self
            .counts()
            .into_iter()
            .filter(|(_, count)| *count as f64 / len > self.max_share)
            .map(|(label, _)| label.to_string())
            .collect();
        flagged.sort();
        flagged
    }

    /// Distinct labels in the window
    pub fn unique_count(&self) -> usize {
        self.counts().len()
    }

    /// Drop overrepresented labels from `candidates`, unless that would
    /// leave nothing to choose from
    pub fn filter_candidates(&self, candidates: &[String]) -> Vec<String> {
        self.filter_by(candidates.to_vec(), |c| c.as_str())
    }

    /// Drop items whose label is overrepresented, keeping order. Returns
    /// `items` untouched when every one of them would be dropped.
    pub fn filter_by<T, F>(&self, items: Vec<T>, label: F) -> Vec<T>
    where
        F: Fn(&T) -> &str,
    {
        let flagged = self.overrepresented();
        if flagged.is_empty() || items.iter().all(|i| flagged.iter().any(|f| f == label(i))) {
            return items;
        }
        items
            .into_iter()
            .filter(|i| !flagged.iter().any(|f| f == label(i)))
            .collect()
    }
}
