//! Bayesian capability tracker
//!
//! Each capability carries a Beta(alpha, beta) posterior over its success
//! rate, starting from the uniform Beta(1, 1) prior. Successes bump alpha,
//! failures bump beta.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use statrs::distribution::{Beta, ContinuousCDF};
use statrs::function::{beta::ln_beta, gamma::digamma};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// Beta posterior parameters for one capability
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BetaBelief {
    pub alpha: f64,
    pub beta: f64,
}

impl Default for BetaBelief {
    fn default() -> Self {
        Self { alpha: 1.0, beta: 1.0 }
    }
}

impl BetaBelief {
    pub fn mean(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }

    /// Observations folded in beyond the prior
    pub fn observations(&self) -> u64 {
        (self.alpha + self.beta - 2.0).max(0.0).round() as u64
    }

    /// Inverse CDF at probability `p`
    pub fn quantile(&self, p: f64) -> f64 {
        let p = p.clamp(0.0, 1.0);
        match Beta::new(self.alpha, self.beta) {
            Ok(dist) => dist.inverse_cdf(p),
            // Non-positive parameters from a hand-edited beliefs file
            Err(_) => p,
        }
    }

    /// Differential entropy in nats (0 for the uniform prior, negative
    /// as the posterior concentrates)
    pub fn entropy(&self) -> f64 {
        let (a, b) = (self.alpha, self.beta);
        if a <= 0.0 || b <= 0.0 {
            return 0.0;
        }
        ln_beta(a, b) - (a - 1.0) * digamma(a) - (b - 1.0) * digamma(b) + (a + b - 2.0) * digamma(a + b)
    }
}

/// Point estimate with a 95% credible interval
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CapabilityEstimate {
    pub mean: f64,
    pub lower: f64,
    pub upper: f64,
}

impl CapabilityEstimate {
    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }
}

/// Per-capability success-rate beliefs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BayesianTracker {
    beliefs: HashMap<String, BetaBelief>,
}

impl BayesianTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one binary outcome into the capability's posterior
    pub fn update(&mut self, capability: &str, success: bool) {
        let belief = self.beliefs.entry(capability.to_string()).or_default();
        if success {
            belief.alpha += 1.0;
        } else {
            belief.beta += 1.0;
        }
        debug!(
            "Belief for {} now Beta({}, {})",
            capability, belief.alpha, belief.beta
        );
    }

    pub fn belief(&self, capability: &str) -> Option<BetaBelief> {
        self.beliefs.get(capability).copied()
    }

    /// Mean and 95% credible interval; (0.5, 0.0, 1.0) when unseen
    pub fn estimate(&self, capability: &str) -> CapabilityEstimate {
        match self.beliefs.get(capability) {
            None => CapabilityEstimate { mean: 0.5, lower: 0.0, upper: 1.0 },
            Some(belief) => CapabilityEstimate {
                mean: belief.mean(),
                lower: belief.quantile(0.025),
                upper: belief.quantile(0.975),
            },
        }
    }

    /// Normalized entropy in (0, 1]: exp of the differential entropy, which
    /// is 1.0 for the uniform prior and shrinks as evidence accumulates.
    /// Unseen capabilities are maximally uncertain.
    pub fn uncertainty(&self, capability: &str) -> f64 {
        match self.beliefs.get(capability) {
            None => 1.0,
            Some(belief) => belief.entropy().exp().clamp(0.0, 1.0),
        }
    }

    /// Tracked capability names, sorted
    pub fn capabilities(&self) -> Vec<String> {
        let mut names: Vec<_> = self.beliefs.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.beliefs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.beliefs.is_empty()
    }

    /// Persist beliefs as JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create state directory")?;
        }
        let json = serde_json::to_string_pretty(self).context("Failed to serialize beliefs")?;
        std::fs::write(path, json).context("Failed to write beliefs file")?;
        info!("Saved {} capability beliefs to {:?}", self.beliefs.len(), path);
        Ok(())
    }

    /// Load beliefs from JSON; a missing file yields an empty tracker
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let json = std::fs::read_to_string(path).context("Failed to read beliefs file")?;
        let tracker: Self = serde_json::from_str(&json).context("Failed to parse beliefs file")?;
        info!("Loaded {} capability beliefs from {:?}", tracker.beliefs.len(), path);
        Ok(tracker)
    }
}
