//! In-memory collaborators
//!
//! A small simulated world: capabilities whose success rates move when
//! changes are applied, a rollback stack that restores full snapshots,
//! a predictor that learns per-strategy hit rates, and a desire/experience
//! store that keeps everything in vectors.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::collections::{HashMap, HashSet, VecDeque};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::*;
use crate::types::{CapabilityRecord, Trend};

fn capability_from_location(location: &str) -> Option<&str> {
    location
        .strip_prefix(CAPABILITY_LOCATION_PREFIX)
        .and_then(|rest| rest.split('/').next())
        .filter(|name| !name.is_empty())
}

/// Snapshots kept for rollback; older ones are dropped first
pub const MAX_SNAPSHOTS: usize = 16;

#[derive(Debug, Clone)]
struct ModificationRecord {
    id: String,
    location: String,
    description: String,
    link_id: Option<String>,
    snapshot: HashMap<String, CapabilityRecord>,
}

#[derive(Default)]
struct SimState {
    capabilities: HashMap<String, CapabilityRecord>,
    limitations: Vec<Limitation>,
    patterns: HashMap<String, Vec<SuccessPattern>>,
    modifications: VecDeque<ModificationRecord>,
    scripted_effects: VecDeque<f64>,
    failing_locations: HashSet<String>,
    plateau: PlateauReport,
    domain_learning: Vec<(String, f64)>,
    rollback_reasons: Vec<String>,
    applied: Vec<String>,
}

/// Simulated capability landscape
///
/// Serves as inventory provider, limitation and pattern source, change
/// applier, rollback manager and meta-learning signal at once, since all
/// of them observe the same capability state.
pub struct SimulatedSystem {
    state: RwLock<SimState>,
}

impl SimulatedSystem {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(SimState::default()),
        }
    }

    /// A small starter landscape for the CLI
    pub fn demo() -> Self {
        Self::new()
            .with_capability("coding", 0.40, Trend::Declining)
            .with_capability("reasoning", 0.72, Trend::Stable)
            .with_capability("search", 0.81, Trend::Improving)
            .with_capability("planning", 0.55, Trend::Stable)
            .with_limitation(Limitation {
                capability: "coding".to_string(),
                description: "Loses track of borrow scopes in long functions".to_string(),
                severity: 0.6,
                potential_solutions: vec!["Split edits into per-function passes".to_string()],
                location: None,
            })
            .with_pattern("coding", SuccessPattern {
                name: "test-first".to_string(),
                description: "Write the failing test before the fix".to_string(),
                average_improvement: 0.05,
                location: None,
            })
            .with_pattern("planning", SuccessPattern {
                name: "checklist".to_string(),
                description: "Expand goals into explicit checklists".to_string(),
                average_improvement: 0.04,
                location: None,
            })
    }

    pub fn with_capability(mut self, name: &str, success_rate: f64, trend: Trend) -> Self {
        self.state
            .get_mut()
            .capabilities
            .insert(name.to_string(), CapabilityRecord::new(name, success_rate, trend));
        self
    }

    pub fn with_limitation(mut self, limitation: Limitation) -> Self {
        self.state.get_mut().limitations.push(limitation);
        self
    }

    pub fn with_pattern(mut self, target: &str, pattern: SuccessPattern) -> Self {
        self.state
            .get_mut()
            .patterns
            .entry(target.to_string())
            .or_default()
            .push(pattern);
        self
    }

    /// Queue the success-rate delta the next applied change will cause
    pub async fn push_effect(&self, delta: f64) {
        self.state.write().await.scripted_effects.push_back(delta);
    }

    /// Make every change applied at `location` fail
    pub async fn fail_location(&self, location: &str) {
        self.state.write().await.failing_locations.insert(location.to_string());
    }

    pub async fn set_plateau(&self, report: PlateauReport) {
        self.state.write().await.plateau = report;
    }

    pub async fn set_capability(&self, name: &str, success_rate: f64, trend: Trend) {
        self.state
            .write()
            .await
            .capabilities
            .insert(name.to_string(), CapabilityRecord::new(name, success_rate, trend));
    }

    pub async fn success_rate(&self, name: &str) -> Option<f64> {
        self.state.read().await.capabilities.get(name).map(|c| c.success_rate)
    }

    pub async fn rollback_reasons(&self) -> Vec<String> {
        self.state.read().await.rollback_reasons.clone()
    }

    pub async fn applied_changes(&self) -> Vec<String> {
        self.state.read().await.applied.clone()
    }

    pub async fn domain_learning(&self) -> Vec<(String, f64)> {
        self.state.read().await.domain_learning.clone()
    }

    pub async fn pending_modifications(&self) -> usize {
        self.state.read().await.modifications.len()
    }
}

impl Default for SimulatedSystem {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InventoryProvider for SimulatedSystem {
    async fn assess(&self, _force_refresh: bool) -> Result<CapabilityInventory> {
        let state = self.state.read().await;
        Ok(CapabilityInventory::from_records(state.capabilities.values().cloned()))
    }
}

#[async_trait]
impl LimitationSource for SimulatedSystem {
    async fn identify_limitations(&self) -> Result<Vec<Limitation>> {
        Ok(self.state.read().await.limitations.clone())
    }
}

#[async_trait]
impl PatternSource for SimulatedSystem {
    async fn successful_patterns(&self, target: &str) -> Result<Vec<SuccessPattern>> {
        Ok(self.state.read().await.patterns.get(target).cloned().unwrap_or_default())
    }

    async fn composable_capabilities(
        &self,
        target: &str,
        inventory: &CapabilityInventory,
    ) -> Result<Vec<String>> {
        Ok(inventory
            .sorted()
            .into_iter()
            .filter(|c| c.name != target)
            .map(|c| c.name.clone())
            .collect())
    }
}

#[async_trait]
impl ChangeApplier for SimulatedSystem {
    async fn apply(&self, target_location: &str, change: &str, description: &str) -> Result<String> {
        let mut state = self.state.write().await;

        if state.failing_locations.contains(target_location) {
            bail!("change rejected at {}", target_location);
        }

        let capability = capability_from_location(target_location)
            .with_context(|| format!("location '{}' does not name a capability", target_location))?
            .to_string();

        let effect = match state.scripted_effects.pop_front() {
            Some(delta) => delta,
            None => rand::rng().random_range(-0.03..0.06),
        };

        let record = state
            .capabilities
            .get_mut(&capability)
            .with_context(|| format!("unknown capability '{}'", capability))?;
        record.history.push(record.success_rate);
        record.success_rate = (record.success_rate + effect).clamp(0.0, 1.0);
        record.trend = if effect > 0.0 {
            Trend::Improving
        } else if effect < 0.0 {
            Trend::Declining
        } else {
            Trend::Stable
        };

        debug!("Simulated {} on {}: {:+.3}", change, capability, effect);
        state.applied.push(description.to_string());
        Ok(format!("{} -> {}", description, target_location))
    }
}

#[async_trait]
impl RollbackManager for SimulatedSystem {
    async fn record_modification(
        &self,
        target_location: &str,
        description: &str,
        link_id: Option<String>,
    ) -> Result<String> {
        let mut state = self.state.write().await;
        let id = uuid::Uuid::new_v4().to_string();
        let snapshot = state.capabilities.clone();
        if state.modifications.len() == MAX_SNAPSHOTS {
            state.modifications.pop_front();
        }
        state.modifications.push_back(ModificationRecord {
            id: id.clone(),
            location: target_location.to_string(),
            description: description.to_string(),
            link_id,
            snapshot,
        });
        Ok(id)
    }

    async fn rollback_last(&self, reason: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let record = state
            .modifications
            .pop_back()
            .context("no recorded modification to roll back")?;
        info!(
            "Rolling back '{}' at {} ({}, link {:?}): {}",
            record.description, record.location, record.id, record.link_id, reason
        );
        state.capabilities = record.snapshot;
        state.rollback_reasons.push(reason.to_string());
        Ok(())
    }
}

#[async_trait]
impl MetaLearning for SimulatedSystem {
    async fn detect_plateau(&self) -> Result<PlateauReport> {
        Ok(self.state.read().await.plateau.clone())
    }

    async fn record_domain_learning(&self, domain: &str, knowledge_gained: f64) -> Result<()> {
        self.state
            .write()
            .await
            .domain_learning
            .push((domain.to_string(), knowledge_gained));
        Ok(())
    }
}

/// Predictor that learns how often each strategy pays off
pub struct InMemoryPredictor {
    overrides: RwLock<HashMap<String, Prediction>>,
    /// strategy -> (hits, misses)
    outcomes: RwLock<HashMap<String, (u64, u64)>>,
    /// action -> strategy, so errors can be attributed
    strategies: RwLock<HashMap<String, String>>,
    errors: RwLock<Vec<PredictionError>>,
}

impl InMemoryPredictor {
    pub fn new() -> Self {
        Self {
            overrides: RwLock::new(HashMap::new()),
            outcomes: RwLock::new(HashMap::new()),
            strategies: RwLock::new(HashMap::new()),
            errors: RwLock::new(Vec::new()),
        }
    }

    /// Fix the answer for a given action description
    pub fn with_prediction(mut self, action: &str, success_probability: f64, confidence: f64) -> Self {
        self.overrides.get_mut().insert(
            action.to_string(),
            Prediction { success_probability, confidence },
        );
        self
    }

    pub async fn recorded_errors(&self) -> Vec<PredictionError> {
        self.errors.read().await.clone()
    }
}

impl Default for InMemoryPredictor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PredictiveModel for InMemoryPredictor {
    async fn predict_outcome(&self, action: &str, context: &PredictionContext) -> Result<Prediction> {
        self.strategies
            .write()
            .await
            .insert(action.to_string(), context.strategy.clone());

        if let Some(prediction) = self.overrides.read().await.get(action) {
            return Ok(*prediction);
        }

        let (hits, misses) = self
            .outcomes
            .read()
            .await
            .get(&context.strategy)
            .copied()
            .unwrap_or((0, 0));
        let n = (hits + misses) as f64;
        Ok(Prediction {
            success_probability: (hits as f64 + 1.0) / (n + 2.0),
            confidence: n / (n + 10.0),
        })
    }

    async fn update_from_prediction_error(&self, error: &PredictionError) -> Result<()> {
        let strategy = self.strategies.read().await.get(&error.action).cloned();
        if let Some(strategy) = strategy {
            let mut outcomes = self.outcomes.write().await;
            let entry = outcomes.entry(strategy).or_insert((0, 0));
            if error.actual_success {
                entry.0 += 1;
            } else {
                entry.1 += 1;
            }
        }
        self.errors.write().await.push(error.clone());
        Ok(())
    }
}

/// Rejects changes that mention blocked terms or touch protected locations
///
/// Locations under a protected prefix (by default the controller's own
/// source tree) are always rejected: a change there could rewrite the
/// cycle while it is running.
pub struct KeywordSafetyVerifier {
    blocked_terms: Vec<String>,
    protected_prefixes: Vec<String>,
}

impl KeywordSafetyVerifier {
    pub fn new(blocked_terms: Vec<String>, protected_prefixes: Vec<String>) -> Self {
        Self {
            blocked_terms: blocked_terms.into_iter().map(|t| t.to_lowercase()).collect(),
            protected_prefixes,
        }
    }
}

impl Default for KeywordSafetyVerifier {
    fn default() -> Self {
        Self::new(
            vec![
                "rm -rf".to_string(),
                "disable safety".to_string(),
                "skip verification".to_string(),
            ],
            vec!["self_improver/".to_string(), "src/cycle/".to_string()],
        )
    }
}

#[async_trait]
impl SafetyVerifier for KeywordSafetyVerifier {
    async fn verify(&self, change: &str, target_location: &str, _rationale: &str) -> Result<SafetyVerdict> {
        if let Some(prefix) = self
            .protected_prefixes
            .iter()
            .find(|p| target_location.starts_with(p.as_str()))
        {
            return Ok(SafetyVerdict {
                safe: false,
                recommendation: format!("location is under protected prefix '{}'", prefix),
            });
        }

        let lower = change.to_lowercase();
        if let Some(term) = self.blocked_terms.iter().find(|t| lower.contains(t.as_str())) {
            return Ok(SafetyVerdict {
                safe: false,
                recommendation: format!("change contains blocked term '{}'", term),
            });
        }

        Ok(SafetyVerdict {
            safe: true,
            recommendation: "no issues found".to_string(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ExperienceRecord {
    pub content: String,
    pub kind: String,
    pub metadata: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct DesireRecord {
    pub id: String,
    pub description: String,
    pub kind: String,
    pub intensity: f64,
    pub status: DesireStatus,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Experience log, desire queue and belief set kept in memory
pub struct InMemoryExperienceStore {
    experiences: RwLock<Vec<ExperienceRecord>>,
    desires: RwLock<Vec<DesireRecord>>,
    beliefs: RwLock<Vec<Belief>>,
}

impl InMemoryExperienceStore {
    pub fn new() -> Self {
        Self {
            experiences: RwLock::new(Vec::new()),
            desires: RwLock::new(Vec::new()),
            beliefs: RwLock::new(Vec::new()),
        }
    }

    pub async fn add_belief(&self, content: &str, confidence: f64) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.beliefs.write().await.push(Belief {
            id: id.clone(),
            content: content.to_string(),
            confidence,
        });
        id
    }

    pub async fn experiences(&self) -> Vec<ExperienceRecord> {
        self.experiences.read().await.clone()
    }

    pub async fn desires(&self) -> Vec<DesireRecord> {
        self.desires.read().await.clone()
    }

    pub async fn beliefs(&self) -> Vec<Belief> {
        self.beliefs.read().await.clone()
    }
}

impl Default for InMemoryExperienceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExperienceStore for InMemoryExperienceStore {
    async fn record_experience(&self, content: &str, kind: &str, metadata: serde_json::Value) -> Result<()> {
        self.experiences.write().await.push(ExperienceRecord {
            content: content.to_string(),
            kind: kind.to_string(),
            metadata,
            recorded_at: Utc::now(),
        });
        Ok(())
    }

    async fn create_desire(
        &self,
        description: &str,
        kind: &str,
        intensity: f64,
        metadata: serde_json::Value,
    ) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        self.desires.write().await.push(DesireRecord {
            id: id.clone(),
            description: description.to_string(),
            kind: kind.to_string(),
            intensity: intensity.clamp(0.0, 1.0),
            status: DesireStatus::Active,
            metadata,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn update_desire(&self, id: &str, status: DesireStatus, metadata: serde_json::Value) -> Result<()> {
        let mut desires = self.desires.write().await;
        let desire = desires
            .iter_mut()
            .find(|d| d.id == id)
            .with_context(|| format!("unknown desire '{}'", id))?;
        desire.status = status;
        desire.metadata = metadata;
        Ok(())
    }

    async fn clear_stale_desires(&self, keep_kind: &str, keep_after: DateTime<Utc>) -> Result<usize> {
        let mut desires = self.desires.write().await;
        let before = desires.len();
        desires.retain(|d| {
            d.status != DesireStatus::Active || (d.kind == keep_kind && d.created_at > keep_after)
        });
        Ok(before - desires.len())
    }
}

#[async_trait]
impl BeliefStore for InMemoryExperienceStore {
    async fn recent_beliefs(&self, limit: usize) -> Result<Vec<Belief>> {
        let beliefs = self.beliefs.read().await;
        Ok(beliefs.iter().rev().take(limit).cloned().collect())
    }

    async fn set_confidence(&self, id: &str, confidence: f64) -> Result<()> {
        let mut beliefs = self.beliefs.write().await;
        let belief = beliefs
            .iter_mut()
            .find(|b| b.id == id)
            .with_context(|| format!("unknown belief '{}'", id))?;
        belief.confidence = confidence.clamp(0.0, 1.0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_apply_and_rollback_restores_snapshot() {
        let system = SimulatedSystem::new().with_capability("coding", 0.4, Trend::Stable);
        system.push_effect(-0.1).await;

        let loc = capability_location("coding", "limitation_fix");
        system.record_modification(&loc, "shorter prompts", None).await.unwrap();
        system.apply(&loc, "shorter prompts", "shorter prompts").await.unwrap();
        assert!((system.success_rate("coding").await.unwrap() - 0.3).abs() < 1e-9);

        system.rollback_last("capability regression").await.unwrap();
        assert!((system.success_rate("coding").await.unwrap() - 0.4).abs() < 1e-9);
        assert_eq!(system.rollback_reasons().await, vec!["capability regression"]);
    }

    #[tokio::test]
    async fn test_snapshot_stack_is_bounded() {
        let system = SimulatedSystem::new().with_capability("coding", 0.4, Trend::Stable);
        let loc = capability_location("coding", "pattern_application");
        for i in 0..(MAX_SNAPSHOTS + 10) {
            system.push_effect(0.01).await;
            system.record_modification(&loc, &format!("change {}", i), None).await.unwrap();
            system.apply(&loc, "tweak", "tweak").await.unwrap();
        }
        assert_eq!(system.pending_modifications().await, MAX_SNAPSHOTS);

        // The newest snapshot is still the one restored
        let before_last = system.success_rate("coding").await.unwrap() - 0.01;
        system.rollback_last("capability regression").await.unwrap();
        assert!((system.success_rate("coding").await.unwrap() - before_last).abs() < 1e-9);
        assert_eq!(system.pending_modifications().await, MAX_SNAPSHOTS - 1);
    }

    #[tokio::test]
    async fn test_rollback_without_modification_fails() {
        let system = SimulatedSystem::new();
        assert!(system.rollback_last("nothing").await.is_err());
    }

    #[tokio::test]
    async fn test_apply_unknown_location_fails() {
        let system = SimulatedSystem::new();
        assert!(system.apply("somewhere/else", "x", "x").await.is_err());
    }

    #[tokio::test]
    async fn test_safety_verifier_protects_own_code() {
        let verifier = KeywordSafetyVerifier::default();
        let verdict = verifier.verify("tweak loop", "src/cycle/mod.rs", "").await.unwrap();
        assert!(!verdict.safe);

        let verdict = verifier
            .verify("add retries", &capability_location("coding", "composition"), "")
            .await
            .unwrap();
        assert!(verdict.safe);
    }

    #[tokio::test]
    async fn test_predictor_learns_per_strategy() {
        let predictor = InMemoryPredictor::new();
        let ctx = PredictionContext {
            target: "coding".into(),
            strategy: "composition".into(),
            expected_improvement: 0.1,
        };
        let first = predictor.predict_outcome("a", &ctx).await.unwrap();
        assert!((first.success_probability - 0.5).abs() < 1e-9);
        assert_eq!(first.confidence, 0.0);

        let err = PredictionError {
            action: "a".into(),
            predicted_success: 0.5,
            confidence: 0.0,
            actual_success: true,
            actual_outcome: "improved".into(),
            error: 0.5,
        };
        predictor.update_from_prediction_error(&err).await.unwrap();
        let second = predictor.predict_outcome("b", &ctx).await.unwrap();
        assert!(second.success_probability > first.success_probability);
    }

    #[tokio::test]
    async fn test_clear_stale_desires() {
        let store = InMemoryExperienceStore::new();
        let id = store.create_desire("a", "grounding", 0.9, serde_json::json!({})).await.unwrap();
        store.create_desire("b", "grounding", 0.9, serde_json::json!({})).await.unwrap();
        store.update_desire(&id, DesireStatus::Completed, serde_json::json!({})).await.unwrap();

        let long_ago = Utc::now() - chrono::Duration::hours(1);
        assert_eq!(store.clear_stale_desires("self_improvement", long_ago).await.unwrap(), 1);
        assert_eq!(store.desires().await.len(), 1);
    }

    #[tokio::test]
    async fn test_clear_keeps_recent_desires_of_kept_kind() {
        let store = InMemoryExperienceStore::new();
        store.create_desire("improve coding", "self_improvement", 0.9, serde_json::json!({})).await.unwrap();
        store.create_desire("count tests", "grounding", 0.9, serde_json::json!({})).await.unwrap();

        let recent_cutoff = Utc::now() - chrono::Duration::hours(1);
        assert_eq!(store.clear_stale_desires("self_improvement", recent_cutoff).await.unwrap(), 1);
        let left = store.desires().await;
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].kind, "self_improvement");

        // Once older than the cutoff it is stale like any other
        let later_cutoff = Utc::now() + chrono::Duration::hours(1);
        assert_eq!(store.clear_stale_desires("self_improvement", later_cutoff).await.unwrap(), 1);
        assert!(store.desires().await.is_empty());
    }
}
