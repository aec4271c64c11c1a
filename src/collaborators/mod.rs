//! External collaborators
//!
//! The controller never assesses capabilities, predicts outcomes, checks
//! safety or edits code itself. It reaches each of those services through
//! one of the traits below, and every call is an async suspension point.
//!
//! `memory` provides in-memory implementations used by the CLI simulation
//! and the integration tests.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::types::{CapabilityInventory, PredictionError};

/// Prefix of change locations that address a capability as a whole
pub const CAPABILITY_LOCATION_PREFIX: &str = "capabilities/";

/// Default location for a change to `capability` made by `strategy`
pub fn capability_location(capability: &str, strategy: &str) -> String {
    format!("{}{}/{}", CAPABILITY_LOCATION_PREFIX, capability, strategy)
}

/// A known weakness of a capability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Limitation {
    pub capability: String,
    pub description: String,
    /// Severity in [0, 1]
    pub severity: f64,
    pub potential_solutions: Vec<String>,
    /// Where a fix would be applied, when known
    #[serde(default)]
    pub location: Option<String>,
}

/// A change pattern that has helped a capability before
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessPattern {
    pub name: String,
    pub description: String,
    pub average_improvement: f64,
    #[serde(default)]
    pub location: Option<String>,
}

/// Context handed to the predictive model along with the action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionContext {
    pub target: String,
    pub strategy: String,
    pub expected_improvement: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub success_probability: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyVerdict {
    pub safe: bool,
    pub recommendation: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlateauReport {
    pub is_plateau: bool,
    pub affected_capabilities: Vec<String>,
    /// Severity in [0, 1]
    pub severity: f64,
}

/// A stored belief the health monitor may audit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Belief {
    pub id: String,
    pub content: String,
    pub confidence: f64,
}

/// Lifecycle state reported back to the desire store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DesireStatus {
    Active,
    Completed,
    Failed,
}

impl std::fmt::Display for DesireStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DesireStatus::Active => write!(f, "active"),
            DesireStatus::Completed => write!(f, "completed"),
            DesireStatus::Failed => write!(f, "failed"),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InventoryProvider: Send + Sync {
    /// Current per-capability success rates; `force_refresh` bypasses caches
    async fn assess(&self, force_refresh: bool) -> Result<CapabilityInventory>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LimitationSource: Send + Sync {
    async fn identify_limitations(&self) -> Result<Vec<Limitation>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PatternSource: Send + Sync {
    async fn successful_patterns(&self, target: &str) -> Result<Vec<SuccessPattern>>;

    /// Capabilities that could plausibly be combined with `target`
    async fn composable_capabilities(
        &self,
        target: &str,
        inventory: &CapabilityInventory,
    ) -> Result<Vec<String>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PredictiveModel: Send + Sync {
    async fn predict_outcome(&self, action: &str, context: &PredictionContext) -> Result<Prediction>;

    async fn update_from_prediction_error(&self, error: &PredictionError) -> Result<()>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SafetyVerifier: Send + Sync {
    async fn verify(&self, change: &str, target_location: &str, rationale: &str) -> Result<SafetyVerdict>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChangeApplier: Send + Sync {
    /// Apply a change, returning a summary of what was applied
    async fn apply(&self, target_location: &str, change: &str, description: &str) -> Result<String>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RollbackManager: Send + Sync {
    /// Snapshot state at `target_location` so the next change can be undone
    async fn record_modification(
        &self,
        target_location: &str,
        description: &str,
        link_id: Option<String>,
    ) -> Result<String>;

    /// Undo the most recent recorded modification
    async fn rollback_last(&self, reason: &str) -> Result<()>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExperienceStore: Send + Sync {
    async fn record_experience(&self, content: &str, kind: &str, metadata: serde_json::Value) -> Result<()>;

    async fn create_desire(
        &self,
        description: &str,
        kind: &str,
        intensity: f64,
        metadata: serde_json::Value,
    ) -> Result<String>;

    async fn update_desire(&self, id: &str, status: DesireStatus, metadata: serde_json::Value) -> Result<()>;

    /// Drop desires that are still open but no longer being pursued.
    /// Open desires of `keep_kind` created after `keep_after` belong to
    /// work in flight and are left alone.
    async fn clear_stale_desires(&self, keep_kind: &str, keep_after: DateTime<Utc>) -> Result<usize>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetaLearning: Send + Sync {
    async fn detect_plateau(&self) -> Result<PlateauReport>;

    async fn record_domain_learning(&self, domain: &str, knowledge_gained: f64) -> Result<()>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BeliefStore: Send + Sync {
    async fn recent_beliefs(&self, limit: usize) -> Result<Vec<Belief>>;

    async fn set_confidence(&self, id: &str, confidence: f64) -> Result<()>;
}

/// Handles to every external service the controller and monitor use
#[derive(Clone)]
pub struct Collaborators {
    pub inventory: Arc<dyn InventoryProvider>,
    pub limitations: Arc<dyn LimitationSource>,
    pub patterns: Arc<dyn PatternSource>,
    pub predictor: Arc<dyn PredictiveModel>,
    pub safety: Arc<dyn SafetyVerifier>,
    pub applier: Arc<dyn ChangeApplier>,
    pub rollback: Arc<dyn RollbackManager>,
    pub experience: Arc<dyn ExperienceStore>,
    pub meta: Arc<dyn MetaLearning>,
    pub beliefs: Arc<dyn BeliefStore>,
}

impl Collaborators {
    /// Wire everything to the in-memory simulation
    pub fn simulated(system: Arc<memory::SimulatedSystem>) -> Self {
        Self::simulated_with(
            system,
            Arc::new(memory::InMemoryPredictor::new()),
            Arc::new(memory::InMemoryExperienceStore::new()),
        )
    }

    /// Simulation wiring with caller-owned predictor and store, so their
    /// recorded state can be inspected afterwards
    pub fn simulated_with(
        system: Arc<memory::SimulatedSystem>,
        predictor: Arc<memory::InMemoryPredictor>,
        store: Arc<memory::InMemoryExperienceStore>,
    ) -> Self {
        Self {
            inventory: system.clone(),
            limitations: system.clone(),
            patterns: system.clone(),
            predictor,
            safety: Arc::new(memory::KeywordSafetyVerifier::default()),
            applier: system.clone(),
            rollback: system.clone(),
            experience: store.clone(),
            meta: system,
            beliefs: store,
        }
    }
}
