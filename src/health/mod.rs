//! Health monitor
//!
//! Runs on its own period next to the cycle loop. Each check samples the
//! inventory, the cycle log and the shared trackers, decides whether the
//! system is stagnant and, if so, escalates interventions:
//!
//! - level 1: inject one grounding task as a high-priority desire
//! - level 2: clear stale desires first, then inject
//! - level 3: also audit recent beliefs, decay problematic ones, inject
//!   several grounding tasks and ask for a self-modification proposal

pub mod intervention;
pub mod metrics;

pub use intervention::{audit_belief, BeliefIssue, InterventionAction, InterventionState, LevelUpdate};
pub use metrics::{detect_stagnation, stagnation_signals, HealthMetrics, StagnationSignal};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, info, warn};

use crate::collaborators::Collaborators;
use crate::config::{CycleConfig, HealthConfig};
use crate::cycle::{SharedCycleLog, DESIRE_KIND};
use crate::tracking::SharedTrackers;

pub const GROUNDING_DESIRE_KIND: &str = "grounding_task";
pub const SELF_MODIFICATION_DESIRE_KIND: &str = "self_modification_request";

const GROUNDING_INTENSITY: f64 = 0.9;
const SELF_MODIFICATION_INTENSITY: f64 = 0.95;
const BELIEF_AUDIT_LIMIT: usize = 50;

/// Outcome of one health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub metrics: HealthMetrics,
    pub stagnant: bool,
    pub reasons: Vec<String>,
    pub level: u8,
    pub actions: Vec<InterventionAction>,
    pub checked_at: DateTime<Utc>,
}

pub struct HealthMonitor {
    config: HealthConfig,
    collaborators: Collaborators,
    trackers: SharedTrackers,
    log: SharedCycleLog,
    state: Mutex<InterventionState>,
    /// Cycle desires younger than this may belong to a running cycle
    cycle_interval_secs: u64,
}

impl HealthMonitor {
    pub fn new(
        config: HealthConfig,
        collaborators: Collaborators,
        trackers: SharedTrackers,
        log: SharedCycleLog,
    ) -> Self {
        Self {
            config,
            collaborators,
            trackers,
            log,
            state: Mutex::new(InterventionState::new()),
            cycle_interval_secs: CycleConfig::default().interval_secs,
        }
    }

    /// Match the cycle loop's period, so the desire of a cycle in flight
    /// survives stale-desire clearing
    pub fn with_cycle_interval(mut self, interval_secs: u64) -> Self {
        self.cycle_interval_secs = interval_secs;
        self
    }

    pub async fn level(&self) -> u8 {
        self.state.lock().await.level()
    }

    pub async fn gather_metrics(&self, now: DateTime<Utc>) -> HealthMetrics {
        let inventory = match self.collaborators.inventory.assess(false).await {
            Ok(inventory) => inventory,
            Err(e) => {
                warn!("Health check could not assess capabilities: {:#}", e);
                Default::default()
            }
        };
        let (recent, cycles_completed) = {
            let log = self.log.read().await;
            (log.recent(self.config.window_size), log.cycles_run)
        };
        let diversity = self.trackers.snapshot().await;
        HealthMetrics::collect(&inventory, &recent, diversity, cycles_completed, now)
    }

    /// Evaluate health once and run whatever interventions are due
    pub async fn check_once(&self, now: DateTime<Utc>) -> HealthReport {
        let metrics = self.gather_metrics(now).await;
        let signals = detect_stagnation(&metrics, &self.config);
        let stagnant = signals.is_some();
        let reasons: Vec<String> = signals
            .unwrap_or_default()
            .iter()
            .map(|s| s.to_string())
            .collect();

        // Interventions run under the state lock so overlapping checks
        // cannot double-inject
        let mut state = self.state.lock().await;
        let update = state.observe(stagnant, now, &self.config);
        if update.level > update.previous {
            warn!(
                "Stagnation escalated to level {} ({})",
                update.level,
                reasons.join(", ")
            );
        }

        let actions = if update.intervene {
            self.intervene(&mut state, update.level, &reasons, now).await
        } else {
            Vec::new()
        };

        debug!(
            "Health check: stagnant={} level={} actions={}",
            stagnant,
            update.level,
            actions.len()
        );

        HealthReport {
            metrics,
            stagnant,
            reasons,
            level: update.level,
            actions,
            checked_at: now,
        }
    }

    async fn intervene(
        &self,
        state: &mut InterventionState,
        level: u8,
        reasons: &[String],
        now: DateTime<Utc>,
    ) -> Vec<InterventionAction> {
        let mut actions = Vec::new();

        if level >= 2 {
            let in_flight_after = now - chrono::Duration::seconds(self.cycle_interval_secs as i64);
            match self
                .collaborators
                .experience
                .clear_stale_desires(DESIRE_KIND, in_flight_after)
                .await
            {
                Ok(count) => {
                    info!("Cleared {} stale desires", count);
                    actions.push(InterventionAction::StaleDesiresCleared(count));
                }
                Err(e) => warn!("Clearing stale desires failed: {:#}", e),
            }
        }

        if level >= 3 {
            actions.extend(self.audit_beliefs().await);
        }

        let count = if level >= 3 {
            self.config.grounding_tasks_at_level3.max(1)
        } else {
            1
        };
        for task in state.next_grounding_tasks(count) {
            if let Some(action) = self.inject_grounding_task(task, level, reasons).await {
                actions.push(action);
            }
        }

        if level >= 3 {
            if let Some(action) = self.request_self_modification(reasons).await {
                actions.push(action);
            }
        }

        actions
    }

    async fn inject_grounding_task(&self, task: &str, level: u8, reasons: &[String]) -> Option<InterventionAction> {
        let metadata = json!({ "level": level, "reasons": reasons });
        match self
            .collaborators
            .experience
            .create_desire(task, GROUNDING_DESIRE_KIND, GROUNDING_INTENSITY, metadata)
            .await
        {
            Ok(desire_id) => {
                info!("Injected grounding task: {}", task);
                self.trackers.record_desire(task).await;
                Some(InterventionAction::GroundingTaskInjected {
                    desire_id,
                    task: task.to_string(),
                })
            }
            Err(e) => {
                warn!("Injecting grounding task failed: {:#}", e);
                None
            }
        }
    }

    async fn audit_beliefs(&self) -> Vec<InterventionAction> {
        let beliefs = match self.collaborators.beliefs.recent_beliefs(BELIEF_AUDIT_LIMIT).await {
            Ok(beliefs) => beliefs,
            Err(e) => {
                warn!("Belief audit skipped: {:#}", e);
                return Vec::new();
            }
        };

        let mut actions = Vec::new();
        for belief in beliefs {
            let Some(issue) = audit_belief(&belief.content) else {
                continue;
            };
            let decayed = belief.confidence * self.config.belief_decay_factor;
            match self.collaborators.beliefs.set_confidence(&belief.id, decayed).await {
                Ok(()) => {
                    info!(
                        "Decayed {} belief '{}' {:.2} -> {:.2}",
                        issue, belief.content, belief.confidence, decayed
                    );
                    actions.push(InterventionAction::BeliefDecayed {
                        id: belief.id,
                        issue,
                        from: belief.confidence,
                        to: decayed,
                    });
                }
                Err(e) => warn!("Decaying belief {} failed: {:#}", belief.id, e),
            }
        }
        actions
    }

    async fn request_self_modification(&self, reasons: &[String]) -> Option<InterventionAction> {
        let description = format!(
            "Propose and justify one concrete code change that would break the current stagnation ({})",
            reasons.join("; ")
        );
        let metadata = json!({ "reasons": reasons });
        match self
            .collaborators
            .experience
            .create_desire(&description, SELF_MODIFICATION_DESIRE_KIND, SELF_MODIFICATION_INTENSITY, metadata)
            .await
        {
            Ok(desire_id) => {
                warn!("Requested self-modification proposal");
                Some(InterventionAction::SelfModificationRequested { desire_id })
            }
            Err(e) => {
                warn!("Requesting self-modification failed: {:#}", e);
                None
            }
        }
    }

    /// Run checks every `check_interval_secs` until shutdown
    pub fn spawn(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(self.config.check_interval_secs));
            info!("Health monitor started");

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Health monitor received shutdown signal");
                        break;
                    }

                    _ = interval.tick() => {
                        let report = self.check_once(Utc::now()).await;
                        if report.stagnant {
                            warn!(
                                "System stagnant (level {}): {}",
                                report.level,
                                report.reasons.join(", ")
                            );
                        }
                    }
                }
            }
        })
    }
}
