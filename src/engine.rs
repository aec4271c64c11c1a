//! Engine
//!
//! Owns the cycle controller and the health monitor and runs them as two
//! concurrent loops. The controller sits behind a mutex, so the loop and
//! `run_cycle_now` can never have two cycles in flight.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, info, warn};

use crate::collaborators::Collaborators;
use crate::config::Config;
use crate::cycle::{ImprovementCycleController, SharedCycleLog};
use crate::health::HealthMonitor;
use crate::tracking::{BayesianTracker, CapabilityEstimate, SharedTrackers};
use crate::types::CycleResult;

pub const BELIEFS_FILE: &str = "beliefs.json";

/// Engine statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineStats {
    pub cycles_run: u64,
    pub successes: u64,
    pub failures: u64,
    /// Sum of deltas from improving cycles
    pub improvements: f64,
    pub rollbacks: u64,
    pub last_result: Option<CycleResult>,
    pub intervention_level: u8,
}

pub struct Engine {
    config: Config,
    controller: Arc<Mutex<ImprovementCycleController>>,
    monitor: Arc<HealthMonitor>,
    beliefs: Arc<RwLock<BayesianTracker>>,
    beliefs_path: Option<PathBuf>,
    log: SharedCycleLog,
    shutdown_tx: broadcast::Sender<()>,
    results_tx: broadcast::Sender<CycleResult>,
    cycle_handle: Option<JoinHandle<()>>,
    monitor_handle: Option<JoinHandle<()>>,
}

impl Engine {
    /// Build an engine, restoring persisted beliefs when enabled
    pub fn new(config: Config, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;

        let beliefs_path = if config.persistence.save_beliefs {
            Some(config.persistence.resolve_state_dir()?.join(BELIEFS_FILE))
        } else {
            None
        };
        let beliefs = match &beliefs_path {
            Some(path) => BayesianTracker::load(path)
                .with_context(|| format!("Failed to restore beliefs from {}", path.display()))?,
            None => BayesianTracker::new(),
        };

        Ok(Self::with_beliefs(config, collaborators, beliefs, beliefs_path))
    }

    /// Build an engine around an existing tracker; `beliefs_path` is where
    /// it is saved on shutdown, if anywhere
    pub fn with_beliefs(
        config: Config,
        collaborators: Collaborators,
        beliefs: BayesianTracker,
        beliefs_path: Option<PathBuf>,
    ) -> Self {
        let beliefs = Arc::new(RwLock::new(beliefs));
        let trackers = SharedTrackers::new(&config.diversity);
        let controller = ImprovementCycleController::new(
            &config.cycle,
            collaborators.clone(),
            trackers.clone(),
            beliefs.clone(),
        );
        let log = controller.log();
        let monitor = HealthMonitor::new(config.health.clone(), collaborators, trackers, log.clone())
            .with_cycle_interval(config.cycle.interval_secs);
        let (shutdown_tx, _) = broadcast::channel(1);
        let (results_tx, _) = broadcast::channel(64);

        Self {
            config,
            controller: Arc::new(Mutex::new(controller)),
            monitor: Arc::new(monitor),
            beliefs,
            beliefs_path,
            log,
            shutdown_tx,
            results_tx,
            cycle_handle: None,
            monitor_handle: None,
        }
    }

    pub fn monitor(&self) -> Arc<HealthMonitor> {
        self.monitor.clone()
    }

    /// Spawn the cycle loop and the health monitor
    ///
    /// With `max_cycles` the cycle loop ends by itself after that many
    /// cycles; the monitor keeps running until `shutdown`.
    pub fn start(&mut self, max_cycles: Option<u64>) {
        if self.cycle_handle.is_some() {
            warn!("Engine already running");
            return;
        }
        info!("Starting engine");
        self.cycle_handle = Some(self.spawn_cycle_loop(max_cycles));
        self.monitor_handle = Some(self.monitor.clone().spawn(self.shutdown_tx.subscribe()));
    }

    fn spawn_cycle_loop(&self, max_cycles: Option<u64>) -> JoinHandle<()> {
        let controller = self.controller.clone();
        let results_tx = self.results_tx.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let interval = Duration::from_secs(self.config.cycle.interval_secs);

        tokio::spawn(async move {
            let mut completed: u64 = 0;
            info!("Cycle loop started");

            loop {
                // A started cycle always runs to completion, rollback included
                let result = controller.lock().await.run_cycle().await;
                let _ = results_tx.send(result);
                completed += 1;

                if max_cycles.map(|max| completed >= max).unwrap_or(false) {
                    info!("Cycle loop finished after {} cycles", completed);
                    break;
                }

                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Cycle loop received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        })
    }

    /// Wait for a bounded cycle loop to finish
    ///
    /// Cancel-safe: if the wait is dropped, `shutdown` still joins the loop.
    pub async fn wait_for_cycles(&mut self) {
        if let Some(handle) = self.cycle_handle.as_mut() {
            if let Err(e) = handle.await {
                warn!("Cycle loop ended abnormally: {}", e);
            }
            self.cycle_handle = None;
        }
    }

    /// Run one cycle now, waiting for any cycle already in flight
    pub async fn run_cycle_now(&self) -> CycleResult {
        let result = self.controller.lock().await.run_cycle().await;
        let _ = self.results_tx.send(result.clone());
        result
    }

    /// Every finished cycle is sent to subscribers
    pub fn subscribe_results(&self) -> broadcast::Receiver<CycleResult> {
        self.results_tx.subscribe()
    }

    pub async fn stats(&self) -> EngineStats {
        let intervention_level = self.monitor.level().await;
        let log = self.log.read().await;
        EngineStats {
            cycles_run: log.cycles_run,
            successes: log.successes,
            failures: log.failures,
            improvements: log.improvements,
            rollbacks: log.rollbacks,
            last_result: log.last().cloned(),
            intervention_level,
        }
    }

    /// Retained cycle results, newest last
    pub async fn history(&self) -> Vec<CycleResult> {
        self.log.read().await.results()
    }

    /// Credible interval and normalized uncertainty for a capability
    pub async fn estimate(&self, capability: &str) -> (CapabilityEstimate, f64) {
        let beliefs = self.beliefs.read().await;
        (beliefs.estimate(capability), beliefs.uncertainty(capability))
    }

    /// Stop both loops and persist beliefs
    pub async fn shutdown(&mut self) -> Result<()> {
        info!("Engine shutdown requested");
        let _ = self.shutdown_tx.send(());

        for handle in [self.cycle_handle.take(), self.monitor_handle.take()].into_iter().flatten() {
            if let Err(e) = handle.await {
                warn!("Engine task ended abnormally: {}", e);
            }
        }

        if let Some(path) = &self.beliefs_path {
            self.beliefs.read().await.save(path)?;
            debug!("Beliefs saved to {}", path.display());
        }
        Ok(())
    }
}
