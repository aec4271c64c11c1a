//! Self Improver - closed-loop self-improvement controller
//!
//! - Improvement cycles: target selection, hypothesis generation and
//!   ranking, safety gating, execution with rollback, outcome measurement
//! - Bayesian capability tracking with credible intervals
//! - Failure escalation and action variety enforcement
//! - Health monitor with escalating stagnation interventions
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use self_improver::collaborators::{memory::SimulatedSystem, Collaborators};
//! use self_improver::{Config, Engine};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let system = Arc::new(SimulatedSystem::demo());
//!     let engine = Engine::new(Config::default(), Collaborators::simulated(system))?;
//!     let result = engine.run_cycle_now().await;
//!     println!("{}", result);
//!     Ok(())
//! }
//! ```

// Core modules
pub mod types;
pub mod error;
pub mod config;
pub mod collaborators;
pub mod tracking;

// Pipeline and supervision
pub mod cycle;
pub mod health;
pub mod engine;
pub mod cli;

// Re-export commonly used types for convenience
pub use types::{
    CapabilityInventory,
    CapabilityRecord,
    CycleResult,
    ImprovementHypothesis,
    ImprovementTarget,
    Strategy,
};

pub use error::CycleError;

pub use config::Config;

pub use cycle::ImprovementCycleController;

pub use health::{HealthMonitor, HealthReport};

pub use engine::{Engine, EngineStats};

pub use tracking::{BayesianTracker, SharedTrackers};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Get the library info
pub fn info() -> String {
    format!("{} v{} - Closed-loop self-improvement controller", NAME, VERSION)
}
