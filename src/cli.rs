//! CLI interface for self-improver

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;

use crate::collaborators::memory::SimulatedSystem;
use crate::collaborators::Collaborators;
use crate::config::Config;
use crate::engine::{Engine, BELIEFS_FILE};
use crate::tracking::BayesianTracker;

#[derive(Parser)]
#[command(name = "self-improver")]
#[command(about = "Closed-loop self-improvement controller", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Log cycle progress at info level
    #[arg(short, long, global = true, env = "SELF_IMPROVER_VERBOSE")]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run improvement cycles against the simulated capability landscape
    Run {
        /// Stop after this many cycles (default: run until Ctrl-C)
        #[arg(short, long)]
        cycles: Option<u64>,
    },
    /// Show the Bayesian estimate for a capability
    Estimate {
        /// Capability name
        capability: String,
    },
    /// Configure the controller
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
        /// Reset configuration to defaults
        #[arg(long)]
        reset: bool,
    },
}

pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run { cycles } => run_engine(cycles).await?,
        Commands::Estimate { capability } => show_estimate(&capability)?,
        Commands::Config { show, reset } => {
            if reset {
                crate::config::reset_config()?;
            } else if show {
                crate::config::show_config()?;
            } else {
                println!("Use --show to display or --reset to restore defaults.");
                println!("Config file: {}", crate::config::config_path()?.display());
            }
        }
    }
    Ok(())
}

async fn run_engine(cycles: Option<u64>) -> Result<()> {
    let config = Config::load()?;
    let system = Arc::new(SimulatedSystem::demo());
    let mut engine = Engine::new(config, Collaborators::simulated(system))?;
    let mut results = engine.subscribe_results();

    let printer = tokio::spawn(async move {
        while let Ok(result) = results.recv().await {
            println!("{}", result);
        }
    });

    engine.start(cycles);
    match cycles {
        Some(_) => {
            tokio::select! {
                _ = engine.wait_for_cycles() => {}
                _ = tokio::signal::ctrl_c() => println!("Interrupted, finishing current cycle..."),
            }
        }
        None => {
            tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
            println!("Interrupted, finishing current cycle...");
        }
    }

    engine.shutdown().await?;
    let stats = engine.stats().await;
    drop(engine);
    let _ = printer.await;

    println!();
    println!("Cycles run:         {}", stats.cycles_run);
    println!("Improvements:       {} (total {:+.3})", stats.successes, stats.improvements);
    println!("Failures:           {}", stats.failures);
    println!("Rollbacks:          {}", stats.rollbacks);
    println!("Intervention level: {}", stats.intervention_level);
    Ok(())
}

fn show_estimate(capability: &str) -> Result<()> {
    let config = Config::load()?;
    let path = config.persistence.resolve_state_dir()?.join(BELIEFS_FILE);
    let tracker = BayesianTracker::load(&path)?;

    let estimate = tracker.estimate(capability);
    println!("Capability:  {}", capability);
    match tracker.belief(capability) {
        Some(belief) => println!(
            "Posterior:   Beta({}, {}) from {} observations",
            belief.alpha,
            belief.beta,
            belief.observations()
        ),
        None => println!("Posterior:   no observations (uniform prior)"),
    }
    println!("Mean:        {:.3}", estimate.mean);
    println!("95% CI:      [{:.3}, {:.3}]", estimate.lower, estimate.upper);
    println!("Uncertainty: {:.3}", tracker.uncertainty(capability));
    Ok(())
}
