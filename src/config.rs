//! Configuration management
//!
//! Cycle pacing, health monitor thresholds, diversity limits and where
//! learned state is persisted.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cycle: CycleConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub diversity: DiversityConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

/// Improvement cycle settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleConfig {
    /// Delay between cycles (seconds)
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    /// Cap on candidates per generation strategy
    #[serde(default = "default_max_per_strategy")]
    pub max_hypotheses_per_strategy: usize,
    /// Delta above which a change counts as an improvement; its negation
    /// is the regression bound
    #[serde(default = "default_improvement_threshold")]
    pub improvement_threshold: f64,
    /// Minimum success rate of a capability to be composed with the target
    #[serde(default = "default_composition_min")]
    pub composition_min_success_rate: f64,
    #[serde(default = "default_composition_gain")]
    pub composition_expected_improvement: f64,
    /// expected_improvement = severity * factor for limitation fixes
    #[serde(default = "default_severity_factor")]
    pub limitation_severity_factor: f64,
    /// Bound on a single change application (seconds)
    #[serde(default = "default_apply_timeout")]
    pub apply_timeout_secs: u64,
    /// Number of cycle results retained in memory
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

/// Longest delay allowed between cycles
pub const MAX_CYCLE_INTERVAL_SECS: u64 = 7 * 24 * 60 * 60;

fn default_interval() -> u64 { 60 }
fn default_max_per_strategy() -> usize { 2 }
fn default_improvement_threshold() -> f64 { 0.01 }
fn default_composition_min() -> f64 { 0.7 }
fn default_composition_gain() -> f64 { 0.1 }
fn default_severity_factor() -> f64 { 0.5 }
fn default_apply_timeout() -> u64 { 120 }
fn default_history_limit() -> usize { 100 }

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            max_hypotheses_per_strategy: default_max_per_strategy(),
            improvement_threshold: default_improvement_threshold(),
            composition_min_success_rate: default_composition_min(),
            composition_expected_improvement: default_composition_gain(),
            limitation_severity_factor: default_severity_factor(),
            apply_timeout_secs: default_apply_timeout(),
            history_limit: default_history_limit(),
        }
    }
}

/// Health monitor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Period of the monitor loop (seconds)
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
    /// Stagnation is never reported before this many cycles have run
    #[serde(default = "default_min_cycles")]
    pub min_cycles_before_detection: u64,
    #[serde(default = "default_failure_rate")]
    pub failure_rate_threshold: f64,
    /// Outcomes needed before the failure rate is trusted
    #[serde(default = "default_min_failure_sample")]
    pub min_failure_sample: usize,
    #[serde(default = "default_min_unique_desires")]
    pub min_unique_desires: usize,
    #[serde(default = "default_min_unique_actions")]
    pub min_unique_action_types: usize,
    /// Recent outcomes considered per check
    #[serde(default = "default_window")]
    pub window_size: usize,
    #[serde(default = "default_level1")]
    pub level1_minutes: i64,
    #[serde(default = "default_level2")]
    pub level2_minutes: i64,
    #[serde(default = "default_level3")]
    pub level3_minutes: i64,
    /// Multiplier applied to the confidence of problematic beliefs
    #[serde(default = "default_decay")]
    pub belief_decay_factor: f64,
    #[serde(default = "default_grounding_level3")]
    pub grounding_tasks_at_level3: usize,
}

fn default_check_interval() -> u64 { 300 }
fn default_min_cycles() -> u64 { 5 }
fn default_failure_rate() -> f64 { 0.8 }
fn default_min_failure_sample() -> usize { 5 }
fn default_min_unique_desires() -> usize { 3 }
fn default_min_unique_actions() -> usize { 2 }
fn default_window() -> usize { 20 }
fn default_level1() -> i64 { 10 }
fn default_level2() -> i64 { 30 }
fn default_level3() -> i64 { 60 }
fn default_decay() -> f64 { 0.7 }
fn default_grounding_level3() -> usize { 3 }

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval(),
            min_cycles_before_detection: default_min_cycles(),
            failure_rate_threshold: default_failure_rate(),
            min_failure_sample: default_min_failure_sample(),
            min_unique_desires: default_min_unique_desires(),
            min_unique_action_types: default_min_unique_actions(),
            window_size: default_window(),
            level1_minutes: default_level1(),
            level2_minutes: default_level2(),
            level3_minutes: default_level3(),
            belief_decay_factor: default_decay(),
            grounding_tasks_at_level3: default_grounding_level3(),
        }
    }
}

/// Failure escalation and action variety settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiversityConfig {
    /// Consecutive failures before a pattern starts excluding tried options
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_action_window")]
    pub action_window: usize,
    /// Share of the window above which an action type is excluded
    #[serde(default = "default_max_share")]
    pub max_action_share: f64,
}

fn default_failure_threshold() -> u32 { 3 }
fn default_action_window() -> usize { 20 }
fn default_max_share() -> f64 { 0.5 }

impl Default for DiversityConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            action_window: default_action_window(),
            max_action_share: default_max_share(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Overrides the platform data directory
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub save_beliefs: bool,
}

fn default_true() -> bool {
    true
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            state_dir: None,
            save_beliefs: true,
        }
    }
}

impl PersistenceConfig {
    /// Directory learned state is written to
    pub fn resolve_state_dir(&self) -> Result<PathBuf> {
        match &self.state_dir {
            Some(dir) => Ok(dir.clone()),
            None => data_dir(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load() -> Result<Self> {
        let config_path = config_path()?;

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)
                .context("Failed to read config file")?;
            let config: Config = toml::from_str(&contents)
                .context("Failed to parse config file")?;
            config.validate()?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = config_path()?;
        let parent = config_path.parent()
            .context("Config path has no parent")?;

        std::fs::create_dir_all(parent)
            .context("Failed to create config directory")?;

        let contents = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;

        std::fs::write(&config_path, contents)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Reject values the controller cannot work with
    pub fn validate(&self) -> Result<()> {
        let c = &self.cycle;
        if c.max_hypotheses_per_strategy == 0 {
            bail!("cycle.max_hypotheses_per_strategy must be at least 1");
        }
        if !(0.0..1.0).contains(&c.improvement_threshold) {
            bail!("cycle.improvement_threshold must be in [0, 1)");
        }
        if c.apply_timeout_secs == 0 {
            bail!("cycle.apply_timeout_secs must be positive");
        }
        if c.interval_secs > MAX_CYCLE_INTERVAL_SECS {
            bail!("cycle.interval_secs must be at most {} (one week)", MAX_CYCLE_INTERVAL_SECS);
        }

        let h = &self.health;
        if !(h.level1_minutes > 0 && h.level1_minutes < h.level2_minutes && h.level2_minutes < h.level3_minutes) {
            bail!("health level thresholds must be positive and strictly increasing");
        }
        if !(0.0..=1.0).contains(&h.failure_rate_threshold) {
            bail!("health.failure_rate_threshold must be in [0, 1]");
        }
        if !(0.0..=1.0).contains(&h.belief_decay_factor) {
            bail!("health.belief_decay_factor must be in [0, 1]");
        }
        if h.window_size == 0 || h.check_interval_secs == 0 {
            bail!("health.window_size and health.check_interval_secs must be positive");
        }

        let d = &self.diversity;
        if d.action_window == 0 {
            bail!("diversity.action_window must be positive");
        }
        if !(d.max_action_share > 0.0 && d.max_action_share <= 1.0) {
            bail!("diversity.max_action_share must be in (0, 1]");
        }
        if d.failure_threshold == 0 {
            bail!("diversity.failure_threshold must be at least 1");
        }
        Ok(())
    }
}

/// Get the configuration file path
pub fn config_path() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "self-improver", "self-improver")
        .context("Failed to get project directories")?;
    Ok(base.config_dir().join("config.toml"))
}

/// Get the data directory path
pub fn data_dir() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "self-improver", "self-improver")
        .context("Failed to get project directories")?;
    Ok(base.data_dir().to_path_buf())
}

/// Show current configuration
pub fn show_config() -> Result<()> {
    let config = Config::load()?;
    println!("# {}", config_path()?.display());
    println!("{}", toml::to_string_pretty(&config).context("Failed to serialize config")?);
    Ok(())
}

/// Reset configuration to defaults
pub fn reset_config() -> Result<()> {
    Config::default().save()?;
    println!("Configuration reset to defaults.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str("[cycle]\ninterval_secs = 5\n").unwrap();
        assert_eq!(config.cycle.interval_secs, 5);
        assert_eq!(config.cycle.max_hypotheses_per_strategy, 2);
        assert_eq!(config.health.level3_minutes, 60);
        assert_eq!(config.diversity.failure_threshold, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_roundtrip_toml() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.health.window_size, config.health.window_size);
    }

    #[test]
    fn test_validate_rejects_bad_levels() {
        let mut config = Config::default();
        config.health.level2_minutes = 5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.diversity.max_action_share = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.cycle.interval_secs = MAX_CYCLE_INTERVAL_SECS + 1;
        assert!(config.validate().is_err());
    }
}
