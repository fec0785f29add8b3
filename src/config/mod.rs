//! Configuration module - reconciliation tuning and environment parsing

use std::env;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::diff::{ArrayStrategy, DiffConfig, PointerPath};

/// Fields that change every tick and carry no gameplay meaning
pub const EPHEMERAL_PATHS: &[&str] = &["/last_update", "/turn_time_remaining", "/events"];

/// Regions whose changes callers may treat as authoritative overrides
pub const DEFAULT_CRITICAL_PATHS: &[&str] = &["/players", "/current_player", "/units", "/tiles"];

/// Engine tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationConfig {
    /// Snapshot history capacity (FIFO eviction)
    pub max_snapshots: usize,
    /// Divergence score above which a reconciliation counts as divergent
    pub divergence_threshold: f64,
    /// Replay from server state on divergence instead of discarding predictions
    pub rollback_enabled: bool,
    /// When false, `predict` is a pass-through
    pub prediction_enabled: bool,
    /// Oldest snapshot (in ticks behind the server) that a rollback replays
    pub max_rollback_ticks: u64,
    pub critical_paths: Vec<PointerPath>,
    /// Also take the divergent branch whenever a critical path changed
    pub rollback_on_critical_changes: bool,
    /// Diff settings used when comparing consecutive server states
    pub diff: DiffConfig,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            max_snapshots: 100,
            divergence_threshold: 5.0,
            rollback_enabled: true,
            prediction_enabled: true,
            max_rollback_ticks: 10,
            critical_paths: parse_paths(DEFAULT_CRITICAL_PATHS),
            rollback_on_critical_changes: false,
            diff: reconciliation_diff_config(),
        }
    }
}

/// Diff settings for server-vs-server comparison: ephemeral fields ignored,
/// coarse numeric tolerance, entity collections replaced wholesale.
pub fn reconciliation_diff_config() -> DiffConfig {
    DiffConfig {
        ignore_paths: parse_paths(EPHEMERAL_PATHS),
        precision: Some(2),
        array_strategy: ArrayStrategy::Replace,
        max_depth: 32,
    }
}

fn parse_paths(paths: &[&str]) -> Vec<PointerPath> {
    paths.iter().filter_map(|p| PointerPath::parse(p).ok()).collect()
}

impl ReconciliationConfig {
    /// Defaults overridden by `RECONCILE_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let critical_paths = match env::var("RECONCILE_CRITICAL_PATHS") {
            Ok(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(|p| {
                    PointerPath::parse(p)
                        .map_err(|_| ConfigError::Invalid("RECONCILE_CRITICAL_PATHS"))
                })
                .collect::<Result<Vec<_>, _>>()?,
            Err(_) => defaults.critical_paths,
        };

        let mut diff = defaults.diff;
        diff.precision = Some(env_or("RECONCILE_PRECISION", 2u32)?);

        Ok(Self {
            max_snapshots: env_or("RECONCILE_MAX_SNAPSHOTS", defaults.max_snapshots)?,
            divergence_threshold: env_or(
                "RECONCILE_DIVERGENCE_THRESHOLD",
                defaults.divergence_threshold,
            )?,
            rollback_enabled: env_or("RECONCILE_ROLLBACK_ENABLED", defaults.rollback_enabled)?,
            prediction_enabled: env_or(
                "RECONCILE_PREDICTION_ENABLED",
                defaults.prediction_enabled,
            )?,
            max_rollback_ticks: env_or(
                "RECONCILE_MAX_ROLLBACK_TICKS",
                defaults.max_rollback_ticks,
            )?,
            critical_paths,
            rollback_on_critical_changes: env_or(
                "RECONCILE_ROLLBACK_ON_CRITICAL",
                defaults.rollback_on_critical_changes,
            )?,
            diff,
        })
    }
}

/// Simulation driver configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct SimConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// RNG seed for the simulated server and client input
    pub seed: u64,
    /// Number of server ticks to simulate
    pub ticks: u64,
    /// Fraction of commands the simulated server rejects
    pub reject_rate: f64,
    /// Commands the client issues per tick
    pub commands_per_tick: u32,
    /// Ticks between a command being sent and its acknowledgement
    pub ack_delay_ticks: u64,
    pub reconciliation: ReconciliationConfig,
}

impl SimConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let reject_rate: f64 = env_or("SIM_REJECT_RATE", 0.1)?;
        if !(0.0..=1.0).contains(&reject_rate) {
            return Err(ConfigError::Invalid("SIM_REJECT_RATE"));
        }

        Ok(Self {
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            seed: env_or("SIM_SEED", 7)?,
            ticks: env_or("SIM_TICKS", 200)?,
            reject_rate,
            commands_per_tick: env_or("SIM_COMMANDS_PER_TICK", 1)?,
            ack_delay_ticks: env_or("SIM_ACK_DELAY_TICKS", 2)?,
            reconciliation: ReconciliationConfig::from_env()?,
        })
    }
}

fn env_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_ignore_ephemeral_fields() {
        let config = ReconciliationConfig::default();
        assert_eq!(config.diff.precision, Some(2));
        assert_eq!(config.diff.array_strategy, ArrayStrategy::Replace);
        let rendered: Vec<String> =
            config.diff.ignore_paths.iter().map(|p| p.to_string()).collect();
        assert!(rendered.contains(&"/last_update".to_string()));
        assert_eq!(config.critical_paths.len(), DEFAULT_CRITICAL_PATHS.len());
    }
}
