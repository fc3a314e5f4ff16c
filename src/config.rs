//! Balancing run configuration
//!
//! All tunables of a balancing run in one TOML-loadable struct, replacing
//! scattered magic numbers with operator-tunable values.
//!
//! ## Loading Order
//!
//! 1. `BALANCER_CONFIG` environment variable (path to TOML file)
//! 2. `balancer.toml` in the current working directory
//! 3. Built-in defaults (matching the original tool's hardcoded values)
//!
//! Missing or malformed files fall through to the next source with a warning;
//! configuration loading never aborts a run.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

// ============================================================================
// Defaults
// ============================================================================

/// Month-over-month consumption drop (kWh) that flags a load as unstable.
pub const DEFAULT_SUDDEN_DROP_KWH: f64 = 500.0;

/// Phase-sum spread (kWh) below which the engine declares convergence.
pub const DEFAULT_CONVERGENCE_KWH: f64 = 200.0;

/// Iteration budget per balancing run.
pub const DEFAULT_MAX_ITERATIONS: u32 = 15;

/// Phase changes allowed per load across one run.
pub const DEFAULT_MAX_MOVES_PER_LOAD: u32 = 3;

/// Nominal phase voltage (V).
pub const DEFAULT_VOLTAGE_V: f64 = 220.0;

/// Power factor (cos φ).
pub const DEFAULT_COS_PHI: f64 = 1.0;

/// Averaging window for current estimation (hours). 720 = 24 h × 30 days.
pub const DEFAULT_TIME_WINDOW_HOURS: f64 = 720.0;

fn default_sudden_drop() -> f64 {
    DEFAULT_SUDDEN_DROP_KWH
}
fn default_convergence() -> f64 {
    DEFAULT_CONVERGENCE_KWH
}
fn default_max_iterations() -> u32 {
    DEFAULT_MAX_ITERATIONS
}
fn default_max_moves() -> u32 {
    DEFAULT_MAX_MOVES_PER_LOAD
}
fn default_voltage() -> f64 {
    DEFAULT_VOLTAGE_V
}
fn default_cos_phi() -> f64 {
    DEFAULT_COS_PHI
}
fn default_time_window() -> f64 {
    DEFAULT_TIME_WINDOW_HOURS
}
fn default_oracle_url() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}
fn default_oracle_model() -> String {
    "gpt-3.5-turbo".to_string()
}
fn default_oracle_max_tokens() -> u32 {
    1000
}
fn default_oracle_timeout() -> u64 {
    30
}
fn default_identifier_pattern() -> String {
    r"Load_\d+".to_string()
}

// ============================================================================
// Config Structs
// ============================================================================

/// Decision-oracle transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    /// Chat-completions endpoint URL.
    #[serde(default = "default_oracle_url")]
    pub api_url: String,
    /// Model identifier sent with each request.
    #[serde(default = "default_oracle_model")]
    pub model: String,
    /// Completion token budget per consult.
    #[serde(default = "default_oracle_max_tokens")]
    pub max_tokens: u32,
    /// Per-request timeout (seconds). A timed-out consult degrades to
    /// "no candidate" for that iteration.
    #[serde(default = "default_oracle_timeout")]
    pub timeout_secs: u64,
    /// Regex used to pull a load identifier out of free-form replies.
    #[serde(default = "default_identifier_pattern")]
    pub identifier_pattern: String,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            api_url: default_oracle_url(),
            model: default_oracle_model(),
            max_tokens: default_oracle_max_tokens(),
            timeout_secs: default_oracle_timeout(),
            identifier_pattern: default_identifier_pattern(),
        }
    }
}

/// Complete configuration for one balancing run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceConfig {
    /// Sudden-drop detection threshold (kWh).
    #[serde(default = "default_sudden_drop")]
    pub sudden_drop_kwh: f64,
    /// Convergence threshold on the phase-sum spread (kWh).
    #[serde(default = "default_convergence")]
    pub convergence_kwh: f64,
    /// Maximum engine iterations per run.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Maximum phase changes per load per run.
    #[serde(default = "default_max_moves")]
    pub max_moves_per_load: u32,
    /// Nominal phase voltage (V); converted to kV for current estimation.
    #[serde(default = "default_voltage")]
    pub voltage_v: f64,
    /// Power factor (cos φ).
    #[serde(default = "default_cos_phi")]
    pub cos_phi: f64,
    /// Averaging window (hours) for converting energy to current.
    #[serde(default = "default_time_window")]
    pub time_window_hours: f64,
    #[serde(default)]
    pub oracle: OracleConfig,
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            sudden_drop_kwh: default_sudden_drop(),
            convergence_kwh: default_convergence(),
            max_iterations: default_max_iterations(),
            max_moves_per_load: default_max_moves(),
            voltage_v: default_voltage(),
            cos_phi: default_cos_phi(),
            time_window_hours: default_time_window(),
            oracle: OracleConfig::default(),
        }
    }
}

/// Configuration load errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),
    #[error("failed to parse {0}: {1}")]
    Parse(PathBuf, #[source] toml::de::Error),
}

/// A non-fatal config warning (suspicious value). Warnings never break a run.
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl BalanceConfig {
    /// Load configuration: env var path, then `./balancer.toml`, then defaults.
    pub fn load() -> Self {
        if let Ok(path) = std::env::var("BALANCER_CONFIG") {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded config from BALANCER_CONFIG");
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from BALANCER_CONFIG, falling back");
                    }
                }
            } else {
                warn!(path = %path, "BALANCER_CONFIG points to non-existent file, falling back");
            }
        }

        let local = PathBuf::from("balancer.toml");
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded config from ./balancer.toml");
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./balancer.toml, using defaults");
                }
            }
        }

        info!("No balancer.toml found — using built-in defaults");
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;

        for w in config.validate() {
            warn!("{}", w);
        }
        Ok(config)
    }

    /// Range-check the configuration. Out-of-range values produce warnings
    /// rather than errors; the metrics calculator guards the zero cases.
    pub fn validate(&self) -> Vec<ValidationWarning> {
        let mut warnings = Vec::new();
        let mut check = |cond: bool, field: &str, message: &str| {
            if cond {
                warnings.push(ValidationWarning {
                    field: field.to_string(),
                    message: message.to_string(),
                });
            }
        };

        check(
            self.sudden_drop_kwh < 0.0,
            "sudden_drop_kwh",
            "negative threshold flags every load as dropped",
        );
        check(
            self.convergence_kwh < 0.0,
            "convergence_kwh",
            "negative threshold can never be met",
        );
        check(
            self.max_iterations == 0,
            "max_iterations",
            "0 iterations means the engine does nothing",
        );
        check(
            self.max_moves_per_load == 0,
            "max_moves_per_load",
            "0 moves per load means no load is ever eligible",
        );
        check(
            self.voltage_v <= 0.0,
            "voltage_v",
            "non-positive voltage yields zero currents",
        );
        check(
            !(0.0..=1.0).contains(&self.cos_phi),
            "cos_phi",
            "power factor outside [0, 1]",
        );
        check(
            self.time_window_hours <= 0.0,
            "time_window_hours",
            "non-positive window yields zero currents",
        );
        check(
            regex::Regex::new(&self.oracle.identifier_pattern).is_err(),
            "oracle.identifier_pattern",
            "not a valid regex; identifier extraction will be skipped",
        );

        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = BalanceConfig::default();
        assert_eq!(c.sudden_drop_kwh, 500.0);
        assert_eq!(c.convergence_kwh, 200.0);
        assert_eq!(c.max_iterations, 15);
        assert_eq!(c.max_moves_per_load, 3);
        assert_eq!(c.voltage_v, 220.0);
        assert_eq!(c.cos_phi, 1.0);
        assert_eq!(c.time_window_hours, 720.0);
        assert!(c.validate().is_empty());
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let c: BalanceConfig = toml::from_str(
            r#"
max_iterations = 5

[oracle]
model = "gpt-4o-mini"
"#,
        )
        .unwrap();
        assert_eq!(c.max_iterations, 5);
        assert_eq!(c.sudden_drop_kwh, 500.0);
        assert_eq!(c.oracle.model, "gpt-4o-mini");
        assert_eq!(c.oracle.max_tokens, 1000);
    }

    #[test]
    fn out_of_range_values_warn_but_do_not_fail() {
        let c = BalanceConfig {
            cos_phi: 1.5,
            voltage_v: 0.0,
            ..Default::default()
        };
        let warnings = c.validate();
        assert_eq!(warnings.len(), 2);
        assert!(warnings.iter().any(|w| w.field == "cos_phi"));
        assert!(warnings.iter().any(|w| w.field == "voltage_v"));
    }

    #[test]
    fn bad_identifier_pattern_warns() {
        let c = BalanceConfig {
            oracle: OracleConfig {
                identifier_pattern: "(".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(c
            .validate()
            .iter()
            .any(|w| w.field == "oracle.identifier_pattern"));
    }
}
