//! Layered configuration loading.
//!
//! Sources, highest priority first:
//! 1. Environment variables (`FARM_BASELINE_*`, `__` separates sections)
//! 2. Project-local `farm-baseline.toml`
//! 3. User-level `~/.config/farm-baseline/config.toml`
//! 4. Built-in defaults
//!
//! `FARM_BASELINE_COMPUTATION__SCRIPTS_DIR` maps to `computation.scripts_dir`,
//! `FARM_BASELINE_COMPLIANCE__MAX_LOSS_PERCENT` to
//! `compliance.max_loss_percent`, and so on.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

pub const ENV_PREFIX: &str = "FARM_BASELINE_";
pub const LOCAL_CONFIG_FILE: &str = "farm-baseline.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Figment(#[from] figment::Error),

    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BaselineConfig {
    #[serde(default)]
    pub computation: ComputationConfig,
    #[serde(default)]
    pub compliance: ComplianceConfig,
    #[serde(default)]
    pub dates: DateConfig,
    #[serde(default)]
    pub carbon: CarbonConfig,
    #[serde(default)]
    pub batch: BatchConfig,
}

/// How the external computation is provisioned and bounded.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ComputationConfig {
    /// Interpreter name (looked up on `PATH`) or path.
    pub python_bin: PathBuf,
    /// Directory holding the per-kind scripts.
    pub scripts_dir: PathBuf,
    /// Where temporary input files go; the system temp dir when unset.
    pub temp_dir: Option<PathBuf>,
    pub vegetation_timeout_secs: u64,
    pub deforestation_timeout_secs: u64,
    pub carbon_timeout_secs: u64,
    /// Whether truncated stderr excerpts are embedded in caller-visible
    /// errors. Turn off in production.
    pub expose_diagnostics: bool,
}

impl Default for ComputationConfig {
    fn default() -> Self {
        Self {
            python_bin: PathBuf::from("python3"),
            scripts_dir: PathBuf::from("python-scripts"),
            temp_dir: None,
            vegetation_timeout_secs: 60,
            deforestation_timeout_secs: 90,
            carbon_timeout_secs: 90,
            expose_diagnostics: true,
        }
    }
}

/// Regulatory constants for the deforestation verdict.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ComplianceConfig {
    /// Loss strictly below this percentage is compliant.
    pub max_loss_percent: f64,
    pub lookback_years: u32,
}

impl Default for ComplianceConfig {
    fn default() -> Self {
        Self {
            max_loss_percent: 5.0,
            lookback_years: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DateConfig {
    pub max_span_years: u32,
    pub default_vegetation_window_days: u32,
}

impl Default for DateConfig {
    fn default() -> Self {
        Self {
            max_span_years: 5,
            default_vegetation_window_days: 365,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CarbonConfig {
    /// Flat stock assumed by the local approximation when there is no
    /// inventory.
    pub fallback_tco2e_per_ha: f64,
}

impl Default for CarbonConfig {
    fn default() -> Self {
        Self {
            fallback_tco2e_per_ha: 75.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Farms analysed at once.
    pub concurrency: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: num_cpus::get(),
        }
    }
}

impl BaselineConfig {
    /// Load from every source and validate.
    pub fn load() -> Result<Self, ConfigError> {
        let config: Self = Self::figment().extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn figment() -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                figment = figment.merge(Toml::file(global_path));
            }
        }

        let local_path = PathBuf::from(LOCAL_CONFIG_FILE);
        if local_path.exists() {
            figment = figment.merge(Toml::file(local_path));
        }

        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    fn global_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("farm-baseline").join("config.toml"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.computation;
        for (field, secs) in [
            ("computation.vegetation_timeout_secs", c.vegetation_timeout_secs),
            ("computation.deforestation_timeout_secs", c.deforestation_timeout_secs),
            ("computation.carbon_timeout_secs", c.carbon_timeout_secs),
        ] {
            if secs == 0 {
                return Err(invalid(field, "timeout must be at least one second"));
            }
        }

        let threshold = self.compliance.max_loss_percent;
        if !(threshold > 0.0 && threshold <= 100.0) {
            return Err(invalid(
                "compliance.max_loss_percent",
                "must be within (0, 100]",
            ));
        }
        if self.compliance.lookback_years == 0 {
            return Err(invalid("compliance.lookback_years", "must be positive"));
        }
        if self.dates.max_span_years == 0 {
            return Err(invalid("dates.max_span_years", "must be positive"));
        }
        if self.dates.default_vegetation_window_days == 0 {
            return Err(invalid(
                "dates.default_vegetation_window_days",
                "must be positive",
            ));
        }
        if !(self.carbon.fallback_tco2e_per_ha >= 0.0) {
            return Err(invalid(
                "carbon.fallback_tco2e_per_ha",
                "must be a non-negative number",
            ));
        }
        if self.batch.concurrency == 0 {
            return Err(invalid("batch.concurrency", "must be positive"));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}
