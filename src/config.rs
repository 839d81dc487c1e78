//! Configuration file handling.
//!
//! This module handles loading, validating and merging configuration from
//! `.labchurn.toml` files.
//!
//! Every threshold default below is a placeholder awaiting confirmation
//! from the business owner; `main` warns when no file overrides them.

use crate::error::EngineError;
use crate::loss::LossRules;
use crate::models::{TierDays, TierThresholds};
use crate::monthly::BaselineSettings;
use crate::risk::RiskThresholds;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = ".labchurn.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Daily risk and risk-list settings.
    #[serde(default)]
    pub risk: RiskConfig,

    /// Loss bucket settings.
    #[serde(default)]
    pub loss: LossRules,

    /// Monthly baseline settings.
    #[serde(default)]
    pub baseline: BaselineConfig,

    /// Refresh cache settings.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Report settings.
    #[serde(default)]
    pub report: ReportConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Default output file path.
    #[serde(default = "default_output")]
    pub output: String,

    /// Number of parallel per-entity work chunks.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            concurrency: default_concurrency(),
        }
    }
}

fn default_output() -> String {
    "labchurn_report.md".to_string()
}

fn default_concurrency() -> usize {
    4
}

/// Daily risk thresholds and the risk-list rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Reduction fraction (0-1] from which the level is Moderate.
    #[serde(default = "default_moderate")]
    pub moderate_threshold: f64,

    /// Reduction fraction (0-1] from which the level is High.
    #[serde(default = "default_high")]
    pub high_threshold: f64,

    /// Week-over-week drop (percent, positive) that puts an entity on the risk list.
    #[serde(default = "default_wow_drop")]
    pub wow_drop_pct: f64,

    /// Days without collection that put an entity on the risk list, per tier.
    #[serde(default = "default_inactivity")]
    pub inactivity: TierThresholds,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            moderate_threshold: default_moderate(),
            high_threshold: default_high(),
            wow_drop_pct: default_wow_drop(),
            inactivity: default_inactivity(),
        }
    }
}

fn default_moderate() -> f64 {
    RiskThresholds::default().moderate
}

fn default_high() -> f64 {
    RiskThresholds::default().high
}

fn default_wow_drop() -> f64 {
    50.0
}

fn default_inactivity() -> TierThresholds {
    TierThresholds {
        small: TierDays::calendar(15),
        medium: TierDays::calendar(7),
        medium_large: TierDays::calendar(7),
        large: TierDays::business(1),
    }
}

impl From<&RiskConfig> for RiskThresholds {
    fn from(config: &RiskConfig) -> Self {
        Self {
            moderate: config.moderate_threshold,
            high: config.high_threshold,
        }
    }
}

/// Monthly baseline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineConfig {
    /// Number of best historical months averaged into the baseline.
    #[serde(default = "default_top_n")]
    pub top_n: usize,

    /// Years of peak months reported next to the baseline.
    #[serde(default = "default_peak_years")]
    pub peak_years: usize,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            top_n: default_top_n(),
            peak_years: default_peak_years(),
        }
    }
}

fn default_top_n() -> usize {
    3
}

fn default_peak_years() -> usize {
    2
}

impl From<&BaselineConfig> for BaselineSettings {
    fn from(config: &BaselineConfig) -> Self {
        Self {
            top_n: config.top_n,
            peak_years: config.peak_years,
        }
    }
}

/// Refresh cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Seconds a computed refresh stays fresh.
    #[serde(default = "default_ttl")]
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_ttl(),
        }
    }
}

fn default_ttl() -> u64 {
    300
}

/// Report generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Keep weeks whose Friday has not passed in the weekly table.
    #[serde(default)]
    pub include_open_weeks: bool,

    /// Include the per-entity daily table.
    #[serde(default = "default_true")]
    pub include_entity_table: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            include_open_weeks: false,
            include_entity_table: true,
        }
    }
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(DEFAULT_CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings, but only
    /// when they were given explicitly.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref output) = args.output {
            self.general.output = output.display().to_string();
        }
        if let Some(concurrency) = args.concurrency {
            self.general.concurrency = concurrency;
        }
        if let Some(ttl) = args.ttl {
            self.cache.ttl_seconds = ttl;
        }
        if let Some(top_n) = args.top_n {
            self.baseline.top_n = top_n;
        }
        if args.include_open_weeks {
            self.report.include_open_weeks = true;
        }
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> std::result::Result<(), EngineError> {
        let risk = &self.risk;
        let in_unit_range = |v: f64| v > 0.0 && v <= 1.0;

        if !in_unit_range(risk.moderate_threshold) || !in_unit_range(risk.high_threshold) {
            return Err(EngineError::InvalidConfig(
                "risk thresholds must be within (0, 1]".to_string(),
            ));
        }
        if risk.moderate_threshold >= risk.high_threshold {
            return Err(EngineError::InvalidConfig(format!(
                "moderate_threshold ({}) must be below high_threshold ({})",
                risk.moderate_threshold, risk.high_threshold
            )));
        }
        if risk.wow_drop_pct <= 0.0 {
            return Err(EngineError::InvalidConfig(
                "wow_drop_pct must be positive".to_string(),
            ));
        }
        if self.baseline.top_n == 0 {
            return Err(EngineError::InvalidConfig(
                "baseline.top_n must be at least 1".to_string(),
            ));
        }
        if self.cache.ttl_seconds == 0 {
            return Err(EngineError::InvalidConfig(
                "cache.ttl_seconds must be at least 1".to_string(),
            ));
        }
        if self.general.concurrency == 0 {
            return Err(EngineError::InvalidConfig(
                "general.concurrency must be at least 1".to_string(),
            ));
        }
        for (tier, floor) in self.loss.recent_floor.iter() {
            let calendar_days = floor.max_calendar_days();
            if calendar_days > self.loss.old_after_days {
                return Err(EngineError::InvalidConfig(format!(
                    "recent loss floor for {} ({} {}, up to {} calendar days) exceeds old_after_days ({} calendar days)",
                    tier, floor.days, floor.unit, calendar_days, self.loss.old_after_days
                )));
            }
        }

        Ok(())
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
