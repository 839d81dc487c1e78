//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::models::{RiskLevel, SizeTier};
use crate::series::YearMonth;
use crate::snapshot::SnapshotSource;
use chrono::NaiveDate;
use clap::Parser;
use std::path::PathBuf;

/// LabChurn - churn and risk monitoring for laboratory collections
///
/// Reads a collection snapshot, classifies daily risk and losses per
/// laboratory and writes weekly/monthly tables as Markdown or JSON.
///
/// Examples:
///   labchurn --snapshot ./snapshot.json
///   labchurn --snapshot ./snapshots/ --as-of 2025-09-19 --format json
///   labchurn --snapshot-url https://example.org/snapshot.json --watch
///   labchurn --snapshot ./snapshot.json --tier large --state SP --fail-on high
///   labchurn --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Snapshot file, or a directory of snapshot files
    #[arg(short, long, value_name = "PATH")]
    pub snapshot: Option<PathBuf>,

    /// Snapshot URL (http or https)
    #[arg(long, value_name = "URL", env = "LABCHURN_SNAPSHOT_URL")]
    pub snapshot_url: Option<String>,

    /// Evaluate as of this date instead of today (YYYY-MM-DD)
    ///
    /// The reference date is the latest business day on or before it.
    #[arg(long, value_name = "DATE")]
    pub as_of: Option<NaiveDate>,

    /// Month for the weekly and monthly tables (YYYY-MM)
    ///
    /// Defaults to the month of the reference date.
    #[arg(long, value_name = "MONTH")]
    pub month: Option<YearMonth>,

    /// Only monitor laboratories of this size tier
    ///
    /// Values: small, medium, medium_large, large (Portuguese names accepted)
    #[arg(long, value_name = "TIER")]
    pub tier: Option<SizeTier>,

    /// Only monitor laboratories in this state (UF)
    #[arg(long, value_name = "UF")]
    pub state: Option<String>,

    /// Output file path for the report
    ///
    /// Default: from config or labchurn_report.md
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Path to configuration file
    ///
    /// If not specified, looks for .labchurn.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Fail if a laboratory in the risk list is at or above this severity
    ///
    /// Useful for scheduled jobs. Exit code 2 when the threshold is met.
    /// Values: attention, moderate, high, critical
    #[arg(long, value_name = "LEVEL")]
    pub fail_on: Option<FailOnLevel>,

    /// Number of parallel work chunks for the per-laboratory pass
    #[arg(long, value_name = "NUM")]
    pub concurrency: Option<usize>,

    /// Seconds a refresh result stays fresh
    #[arg(long, value_name = "SECS")]
    pub ttl: Option<u64>,

    /// Number of top historical months averaged into the baseline
    #[arg(long, value_name = "N")]
    pub top_n: Option<usize>,

    /// Keep weeks that have not closed yet in the weekly table
    #[arg(long)]
    pub include_open_weeks: bool,

    /// Keep refreshing every time the cached result expires, until Ctrl-C
    #[arg(long)]
    pub watch: bool,

    /// Bypass the cache on the first refresh
    #[arg(long)]
    pub reload: bool,

    /// Dry run: load and decode the snapshot without evaluating it
    ///
    /// Shows population and data quality counts and exits.
    #[arg(long)]
    pub dry_run: bool,

    /// Generate a default .labchurn.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

/// Severity level for --fail-on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, clap::ValueEnum)]
pub enum FailOnLevel {
    Attention,
    Moderate,
    High,
    Critical,
}

impl From<FailOnLevel> for RiskLevel {
    fn from(level: FailOnLevel) -> Self {
        match level {
            FailOnLevel::Attention => RiskLevel::Attention,
            FailOnLevel::Moderate => RiskLevel::Moderate,
            FailOnLevel::High => RiskLevel::High,
            FailOnLevel::Critical => RiskLevel::Critical,
        }
    }
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// The snapshot source, if one was given (validate first).
    pub fn source(&self) -> Option<SnapshotSource> {
        if let Some(ref url) = self.snapshot_url {
            return Some(SnapshotSource::Http(url.clone()));
        }
        self.snapshot.as_deref().map(SnapshotSource::from_path)
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        match (&self.snapshot, &self.snapshot_url) {
            (None, None) => {
                return Err("A snapshot source is required: use --snapshot or --snapshot-url".to_string());
            }
            (Some(_), Some(_)) => {
                return Err("Use either --snapshot or --snapshot-url, not both".to_string());
            }
            _ => {}
        }

        // Validate snapshot path if provided
        if let Some(ref path) = self.snapshot {
            if !path.exists() {
                return Err(format!("Snapshot path does not exist: {}", path.display()));
            }
        }

        // Validate snapshot URL format
        if let Some(ref url) = self.snapshot_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("Snapshot URL must start with 'http://' or 'https://'".to_string());
            }
        }

        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }
        if self.watch && self.dry_run {
            return Err("Cannot use both --watch and --dry-run".to_string());
        }

        if self.concurrency == Some(0) {
            return Err("Concurrency must be at least 1".to_string());
        }
        if self.ttl == Some(0) {
            return Err("TTL must be at least 1 second".to_string());
        }
        if self.top_n == Some(0) {
            return Err("Top N must be at least 1".to_string());
        }

        if let Some(ref state) = self.state {
            if state.trim().is_empty() {
                return Err("State must not be empty".to_string());
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
