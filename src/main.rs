//! LabChurn - laboratory churn and risk monitoring
//!
//! A CLI tool that reads daily collection snapshots, flags laboratories
//! at risk or lost, and writes weekly and monthly closing reports.
//!
//! Exit codes:
//!   0 - Success (no alerts, and no --fail-on threshold met)
//!   1 - Runtime error (unreadable snapshot, invalid config, etc.)
//!   2 - Aggregation invariant alert raised, or --fail-on threshold met

mod analysis;
mod cache;
mod cli;
mod config;
mod error;
mod loss;
mod models;
mod monthly;
mod refresh;
mod report;
mod risk;
mod series;
mod snapshot;
mod stats;
mod weekly;

use anyhow::{Context, Result};
use cache::SystemClock;
use chrono::Utc;
use cli::{Args, OutputFormat};
use config::{Config, DEFAULT_CONFIG_FILE};
use models::{RefreshOutput, RiskLevel};
use refresh::{RefreshRequest, RefreshService};
use snapshot::{Segment, SnapshotLoader, SnapshotSource};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

/// Timeout for fetching a snapshot over HTTP.
const HTTP_TIMEOUT_SECS: u64 = 60;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Initialize logging
    init_logging(&args);

    info!("LabChurn v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run(args).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Refresh failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .labchurn.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(DEFAULT_CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            DEFAULT_CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", DEFAULT_CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", DEFAULT_CONFIG_FILE);
    println!("   Edit it to set risk thresholds, loss floors, baseline and cache TTL.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) {
    let level = args.log_level();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Run the refresh workflow. Returns exit code (0 or 2).
async fn run(args: Args) -> Result<i32> {
    // Load configuration
    let mut config = load_config(&args)?;
    config.merge_with_args(&args);
    config.validate().context("Invalid configuration")?;

    let source = args
        .source()
        .context("No snapshot source given (use --snapshot or --snapshot-url)")?;
    let segment = Segment {
        tier: args.tier,
        state: args.state.clone(),
    };

    let loader = SnapshotLoader::new(Duration::from_secs(HTTP_TIMEOUT_SECS))
        .context("Failed to build the snapshot loader")?;

    // Handle --dry-run: decode the snapshot and exit
    if args.dry_run {
        return handle_dry_run(&loader, &source, &segment).await;
    }

    let output_path = config.general.output.clone();
    let report_options = config.report.clone();
    let mut service = RefreshService::new(config, loader, Arc::new(SystemClock))
        .with_progress(!args.quiet);

    let mut force = args.reload;
    loop {
        let request = RefreshRequest {
            source: source.clone(),
            as_of: args.as_of.unwrap_or_else(|| Utc::now().date_naive()),
            month: args.month,
            segment: segment.clone(),
            force,
        };
        force = false;

        if !args.quiet {
            println!("🔄 Refreshing from {}", source);
        }
        let output = service.refresh(&request).await?;

        // Generate and save the report
        let rendered = match args.format {
            OutputFormat::Json => report::generate_json_report(&output)?,
            OutputFormat::Markdown => report::generate_markdown_report(&output, &report_options),
        };
        report::write_report(&rendered, Path::new(&output_path))?;

        if !args.quiet {
            print_summary(&output, &output_path);
        }
        let exit_code = exit_code_for(&output, args.fail_on.map(RiskLevel::from));

        if !args.watch {
            return Ok(exit_code);
        }

        let wait = service.ttl();
        info!("Next refresh in {}s (Ctrl-C to stop)", wait.as_secs());
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping watch");
                return Ok(exit_code);
            }
        }
    }
}

/// Handle --dry-run: load the snapshot, print what would be evaluated, exit.
async fn handle_dry_run(
    loader: &SnapshotLoader,
    source: &SnapshotSource,
    segment: &Segment,
) -> Result<i32> {
    println!("\n🔍 Dry run: decoding snapshot from {} (no evaluation)...\n", source);

    let snapshot = loader
        .load(source)
        .await
        .with_context(|| format!("Failed to load snapshot from {}", source))?;
    let total = snapshot.entities.len();
    let snapshot = snapshot.filter_segment(segment);

    if let Some(generated) = snapshot.generated_at {
        println!("   Snapshot generated at: {}", generated);
    }
    println!("   Entities decoded: {}", total);
    if !segment.is_all() {
        println!("   In segment {}: {}", segment, snapshot.entities.len());
    }
    println!("   Data quality events: {}", snapshot.data_quality.len());
    for event in &snapshot.data_quality {
        println!("     ⚠️  {}: {}", event.entity_id, event.reason);
    }

    println!("\n✅ Dry run complete. Nothing was evaluated or written.");
    Ok(0)
}

/// Print the refresh summary to stdout.
fn print_summary(output: &RefreshOutput, output_path: &str) {
    let summary = &output.summary;

    println!("\n📊 Refresh Summary ({}):", output.metadata.reference_date);
    if output.metadata.stale {
        println!("   ⚠️  Snapshot source unavailable, showing the last cached result");
    }
    println!(
        "   Monitored: {} | With daily stats: {}",
        summary.monitored, summary.stats_eligible
    );
    println!(
        "   - 🔴 Critical: {} | 🟠 High: {} | 🟡 Moderate: {} | 🔵 Attention: {} | 🟢 Normal: {}",
        summary.critical, summary.high, summary.moderate, summary.attention, summary.normal
    );
    println!(
        "   At risk: {} | Recent loss: {} | Old loss: {}",
        summary.at_risk, summary.recent_loss, summary.old_loss
    );
    if summary.data_quality > 0 {
        println!("   Data quality events: {}", summary.data_quality);
    }
    println!("   Duration: {:.1}s", output.metadata.duration_seconds);
    println!("\n✅ Refresh complete! Report saved to: {}", output_path);
}

/// Exit code for one refresh: 2 on alerts or a met --fail-on threshold.
fn exit_code_for(output: &RefreshOutput, fail_on: Option<RiskLevel>) -> i32 {
    if !output.alerts.is_empty() {
        eprintln!(
            "\n⛔ {} aggregation invariant alert(s) raised. Failing (exit code 2).",
            output.alerts.len()
        );
        return 2;
    }

    if let Some(threshold) = fail_on {
        let met = output
            .risk_list
            .iter()
            .any(|entry| entry.severity.is_some_and(|s| s >= threshold));

        if met {
            eprintln!(
                "\n⛔ Laboratories at risk with {} severity or above. Failing (exit code 2).",
                threshold
            );
            return 2;
        }
    }

    0
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", DEFAULT_CONFIG_FILE);
            Ok(config)
        }
        Ok(None) => {
            warn!(
                "No {} found: using placeholder risk thresholds and loss floors pending business confirmation",
                DEFAULT_CONFIG_FILE
            );
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AlertKind, Entity, InvariantAlert, RiskEntry, SizeTier};

    fn output_with(severity: Option<RiskLevel>) -> RefreshOutput {
        let json = include_str!("../fixtures/sample_snapshot.json");
        let snapshot = snapshot::Snapshot::from_json_str(json).unwrap();
        let as_of = chrono::NaiveDate::from_ymd_opt(2025, 9, 20).unwrap();
        let settings = analysis::PassSettings::from_config(&Config::default(), as_of, None);

        let results = snapshot
            .entities
            .iter()
            .map(|l| analysis::evaluate_entity(l, &settings))
            .collect();
        let metadata = models::RefreshMetadata {
            source: "test".to_string(),
            computed_at: Utc::now(),
            snapshot_generated_at: None,
            as_of,
            reference_date: settings.reference_date,
            month: settings.month,
            segment: None,
            stale: false,
            duration_seconds: 0.0,
        };
        let mut output =
            analysis::AggregationOrchestrator::new(settings).compose(results, Vec::new(), metadata);

        output.risk_list = vec![RiskEntry {
            entity: Entity {
                id: "lab".to_string(),
                name: String::new(),
                tier: SizeTier::Small,
                city: String::new(),
                state: String::new(),
                country: String::new(),
            },
            reasons: Vec::new(),
            severity,
            recovery: false,
            wow_pct: None,
            days_since_last_collection: None,
        }];
        output
    }

    #[test]
    fn test_exit_code_fail_on() {
        let output = output_with(Some(RiskLevel::Moderate));
        assert_eq!(exit_code_for(&output, None), 0);
        assert_eq!(exit_code_for(&output, Some(RiskLevel::Moderate)), 2);
        assert_eq!(exit_code_for(&output, Some(RiskLevel::High)), 0);

        let no_stats = output_with(None);
        assert_eq!(exit_code_for(&no_stats, Some(RiskLevel::Attention)), 0);
    }

    #[test]
    fn test_exit_code_alerts() {
        let mut output = output_with(None);
        output.alerts.push(InvariantAlert {
            kind: AlertKind::PopulationOverflow,
            message: "overflow".to_string(),
            entity_ids: Vec::new(),
        });
        assert_eq!(exit_code_for(&output, None), 2);
    }
}
