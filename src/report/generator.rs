//! Markdown and JSON report generation.
//!
//! This module renders a refresh output into a Markdown report for
//! account managers, or pretty JSON for downstream tooling.

use crate::config::ReportConfig;
use crate::models::{
    EntityDailyRow, InvariantAlert, LossRow, MonthPeak, MonthlyRow, MonthlyTotalRow,
    RefreshMetadata, RefreshOutput, RefreshSummary, RiskEntry, RiskLevel, WeeklyRecord,
};
use anyhow::{Context, Result};
use std::path::Path;

/// Generate a complete Markdown report.
pub fn generate_markdown_report(output: &RefreshOutput, options: &ReportConfig) -> String {
    let mut report = String::new();

    // Title
    report.push_str("# LabChurn Report\n\n");

    report.push_str(&generate_metadata_section(&output.metadata));
    report.push_str(&generate_table_of_contents(output, options));
    report.push_str(&generate_summary_section(&output.summary));
    report.push_str(&generate_alerts_section(&output.alerts));
    report.push_str(&generate_risk_section(&output.risk_list));
    report.push_str(&generate_loss_section(
        "Recent Losses",
        "No recent losses in this refresh.",
        &output.recent_losses,
    ));
    report.push_str(&generate_loss_section(
        "Old Losses",
        "No old losses in this refresh.",
        &output.old_losses,
    ));
    report.push_str(&generate_weekly_section(&output.weekly, options.include_open_weeks));
    report.push_str(&generate_monthly_section(&output.monthly, &output.monthly_total));

    if options.include_entity_table {
        report.push_str(&generate_entity_section(&output.entities));
    }

    report.push_str(&generate_data_quality_section(output));
    report.push_str(&generate_footer());

    report
}

/// Format an optional percentage with its sign.
fn pct(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:+.1}%", v),
        None => "n/a".to_string(),
    }
}

fn days(value: Option<i64>) -> String {
    value.map_or_else(|| "-".to_string(), |d| d.to_string())
}

fn peak_label(peak: Option<&MonthPeak>) -> String {
    peak.map_or_else(|| "-".to_string(), |p| format!("{} ({})", p.value, p.month))
}

fn severity_label(level: RiskLevel) -> String {
    format!("{} {}", level.emoji(), level)
}

/// Generate the metadata section.
fn generate_metadata_section(metadata: &RefreshMetadata) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Source:** `{}`\n", metadata.source));
    section.push_str(&format!(
        "- **Computed At:** {}\n",
        metadata.computed_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    if let Some(generated) = metadata.snapshot_generated_at {
        section.push_str(&format!(
            "- **Snapshot Generated:** {}\n",
            generated.format("%Y-%m-%d %H:%M:%S UTC")
        ));
    }
    section.push_str(&format!("- **As Of:** {}\n", metadata.as_of));
    section.push_str(&format!("- **Reference Date:** {}\n", metadata.reference_date));
    section.push_str(&format!("- **Month:** {}\n", metadata.month));
    if let Some(ref segment) = metadata.segment {
        section.push_str(&format!("- **Segment:** {}\n", segment));
    }
    if metadata.stale {
        section.push_str("- **⚠️ Stale:** the snapshot source was unavailable; this is the last cached result\n");
    }
    section.push_str(&format!(
        "- **Refresh Duration:** {:.2}s\n",
        metadata.duration_seconds
    ));
    section.push('\n');

    section
}

/// Generate the table of contents.
fn generate_table_of_contents(output: &RefreshOutput, options: &ReportConfig) -> String {
    let mut toc = String::new();

    toc.push_str("## Table of Contents\n\n");
    toc.push_str("- [Metadata](#metadata)\n");
    toc.push_str("- [Summary](#summary)\n");
    if !output.alerts.is_empty() {
        toc.push_str("- [Alerts](#alerts)\n");
    }
    toc.push_str("- [Risk List](#risk-list)\n");
    toc.push_str("- [Recent Losses](#recent-losses)\n");
    toc.push_str("- [Old Losses](#old-losses)\n");
    toc.push_str("- [Weekly Evolution](#weekly-evolution)\n");
    toc.push_str("- [Monthly Closing](#monthly-closing)\n");
    if options.include_entity_table {
        toc.push_str("- [Daily Indicators](#daily-indicators)\n");
    }
    if !output.data_quality.is_empty() {
        toc.push_str("- [Data Quality](#data-quality)\n");
    }
    toc.push('\n');

    toc
}

/// Generate the summary section.
fn generate_summary_section(summary: &RefreshSummary) -> String {
    let mut section = String::new();

    section.push_str("## Summary\n\n");

    section.push_str("### Daily Severity Breakdown\n\n");
    let header: Vec<String> = RiskLevel::ALL
        .iter()
        .rev()
        .map(|level| severity_label(*level))
        .collect();
    section.push_str(&format!("| {} | **Total** |\n", header.join(" | ")));
    section.push_str("|:---:|:---:|:---:|:---:|:---:|:---:|\n");
    section.push_str(&format!(
        "| {} | {} | {} | {} | {} | **{}** |\n\n",
        summary.critical,
        summary.high,
        summary.moderate,
        summary.attention,
        summary.normal,
        summary.stats_eligible
    ));

    section.push_str("### Population\n\n");
    section.push_str("| Monitored | With Daily Stats | At Risk | Recent Loss | Old Loss | Alerts | Data Quality |\n");
    section.push_str("|:---:|:---:|:---:|:---:|:---:|:---:|:---:|\n");
    section.push_str(&format!(
        "| {} | {} | {} | {} | {} | {} | {} |\n\n",
        summary.monitored,
        summary.stats_eligible,
        summary.at_risk,
        summary.recent_loss,
        summary.old_loss,
        summary.alerts,
        summary.data_quality
    ));

    section
}

/// Generate the alerts section (empty when there are none).
fn generate_alerts_section(alerts: &[InvariantAlert]) -> String {
    if alerts.is_empty() {
        return String::new();
    }

    let mut section = String::new();

    section.push_str("## Alerts\n\n");
    section.push_str("The risk and loss outputs violate an aggregation invariant. Investigate before acting on them.\n\n");
    for alert in alerts {
        section.push_str(&format!("- ⛔ **{:?}**: {}", alert.kind, alert.message));
        if !alert.entity_ids.is_empty() {
            section.push_str(&format!(" (`{}`)", alert.entity_ids.join("`, `")));
        }
        section.push('\n');
    }
    section.push('\n');

    section
}

/// Generate the risk list section.
fn generate_risk_section(entries: &[RiskEntry]) -> String {
    let mut section = String::new();

    section.push_str("## Risk List\n\n");

    if entries.is_empty() {
        section.push_str("No entities are at risk. 🎉\n\n");
        return section;
    }

    section.push_str("| Entity | Tier | City/State | Severity | Reasons | WoW | Days Without Collection |\n");
    section.push_str("|:---|:---|:---|:---|:---|---:|---:|\n");

    for entry in entries {
        let severity = entry
            .severity
            .map_or_else(|| "-".to_string(), severity_label);
        let reasons: Vec<String> = entry.reasons.iter().map(|r| r.to_string()).collect();
        let recovery = if entry.recovery { " ↗️" } else { "" };

        section.push_str(&format!(
            "| `{}` {} | {} | {}/{} | {}{} | {} | {} | {} |\n",
            entry.entity.id,
            entry.entity.name,
            entry.entity.tier,
            entry.entity.city,
            entry.entity.state,
            severity,
            recovery,
            reasons.join("; "),
            pct(entry.wow_pct),
            days(entry.days_since_last_collection),
        ));
    }
    section.push('\n');

    section
}

/// Generate one of the loss tables.
fn generate_loss_section(title: &str, empty_message: &str, rows: &[LossRow]) -> String {
    let mut section = String::new();

    section.push_str(&format!("## {}\n\n", title));

    if rows.is_empty() {
        section.push_str(&format!("{}\n\n", empty_message));
        return section;
    }

    section.push_str("| Entity | Tier | City/State | Last Collection | Days Since | Avg Monthly (Active) | Historical Peak |\n");
    section.push_str("|:---|:---|:---|:---:|---:|---:|:---|\n");

    for row in rows {
        let last = row
            .last_collection_date
            .map_or_else(|| "-".to_string(), |d| d.to_string());

        section.push_str(&format!(
            "| `{}` {} | {} | {}/{} | {} | {} | {:.1} | {} |\n",
            row.entity.id,
            row.entity.name,
            row.entity.tier,
            row.entity.city,
            row.entity.state,
            last,
            days(row.days_since),
            row.avg_monthly_active,
            peak_label(row.peak.as_ref()),
        ));
    }
    section.push('\n');

    section
}

/// Generate the weekly evolution section.
///
/// Open weeks are listed only when `include_open` is set; otherwise they
/// are counted in a note under the table.
fn generate_weekly_section(weeks: &[WeeklyRecord], include_open: bool) -> String {
    let mut section = String::new();

    section.push_str("## Weekly Evolution\n\n");

    let shown: Vec<&WeeklyRecord> = weeks
        .iter()
        .filter(|week| week.closed || include_open)
        .collect();
    let hidden = weeks.len() - shown.len();

    if shown.is_empty() {
        section.push_str("No closed weeks in this month yet.\n\n");
    } else {
        section.push_str("| Week | Interval | Volume | Previous | WoW | Closed |\n");
        section.push_str("|:---|:---|---:|---:|---:|:---:|\n");

        for week in shown {
            section.push_str(&format!(
                "| {} | {} to {} | {} | {} | {:+.1}% | {} |\n",
                week.label,
                week.start.format("%d/%m"),
                week.end.format("%d/%m"),
                week.volume_current,
                week.volume_previous,
                week.wow_pct,
                if week.closed { "✅" } else { "⏳" },
            ));
        }
        section.push('\n');
    }

    if hidden > 0 {
        section.push_str(&format!(
            "*{} open week(s) not shown. Use --include-open-weeks to list them.*\n\n",
            hidden
        ));
    }

    section
}

/// Generate the monthly closing section.
fn generate_monthly_section(rows: &[MonthlyRow], total: &MonthlyTotalRow) -> String {
    let mut section = String::new();

    section.push_str("## Monthly Closing\n\n");

    if rows.is_empty() {
        section.push_str("No entities in the monitored population.\n\n");
        return section;
    }

    section.push_str("| Entity | Tier | Baseline | Current | Gap | Variance | Peaks |\n");
    section.push_str("|:---|:---|---:|---:|---:|---:|:---|\n");

    for row in rows {
        let b = &row.baseline;
        let peaks: Vec<String> = b.peaks.iter().map(|p| peak_label(Some(p))).collect();

        section.push_str(&format!(
            "| `{}` {} | {} | {:.1} | {} | {:.1} | {} | {} |\n",
            row.entity.id,
            row.entity.name,
            row.entity.tier,
            b.baseline,
            b.current_month_volume,
            b.gap,
            pct(b.variance_pct),
            if peaks.is_empty() { "-".to_string() } else { peaks.join(", ") },
        ));
    }

    section.push_str(&format!(
        "| **Total** | | **{:.1}** | **{}** | **{:.1}** | **{}** | |\n\n",
        total.baseline,
        total.current_month_volume,
        total.gap,
        pct(total.variance_pct),
    ));

    section
}

/// Generate the per-entity daily indicators section.
fn generate_entity_section(rows: &[EntityDailyRow]) -> String {
    let mut section = String::new();

    section.push_str("## Daily Indicators\n\n");

    if rows.is_empty() {
        section.push_str("No entity has daily history up to the reference date.\n\n");
        return section;
    }

    section.push_str("| Entity | Today | Prev | MM7 | MM30 | MM90 | DoW Avg | vs MM7 | vs MM30 | vs MM90 | Severity | Recovery |\n");
    section.push_str("|:---|---:|---:|---:|---:|---:|---:|---:|---:|---:|:---|:---:|\n");

    let mut sorted: Vec<&EntityDailyRow> = rows.iter().collect();
    sorted.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| a.entity.id.cmp(&b.entity.id))
    });

    for row in sorted {
        section.push_str(&format!(
            "| `{}` | {:.0} | {:.0} | {:.1} | {:.1} | {:.1} | {:.1} | {} | {} | {} | {} | {} |\n",
            row.entity.id,
            row.today,
            row.prev,
            row.mm7,
            row.mm30,
            row.mm90,
            row.dow_avg,
            pct(row.pct_vs_mm7),
            pct(row.pct_vs_mm30),
            pct(row.pct_vs_mm90),
            severity_label(row.severity),
            if row.recovery { "↗️" } else { "" },
        ));
    }
    section.push('\n');

    section
}

/// Generate the data quality section (empty when there are no events).
fn generate_data_quality_section(output: &RefreshOutput) -> String {
    if output.data_quality.is_empty() {
        return String::new();
    }

    let mut section = String::new();

    section.push_str("## Data Quality\n\n");
    section.push_str("These records were excluded from some or all outputs:\n\n");
    for event in &output.data_quality {
        section.push_str(&format!("- `{}`: {}\n", event.entity_id, event.reason));
    }
    section.push('\n');

    section
}

/// Generate the report footer.
fn generate_footer() -> String {
    let mut footer = String::new();

    footer.push_str("---\n\n");
    footer.push_str("*Report generated by LabChurn. Thresholds are provisional until confirmed by the business owner.*\n");

    footer
}

/// Generate a JSON report.
pub fn generate_json_report(output: &RefreshOutput) -> Result<String> {
    serde_json::to_string_pretty(output).map_err(Into::into)
}

/// Write rendered report content to a file.
pub fn write_report(content: &str, path: &Path) -> Result<()> {
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write report to {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        AlertKind, DataQualityEvent, DayUnit, Entity, LossKind, MonthlyBaseline, RiskReason,
        SizeTier,
    };
    use crate::series::YearMonth;
    use chrono::{NaiveDate, Utc};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn entity(id: &str) -> Entity {
        Entity {
            id: id.to_string(),
            name: "Lab".to_string(),
            tier: SizeTier::MediumLarge,
            city: "Campinas".to_string(),
            state: "SP".to_string(),
            country: "BR".to_string(),
        }
    }

    fn create_test_output() -> RefreshOutput {
        let month = YearMonth::new(2025, 9).unwrap();
        RefreshOutput {
            metadata: RefreshMetadata {
                source: "file:snapshot.json".to_string(),
                computed_at: Utc::now(),
                snapshot_generated_at: None,
                as_of: d(2025, 9, 20),
                reference_date: d(2025, 9, 19),
                month,
                segment: Some("tier=Large".to_string()),
                stale: true,
                duration_seconds: 0.5,
            },
            summary: RefreshSummary {
                monitored: 3,
                stats_eligible: 2,
                high: 1,
                normal: 1,
                at_risk: 1,
                recent_loss: 1,
                ..Default::default()
            },
            entities: Vec::new(),
            risk_list: vec![RiskEntry {
                entity: entity("lab-1"),
                reasons: vec![
                    RiskReason::WowDrop { wow_pct: -60.0 },
                    RiskReason::Inactivity {
                        days: 8,
                        unit: DayUnit::Calendar,
                    },
                ],
                severity: Some(RiskLevel::High),
                recovery: false,
                wow_pct: Some(-60.0),
                days_since_last_collection: Some(8),
            }],
            recent_losses: vec![LossRow {
                entity: entity("lab-2"),
                kind: LossKind::RecentLoss,
                last_collection_date: Some(d(2025, 8, 1)),
                days_since: Some(49),
                avg_monthly_active: 63.0,
                peak: Some(MonthPeak {
                    month: YearMonth::new(2025, 7).unwrap(),
                    value: 69,
                }),
            }],
            old_losses: Vec::new(),
            weekly: Vec::new(),
            monthly: vec![MonthlyRow {
                entity: entity("lab-1"),
                baseline: MonthlyBaseline {
                    month,
                    baseline: 0.0,
                    months_used: 0,
                    current_month_volume: 12,
                    gap: -12.0,
                    variance_pct: None,
                    peaks: Vec::new(),
                },
            }],
            monthly_total: MonthlyTotalRow {
                baseline: 0.0,
                current_month_volume: 12,
                gap: -12.0,
                variance_pct: None,
            },
            alerts: vec![InvariantAlert {
                kind: AlertKind::RiskLossOverlap,
                message: "1 entities appear in both the risk list and a loss table".to_string(),
                entity_ids: vec!["lab-1".to_string()],
            }],
            data_quality: vec![DataQualityEvent::new("lab-3", "no daily history up to 2025-09-19")],
        }
    }

    #[test]
    fn test_generate_markdown_report() {
        let output = create_test_output();
        let markdown = generate_markdown_report(&output, &ReportConfig::default());

        assert!(markdown.contains("# LabChurn Report"));
        assert!(markdown.contains("## Metadata"));
        assert!(markdown.contains("Stale"));
        assert!(markdown.contains("## Alerts"));
        assert!(markdown.contains("WoW -60.0%; 8 calendar days without collection"));
        assert!(markdown.contains("| 69 (2025-07) |"));
        assert!(markdown.contains("No old losses in this refresh."));
        assert!(markdown.contains("No closed weeks in this month yet."));
        assert!(markdown.contains("| **Total** |"));
        assert!(markdown.contains("## Data Quality"));
        assert!(markdown.contains("## Daily Indicators"));
    }

    #[test]
    fn test_entity_table_can_be_disabled() {
        let output = create_test_output();
        let options = ReportConfig {
            include_entity_table: false,
            ..Default::default()
        };
        let markdown = generate_markdown_report(&output, &options);
        assert!(!markdown.contains("## Daily Indicators"));
    }

    #[test]
    fn test_undefined_variance_is_not_hidden() {
        assert_eq!(pct(None), "n/a");
        assert_eq!(pct(Some(12.345)), "+12.3%");
        assert_eq!(pct(Some(-70.0)), "-70.0%");
    }

    fn week(iso_week: u32, start: u32, closed: bool) -> WeeklyRecord {
        WeeklyRecord {
            label: format!("W{:02}/2025", iso_week),
            iso_year: 2025,
            iso_week,
            start: d(2025, 9, start),
            end: d(2025, 9, start + 4),
            volume_current: 20,
            volume_previous: 60,
            wow_pct: -66.666,
            closed,
        }
    }

    #[test]
    fn test_weekly_section() {
        let weeks = [week(38, 15, true), week(39, 22, false)];

        let section = generate_weekly_section(&weeks, false);
        assert!(section.contains("| W38/2025 | 15/09 to 19/09 | 20 | 60 | -66.7% | ✅ |"));
        assert!(!section.contains("W39/2025"));
        assert!(section.contains("1 open week(s) not shown"));

        let section = generate_weekly_section(&weeks, true);
        assert!(section.contains("| W39/2025 | 22/09 to 26/09 | 20 | 60 | -66.7% | ⏳ |"));
        assert!(!section.contains("not shown"));
    }

    #[test]
    fn test_generate_json_report() {
        let output = create_test_output();
        let json = generate_json_report(&output).unwrap();

        assert!(json.contains("\"risk_list\""));
        assert!(json.contains("\"recent_losses\""));
        assert!(json.contains("\"kind\": \"wow_drop\""));
        assert!(json.contains("\"month\": \"2025-09\""));
    }
}
