//! Population-level aggregation.
//!
//! Composes per-entity results into the daily rows, risk list, loss
//! tables, weekly evolution and monthly closing of one refresh. Loss always
//! takes precedence over risk, and any overlap or overflow between the
//! output sets is reported as an alert, never corrected.

use super::context::ContextIndex;
use super::entity::{EntityResult, PassSettings};
use crate::models::{
    pct_change, AlertKind, DataQualityEvent, EntityContexts, EntityDailyRow, InvariantAlert, LossKind, LossRow,
    MonthlyRow, MonthlyTotalRow, RefreshMetadata, RefreshOutput, RefreshSummary, RiskAssessment,
    RiskEntry, RiskReason, RollingStats, WeeklyRecord,
};
use crate::risk::{ContextMeans, RiskClassifier};
use crate::weekly::combine_records;
use std::collections::{HashMap, HashSet};
use tracing::{debug, error, warn};

/// Composes one refresh output from per-entity results.
#[derive(Debug, Clone)]
pub struct AggregationOrchestrator {
    settings: PassSettings,
    classifier: RiskClassifier,
}

impl AggregationOrchestrator {
    pub fn new(settings: PassSettings) -> Self {
        let classifier = RiskClassifier::new(settings.risk);
        Self {
            settings,
            classifier,
        }
    }

    pub fn settings(&self) -> &PassSettings {
        &self.settings
    }

    /// Build the full refresh output.
    ///
    /// `data_quality` carries events raised before this point (decoding,
    /// failed workers); entities without history are appended here.
    pub fn compose(
        &self,
        mut results: Vec<EntityResult>,
        mut data_quality: Vec<DataQualityEvent>,
        metadata: RefreshMetadata,
    ) -> RefreshOutput {
        results.sort_by(|a, b| a.entity.id.cmp(&b.entity.id));

        let contexts = ContextIndex::build(
            results
                .iter()
                .filter_map(|r| r.stats.as_ref().map(|stats| (&r.entity, stats))),
        );

        let mut assessments: HashMap<&str, RiskAssessment> = HashMap::new();
        let mut entities = Vec::new();

        for result in &results {
            let Some(stats) = result.stats.as_ref() else {
                warn!(
                    "Entity {} has no daily history up to {}; excluded from daily risk",
                    result.entity.id, self.settings.reference_date
                );
                data_quality.push(DataQualityEvent::new(
                    result.entity.id.clone(),
                    format!(
                        "no daily history up to {}",
                        self.settings.reference_date
                    ),
                ));
                continue;
            };

            let entity_contexts = contexts.contexts_for(&result.entity);
            let assessment = self
                .classifier
                .classify(stats, &ContextMeans::from(&entity_contexts));
            debug!(
                "{}: {} via {} (max reduction {:.2})",
                result.entity.id, assessment.level, assessment.rule, assessment.max_reduction
            );

            entities.push(daily_row(result, stats, &assessment, entity_contexts));
            assessments.insert(result.entity.id.as_str(), assessment);
        }

        let mut recent_losses = Vec::new();
        let mut old_losses = Vec::new();
        for result in results.iter().filter(|r| r.loss.is_loss()) {
            let row = loss_row(result);
            match row.kind {
                LossKind::RecentLoss => recent_losses.push(row),
                LossKind::OldLoss => old_losses.push(row),
                LossKind::None => {}
            }
        }
        sort_losses(&mut recent_losses);
        sort_losses(&mut old_losses);

        let mut risk_list: Vec<RiskEntry> = results
            .iter()
            .filter(|r| !r.loss.is_loss())
            .filter_map(|r| {
                let reasons = risk_reasons(r, &self.settings);
                if reasons.is_empty() {
                    return None;
                }
                let assessment = assessments.get(r.entity.id.as_str());
                Some(RiskEntry {
                    entity: r.entity.clone(),
                    reasons,
                    severity: assessment.map(|a| a.level),
                    recovery: assessment.map_or(false, |a| a.recovery),
                    wow_pct: Some(r.latest_week.wow_pct),
                    days_since_last_collection: r.inactivity.map(|i| i.calendar_days),
                })
            })
            .collect();
        risk_list.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| a.entity.id.cmp(&b.entity.id))
        });

        let weekly = self.weekly_table(&results);
        let (monthly, monthly_total) = monthly_table(&results);

        let alerts = check_invariants(results.len(), &risk_list, &recent_losses, &old_losses);
        for alert in &alerts {
            error!("Invariant violation: {}", alert.message);
        }

        let mut summary = RefreshSummary {
            monitored: results.len(),
            stats_eligible: entities.len(),
            at_risk: risk_list.len(),
            recent_loss: recent_losses.len(),
            old_loss: old_losses.len(),
            alerts: alerts.len(),
            data_quality: data_quality.len(),
            ..Default::default()
        };
        summary.count_severities(&entities);

        RefreshOutput {
            metadata,
            summary,
            entities,
            risk_list,
            recent_losses,
            old_losses,
            weekly,
            monthly,
            monthly_total,
            alerts,
            data_quality,
        }
    }

    /// Population weekly evolution for the pass month.
    ///
    /// Every ISO week of the month is present; weeks whose Friday has not
    /// passed keep `closed = false`.
    fn weekly_table(&self, results: &[EntityResult]) -> Vec<WeeklyRecord> {
        let tables: Vec<Vec<WeeklyRecord>> =
            results.iter().map(|r| r.month_weeks.clone()).collect();

        combine_records(self.settings.month, self.settings.as_of, &tables)
    }
}

fn daily_row(
    result: &EntityResult,
    stats: &RollingStats,
    assessment: &RiskAssessment,
    contexts: EntityContexts,
) -> EntityDailyRow {
    EntityDailyRow {
        entity: result.entity.clone(),
        reference_date: stats.reference_date,
        today: stats.today,
        prev: stats.prev,
        mm7: stats.mm7,
        mm30: stats.mm30,
        mm90: stats.mm90,
        dow_avg: stats.dow_avg,
        pct_vs_prev: pct_change(stats.today, stats.prev),
        pct_vs_mm7: pct_change(stats.today, stats.mm7),
        pct_vs_mm30: pct_change(stats.today, stats.mm30),
        pct_vs_mm90: pct_change(stats.today, stats.mm90),
        max_reduction: assessment.max_reduction,
        severity: assessment.level,
        recovery: assessment.recovery,
        zero_streak: stats.zero_streak,
        drop50_streak: stats.drop50_streak,
        days_since_last_collection: result.inactivity.map(|i| i.calendar_days),
        wow_pct: Some(result.latest_week.wow_pct),
        contexts,
    }
}

/// Reasons an entity belongs on the risk list; empty when it does not.
///
/// The WoW rule looks at the latest closed week only. The inactivity rule
/// uses the tier's threshold in its own day unit.
pub fn risk_reasons(result: &EntityResult, settings: &PassSettings) -> Vec<RiskReason> {
    let mut reasons = Vec::new();

    let week = &result.latest_week;
    if week.closed && week.wow_pct <= -settings.wow_drop_pct {
        reasons.push(RiskReason::WowDrop {
            wow_pct: week.wow_pct,
        });
    }

    if let Some(inactivity) = result.inactivity.as_ref() {
        let rule = settings.inactivity.for_tier(result.entity.tier);
        if rule.reached_by(inactivity) {
            reasons.push(RiskReason::Inactivity {
                days: inactivity.in_unit(rule.unit),
                unit: rule.unit,
            });
        }
    }

    reasons
}

fn loss_row(result: &EntityResult) -> LossRow {
    LossRow {
        entity: result.entity.clone(),
        kind: result.loss.kind,
        last_collection_date: result.loss.last_collection_date,
        days_since: result.loss.days_since,
        avg_monthly_active: result.avg_monthly_active,
        peak: result.peak,
    }
}

/// Longest silence first.
fn sort_losses(rows: &mut [LossRow]) {
    rows.sort_by(|a, b| {
        b.days_since
            .cmp(&a.days_since)
            .then_with(|| a.entity.id.cmp(&b.entity.id))
    });
}

/// Per-entity monthly rows and the population total.
fn monthly_table(results: &[EntityResult]) -> (Vec<MonthlyRow>, MonthlyTotalRow) {
    let rows: Vec<MonthlyRow> = results
        .iter()
        .map(|r| MonthlyRow {
            entity: r.entity.clone(),
            baseline: r.baseline.clone(),
        })
        .collect();

    let baseline: f64 = rows.iter().map(|r| r.baseline.baseline).sum();
    let current: u64 = rows.iter().map(|r| r.baseline.current_month_volume).sum();

    let total = MonthlyTotalRow {
        baseline,
        current_month_volume: current,
        gap: baseline - current as f64,
        variance_pct: pct_change(current as f64, baseline),
    };

    (rows, total)
}

/// Check the set invariants between the risk list and the loss tables.
pub fn check_invariants(
    monitored: usize,
    risk_list: &[RiskEntry],
    recent: &[LossRow],
    old: &[LossRow],
) -> Vec<InvariantAlert> {
    let mut alerts = Vec::new();

    let risk_ids: HashSet<&str> = risk_list.iter().map(|e| e.entity.id.as_str()).collect();
    let recent_ids: HashSet<&str> = recent.iter().map(|r| r.entity.id.as_str()).collect();
    let old_ids: HashSet<&str> = old.iter().map(|r| r.entity.id.as_str()).collect();
    let loss_ids: HashSet<&str> = recent_ids.union(&old_ids).copied().collect();

    let risk_loss = sorted_ids(risk_ids.intersection(&loss_ids).copied());
    if !risk_loss.is_empty() {
        alerts.push(InvariantAlert {
            kind: AlertKind::RiskLossOverlap,
            message: format!(
                "{} entities appear in both the risk list and a loss table",
                risk_loss.len()
            ),
            entity_ids: risk_loss,
        });
    }

    let both_losses = sorted_ids(recent_ids.intersection(&old_ids).copied());
    if !both_losses.is_empty() {
        alerts.push(InvariantAlert {
            kind: AlertKind::LossOverlap,
            message: format!(
                "{} entities appear in both the recent and old loss tables",
                both_losses.len()
            ),
            entity_ids: both_losses,
        });
    }

    let union: HashSet<&str> = risk_ids.union(&loss_ids).copied().collect();
    if union.len() > monitored {
        alerts.push(InvariantAlert {
            kind: AlertKind::PopulationOverflow,
            message: format!(
                "risk and loss sets cover {} entities but only {} are monitored",
                union.len(),
                monitored
            ),
            entity_ids: sorted_ids(union.into_iter()),
        });
    }

    alerts
}

fn sorted_ids<'a>(ids: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut ids: Vec<String> = ids.map(str::to_string).collect();
    ids.sort();
    ids
}
