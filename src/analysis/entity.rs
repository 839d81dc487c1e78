//! Per-entity evaluation.
//!
//! Everything here depends on one entity's data only, so the refresh pass
//! can run it on any number of workers in any order.

use crate::config::Config;
use crate::loss::{classify_loss, inactivity_as_of, LossRules};
use crate::models::{
    Entity, Inactivity, LossClassification, MonthPeak, MonthlyBaseline, RollingStats,
    TierThresholds, WeeklyRecord,
};
use crate::monthly::{average_active_month, compute_baseline, historical_peak, BaselineSettings};
use crate::risk::RiskThresholds;
use crate::series::{reference_date, YearMonth};
use crate::snapshot::LoadedEntity;
use crate::stats::compute_rolling_stats;
use crate::weekly::{latest_closed_week, month_records, weekly_record};
use chrono::NaiveDate;

/// Settings shared by every computation of one refresh pass.
#[derive(Debug, Clone, PartialEq)]
pub struct PassSettings {
    /// "Today" for closing weeks and month-to-date volume.
    pub as_of: NaiveDate,
    /// Latest business day on or before `as_of`.
    pub reference_date: NaiveDate,
    /// Month covered by the weekly and monthly tables.
    pub month: YearMonth,
    pub risk: RiskThresholds,
    pub wow_drop_pct: f64,
    pub inactivity: TierThresholds,
    pub loss: LossRules,
    pub baseline: BaselineSettings,
}

impl PassSettings {
    /// Settings for a pass as of `as_of`; `month` defaults to the reference date's month.
    pub fn from_config(config: &Config, as_of: NaiveDate, month: Option<YearMonth>) -> Self {
        let reference = reference_date(as_of);
        Self {
            as_of,
            reference_date: reference,
            month: month.unwrap_or_else(|| YearMonth::of(reference)),
            risk: RiskThresholds::from(&config.risk),
            wow_drop_pct: config.risk.wow_drop_pct,
            inactivity: config.risk.inactivity,
            loss: config.loss,
            baseline: BaselineSettings::from(&config.baseline),
        }
    }
}

/// Everything computed for one entity before population-level aggregation.
#[derive(Debug, Clone)]
pub struct EntityResult {
    pub entity: Entity,
    /// `None` when the entity has no daily history up to the reference date.
    pub stats: Option<RollingStats>,
    pub inactivity: Option<Inactivity>,
    pub loss: LossClassification,
    /// The most recent closed ISO week.
    pub latest_week: WeeklyRecord,
    /// One record per ISO week of the pass month.
    pub month_weeks: Vec<WeeklyRecord>,
    pub baseline: MonthlyBaseline,
    pub avg_monthly_active: f64,
    pub peak: Option<MonthPeak>,
}

/// Evaluate one entity.
pub fn evaluate_entity(loaded: &LoadedEntity, settings: &PassSettings) -> EntityResult {
    let series = &loaded.series;
    let reference = settings.reference_date;

    let stats = compute_rolling_stats(series, reference);
    let inactivity = inactivity_as_of(series, reference);
    let loss = classify_loss(inactivity.as_ref(), loaded.entity.tier, &settings.loss);

    let closed_week = latest_closed_week(settings.as_of);
    let latest_week = weekly_record(
        series,
        closed_week,
        settings.as_of,
        loaded.previous_week_volume,
    );
    let month_weeks = month_records(
        series,
        settings.month,
        settings.as_of,
        loaded.previous_week_volume.map(|volume| (closed_week, volume)),
    );

    let baseline = compute_baseline(
        &loaded.totals,
        series,
        settings.month,
        settings.as_of,
        settings.baseline,
    );

    EntityResult {
        entity: loaded.entity.clone(),
        stats,
        inactivity,
        loss,
        latest_week,
        month_weeks,
        baseline,
        avg_monthly_active: average_active_month(&loaded.totals),
        peak: historical_peak(&loaded.totals),
    }
}
