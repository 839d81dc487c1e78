//! Data models for the churn engine.
//!
//! This module contains the core data structures shared by the
//! calculators, the orchestrator and the report generator.

use crate::series::YearMonth;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Size tier of a laboratory, derived upstream from its historical monthly volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeTier {
    Small,
    Medium,
    MediumLarge,
    Large,
}

impl SizeTier {
    pub const ALL: [SizeTier; 4] = [
        SizeTier::Small,
        SizeTier::Medium,
        SizeTier::MediumLarge,
        SizeTier::Large,
    ];
}

impl fmt::Display for SizeTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SizeTier::Small => write!(f, "Small"),
            SizeTier::Medium => write!(f, "Medium"),
            SizeTier::MediumLarge => write!(f, "Medium/Large"),
            SizeTier::Large => write!(f, "Large"),
        }
    }
}

impl FromStr for SizeTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| match c {
                'é' | 'è' | 'ê' => 'e',
                ' ' | '-' | '/' => '_',
                other => other,
            })
            .collect();

        match normalized.as_str() {
            "small" | "pequeno" | "p" => Ok(SizeTier::Small),
            "medium" | "medio" | "m" => Ok(SizeTier::Medium),
            "medium_large" | "mediumlarge" | "medio_grande" | "mg" => Ok(SizeTier::MediumLarge),
            "large" | "grande" | "g" => Ok(SizeTier::Large),
            _ => Err(format!("unknown size tier '{}'", s)),
        }
    }
}

/// A monitored laboratory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub tier: SizeTier,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub country: String,
}

/// Daily risk severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// No reduction against any context
    Normal,
    /// Some reduction, below the moderate threshold
    Attention,
    /// Reduction at or above the moderate threshold
    Moderate,
    /// Reduction at or above the high threshold
    High,
    /// A hard trigger fired (absolute zero, long zero streak, repeated halving)
    Critical,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Normal => write!(f, "Normal"),
            RiskLevel::Attention => write!(f, "Attention"),
            RiskLevel::Moderate => write!(f, "Moderate"),
            RiskLevel::High => write!(f, "High"),
            RiskLevel::Critical => write!(f, "Critical"),
        }
    }
}

impl RiskLevel {
    pub const ALL: [RiskLevel; 5] = [
        RiskLevel::Normal,
        RiskLevel::Attention,
        RiskLevel::Moderate,
        RiskLevel::High,
        RiskLevel::Critical,
    ];

    /// Returns an emoji representation of the severity.
    pub fn emoji(&self) -> &'static str {
        match self {
            RiskLevel::Normal => "🟢",
            RiskLevel::Attention => "🔵",
            RiskLevel::Moderate => "🟡",
            RiskLevel::High => "🟠",
            RiskLevel::Critical => "🔴",
        }
    }
}

/// How a day threshold is counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayUnit {
    Calendar,
    Business,
}

impl fmt::Display for DayUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DayUnit::Calendar => write!(f, "calendar days"),
            DayUnit::Business => write!(f, "business days"),
        }
    }
}

/// A day count threshold together with the unit it is measured in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierDays {
    pub days: i64,
    #[serde(default = "default_unit")]
    pub unit: DayUnit,
}

fn default_unit() -> DayUnit {
    DayUnit::Calendar
}

impl TierDays {
    pub const fn calendar(days: i64) -> Self {
        Self {
            days,
            unit: DayUnit::Calendar,
        }
    }

    pub const fn business(days: i64) -> Self {
        Self {
            days,
            unit: DayUnit::Business,
        }
    }

    /// Largest number of calendar days the threshold can span.
    ///
    /// Each started run of five business days may straddle one weekend.
    pub fn max_calendar_days(&self) -> i64 {
        match self.unit {
            DayUnit::Calendar => self.days,
            DayUnit::Business => self.days + 2 * ((self.days.max(0) + 4) / 5),
        }
    }

    /// Picks the matching elapsed count and compares it with the threshold.
    pub fn reached_by(&self, inactivity: &Inactivity) -> bool {
        inactivity.in_unit(self.unit) >= self.days
    }
}

/// One day threshold per size tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierThresholds {
    pub small: TierDays,
    pub medium: TierDays,
    pub medium_large: TierDays,
    pub large: TierDays,
}

impl TierThresholds {
    pub fn for_tier(&self, tier: SizeTier) -> TierDays {
        match tier {
            SizeTier::Small => self.small,
            SizeTier::Medium => self.medium,
            SizeTier::MediumLarge => self.medium_large,
            SizeTier::Large => self.large,
        }
    }

    /// Iterate `(tier, threshold)` pairs in tier order.
    pub fn iter(&self) -> impl Iterator<Item = (SizeTier, TierDays)> + '_ {
        SizeTier::ALL.into_iter().map(|tier| (tier, self.for_tier(tier)))
    }
}

/// Time elapsed since an entity's last nonzero collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inactivity {
    pub last_collection_date: NaiveDate,
    pub calendar_days: i64,
    pub business_days: i64,
}

impl Inactivity {
    pub fn in_unit(&self, unit: DayUnit) -> i64 {
        match unit {
            DayUnit::Calendar => self.calendar_days,
            DayUnit::Business => self.business_days,
        }
    }
}

/// Rolling statistics for one entity as of a reference date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollingStats {
    pub reference_date: NaiveDate,
    pub today: f64,
    pub prev: f64,
    pub mm7: f64,
    pub mm30: f64,
    pub mm90: f64,
    pub dow_avg: f64,
    pub zero_streak: usize,
    pub drop50_streak: usize,
    /// Up to the last four business-day values, oldest first.
    pub recent: Vec<f64>,
}

/// Outcome of the daily risk classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub level: RiskLevel,
    pub max_reduction: f64,
    pub absolute_zero: bool,
    pub recovery: bool,
    /// Name of the rule that decided the level.
    pub rule: String,
}

/// One ISO week of business-day volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyRecord {
    pub label: String,
    pub iso_year: i32,
    pub iso_week: u32,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub volume_current: u64,
    pub volume_previous: u64,
    pub wow_pct: f64,
    pub closed: bool,
}

/// Peak month within a tracked year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthPeak {
    pub month: YearMonth,
    pub value: u64,
}

/// Monthly baseline and the current month's position against it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyBaseline {
    pub month: YearMonth,
    pub baseline: f64,
    pub months_used: usize,
    pub current_month_volume: u64,
    pub gap: f64,
    pub variance_pct: Option<f64>,
    pub peaks: Vec<MonthPeak>,
}

/// Loss bucket of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossKind {
    None,
    RecentLoss,
    OldLoss,
}

impl fmt::Display for LossKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LossKind::None => write!(f, "None"),
            LossKind::RecentLoss => write!(f, "Recent loss"),
            LossKind::OldLoss => write!(f, "Old loss"),
        }
    }
}

/// Loss classification of an entity for one refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LossClassification {
    pub kind: LossKind,
    pub last_collection_date: Option<NaiveDate>,
    pub days_since: Option<i64>,
}

impl LossClassification {
    pub fn none(inactivity: Option<&Inactivity>) -> Self {
        Self {
            kind: LossKind::None,
            last_collection_date: inactivity.map(|i| i.last_collection_date),
            days_since: inactivity.map(|i| i.calendar_days),
        }
    }

    /// True for Recent and Old losses.
    pub fn is_loss(&self) -> bool {
        self.kind != LossKind::None
    }
}

/// Rolling means of one geography context.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContextAggregate {
    pub mm7: f64,
    pub mm30: f64,
    /// Entities with rolling stats in the context.
    pub members: usize,
}

/// The geography contexts an entity belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityContexts {
    pub country: Option<ContextAggregate>,
    pub state: Option<ContextAggregate>,
    pub city: Option<ContextAggregate>,
}

/// Per-entity daily output row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityDailyRow {
    #[serde(flatten)]
    pub entity: Entity,
    pub reference_date: NaiveDate,
    pub today: f64,
    pub prev: f64,
    pub mm7: f64,
    pub mm30: f64,
    pub mm90: f64,
    pub dow_avg: f64,
    pub pct_vs_prev: Option<f64>,
    pub pct_vs_mm7: Option<f64>,
    pub pct_vs_mm30: Option<f64>,
    pub pct_vs_mm90: Option<f64>,
    pub max_reduction: f64,
    pub severity: RiskLevel,
    pub recovery: bool,
    pub zero_streak: usize,
    pub drop50_streak: usize,
    pub days_since_last_collection: Option<i64>,
    pub wow_pct: Option<f64>,
    pub contexts: EntityContexts,
}

/// Why an entity was placed in the risk list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RiskReason {
    WowDrop { wow_pct: f64 },
    Inactivity { days: i64, unit: DayUnit },
}

impl fmt::Display for RiskReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskReason::WowDrop { wow_pct } => write!(f, "WoW {:.1}%", wow_pct),
            RiskReason::Inactivity { days, unit } => {
                write!(f, "{} {} without collection", days, unit)
            }
        }
    }
}

/// An entity in the "at risk" list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskEntry {
    #[serde(flatten)]
    pub entity: Entity,
    pub reasons: Vec<RiskReason>,
    pub severity: Option<RiskLevel>,
    pub recovery: bool,
    pub wow_pct: Option<f64>,
    pub days_since_last_collection: Option<i64>,
}

/// A row in the recent/old loss tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LossRow {
    #[serde(flatten)]
    pub entity: Entity,
    pub kind: LossKind,
    pub last_collection_date: Option<NaiveDate>,
    pub days_since: Option<i64>,
    pub avg_monthly_active: f64,
    pub peak: Option<MonthPeak>,
}

/// A row in the monthly closing table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonthlyRow {
    #[serde(flatten)]
    pub entity: Entity,
    pub baseline: MonthlyBaseline,
}

/// Population totals of the monthly closing table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonthlyTotalRow {
    pub baseline: f64,
    pub current_month_volume: u64,
    pub gap: f64,
    pub variance_pct: Option<f64>,
}

/// An entity excluded from stats-dependent outputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataQualityEvent {
    pub entity_id: String,
    pub reason: String,
}

impl DataQualityEvent {
    pub fn new(entity_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            reason: reason.into(),
        }
    }
}

/// Kind of aggregation invariant violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Risk and loss lists together exceed the monitored population.
    PopulationOverflow,
    /// An entity appears in both the risk list and a loss table.
    RiskLossOverlap,
    /// An entity appears in both loss tables.
    LossOverlap,
}

/// An invariant violation surfaced for investigation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvariantAlert {
    pub kind: AlertKind,
    pub message: String,
    pub entity_ids: Vec<String>,
}

/// Counts describing one refresh.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RefreshSummary {
    pub monitored: usize,
    pub stats_eligible: usize,
    pub normal: usize,
    pub attention: usize,
    pub moderate: usize,
    pub high: usize,
    pub critical: usize,
    pub at_risk: usize,
    pub recent_loss: usize,
    pub old_loss: usize,
    pub alerts: usize,
    pub data_quality: usize,
}

impl RefreshSummary {
    /// Tally severities from the per-entity rows.
    pub fn count_severities(&mut self, rows: &[EntityDailyRow]) {
        for row in rows {
            match row.severity {
                RiskLevel::Normal => self.normal += 1,
                RiskLevel::Attention => self.attention += 1,
                RiskLevel::Moderate => self.moderate += 1,
                RiskLevel::High => self.high += 1,
                RiskLevel::Critical => self.critical += 1,
            }
        }
    }
}

/// Metadata about one refresh pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshMetadata {
    /// Description of the snapshot source.
    pub source: String,
    /// When this pass was computed.
    pub computed_at: DateTime<Utc>,
    /// When the upstream snapshot was produced, if it says so.
    pub snapshot_generated_at: Option<DateTime<Utc>>,
    pub as_of: NaiveDate,
    pub reference_date: NaiveDate,
    pub month: YearMonth,
    pub segment: Option<String>,
    /// True when served from an expired cache entry because the source failed.
    pub stale: bool,
    pub duration_seconds: f64,
}

/// Everything one refresh pass produces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshOutput {
    pub metadata: RefreshMetadata,
    pub summary: RefreshSummary,
    pub entities: Vec<EntityDailyRow>,
    pub risk_list: Vec<RiskEntry>,
    pub recent_losses: Vec<LossRow>,
    pub old_losses: Vec<LossRow>,
    pub weekly: Vec<WeeklyRecord>,
    pub monthly: Vec<MonthlyRow>,
    pub monthly_total: MonthlyTotalRow,
    pub alerts: Vec<InvariantAlert>,
    pub data_quality: Vec<DataQualityEvent>,
}

/// Percentage change of `value` against `reference`, `None` when the reference is not positive.
pub fn pct_change(value: f64, reference: f64) -> Option<f64> {
    if reference > 0.0 {
        Some((value - reference) / reference * 100.0)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_level_ordering() {
        assert!(RiskLevel::Normal < RiskLevel::Attention);
        assert!(RiskLevel::Attention < RiskLevel::Moderate);
        assert!(RiskLevel::Moderate < RiskLevel::High);
        assert!(RiskLevel::High < RiskLevel::Critical);
    }

    #[test]
    fn test_risk_level_emoji() {
        assert_eq!(RiskLevel::Critical.emoji(), "🔴");
        assert_eq!(RiskLevel::Normal.emoji(), "🟢");
    }

    #[test]
    fn test_size_tier_from_str() {
        assert_eq!("small".parse::<SizeTier>(), Ok(SizeTier::Small));
        assert_eq!("Pequeno".parse::<SizeTier>(), Ok(SizeTier::Small));
        assert_eq!("MÉDIO".parse::<SizeTier>(), Ok(SizeTier::Medium));
        assert_eq!("Médio/Grande".parse::<SizeTier>(), Ok(SizeTier::MediumLarge));
        assert_eq!("medium_large".parse::<SizeTier>(), Ok(SizeTier::MediumLarge));
        assert_eq!("GRANDE".parse::<SizeTier>(), Ok(SizeTier::Large));
        assert!("huge".parse::<SizeTier>().is_err());
    }

    #[test]
    fn test_max_calendar_days() {
        assert_eq!(TierDays::calendar(30).max_calendar_days(), 30);
        assert_eq!(TierDays::business(1).max_calendar_days(), 3);
        assert_eq!(TierDays::business(5).max_calendar_days(), 7);
        assert_eq!(TierDays::business(6).max_calendar_days(), 10);
    }

    #[test]
    fn test_tier_days_respects_unit() {
        let inactivity = Inactivity {
            last_collection_date: NaiveDate::from_ymd_opt(2025, 9, 5).unwrap(),
            calendar_days: 10,
            business_days: 6,
        };
        assert!(TierDays::calendar(10).reached_by(&inactivity));
        assert!(!TierDays::business(7).reached_by(&inactivity));
        assert!(TierDays::business(5).reached_by(&inactivity));
    }

    #[test]
    fn test_pct_change() {
        assert_eq!(pct_change(50.0, 100.0), Some(-50.0));
        assert_eq!(pct_change(10.0, 0.0), None);
    }

    #[test]
    fn test_risk_reason_display() {
        let reason = RiskReason::Inactivity {
            days: 3,
            unit: DayUnit::Business,
        };
        assert_eq!(reason.to_string(), "3 business days without collection");
    }
}
