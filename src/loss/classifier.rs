//! Tier-aware loss buckets.
//!
//! An entity whose last nonzero collection is older than its tier's floor
//! is a loss: Recent up to `old_after_days`, Old beyond it. Below the floor
//! the entity stays in the risk/normal population.

use crate::models::{Inactivity, LossClassification, LossKind, SizeTier, TierDays, TierThresholds};
use crate::series::calendar::business_days_between;
use crate::series::DailySeries;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Day ranges for the loss buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LossRules {
    /// Calendar days after which a loss is Old.
    pub old_after_days: i64,
    /// Inactivity from which a tier counts as a Recent loss.
    pub recent_floor: TierThresholds,
}

impl Default for LossRules {
    fn default() -> Self {
        Self {
            old_after_days: 180,
            recent_floor: TierThresholds {
                small: TierDays::calendar(30),
                medium: TierDays::calendar(15),
                medium_large: TierDays::calendar(15),
                large: TierDays::business(5),
            },
        }
    }
}

/// Time since the last nonzero count on or before `reference`.
///
/// `None` when the entity never had a nonzero count.
pub fn inactivity_as_of(series: &DailySeries, reference: NaiveDate) -> Option<Inactivity> {
    let last = series.last_nonzero_on_or_before(reference)?;
    Some(Inactivity {
        last_collection_date: last,
        calendar_days: (reference - last).num_days(),
        business_days: business_days_between(last, reference),
    })
}

/// Classify an entity's loss bucket from its inactivity and tier.
pub fn classify_loss(
    inactivity: Option<&Inactivity>,
    tier: SizeTier,
    rules: &LossRules,
) -> LossClassification {
    let Some(current) = inactivity else {
        return LossClassification::none(None);
    };

    let kind = if current.calendar_days > rules.old_after_days {
        LossKind::OldLoss
    } else if rules.recent_floor.for_tier(tier).reached_by(current) {
        LossKind::RecentLoss
    } else {
        LossKind::None
    };

    LossClassification {
        kind,
        last_collection_date: Some(current.last_collection_date),
        days_since: Some(current.calendar_days),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn calendar_gap(days: i64) -> Inactivity {
        let reference = d(2025, 9, 19);
        let last = reference - Duration::days(days);
        Inactivity {
            last_collection_date: last,
            calendar_days: days,
            business_days: business_days_between(last, reference),
        }
    }

    #[test]
    fn test_small_tier_boundaries() {
        let rules = LossRules::default();
        let kind = |days| classify_loss(Some(&calendar_gap(days)), SizeTier::Small, &rules).kind;

        assert_eq!(kind(29), LossKind::None);
        assert_eq!(kind(30), LossKind::RecentLoss);
        assert_eq!(kind(180), LossKind::RecentLoss);
        assert_eq!(kind(181), LossKind::OldLoss);
    }

    #[test]
    fn test_medium_tiers_use_fifteen_days() {
        let rules = LossRules::default();
        for tier in [SizeTier::Medium, SizeTier::MediumLarge] {
            assert_eq!(
                classify_loss(Some(&calendar_gap(14)), tier, &rules).kind,
                LossKind::None
            );
            assert_eq!(
                classify_loss(Some(&calendar_gap(15)), tier, &rules).kind,
                LossKind::RecentLoss
            );
        }
    }

    #[test]
    fn test_large_tier_counts_business_days() {
        let rules = LossRules::default();
        let reference = d(2025, 9, 19); // Friday

        // Last collection Monday: four business days of silence
        let series = DailySeries::from_counts(vec![(d(2025, 9, 15), 30)]);
        let gap = inactivity_as_of(&series, reference).unwrap();
        assert_eq!(gap.business_days, 4);
        assert_eq!(
            classify_loss(Some(&gap), SizeTier::Large, &rules).kind,
            LossKind::None
        );

        // Previous Friday: five business days
        let series = DailySeries::from_counts(vec![(d(2025, 9, 12), 30)]);
        let gap = inactivity_as_of(&series, reference).unwrap();
        assert_eq!(gap.calendar_days, 7);
        let loss = classify_loss(Some(&gap), SizeTier::Large, &rules);
        assert_eq!(loss.kind, LossKind::RecentLoss);
        assert_eq!(loss.last_collection_date, Some(d(2025, 9, 12)));
        assert_eq!(loss.days_since, Some(7));
    }

    #[test]
    fn test_inactivity_ignores_trailing_zero_counts() {
        let series = DailySeries::from_counts(vec![
            (d(2025, 9, 1), 4),
            (d(2025, 9, 10), 0),
            (d(2025, 9, 19), 0),
        ]);
        let gap = inactivity_as_of(&series, d(2025, 9, 19)).unwrap();
        assert_eq!(gap.last_collection_date, d(2025, 9, 1));
        assert_eq!(gap.calendar_days, 18);
    }

    #[test]
    fn test_active_today_is_not_a_loss() {
        let series = DailySeries::from_counts(vec![(d(2025, 9, 19), 4)]);
        let gap = inactivity_as_of(&series, d(2025, 9, 19)).unwrap();
        assert_eq!(gap.calendar_days, 0);
        assert!(!classify_loss(Some(&gap), SizeTier::Large, &LossRules::default()).is_loss());
    }

    #[test]
    fn test_never_collected_is_not_a_loss() {
        let series = DailySeries::from_counts(vec![(d(2025, 9, 1), 0)]);
        assert!(inactivity_as_of(&series, d(2025, 9, 19)).is_none());

        let loss = classify_loss(None, SizeTier::Small, &LossRules::default());
        assert_eq!(loss.kind, LossKind::None);
        assert_eq!(loss.last_collection_date, None);
    }
}
