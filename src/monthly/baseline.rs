//! Robust monthly baseline from the best historical months.
//!
//! The baseline is the mean of the top-N nonzero months strictly before the
//! month being closed. With no such months the baseline is 0 and the
//! variance is reported as undefined; the gap is still computed.

use crate::models::{pct_change, MonthPeak, MonthlyBaseline};
use crate::series::{DailySeries, MonthlyTotals, YearMonth};
use chrono::NaiveDate;

/// Tuning for the baseline calculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaselineSettings {
    /// Number of best historical months averaged into the baseline.
    pub top_n: usize,
    /// How many calendar years (ending at the closing month's year) report a peak.
    pub peak_years: usize,
}

impl Default for BaselineSettings {
    fn default() -> Self {
        Self {
            top_n: 3,
            peak_years: 2,
        }
    }
}

/// Compute the baseline for `month` as of `today`.
pub fn compute_baseline(
    totals: &MonthlyTotals,
    series: &DailySeries,
    month: YearMonth,
    today: NaiveDate,
    settings: BaselineSettings,
) -> MonthlyBaseline {
    let mut history: Vec<u64> = totals
        .before(month)
        .map(|(_, value)| value)
        .filter(|value| *value > 0)
        .collect();
    history.sort_unstable_by(|a, b| b.cmp(a));
    history.truncate(settings.top_n.max(1));

    let baseline = if history.is_empty() {
        0.0
    } else {
        history.iter().sum::<u64>() as f64 / history.len() as f64
    };

    let current_month_volume = current_month_volume(totals, series, month, today);
    let current = current_month_volume as f64;

    MonthlyBaseline {
        month,
        baseline,
        months_used: history.len(),
        current_month_volume,
        gap: baseline - current,
        variance_pct: pct_change(current, baseline),
        peaks: yearly_peaks(totals, month, settings.peak_years),
    }
}

/// Running total of `month` up to `today`.
///
/// Read from the daily series when it has entries for the month, otherwise
/// from the pre-aggregated total.
fn current_month_volume(
    totals: &MonthlyTotals,
    series: &DailySeries,
    month: YearMonth,
    today: NaiveDate,
) -> u64 {
    let start = month.first_day();
    let end = month.last_day().min(today);

    if series.has_data_between(start, end) {
        series.calendar_sum(start, end)
    } else if start <= today {
        totals.get(month).unwrap_or(0)
    } else {
        0
    }
}

/// Peak month of each tracked year, oldest year first. Years without activity are skipped.
fn yearly_peaks(totals: &MonthlyTotals, month: YearMonth, peak_years: usize) -> Vec<MonthPeak> {
    let first_year = month.year - peak_years.saturating_sub(1) as i32;

    (first_year..=month.year)
        .filter_map(|year| {
            peak_of(
                totals
                    .iter()
                    .filter(|(m, _)| m.year == year && *m <= month),
            )
        })
        .collect()
}

/// Highest nonzero month; the earliest month wins ties.
fn peak_of(months: impl Iterator<Item = (YearMonth, u64)>) -> Option<MonthPeak> {
    months
        .filter(|(_, value)| *value > 0)
        .fold(None, |best: Option<MonthPeak>, (month, value)| match best {
            Some(peak) if peak.value >= value => Some(peak),
            _ => Some(MonthPeak { month, value }),
        })
}

/// Highest monthly total across the whole history.
pub fn historical_peak(totals: &MonthlyTotals) -> Option<MonthPeak> {
    peak_of(totals.iter())
}

/// Mean of the nonzero monthly totals (average volume while active).
pub fn average_active_month(totals: &MonthlyTotals) -> f64 {
    let active: Vec<u64> = totals
        .iter()
        .map(|(_, value)| value)
        .filter(|value| *value > 0)
        .collect();

    if active.is_empty() {
        0.0
    } else {
        active.iter().sum::<u64>() as f64 / active.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ym(y: i32, m: u32) -> YearMonth {
        YearMonth::new(y, m).unwrap()
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn totals(values: &[(YearMonth, u64)]) -> MonthlyTotals {
        MonthlyTotals::new(values.iter().copied().collect())
    }

    #[test]
    fn test_baseline_of_three_months() {
        let t = totals(&[(ym(2025, 1), 100), (ym(2025, 2), 80), (ym(2025, 3), 60)]);
        let b = compute_baseline(
            &t,
            &DailySeries::new(),
            ym(2025, 4),
            d(2025, 4, 10),
            BaselineSettings::default(),
        );
        assert_eq!(b.baseline, 80.0);
        assert_eq!(b.months_used, 3);
    }

    #[test]
    fn test_baseline_uses_top_months_and_skips_zeros() {
        let t = totals(&[
            (ym(2024, 6), 10),
            (ym(2024, 7), 300),
            (ym(2024, 8), 0),
            (ym(2024, 9), 200),
            (ym(2025, 1), 100),
            (ym(2025, 2), 0),
        ]);
        let b = compute_baseline(
            &t,
            &DailySeries::new(),
            ym(2025, 3),
            d(2025, 3, 5),
            BaselineSettings::default(),
        );
        assert_eq!(b.baseline, 200.0);

        let two = BaselineSettings {
            top_n: 2,
            ..Default::default()
        };
        let b = compute_baseline(&t, &DailySeries::new(), ym(2025, 3), d(2025, 3, 5), two);
        assert_eq!(b.baseline, 250.0);
    }

    #[test]
    fn test_fewer_months_than_top_n() {
        let t = totals(&[(ym(2025, 1), 90)]);
        let b = compute_baseline(
            &t,
            &DailySeries::new(),
            ym(2025, 2),
            d(2025, 2, 3),
            BaselineSettings::default(),
        );
        assert_eq!(b.baseline, 90.0);
        assert_eq!(b.months_used, 1);
    }

    #[test]
    fn test_no_history_gives_undefined_variance() {
        let series = DailySeries::from_counts(vec![(d(2025, 3, 3), 12)]);
        let b = compute_baseline(
            &MonthlyTotals::default(),
            &series,
            ym(2025, 3),
            d(2025, 3, 10),
            BaselineSettings::default(),
        );
        assert_eq!(b.baseline, 0.0);
        assert_eq!(b.variance_pct, None);
        assert_eq!(b.gap, -12.0);
    }

    #[test]
    fn test_current_month_excludes_current_and_future_months_from_history() {
        let t = totals(&[(ym(2025, 2), 50), (ym(2025, 3), 500), (ym(2025, 4), 900)]);
        let series = DailySeries::from_counts(vec![
            (d(2025, 3, 3), 10),
            (d(2025, 3, 8), 5),
            (d(2025, 3, 20), 40),
        ]);
        let b = compute_baseline(&t, &series, ym(2025, 3), d(2025, 3, 10), BaselineSettings::default());

        assert_eq!(b.baseline, 50.0);
        // Only days up to today, weekends included
        assert_eq!(b.current_month_volume, 15);
        assert_eq!(b.gap, 35.0);
        assert!((b.variance_pct.unwrap() + 70.0).abs() < 1e-9);
    }

    #[test]
    fn test_current_month_falls_back_to_supplied_total() {
        let t = totals(&[(ym(2025, 2), 50), (ym(2025, 3), 20)]);
        let b = compute_baseline(
            &t,
            &DailySeries::new(),
            ym(2025, 3),
            d(2025, 3, 10),
            BaselineSettings::default(),
        );
        assert_eq!(b.current_month_volume, 20);
    }

    #[test]
    fn test_yearly_peaks() {
        let t = totals(&[
            (ym(2023, 5), 999),
            (ym(2024, 2), 70),
            (ym(2024, 9), 70),
            (ym(2025, 1), 30),
            (ym(2025, 2), 45),
            (ym(2025, 6), 500),
        ]);
        let b = compute_baseline(
            &t,
            &DailySeries::new(),
            ym(2025, 3),
            d(2025, 3, 10),
            BaselineSettings::default(),
        );
        assert_eq!(
            b.peaks,
            vec![
                MonthPeak { month: ym(2024, 2), value: 70 },
                MonthPeak { month: ym(2025, 2), value: 45 },
            ]
        );
    }

    #[test]
    fn test_loss_table_helpers() {
        let t = totals(&[(ym(2024, 1), 100), (ym(2024, 2), 0), (ym(2024, 3), 50)]);
        assert_eq!(average_active_month(&t), 75.0);
        assert_eq!(
            historical_peak(&t),
            Some(MonthPeak { month: ym(2024, 1), value: 100 })
        );
        assert_eq!(average_active_month(&MonthlyTotals::default()), 0.0);
        assert_eq!(historical_peak(&MonthlyTotals::default()), None);
    }
}
