//! Business-day rolling means, day-of-week average and streak counters.
//!
//! The sparse series is reindexed onto the dense Mon–Fri calendar from its
//! first recorded date through the reference date, with absent days read
//! as zero. Windows shorter than requested use whatever history exists.

use super::mean;
use crate::models::RollingStats;
use crate::series::DailySeries;
use chrono::NaiveDate;

pub const MM_SHORT: usize = 7;
pub const MM_MEDIUM: usize = 30;
pub const MM_LONG: usize = 90;

/// Same-weekday observations used for the day-of-week average.
pub const DOW_OBSERVATIONS: usize = 90;

/// Trailing observations inspected by the drop-50 counter.
pub const DROP50_LOOKBACK: usize = 3;

/// Values kept for the recovery check (today plus three before it).
pub const RECENT_VALUES: usize = 4;

const BUSINESS_DAYS_PER_WEEK: usize = 5;

/// Compute rolling stats for `series` as of `reference`.
///
/// Returns `None` when the series has no business-day history up to the
/// reference date.
pub fn compute_rolling_stats(series: &DailySeries, reference: NaiveDate) -> Option<RollingStats> {
    let history = DOW_OBSERVATIONS * BUSINESS_DAYS_PER_WEEK;
    let values: Vec<f64> = series
        .window(reference, history)
        .into_iter()
        .map(f64::from)
        .collect();

    let n = values.len();
    let today = *values.last()?;
    let prev = if n >= 2 { values[n - 2] } else { 0.0 };

    Some(RollingStats {
        reference_date: reference,
        today,
        prev,
        mm7: trailing_mean(&values, MM_SHORT),
        mm30: trailing_mean(&values, MM_MEDIUM),
        mm90: trailing_mean(&values, MM_LONG),
        dow_avg: dow_average(&values),
        zero_streak: zero_streak(&values),
        drop50_streak: drop50_streak(&values),
        recent: values[n.saturating_sub(RECENT_VALUES)..].to_vec(),
    })
}

/// Mean of the last `min(window, len)` values.
fn trailing_mean(values: &[f64], window: usize) -> f64 {
    mean(&values[values.len().saturating_sub(window)..])
}

/// Mean of up to the last 90 values sharing the final value's weekday.
///
/// On a dense business-day calendar the same weekday recurs every fifth slot.
fn dow_average(values: &[f64]) -> f64 {
    let same_weekday: Vec<f64> = values
        .iter()
        .rev()
        .step_by(BUSINESS_DAYS_PER_WEEK)
        .take(DOW_OBSERVATIONS)
        .copied()
        .collect();
    mean(&same_weekday)
}

/// Consecutive zeros ending at the last value.
fn zero_streak(values: &[f64]) -> usize {
    values.iter().rev().take_while(|v| **v == 0.0).count()
}

/// Among the last three points, how many fell below half of the MM7 known at that point.
fn drop50_streak(values: &[f64]) -> usize {
    let n = values.len();
    (n.saturating_sub(DROP50_LOOKBACK)..n)
        .filter(|&i| {
            let mm7_then = trailing_mean(&values[..=i], MM_SHORT);
            values[i] < 0.5 * mm7_then
        })
        .count()
}
