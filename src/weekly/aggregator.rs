//! Week-over-week aggregation over business days.
//!
//! Volumes are Mon–Fri sums inside an ISO week. A week is closed once its
//! Friday is strictly before "today"; open weeks are kept but flagged.

use crate::models::WeeklyRecord;
use crate::series::{is_business_day, DailySeries, YearMonth};
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use std::collections::BTreeMap;

/// An ISO (year, week) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WeekKey {
    pub iso_year: i32,
    pub iso_week: u32,
}

impl WeekKey {
    pub fn of(date: NaiveDate) -> Self {
        let iso = date.iso_week();
        Self {
            iso_year: iso.year(),
            iso_week: iso.week(),
        }
    }

    pub fn monday(&self) -> NaiveDate {
        NaiveDate::from_isoywd_opt(self.iso_year, self.iso_week, Weekday::Mon)
            .unwrap_or(NaiveDate::MIN)
    }

    pub fn friday(&self) -> NaiveDate {
        self.monday() + Duration::days(4)
    }

    /// The immediately preceding ISO week, across year boundaries.
    pub fn previous(&self) -> Self {
        Self::of(self.monday() - Duration::days(7))
    }

    pub fn label(&self) -> String {
        format!("W{:02}/{}", self.iso_week, self.iso_year)
    }

    pub fn is_closed(&self, today: NaiveDate) -> bool {
        self.friday() < today
    }
}

/// Week-over-week change in percent.
///
/// With no previous volume the change is 0 for an empty week and 100 otherwise.
pub fn wow_pct(current: u64, previous: u64) -> f64 {
    if previous > 0 {
        (current as f64 - previous as f64) / previous as f64 * 100.0
    } else if current == 0 {
        0.0
    } else {
        100.0
    }
}

/// Business-day volume of one ISO week.
pub fn week_volume(series: &DailySeries, week: WeekKey) -> u64 {
    series.business_sum(week.monday(), week.friday())
}

/// Build the record for `week`.
///
/// The previous week's volume comes from the series when the series covers
/// that week; otherwise `previous_fallback` (a precomputed upstream value)
/// is used.
pub fn weekly_record(
    series: &DailySeries,
    week: WeekKey,
    today: NaiveDate,
    previous_fallback: Option<u64>,
) -> WeeklyRecord {
    let previous_week = week.previous();
    let covers_previous = series
        .first_date()
        .map(|first| first <= previous_week.friday())
        .unwrap_or(false);

    let volume_current = week_volume(series, week);
    let volume_previous = if covers_previous {
        week_volume(series, previous_week)
    } else {
        previous_fallback.unwrap_or(0)
    };

    make_record(week, volume_current, volume_previous, today)
}

fn make_record(week: WeekKey, current: u64, previous: u64, today: NaiveDate) -> WeeklyRecord {
    WeeklyRecord {
        label: week.label(),
        iso_year: week.iso_year,
        iso_week: week.iso_week,
        start: week.monday(),
        end: week.friday(),
        volume_current: current,
        volume_previous: previous,
        wow_pct: wow_pct(current, previous),
        closed: week.is_closed(today),
    }
}

/// ISO weeks having at least one business day inside `month`, in order.
pub fn weeks_in_month(month: YearMonth) -> Vec<WeekKey> {
    let mut weeks: Vec<WeekKey> = Vec::new();
    let mut cur = month.first_day();
    let last = month.last_day();

    while cur <= last {
        if is_business_day(cur) {
            let week = WeekKey::of(cur);
            if weeks.last() != Some(&week) {
                weeks.push(week);
            }
        }
        cur += Duration::days(1);
    }

    weeks
}

/// One record per ISO week intersecting `month`, whether or not the series has data for it.
///
/// `previous_fallback` pairs the upstream previous-week volume with the week it belongs to;
/// other weeks never borrow it.
pub fn month_records(
    series: &DailySeries,
    month: YearMonth,
    today: NaiveDate,
    previous_fallback: Option<(WeekKey, u64)>,
) -> Vec<WeeklyRecord> {
    weeks_in_month(month)
        .into_iter()
        .map(|week| {
            let fallback = previous_fallback
                .filter(|(target, _)| *target == week)
                .map(|(_, volume)| volume);
            weekly_record(series, week, today, fallback)
        })
        .collect()
}

/// Most recent week that is closed as of `today`.
pub fn latest_closed_week(today: NaiveDate) -> WeekKey {
    let week = WeekKey::of(today);
    if week.is_closed(today) {
        week
    } else {
        week.previous()
    }
}

/// Sum per-entity tables into one population table covering `month`.
///
/// Weeks are taken from the calendar, so the result has one row per ISO
/// week of the month even when `tables` is empty.
pub fn combine_records(
    month: YearMonth,
    today: NaiveDate,
    tables: &[Vec<WeeklyRecord>],
) -> Vec<WeeklyRecord> {
    let mut sums: BTreeMap<(i32, u32), (u64, u64)> = BTreeMap::new();
    for record in tables.iter().flatten() {
        let entry = sums.entry((record.iso_year, record.iso_week)).or_default();
        entry.0 += record.volume_current;
        entry.1 += record.volume_previous;
    }

    weeks_in_month(month)
        .into_iter()
        .map(|week| {
            let (current, previous) = sums
                .get(&(week.iso_year, week.iso_week))
                .copied()
                .unwrap_or((0, 0));
            make_record(week, current, previous, today)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_wow_pct_edge_cases() {
        assert_eq!(wow_pct(0, 0), 0.0);
        assert_eq!(wow_pct(10, 0), 100.0);
        assert_eq!(wow_pct(50, 100), -50.0);
        assert_eq!(wow_pct(150, 100), 50.0);
    }

    #[test]
    fn test_previous_week_crosses_year_boundary() {
        // 2026-01-01 (Thursday) is in ISO week 1 of 2026
        let week = WeekKey::of(d(2026, 1, 1));
        assert_eq!(week, WeekKey { iso_year: 2026, iso_week: 1 });
        assert_eq!(week.monday(), d(2025, 12, 29));

        let prev = week.previous();
        assert_eq!(prev, WeekKey { iso_year: 2025, iso_week: 52 });
        assert_eq!(prev.friday(), d(2025, 12, 26));
    }

    #[test]
    fn test_week_volume_ignores_weekend() {
        let series = DailySeries::from_counts(vec![
            (d(2025, 9, 15), 10),
            (d(2025, 9, 19), 5),
            (d(2025, 9, 20), 99),
        ]);
        assert_eq!(week_volume(&series, WeekKey::of(d(2025, 9, 17))), 15);
    }

    #[test]
    fn test_weekly_record_from_series() {
        let series = DailySeries::from_counts(vec![
            (d(2025, 9, 8), 40),
            (d(2025, 9, 15), 10),
            (d(2025, 9, 16), 10),
        ]);
        let record = weekly_record(&series, WeekKey::of(d(2025, 9, 15)), d(2025, 9, 22), Some(999));

        assert_eq!(record.volume_current, 20);
        assert_eq!(record.volume_previous, 40);
        assert_eq!(record.wow_pct, -50.0);
        assert!(record.closed);
        assert_eq!(record.label, "W38/2025");
        assert_eq!(record.start, d(2025, 9, 15));
        assert_eq!(record.end, d(2025, 9, 19));
    }

    #[test]
    fn test_weekly_record_falls_back_when_previous_week_not_covered() {
        let series = DailySeries::from_counts(vec![(d(2025, 9, 15), 10)]);
        let week = WeekKey::of(d(2025, 9, 15));

        let record = weekly_record(&series, week, d(2025, 9, 17), Some(40));
        assert_eq!(record.volume_previous, 40);
        assert_eq!(record.wow_pct, -75.0);
        assert!(!record.closed);

        let record = weekly_record(&series, week, d(2025, 9, 17), None);
        assert_eq!(record.volume_previous, 0);
        assert_eq!(record.wow_pct, 100.0);
    }

    #[test]
    fn test_closed_requires_friday_strictly_before_today() {
        let week = WeekKey::of(d(2025, 9, 15));
        assert!(!week.is_closed(d(2025, 9, 19)));
        assert!(week.is_closed(d(2025, 9, 20)));
    }

    #[test]
    fn test_month_backfills_missing_weeks() {
        // September 2025 touches ISO weeks 36..=40
        let series = DailySeries::from_counts(vec![
            (d(2025, 9, 2), 5),
            (d(2025, 9, 10), 7),
            (d(2025, 9, 23), 9),
        ]);
        let month = YearMonth::new(2025, 9).unwrap();
        let records = month_records(&series, month, d(2025, 9, 24), None);

        assert_eq!(records.len(), 5);
        let weeks: Vec<u32> = records.iter().map(|r| r.iso_week).collect();
        assert_eq!(weeks, vec![36, 37, 38, 39, 40]);

        let empty: Vec<&WeeklyRecord> = records.iter().filter(|r| r.volume_current == 0).collect();
        assert_eq!(empty.len(), 2);
        // Week 38 is missing data but its Friday has passed; week 40 has not
        assert!(empty[0].closed);
        assert_eq!(empty[0].iso_week, 38);
        assert!(!empty[1].closed);
        assert_eq!(empty[1].iso_week, 40);
    }

    #[test]
    fn test_weeks_in_month_skips_weekend_only_overlap() {
        // November 2025 starts on a Saturday; ISO week 44 only overlaps on the weekend
        let weeks = weeks_in_month(YearMonth::new(2025, 11).unwrap());
        assert_eq!(weeks.first().map(|w| w.iso_week), Some(45));
    }

    #[test]
    fn test_month_fallback_only_for_its_week() {
        let series = DailySeries::from_counts(vec![(d(2025, 9, 15), 10)]);
        let month = YearMonth::new(2025, 9).unwrap();
        let target = WeekKey::of(d(2025, 9, 15));
        let records = month_records(&series, month, d(2025, 10, 1), Some((target, 40)));

        let w38 = records.iter().find(|r| r.iso_week == 38).unwrap();
        assert_eq!(w38.volume_previous, 40);
        let w37 = records.iter().find(|r| r.iso_week == 37).unwrap();
        assert_eq!(w37.volume_previous, 0);
    }

    #[test]
    fn test_latest_closed_week() {
        // Wednesday: current week still open
        assert_eq!(latest_closed_week(d(2025, 9, 17)).iso_week, 37);
        // Saturday: the week that just ended is closed
        assert_eq!(latest_closed_week(d(2025, 9, 20)).iso_week, 38);
    }

    #[test]
    fn test_combine_records_sums_entities() {
        let month = YearMonth::new(2025, 9).unwrap();
        let today = d(2025, 10, 1);
        let a = DailySeries::from_counts(vec![(d(2025, 9, 8), 10), (d(2025, 9, 15), 5)]);
        let b = DailySeries::from_counts(vec![(d(2025, 9, 8), 30), (d(2025, 9, 16), 15)]);

        let tables = vec![
            month_records(&a, month, today, None),
            month_records(&b, month, today, None),
        ];
        let combined = combine_records(month, today, &tables);

        assert_eq!(combined.len(), 5);
        let w38 = combined.iter().find(|r| r.iso_week == 38).unwrap();
        assert_eq!(w38.volume_current, 20);
        assert_eq!(w38.volume_previous, 40);
        assert_eq!(w38.wow_pct, -50.0);

        assert_eq!(combine_records(month, today, &[]).len(), 5);
    }
}
