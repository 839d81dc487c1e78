//! Typed per-entity time series.
//!
//! Snapshot payloads are decoded into these structures once at the
//! ingestion boundary. Every downstream calculator reads from them and
//! never touches raw JSON again.

pub mod calendar;

pub use calendar::{is_business_day, reference_date, YearMonth};

use calendar::{business_days_back, next_business_day_on_or_after};
use chrono::NaiveDate;
use std::collections::BTreeMap;

/// Sparse daily counts for one entity, keyed by calendar date.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DailySeries {
    counts: BTreeMap<NaiveDate, u32>,
}

impl DailySeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a series from `(date, count)` pairs. Later duplicates overwrite earlier ones.
    pub fn from_counts<I>(counts: I) -> Self
    where
        I: IntoIterator<Item = (NaiveDate, u32)>,
    {
        Self {
            counts: counts.into_iter().collect(),
        }
    }

    /// Set the count for a date.
    pub fn insert(&mut self, date: NaiveDate, count: u32) {
        self.counts.insert(date, count);
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.counts.keys().next().copied()
    }

    /// Count recorded for a date (0 when absent).
    pub fn get(&self, date: NaiveDate) -> u32 {
        self.counts.get(&date).copied().unwrap_or(0)
    }

    /// Dense business-day values for `start..=end`, absent days filled with 0.
    ///
    /// The range is clipped to start at the first recorded date; nothing is
    /// emitted for days before the series begins.
    pub fn business_values(&self, start: NaiveDate, end: NaiveDate) -> Vec<u32> {
        let first = match self.first_date() {
            Some(first) => first,
            None => return Vec::new(),
        };

        let mut cur = next_business_day_on_or_after(start.max(first));
        if cur > end {
            return Vec::new();
        }

        let mut out = Vec::new();
        let mut recorded = self.counts.range(cur..=end).peekable();

        while cur <= end {
            while let Some((date, _)) = recorded.peek() {
                if **date < cur {
                    recorded.next();
                } else {
                    break;
                }
            }

            let value = match recorded.peek() {
                Some((date, count)) if **date == cur => **count,
                _ => 0,
            };
            out.push(value);

            cur = next_business_day_on_or_after(cur + chrono::Duration::days(1));
        }

        out
    }

    /// The last `k` business-day values ending at `end` (oldest first).
    ///
    /// Returns fewer than `k` values when the series starts later.
    pub fn window(&self, end: NaiveDate, k: usize) -> Vec<u32> {
        if k == 0 {
            return Vec::new();
        }
        let end = calendar::reference_date(end);
        let start = business_days_back(end, k - 1);
        self.business_values(start, end)
    }

    /// Sum of business-day counts within `start..=end`.
    pub fn business_sum(&self, start: NaiveDate, end: NaiveDate) -> u64 {
        if end < start {
            return 0;
        }
        self.counts
            .range(start..=end)
            .filter(|(date, _)| is_business_day(**date))
            .map(|(_, count)| u64::from(*count))
            .sum()
    }

    /// Sum of all recorded counts within `start..=end`, weekends included.
    pub fn calendar_sum(&self, start: NaiveDate, end: NaiveDate) -> u64 {
        if end < start {
            return 0;
        }
        self.counts
            .range(start..=end)
            .map(|(_, count)| u64::from(*count))
            .sum()
    }

    /// True when any day within `start..=end` was recorded, even with a zero count.
    pub fn has_data_between(&self, start: NaiveDate, end: NaiveDate) -> bool {
        end >= start && self.counts.range(start..=end).next().is_some()
    }

    /// Most recent date on or before `date` with a nonzero count.
    pub fn last_nonzero_on_or_before(&self, date: NaiveDate) -> Option<NaiveDate> {
        self.counts
            .range(..=date)
            .rev()
            .find(|(_, count)| **count > 0)
            .map(|(d, _)| *d)
    }

    /// Calendar-month totals derived from the recorded days.
    pub fn monthly_sums(&self) -> BTreeMap<YearMonth, u64> {
        let mut sums: BTreeMap<YearMonth, u64> = BTreeMap::new();
        for (date, count) in &self.counts {
            *sums.entry(YearMonth::of(*date)).or_default() += u64::from(*count);
        }
        sums
    }
}

/// Pre-aggregated monthly totals for one entity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonthlyTotals {
    totals: BTreeMap<YearMonth, u64>,
}

impl MonthlyTotals {
    pub fn new(totals: BTreeMap<YearMonth, u64>) -> Self {
        Self { totals }
    }

    /// Fill months absent from the supplied totals with sums derived from the daily series.
    pub fn backfill_from(&mut self, series: &DailySeries) {
        for (month, sum) in series.monthly_sums() {
            self.totals.entry(month).or_insert(sum);
        }
    }

    pub fn get(&self, month: YearMonth) -> Option<u64> {
        self.totals.get(&month).copied()
    }

    /// Months strictly before `month`, oldest first.
    pub fn before(&self, month: YearMonth) -> impl Iterator<Item = (YearMonth, u64)> + '_ {
        self.totals.range(..month).map(|(m, v)| (*m, *v))
    }

    pub fn iter(&self) -> impl Iterator<Item = (YearMonth, u64)> + '_ {
        self.totals.iter().map(|(m, v)| (*m, *v))
    }

    pub fn is_empty(&self) -> bool {
        self.totals.is_empty()
    }
}
