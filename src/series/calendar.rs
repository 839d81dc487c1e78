//! Business-day and calendar-month helpers.

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Returns true for Monday through Friday.
pub fn is_business_day(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Most recent business day on or before `date`.
pub fn reference_date(date: NaiveDate) -> NaiveDate {
    let mut cur = date;
    while !is_business_day(cur) {
        cur -= Duration::days(1);
    }
    cur
}

/// Business day strictly before `date`.
pub fn previous_business_day(date: NaiveDate) -> NaiveDate {
    reference_date(date - Duration::days(1))
}

/// First business day on or after `date`.
pub fn next_business_day_on_or_after(date: NaiveDate) -> NaiveDate {
    let mut cur = date;
    while !is_business_day(cur) {
        cur += Duration::days(1);
    }
    cur
}

/// Walks `steps` business days back from `date` (which should itself be a business day).
pub fn business_days_back(date: NaiveDate, steps: usize) -> NaiveDate {
    let mut cur = date;
    for _ in 0..steps {
        cur = previous_business_day(cur);
    }
    cur
}

/// Number of business days in the half-open interval `(from, to]`.
///
/// Returns 0 when `to <= from`.
pub fn business_days_between(from: NaiveDate, to: NaiveDate) -> i64 {
    if to <= from {
        return 0;
    }

    let total_days = (to - from).num_days();
    let full_weeks = total_days / 7;
    let mut count = full_weeks * 5;

    let mut cur = from + Duration::days(full_weeks * 7);
    while cur < to {
        cur += Duration::days(1);
        if is_business_day(cur) {
            count += 1;
        }
    }

    count
}

/// A calendar month, ordered chronologically and rendered as `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    /// Create a month, returning `None` when `month` is outside 1..=12.
    pub fn new(year: i32, month: u32) -> Option<Self> {
        (1..=12).contains(&month).then_some(Self { year, month })
    }

    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    pub fn last_day(&self) -> NaiveDate {
        self.succ().first_day() - Duration::days(1)
    }

    pub fn succ(&self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for YearMonth {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (year, month) = s
            .trim()
            .split_once('-')
            .ok_or_else(|| format!("expected YYYY-MM, got '{}'", s))?;
        let year: i32 = year
            .parse()
            .map_err(|_| format!("invalid year in '{}'", s))?;
        let month: u32 = month
            .parse()
            .map_err(|_| format!("invalid month in '{}'", s))?;
        Self::new(year, month).ok_or_else(|| format!("month out of range in '{}'", s))
    }
}

impl From<YearMonth> for String {
    fn from(value: YearMonth) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for YearMonth {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
