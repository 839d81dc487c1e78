//! ISO-week closing aggregation.

pub mod aggregator;

pub use aggregator::{combine_records, latest_closed_week, month_records, weekly_record, WeekKey};
