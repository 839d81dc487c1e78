//! Monthly baseline and gap computation.

pub mod baseline;

pub use baseline::{average_active_month, compute_baseline, historical_peak, BaselineSettings};
