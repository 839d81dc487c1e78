//! Daily risk classification.
//!
//! This module turns an entity's rolling stats and the rolling means of its
//! geography contexts into a discrete severity.

pub mod classifier;

pub use classifier::{ContextMeans, RiskClassifier, RiskThresholds};
