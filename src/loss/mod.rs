//! Recent/old loss classification.

pub mod classifier;

pub use classifier::{classify_loss, inactivity_as_of, LossRules};
