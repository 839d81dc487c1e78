//! Per-entity evaluation and population aggregation.
//!
//! A refresh evaluates every entity independently ([`evaluate_entity`]),
//! then the [`AggregationOrchestrator`] builds contexts, classifies daily
//! risk and composes the output tables.

pub mod aggregator;
pub mod context;
pub mod entity;

pub use aggregator::AggregationOrchestrator;
pub use entity::{evaluate_entity, EntityResult, PassSettings};
