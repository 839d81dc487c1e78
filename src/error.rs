//! Domain error types.
//!
//! Snapshot decoding failures are scoped to a single entity wherever
//! possible; the batch pass turns them into data-quality events instead
//! of aborting.

use thiserror::Error;

/// Failures while reading or decoding a snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed snapshot JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP request for snapshot failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Snapshot source returned status {status}")]
    HttpStatus { status: u16 },

    #[error("Invalid day key '{key}' in year {year}")]
    InvalidDay { year: String, key: String },

    #[error("Invalid year key '{0}'")]
    InvalidYear(String),

    #[error("Invalid count on {date}: {value}")]
    InvalidCount { date: String, value: String },

    #[error("Invalid month key '{0}'")]
    InvalidMonth(String),

    #[error("Unknown size tier '{0}'")]
    UnknownTier(String),

    #[error("Daily counts must be an object keyed by year")]
    UnexpectedDailyShape,

    #[error("Entity record is missing '{0}'")]
    MissingField(&'static str),
}

/// Failures that prevent a refresh from producing any output.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Snapshot source unavailable and no cached result exists: {0}")]
    SourceUnavailable(#[from] SnapshotError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
