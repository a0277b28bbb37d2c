//! Error types for the rollup engine
//!
//! Data-quality problems (bad timestamps, blank labels) are never errors; they are
//! filtered by the normalizer and counted. Everything here is either a malformed
//! input document, bad configuration, or a programming mistake.

use thiserror::Error;

/// Errors that can occur while building rollup tables
#[derive(Debug, Error)]
pub enum RollupError {
    #[error("Failed to parse input: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid CSV: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Missing required column: {0}")]
    MissingColumn(String),

    #[error("Invalid period key: {0}")]
    InvalidPeriod(String),

    #[error("Mixed granularities in one table: expected {expected}, found {found}")]
    MixedGranularity {
        expected: &'static str,
        found: &'static str,
    },

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Duplicate source name: {0}")]
    DuplicateSource(String),
}
