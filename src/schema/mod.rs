//! Input record schema
//!
//! The engine itself only sees `RawRecord`s. This module is the thin ingestion
//! layer used by the CLI: it reads records from JSON, NDJSON, or a CSV export
//! whose entity and date columns are picked by header name.

mod adapter;

pub use adapter::*;

/// Current input schema version
pub const SCHEMA_VERSION: &str = "exam.raw_record.v1";
