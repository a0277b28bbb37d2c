//! Exam Rollup - temporal aggregation engine for exam-room activity logs
//!
//! Rollup turns an irregular log of (room, study date) records into clean
//! multi-granularity tables through a deterministic pipeline: normalization →
//! period aggregation → wide-table projection, with a business-calendar
//! expansion and weekly-average annotation for the daily view.
//!
//! ## Tables
//!
//! - **Daily**: every business day in the data span, zero-filled, with a
//!   weekly average row after each complete Monday–Friday week
//! - **Weekly / Monthly / Quarterly / Yearly**: per-period counts with an
//!   appended average row
//! - **Monthly / Yearly % change**: period-over-period deltas

pub mod aggregator;
pub mod calendar;
pub mod config;
pub mod encoder;
pub mod error;
pub mod normalizer;
pub mod pipeline;
pub mod projector;
pub mod schema;
pub mod types;
pub mod weekly;

pub use config::{EntitySchedule, NormalizationPolicy, RollupConfig};
pub use encoder::ReportEncoder;
pub use error::RollupError;
pub use pipeline::{records_to_report, RollupProcessor};
pub use types::{RawRecord, RawTimestamp, RollupReport, WideTable};

// Schema exports
pub use schema::{CsvColumns, RecordAdapter, SCHEMA_VERSION};

/// Crate version embedded in every output document
pub const ROLLUP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for output documents
pub const PRODUCER_NAME: &str = "exam-rollup";
