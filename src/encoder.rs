//! Report encoding
//!
//! This module turns rollup reports into their display/export form:
//! - Values rounded once, at the point of output
//! - A JSON document with producer metadata and every table per source
//! - One CSV file per table

use crate::error::RollupError;
use crate::projector::PCT_CHANGE_DIGITS;
use crate::types::{ReportDiagnostics, RollupReport, WideTable};
use crate::{PRODUCER_NAME, ROLLUP_VERSION};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::io::Write;
use uuid::Uuid;

/// Decimal places for count and average values in output
pub const DISPLAY_DIGITS: u32 = 1;

/// Producer metadata stamped on every document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Producer {
    pub name: String,
    pub version: String,
    pub instance_id: String,
}

/// A table in display form: header plus rows of label and values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodedTable {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

/// All tables for one source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodedSource {
    pub source: String,
    pub diagnostics: ReportDiagnostics,
    pub tables: Vec<EncodedTable>,
}

/// Complete output document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportDocument {
    pub producer: Producer,
    pub computed_at_utc: String,
    pub sources: Vec<EncodedSource>,
}

/// Decimal places used when displaying the named report table
pub fn display_digits(table_name: &str) -> u32 {
    if table_name.ends_with('%') {
        PCT_CHANGE_DIGITS
    } else {
        DISPLAY_DIGITS
    }
}

/// Encoder for report documents
pub struct ReportEncoder {
    instance_id: String,
}

impl Default for ReportEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportEncoder {
    /// Create a new encoder with a unique instance ID
    pub fn new() -> Self {
        Self {
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    /// Create an encoder with a specific instance ID
    pub fn with_instance_id(instance_id: String) -> Self {
        Self { instance_id }
    }

    /// Encode reports, in the order given, into one document
    pub fn encode<'a, I>(&self, reports: I) -> ReportDocument
    where
        I: IntoIterator<Item = &'a RollupReport>,
    {
        ReportDocument {
            producer: Producer {
                name: PRODUCER_NAME.to_string(),
                version: ROLLUP_VERSION.to_string(),
                instance_id: self.instance_id.clone(),
            },
            computed_at_utc: Utc::now().to_rfc3339(),
            sources: reports.into_iter().map(encode_source).collect(),
        }
    }

    /// Encode to a JSON string
    pub fn encode_to_json<'a, I>(&self, reports: I, pretty: bool) -> Result<String, RollupError>
    where
        I: IntoIterator<Item = &'a RollupReport>,
    {
        let document = self.encode(reports);
        let json = if pretty {
            serde_json::to_string_pretty(&document)?
        } else {
            serde_json::to_string(&document)?
        };
        Ok(json)
    }

    /// Write one table as CSV, rounded to `digits` places; no-baseline cells are empty
    pub fn write_csv<W: Write>(
        &self,
        table: &WideTable,
        digits: u32,
        writer: W,
    ) -> Result<(), RollupError> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer.write_record(table.header())?;

        for row in &table.rounded(digits).rows {
            let mut record = Vec::with_capacity(row.values.len() + 1);
            record.push(row.label.to_string());
            record.extend(
                row.values
                    .iter()
                    .map(|v| v.map(|x| x.to_string()).unwrap_or_default()),
            );
            csv_writer.write_record(&record)?;
        }

        csv_writer.flush().map_err(csv::Error::from)?;
        Ok(())
    }
}

fn encode_source(report: &RollupReport) -> EncodedSource {
    EncodedSource {
        source: report.source.clone(),
        diagnostics: report.diagnostics.clone(),
        tables: report
            .tables()
            .iter()
            .map(|(name, table)| encode_table(name, table, display_digits(name)))
            .collect(),
    }
}

/// Display form of a table with every value rounded to `digits` places
pub fn encode_table(name: &str, table: &WideTable, digits: u32) -> EncodedTable {
    let rows = table
        .rounded(digits)
        .rows
        .iter()
        .map(|row| {
            std::iter::once(serde_json::Value::String(row.label.to_string()))
                .chain(row.values.iter().map(|v| match v {
                    Some(x) => serde_json::Value::from(*x),
                    None => serde_json::Value::Null,
                }))
                .collect()
        })
        .collect();

    EncodedTable {
        name: name.to_string(),
        columns: table.header(),
        rows,
    }
}
