//! Adapter for reading raw records from JSON, NDJSON and CSV

use crate::config::NormalizationPolicy;
use crate::error::RollupError;
use crate::normalizer::Normalizer;
use crate::types::{DropReason, RawRecord, RawTimestamp};
use serde::{Deserialize, Serialize};
use std::io::Read;

/// Header names selecting the entity and date columns of a CSV file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsvColumns {
    pub entity: String,
    pub date: String,
}

impl Default for CsvColumns {
    fn default() -> Self {
        Self {
            entity: "Room".to_string(),
            date: "Study Date".to_string(),
        }
    }
}

/// Adapter for converting input documents to raw records
pub struct RecordAdapter;

impl RecordAdapter {
    /// Parse a JSON string containing an array of records
    pub fn parse_array(json: &str) -> Result<Vec<RawRecord>, RollupError> {
        let records: Vec<RawRecord> = serde_json::from_str(json)?;
        Ok(records)
    }

    /// Parse NDJSON (newline-delimited JSON) containing records
    pub fn parse_ndjson(ndjson: &str) -> Result<Vec<RawRecord>, RollupError> {
        let mut records = Vec::new();
        for (line_num, line) in ndjson.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<RawRecord>(trimmed) {
                Ok(record) => records.push(record),
                Err(e) => {
                    return Err(RollupError::ParseError(format!(
                        "Failed to parse line {}: {}",
                        line_num + 1,
                        e
                    )));
                }
            }
        }
        Ok(records)
    }

    /// Read records from CSV, picking columns by header name.
    ///
    /// Header matching ignores case and surrounding or repeated whitespace.
    /// An empty date cell becomes a record without a timestamp.
    pub fn parse_csv<R: Read>(
        reader: R,
        columns: &CsvColumns,
    ) -> Result<Vec<RawRecord>, RollupError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = csv_reader.headers()?.clone();
        let find = |wanted: &str| {
            let wanted = header_key(wanted);
            headers
                .iter()
                .position(|h| header_key(h) == wanted)
                .ok_or_else(|| RollupError::MissingColumn(wanted.clone()))
        };
        let entity_idx = find(&columns.entity)?;
        let date_idx = find(&columns.date)?;

        let mut records = Vec::new();
        for row in csv_reader.records() {
            let row = row?;
            let entity = row.get(entity_idx).unwrap_or_default();
            let date = row.get(date_idx).unwrap_or_default();
            if entity.is_empty() && date.is_empty() {
                continue;
            }
            records.push(RawRecord {
                entity: entity.to_string(),
                timestamp: (!date.is_empty()).then(|| RawTimestamp::Text(date.to_string())),
            });
        }
        Ok(records)
    }

    /// Check every record against the normalizer and report the unusable ones
    pub fn validate_records(
        records: &[RawRecord],
        policy: NormalizationPolicy,
    ) -> Vec<RecordIssue> {
        let normalizer = Normalizer::new(policy);
        records
            .iter()
            .enumerate()
            .filter_map(|(index, record)| {
                normalizer
                    .normalize_record(record)
                    .err()
                    .map(|reason| RecordIssue {
                        index,
                        entity: record.entity.clone(),
                        reason,
                    })
            })
            .collect()
    }
}

/// A record the engine would drop
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordIssue {
    pub index: usize,
    pub entity: String,
    pub reason: DropReason,
}

fn header_key(header: &str) -> String {
    header
        .split(|c: char| c.is_whitespace())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
