//! Event normalization
//!
//! This module turns raw (label, timestamp) records into canonical unit events.
//! - Entity labels canonicalized by the configured policy
//! - Timestamps parsed to calendar dates
//! - Unusable records filtered and counted, never reported as errors

use crate::config::NormalizationPolicy;
use crate::types::{CanonicalEvent, DropReason, RawRecord, RawTimestamp};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use std::collections::BTreeMap;

/// Date-time layouts accepted for text timestamps, tried in order
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %I:%M %p",
    "%Y/%m/%d %H:%M:%S",
];

/// Date-only layouts accepted for text timestamps, tried in order
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d", "%d-%b-%Y"];

/// Result of normalizing a batch of raw records
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizeOutcome {
    /// Canonical events in input order
    pub events: Vec<CanonicalEvent>,
    /// Dropped records per reason
    pub dropped: BTreeMap<DropReason, usize>,
}

impl NormalizeOutcome {
    pub fn dropped_total(&self) -> usize {
        self.dropped.values().sum()
    }
}

/// Normalizer for converting raw records to canonical events
#[derive(Debug, Clone, Copy, Default)]
pub struct Normalizer {
    policy: NormalizationPolicy,
}

impl Normalizer {
    pub fn new(policy: NormalizationPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> NormalizationPolicy {
        self.policy
    }

    /// Normalize raw records, dropping the ones with no usable date or label
    pub fn normalize(&self, records: &[RawRecord]) -> NormalizeOutcome {
        let mut outcome = NormalizeOutcome::default();

        for record in records {
            match self.normalize_record(record) {
                Ok(event) => outcome.events.push(event),
                Err(reason) => *outcome.dropped.entry(reason).or_insert(0) += 1,
            }
        }

        if outcome.dropped_total() > 0 {
            let summary: Vec<String> = outcome
                .dropped
                .iter()
                .map(|(reason, n)| format!("{}={}", reason.as_str(), n))
                .collect();
            log::warn!(
                "dropped {} of {} records ({})",
                outcome.dropped_total(),
                records.len(),
                summary.join(", ")
            );
        }

        outcome
    }

    /// Normalize a single record, or say why it cannot be used
    pub fn normalize_record(&self, record: &RawRecord) -> Result<CanonicalEvent, DropReason> {
        let timestamp = record
            .timestamp
            .as_ref()
            .ok_or(DropReason::MissingTimestamp)?;
        let date = parse_timestamp(timestamp).ok_or(DropReason::UnparseableTimestamp)?;

        let entity = Self::normalize_label(&record.entity, self.policy);
        if entity.is_empty() {
            return Err(DropReason::EmptyEntity);
        }

        Ok(CanonicalEvent {
            entity,
            date,
            count: 1,
        })
    }

    /// Canonical key for an entity label. Idempotent under either policy.
    pub fn normalize_label(label: &str, policy: NormalizationPolicy) -> String {
        match policy {
            NormalizationPolicy::Strict => label
                .split(char::is_whitespace)
                .filter(|part| !part.is_empty())
                .collect::<Vec<_>>()
                .join(" "),
            NormalizationPolicy::AlnumOnly => label
                .chars()
                .flat_map(char::to_uppercase)
                .filter(|c| c.is_alphanumeric())
                .collect(),
        }
    }
}

/// Parse a raw timestamp to the calendar date it falls on.
///
/// Offsets are not converted: `2024-01-01T23:30:00-05:00` is 2024-01-01.
pub fn parse_timestamp(timestamp: &RawTimestamp) -> Option<NaiveDate> {
    match timestamp {
        RawTimestamp::Date(date) => Some(*date),
        RawTimestamp::DateTime(dt) => Some(dt.date()),
        RawTimestamp::Text(text) => parse_date_text(text),
    }
}

fn parse_date_text(text: &str) -> Option<NaiveDate> {
    let cleaned = text.replace('\u{a0}', " ");
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.naive_local().date());
    }

    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .map(|dt| dt.date())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_alnum_policy() {
        let p = NormalizationPolicy::AlnumOnly;
        assert_eq!(Normalizer::normalize_label("Room A", p), "ROOMA");
        assert_eq!(Normalizer::normalize_label("  room-a ", p), "ROOMA");
        assert_eq!(Normalizer::normalize_label("CT\u{a0}#2", p), "CT2");
        assert_eq!(Normalizer::normalize_label("---", p), "");
    }

    #[test]
    fn test_strict_policy() {
        let p = NormalizationPolicy::Strict;
        assert_eq!(Normalizer::normalize_label("  Room   A ", p), "Room A");
        assert_eq!(Normalizer::normalize_label("Room\u{a0}A", p), "Room A");
        assert_ne!(
            Normalizer::normalize_label("Room A", p),
            Normalizer::normalize_label("ROOM A", p)
        );
    }

    #[test]
    fn test_normalization_idempotence() {
        let labels = [
            "Room A",
            "  ultrasound\t 2 ",
            "MRI/CT-3",
            "straße",
            "Ünïcödé room",
            "",
            "\u{a0}x\u{a0}",
        ];
        for policy in [NormalizationPolicy::Strict, NormalizationPolicy::AlnumOnly] {
            for label in labels {
                let once = Normalizer::normalize_label(label, policy);
                let twice = Normalizer::normalize_label(&once, policy);
                assert_eq!(once, twice, "policy {:?}, label {:?}", policy, label);
            }
        }
    }

    #[test]
    fn test_equivalent_labels_share_a_key() {
        let normalizer = Normalizer::default();
        let outcome = normalizer.normalize(&[
            RawRecord::new("Room A", "2024-01-01"),
            RawRecord::new("room a", "2024-01-01"),
            RawRecord::new("ROOM-A", "2024-01-01"),
        ]);
        assert_eq!(outcome.events.len(), 3);
        assert!(outcome.events.iter().all(|e| e.entity == "ROOMA"));
        assert!(outcome.events.iter().all(|e| e.count == 1));
    }

    #[test]
    fn test_timestamp_formats() {
        let cases = [
            "2024-01-02",
            "2024-01-02 08:15:00",
            "2024-01-02T08:15:00",
            "2024-01-02T08:15:00.250",
            "2024-01-02T23:59:00-05:00",
            "2024-01-02T08:15:00Z",
            "01/02/2024",
            "01/02/2024 08:15",
            "01/02/2024 8:15:00 AM",
            "2024/01/02",
            "\u{a0}2024-01-02 ",
        ];
        for case in cases {
            assert_eq!(
                parse_timestamp(&RawTimestamp::from(case)),
                Some(date(2024, 1, 2)),
                "failed for {:?}",
                case
            );
        }
    }

    #[test]
    fn test_native_timestamps() {
        let dt = date(2024, 3, 4).and_hms_opt(10, 0, 0).unwrap();
        assert_eq!(parse_timestamp(&RawTimestamp::DateTime(dt)), Some(date(2024, 3, 4)));
        assert_eq!(
            parse_timestamp(&RawTimestamp::Date(date(2024, 3, 4))),
            Some(date(2024, 3, 4))
        );
    }

    #[test]
    fn test_invalid_records_are_dropped_and_counted() {
        let normalizer = Normalizer::default();
        let outcome = normalizer.normalize(&[
            RawRecord::new("Room A", "2024-01-01"),
            RawRecord::new("Room A", "not a date"),
            RawRecord::new("Room A", "2024-02-30"),
            RawRecord::new("Room A", ""),
            RawRecord::without_timestamp("Room B"),
            RawRecord::new("***", "2024-01-01"),
        ]);

        assert_eq!(outcome.events.len(), 1);
        assert_eq!(outcome.dropped_total(), 5);
        assert_eq!(outcome.dropped[&DropReason::UnparseableTimestamp], 3);
        assert_eq!(outcome.dropped[&DropReason::MissingTimestamp], 1);
        assert_eq!(outcome.dropped[&DropReason::EmptyEntity], 1);
    }

    #[test]
    fn test_empty_input() {
        let outcome = Normalizer::default().normalize(&[]);
        assert!(outcome.events.is_empty());
        assert_eq!(outcome.dropped_total(), 0);
    }
}
