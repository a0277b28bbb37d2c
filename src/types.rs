//! Core types for the rollup pipeline
//!
//! This module defines the data structures that flow through each stage of the
//! pipeline: raw records, canonical events, period keys, long counts, and the
//! wide tables handed to presentation and export.

use crate::error::RollupError;
use chrono::{Datelike, Days, Months, NaiveDate, NaiveDateTime, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Name of the derived row-wise total column in every count table
pub const TOTAL_COLUMN: &str = "Total Exams";

/// Suffix appended to column names in percent-change tables
pub const PCT_CHANGE_SUFFIX: &str = " %Δ";

/// A single row as supplied by the ingestion layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Free-text entity label (e.g. a room name)
    pub entity: String,
    /// Raw study timestamp; may be missing or unparseable
    #[serde(default)]
    pub timestamp: Option<RawTimestamp>,
}

impl RawRecord {
    pub fn new(entity: impl Into<String>, timestamp: impl Into<RawTimestamp>) -> Self {
        Self {
            entity: entity.into(),
            timestamp: Some(timestamp.into()),
        }
    }

    /// A record whose timestamp cell was empty
    pub fn without_timestamp(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            timestamp: None,
        }
    }
}

/// Raw timestamp as it arrives from the ingestion layer.
///
/// Native dates pass straight through; text is parsed by the normalizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Text(String),
}

impl From<&str> for RawTimestamp {
    fn from(value: &str) -> Self {
        RawTimestamp::Text(value.to_string())
    }
}

impl From<String> for RawTimestamp {
    fn from(value: String) -> Self {
        RawTimestamp::Text(value)
    }
}

impl From<NaiveDate> for RawTimestamp {
    fn from(value: NaiveDate) -> Self {
        RawTimestamp::Date(value)
    }
}

impl From<NaiveDateTime> for RawTimestamp {
    fn from(value: NaiveDateTime) -> Self {
        RawTimestamp::DateTime(value)
    }
}

/// A normalized unit event: one exam for one entity on one day
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CanonicalEvent {
    /// Canonical entity key
    pub entity: String,
    /// Calendar date of the event
    pub date: NaiveDate,
    /// Always 1 when produced by the normalizer
    pub count: u64,
}

/// Calendar granularity of a period bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl Granularity {
    pub const ALL: [Granularity; 5] = [
        Granularity::Day,
        Granularity::Week,
        Granularity::Month,
        Granularity::Quarter,
        Granularity::Year,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Day => "day",
            Granularity::Week => "week",
            Granularity::Month => "month",
            Granularity::Quarter => "quarter",
            Granularity::Year => "year",
        }
    }

    /// Name of the first column of a wide table at this granularity
    pub fn period_column(&self) -> &'static str {
        match self {
            Granularity::Day => "Date",
            Granularity::Week => "Week",
            Granularity::Month => "Month",
            Granularity::Quarter => "Quarter",
            Granularity::Year => "Year",
        }
    }
}

/// A calendar bucket: granularity plus the first day it covers.
///
/// Week buckets always start on a Monday. Construction through [`PeriodKey::new`]
/// rejects misaligned start dates; [`PeriodKey::containing`] cannot fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeriodKey {
    granularity: Granularity,
    start: NaiveDate,
}

impl PeriodKey {
    /// Build a key from an explicit start date, which must be aligned to the granularity
    pub fn new(granularity: Granularity, start: NaiveDate) -> Result<Self, RollupError> {
        let key = Self::containing(granularity, start);
        if key.start != start {
            return Err(RollupError::InvalidPeriod(format!(
                "{} is not the first day of a {} bucket",
                start,
                granularity.as_str()
            )));
        }
        Ok(key)
    }

    /// The bucket of the given granularity that contains `date`
    pub fn containing(granularity: Granularity, date: NaiveDate) -> Self {
        let start = match granularity {
            Granularity::Day => date,
            Granularity::Week => week_monday(date),
            Granularity::Month => first_of_month(date),
            Granularity::Quarter => {
                let first = first_of_month(date);
                first - Months::new(date.month0() % 3)
            }
            Granularity::Year => date - Days::new(u64::from(date.ordinal0())),
        };
        Self { granularity, start }
    }

    pub fn day(date: NaiveDate) -> Self {
        Self::containing(Granularity::Day, date)
    }

    /// Week bucket starting at `monday`
    pub fn week(monday: NaiveDate) -> Result<Self, RollupError> {
        Self::new(Granularity::Week, monday)
    }

    pub fn month(year: i32, month: u32) -> Result<Self, RollupError> {
        let start = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(|| {
            RollupError::InvalidPeriod(format!("month {month} of year {year} does not exist"))
        })?;
        Ok(Self {
            granularity: Granularity::Month,
            start,
        })
    }

    pub fn quarter(year: i32, quarter: u32) -> Result<Self, RollupError> {
        if !(1..=4).contains(&quarter) {
            return Err(RollupError::InvalidPeriod(format!(
                "quarter {quarter} is outside 1..=4"
            )));
        }
        let start = NaiveDate::from_ymd_opt(year, (quarter - 1) * 3 + 1, 1).ok_or_else(|| {
            RollupError::InvalidPeriod(format!("year {year} is out of range"))
        })?;
        Ok(Self {
            granularity: Granularity::Quarter,
            start,
        })
    }

    pub fn year(year: i32) -> Result<Self, RollupError> {
        let start = NaiveDate::from_ymd_opt(year, 1, 1)
            .ok_or_else(|| RollupError::InvalidPeriod(format!("year {year} is out of range")))?;
        Ok(Self {
            granularity: Granularity::Year,
            start,
        })
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    /// First calendar day covered by the bucket
    pub fn start(&self) -> NaiveDate {
        self.start
    }

    /// Last calendar day covered by the bucket
    pub fn end(&self) -> NaiveDate {
        match self.granularity {
            Granularity::Day => self.start,
            Granularity::Week => self.start + Days::new(6),
            Granularity::Month => self.start + Months::new(1) - Days::new(1),
            Granularity::Quarter => self.start + Months::new(3) - Days::new(1),
            Granularity::Year => self.start + Months::new(12) - Days::new(1),
        }
    }

    /// Display label used in the period column
    pub fn label(&self) -> String {
        match self.granularity {
            Granularity::Day => self.start.format("%Y-%m-%d").to_string(),
            Granularity::Week => format!(
                "{}/{}",
                self.start.format("%Y-%m-%d"),
                self.end().format("%Y-%m-%d")
            ),
            Granularity::Month => self.start.format("%Y-%m").to_string(),
            Granularity::Quarter => {
                format!("{}Q{}", self.start.year(), self.start.month0() / 3 + 1)
            }
            Granularity::Year => self.start.year().to_string(),
        }
    }
}

impl fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Monday of the Mon–Sun week containing `date`
pub fn week_monday(date: NaiveDate) -> NaiveDate {
    date - Days::new(u64::from(date.weekday().num_days_from_monday()))
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date - Days::new(u64::from(date.day0()))
}

/// True for Monday through Friday
pub fn is_business_day(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// One row of a long-form count table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LongCount {
    pub entity: String,
    pub period: PeriodKey,
    pub volume: u64,
}

/// What a wide-table column holds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    /// Values for one canonical entity
    Entity(String),
    /// Row-wise total across entity columns
    Total,
}

/// A named value column of a wide table (the period column is implicit)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub kind: ColumnKind,
}

impl Column {
    pub fn entity(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            name: key.clone(),
            kind: ColumnKind::Entity(key),
        }
    }

    pub fn total() -> Self {
        Self {
            name: TOTAL_COLUMN.to_string(),
            kind: ColumnKind::Total,
        }
    }

    pub fn is_total(&self) -> bool {
        matches!(self.kind, ColumnKind::Total)
    }

    /// Entity key for entity columns
    pub fn entity_key(&self) -> Option<&str> {
        match &self.kind {
            ColumnKind::Entity(key) => Some(key.as_str()),
            ColumnKind::Total => None,
        }
    }
}

/// Label in the period column of a wide-table row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowLabel {
    /// A real calendar period
    Period(PeriodKey),
    /// A derived summary row (average, weekly average)
    Synthetic(String),
}

impl RowLabel {
    pub fn period(&self) -> Option<&PeriodKey> {
        match self {
            RowLabel::Period(key) => Some(key),
            RowLabel::Synthetic(_) => None,
        }
    }

    pub fn is_synthetic(&self) -> bool {
        matches!(self, RowLabel::Synthetic(_))
    }
}

impl fmt::Display for RowLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowLabel::Period(key) => write!(f, "{key}"),
            RowLabel::Synthetic(label) => f.write_str(label),
        }
    }
}

/// One row of a wide table.
///
/// `values` lines up with [`WideTable::columns`]. `None` marks a cell with no
/// prior-period baseline in percent-change tables; count tables never hold `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WideRow {
    pub label: RowLabel,
    pub values: Vec<Option<f64>>,
}

/// A period-indexed table with one column per entity plus a total column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WideTable {
    /// Name of the first (period) column: Date, Week, Month, Quarter or Year
    pub period_column: String,
    pub columns: Vec<Column>,
    pub rows: Vec<WideRow>,
}

impl WideTable {
    pub fn new(period_column: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            period_column: period_column.into(),
            columns,
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Header row: period column followed by every value column
    pub fn header(&self) -> Vec<String> {
        std::iter::once(self.period_column.clone())
            .chain(self.columns.iter().map(|c| c.name.clone()))
            .collect()
    }

    /// Cell lookup by row position and column name
    pub fn value(&self, row: usize, column: &str) -> Option<f64> {
        let idx = self.column_index(column)?;
        self.rows.get(row)?.values.get(idx).copied().flatten()
    }

    /// Find the row for a period label such as `2024-01` or `2024-01-02`
    pub fn row_by_label(&self, label: &str) -> Option<&WideRow> {
        self.rows.iter().find(|r| r.label.to_string() == label)
    }

    /// Sum of a column over real period rows only
    pub fn column_sum(&self, column: &str) -> f64 {
        let Some(idx) = self.column_index(column) else {
            return 0.0;
        };
        self.rows
            .iter()
            .filter(|r| !r.label.is_synthetic())
            .filter_map(|r| r.values.get(idx).copied().flatten())
            .sum()
    }

    /// Copy of the table without synthetic rows
    pub fn without_synthetic_rows(&self) -> WideTable {
        WideTable {
            period_column: self.period_column.clone(),
            columns: self.columns.clone(),
            rows: self
                .rows
                .iter()
                .filter(|r| !r.label.is_synthetic())
                .cloned()
                .collect(),
        }
    }

    /// Copy of the table with every value rounded to `digits` decimal places
    pub fn rounded(&self, digits: u32) -> WideTable {
        WideTable {
            period_column: self.period_column.clone(),
            columns: self.columns.clone(),
            rows: self
                .rows
                .iter()
                .map(|r| WideRow {
                    label: r.label.clone(),
                    values: r.values.iter().map(|v| v.map(|x| round_to(x, digits))).collect(),
                })
                .collect(),
        }
    }
}

/// Round half away from zero to `digits` decimal places
pub fn round_to(value: f64, digits: u32) -> f64 {
    let factor = 10f64.powi(digits as i32);
    (value * factor).round() / factor
}

/// Why a raw record did not become a canonical event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    MissingTimestamp,
    UnparseableTimestamp,
    EmptyEntity,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::MissingTimestamp => "missing_timestamp",
            DropReason::UnparseableTimestamp => "unparseable_timestamp",
            DropReason::EmptyEntity => "empty_entity",
        }
    }
}

/// Per-source diagnostics carried alongside the tables
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportDiagnostics {
    /// Records received from the ingestion layer
    pub total_records: usize,
    /// Records that became canonical events
    pub accepted_records: usize,
    /// Dropped records per reason
    pub dropped: BTreeMap<DropReason, usize>,
    /// First event date, if any
    pub first_date: Option<NaiveDate>,
    /// Last event date, if any
    pub last_date: Option<NaiveDate>,
    /// Distinct canonical entities
    pub entities: Vec<String>,
}

impl ReportDiagnostics {
    pub fn dropped_records(&self) -> usize {
        self.dropped.values().sum()
    }
}

/// The full set of rollup tables for one source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollupReport {
    /// Source name (e.g. sheet or file name)
    pub source: String,
    /// Daily rows over every business day, with weekly average rows
    pub daily: WideTable,
    pub weekly: WideTable,
    pub monthly: WideTable,
    /// Month-over-month percent change (average row excluded)
    pub monthly_change: WideTable,
    pub quarterly: WideTable,
    pub yearly: WideTable,
    /// Year-over-year percent change (average row excluded)
    pub yearly_change: WideTable,
    pub diagnostics: ReportDiagnostics,
}

impl RollupReport {
    /// Tables in presentation order, with their export names
    pub fn tables(&self) -> [(&'static str, &WideTable); 7] {
        [
            ("Daily", &self.daily),
            ("Weekly", &self.weekly),
            ("Monthly", &self.monthly),
            ("Monthly_MoM_%", &self.monthly_change),
            ("Quarterly", &self.quarterly),
            ("Yearly", &self.yearly),
            ("Yearly_YoY_%", &self.yearly_change),
        ]
    }
}
