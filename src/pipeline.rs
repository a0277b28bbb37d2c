//! Pipeline orchestration
//!
//! This module provides the public API for the rollup engine.
//! It runs the full pipeline from raw records to the set of report tables.

use crate::aggregator::PeriodAggregator;
use crate::calendar::BusinessCalendar;
use crate::config::RollupConfig;
use crate::error::RollupError;
use crate::normalizer::Normalizer;
use crate::projector::Projector;
use crate::types::{
    CanonicalEvent, DropReason, Granularity, LongCount, RawRecord, ReportDiagnostics,
    RollupReport, WideTable,
};
use crate::weekly::WeeklyAverager;
use std::collections::{BTreeMap, BTreeSet};

/// Build every rollup table for one source with the given configuration.
///
/// # Arguments
/// * `source` - Name of the source (sheet, file) the records came from
/// * `records` - Raw (entity, timestamp) records from the ingestion layer
/// * `config` - Normalization policy, schedule and labels
///
/// # Example
/// ```
/// use exam_rollup::{records_to_report, RawRecord, RollupConfig};
///
/// let records = vec![
///     RawRecord::new("Room A", "2024-01-01"),
///     RawRecord::new("Room B", "2024-01-02"),
/// ];
/// let report = records_to_report("Sheet1", &records, &RollupConfig::default()).unwrap();
/// assert_eq!(report.monthly.len(), 2); // January plus the average row
/// ```
pub fn records_to_report(
    source: &str,
    records: &[RawRecord],
    config: &RollupConfig,
) -> Result<RollupReport, RollupError> {
    config.schedule.validate()?;

    // Stage 1: Normalize records to canonical events
    let normalizer = Normalizer::new(config.normalization);
    let outcome = normalizer.normalize(records);
    let events = outcome.events;

    // Stage 2: Aggregate to long daily counts
    let daily_long = PeriodAggregator::daily(&events);
    log::debug!(
        "source '{}': {} events, {} daily counts",
        source,
        events.len(),
        daily_long.len()
    );

    // Stage 3: Daily table over every business day, with weekly averages
    let daily_wide = Projector::project(&daily_long, Granularity::Day)?;
    let expanded = BusinessCalendar::expand(&daily_wide)?;
    let daily = WeeklyAverager::new(&config.schedule, config.normalization).annotate(&expanded)?;

    // Stage 4: Coarser periods with an appended average row
    let labels = &config.average_labels;
    let weekly = period_table(&daily_long, Granularity::Week, &labels.weekly)?;
    let monthly = period_table(&daily_long, Granularity::Month, &labels.monthly)?;
    let quarterly = period_table(&daily_long, Granularity::Quarter, &labels.quarterly)?;
    let yearly = period_table(&daily_long, Granularity::Year, &labels.yearly)?;

    // Stage 5: Period-over-period change, average rows excluded
    let monthly_change = Projector::percent_change(&monthly.without_synthetic_rows());
    let yearly_change = Projector::percent_change(&yearly.without_synthetic_rows());

    let diagnostics = diagnostics(records.len(), &events, outcome.dropped);
    log::info!(
        "source '{}': {} of {} records used across {} entities",
        source,
        diagnostics.accepted_records,
        diagnostics.total_records,
        diagnostics.entities.len()
    );

    Ok(RollupReport {
        source: source.to_string(),
        daily,
        weekly,
        monthly,
        monthly_change,
        quarterly,
        yearly,
        yearly_change,
        diagnostics,
    })
}

/// Wide table for one granularity, plus its average row when it has data
fn period_table(
    daily_long: &[LongCount],
    granularity: Granularity,
    average_label: &str,
) -> Result<WideTable, RollupError> {
    let long = PeriodAggregator::rebucket(daily_long, granularity)?;
    let wide = Projector::project(&long, granularity)?;
    log::debug!("{} table: {} periods", granularity.as_str(), wide.len());

    if wide.is_empty() {
        Ok(wide)
    } else {
        Ok(Projector::append_average_row(&wide, average_label))
    }
}

fn diagnostics(
    total_records: usize,
    events: &[CanonicalEvent],
    dropped: BTreeMap<DropReason, usize>,
) -> ReportDiagnostics {
    ReportDiagnostics {
        total_records,
        accepted_records: events.len(),
        dropped,
        first_date: events.iter().map(|e| e.date).min(),
        last_date: events.iter().map(|e| e.date).max(),
        entities: events
            .iter()
            .map(|e| e.entity.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect(),
    }
}

/// Processor holding one run's configuration.
///
/// Sources share nothing but the read-only config, so each one is processed
/// independently and results are keyed by source name.
#[derive(Debug, Clone, Default)]
pub struct RollupProcessor {
    config: RollupConfig,
}

impl RollupProcessor {
    /// Create a processor with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a processor with a validated configuration
    pub fn with_config(config: RollupConfig) -> Result<Self, RollupError> {
        config.schedule.validate()?;
        Ok(Self { config })
    }

    /// Load configuration from JSON
    pub fn load_config(&mut self, json: &str) -> Result<(), RollupError> {
        self.config = RollupConfig::from_json(json)?;
        Ok(())
    }

    pub fn config(&self) -> &RollupConfig {
        &self.config
    }

    /// Build the report for a single source
    pub fn process(
        &self,
        source: &str,
        records: &[RawRecord],
    ) -> Result<RollupReport, RollupError> {
        records_to_report(source, records, &self.config)
    }

    /// Build reports for several named sources.
    ///
    /// Source names must be unique; empty sources yield empty tables.
    pub fn process_sources<I, S>(
        &self,
        sources: I,
    ) -> Result<BTreeMap<String, RollupReport>, RollupError>
    where
        I: IntoIterator<Item = (S, Vec<RawRecord>)>,
        S: Into<String>,
    {
        let mut reports = BTreeMap::new();
        for (name, records) in sources {
            let name = name.into();
            if reports.contains_key(&name) {
                return Err(RollupError::DuplicateSource(name));
            }
            let report = self.process(&name, &records)?;
            reports.insert(name, report);
        }
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::entity_volume;
    use crate::calendar::business_days;
    use crate::config::{EntitySchedule, NormalizationPolicy};
    use crate::types::{is_business_day, TOTAL_COLUMN};
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn worked_example() -> Vec<RawRecord> {
        vec![
            RawRecord::new("Room A", "2024-01-01"),
            RawRecord::new("Room A", "2024-01-01"),
            RawRecord::new("Room A", "2024-01-02"),
            RawRecord::new("Room B", "2024-01-02"),
        ]
    }

    /// A few months of mixed activity, including junk rows
    fn busy_records() -> Vec<RawRecord> {
        let mut records = Vec::new();
        let mut day = date(2023, 11, 15);
        let mut i = 0u32;
        while day <= date(2024, 3, 20) {
            if i % 3 != 0 {
                records.push(RawRecord::new("CT 1", day.format("%Y-%m-%d").to_string()));
            }
            if i % 4 == 0 {
                records.push(RawRecord::new(
                    "ultrasound-2",
                    day.format("%m/%d/%Y 09:30").to_string(),
                ));
                records.push(RawRecord::new("Ultrasound 2", day));
            }
            day = day.succ_opt().unwrap();
            i += 1;
        }
        records.push(RawRecord::new("CT 1", "garbage"));
        records.push(RawRecord::without_timestamp("CT 1"));
        records
    }

    #[test]
    fn test_worked_example_daily_table() {
        let report =
            records_to_report("Sheet1", &worked_example(), &RollupConfig::default()).unwrap();
        let daily = &report.daily;

        assert_eq!(daily.header(), vec!["Date", "ROOMA", "ROOMB", TOTAL_COLUMN]);
        // Mon + Tue only: a partial week with no average row
        assert_eq!(daily.len(), 2);
        assert_eq!(daily.rows[0].label.to_string(), "2024-01-01");
        assert_eq!(daily.rows[0].values, vec![Some(2.0), Some(0.0), Some(2.0)]);
        assert_eq!(daily.rows[1].label.to_string(), "2024-01-02");
        assert_eq!(daily.rows[1].values, vec![Some(1.0), Some(1.0), Some(2.0)]);
    }

    #[test]
    fn test_report_table_shapes() {
        let report =
            records_to_report("Sheet1", &worked_example(), &RollupConfig::default()).unwrap();

        let names: Vec<&str> = report.tables().iter().map(|(name, _)| *name).collect();
        assert_eq!(
            names,
            vec![
                "Daily",
                "Weekly",
                "Monthly",
                "Monthly_MoM_%",
                "Quarterly",
                "Yearly",
                "Yearly_YoY_%"
            ]
        );

        let period_columns: Vec<&str> = report
            .tables()
            .iter()
            .map(|(_, t)| t.period_column.as_str())
            .collect();
        assert_eq!(
            period_columns,
            vec!["Date", "Week", "Month", "Month", "Quarter", "Year", "Year"]
        );

        assert_eq!(report.monthly.len(), 2);
        assert_eq!(
            report.monthly.rows[1].label.to_string(),
            "Average (Monthly)"
        );
        assert_eq!(report.monthly_change.len(), 1);
        assert_eq!(
            report.monthly_change.rows[0].values,
            vec![None, None, None]
        );
    }

    #[test]
    fn test_aggregation_conservation() {
        let config = RollupConfig::default();
        let report = records_to_report("busy", &busy_records(), &config).unwrap();

        for entity in &report.diagnostics.entities {
            let expected = report.daily.column_sum(entity);
            assert!(expected > 0.0);
            for table in [
                &report.weekly,
                &report.monthly,
                &report.quarterly,
                &report.yearly,
            ] {
                assert_eq!(table.column_sum(entity), expected, "{entity}");
            }
        }
        assert_eq!(
            report.daily.column_sum(TOTAL_COLUMN),
            report.diagnostics.accepted_records as f64
        );
    }

    #[test]
    fn test_conservation_matches_events() {
        let records = busy_records();
        let outcome = Normalizer::default().normalize(&records);
        let daily = PeriodAggregator::daily(&outcome.events);
        let report = records_to_report("busy", &records, &RollupConfig::default()).unwrap();
        assert_eq!(
            report.yearly.column_sum("CT1"),
            entity_volume(&daily, "CT1") as f64
        );
    }

    #[test]
    fn test_daily_table_is_zero_filled() {
        let report =
            records_to_report("busy", &busy_records(), &RollupConfig::default()).unwrap();
        let first = report.diagnostics.first_date.unwrap();
        let last = report.diagnostics.last_date.unwrap();

        let days: Vec<NaiveDate> = report
            .daily
            .rows
            .iter()
            .filter_map(|r| r.label.period())
            .map(|p| p.start())
            .filter(|d| is_business_day(*d))
            .collect();
        assert_eq!(days, business_days(first, last));
    }

    #[test]
    fn test_weekly_average_uses_schedule_days() {
        // Mon 2024-01-08 .. Fri 2024-01-12, ultrasound works [2,0,2,0,2]
        let records = vec![
            RawRecord::new("Ultrasound 1", "2024-01-08"),
            RawRecord::new("Ultrasound 1", "2024-01-08"),
            RawRecord::new("Ultrasound 1", "2024-01-10"),
            RawRecord::new("Ultrasound 1", "2024-01-10"),
            RawRecord::new("Ultrasound 1", "2024-01-12"),
            RawRecord::new("Ultrasound 1", "2024-01-12"),
        ];
        let report = records_to_report("us", &records, &RollupConfig::default()).unwrap();

        let avg_idx = report
            .daily
            .rows
            .iter()
            .position(|r| r.label.is_synthetic())
            .unwrap();
        assert_eq!(report.daily.value(avg_idx, "ULTRASOUND1"), Some(1.5));
        assert_eq!(report.daily.value(avg_idx, TOTAL_COLUMN), Some(1.5));
    }

    #[test]
    fn test_partial_first_week_is_not_averaged() {
        // Starts Wednesday 2024-01-03, ends Friday 2024-01-12
        let records = vec![
            RawRecord::new("Room A", "2024-01-03"),
            RawRecord::new("Room A", "2024-01-12"),
        ];
        let report = records_to_report("s", &records, &RollupConfig::default()).unwrap();
        let labels: Vec<String> = report
            .daily
            .rows
            .iter()
            .filter(|r| r.label.is_synthetic())
            .map(|r| r.label.to_string())
            .collect();
        assert_eq!(labels, vec!["Weekly Avg 2024-01-08→2024-01-12"]);
    }

    #[test]
    fn test_average_row_excluded_from_month_over_month() {
        let records = vec![
            RawRecord::new("Room A", "2024-01-10"),
            RawRecord::new("Room A", "2024-02-10"),
            RawRecord::new("Room A", "2024-02-11"),
        ];
        let report = records_to_report("s", &records, &RollupConfig::default()).unwrap();

        assert_eq!(report.monthly.len(), 3);
        assert!(report.monthly.rows[2].label.is_synthetic());

        let change = &report.monthly_change;
        assert_eq!(change.len(), 2);
        assert!(change.rows.iter().all(|r| !r.label.is_synthetic()));
        assert_eq!(change.rows[0].values, vec![None, None]);
        assert_eq!(change.rows[1].values, vec![Some(1.0), Some(1.0)]);
    }

    #[test]
    fn test_year_over_year_with_zero_prior() {
        let records = vec![
            RawRecord::new("Room A", "2023-05-01"),
            RawRecord::new("Room B", "2024-05-01"),
            RawRecord::new("Room B", "2024-05-02"),
        ];
        let report = records_to_report("s", &records, &RollupConfig::default()).unwrap();
        let change = &report.yearly_change;
        assert_eq!(change.header(), vec!["Year", "ROOMA %Δ", "ROOMB %Δ", "Total Exams %Δ"]);
        // Room A 1 -> 0, Room B 0 -> 2 (no baseline), total 1 -> 2
        assert_eq!(change.rows[1].values, vec![Some(-1.0), None, Some(1.0)]);
    }

    #[test]
    fn test_empty_input_yields_empty_tables() {
        let report = records_to_report("empty", &[], &RollupConfig::default()).unwrap();
        for (name, table) in report.tables() {
            assert!(table.is_empty(), "{name} should be empty");
        }
        assert_eq!(report.diagnostics.total_records, 0);
    }

    #[test]
    fn test_only_invalid_records_yield_empty_tables() {
        let records = vec![RawRecord::new("Room A", "n/a"), RawRecord::new("", "2024-01-01")];
        let report = records_to_report("junk", &records, &RollupConfig::default()).unwrap();
        assert!(report.daily.is_empty());
        assert_eq!(report.diagnostics.dropped_records(), 2);
        assert_eq!(report.diagnostics.dropped[&DropReason::EmptyEntity], 1);
    }

    #[test]
    fn test_strict_policy_keeps_case_variants_apart() {
        let records = vec![
            RawRecord::new("Room A", "2024-01-01"),
            RawRecord::new("ROOM A", "2024-01-01"),
        ];
        let config = RollupConfig::default().with_normalization(NormalizationPolicy::Strict);
        let report = records_to_report("s", &records, &config).unwrap();
        assert_eq!(report.diagnostics.entities, vec!["ROOM A", "Room A"]);

        let report = records_to_report("s", &records, &RollupConfig::default()).unwrap();
        assert_eq!(report.diagnostics.entities, vec!["ROOMA"]);
    }

    #[test]
    fn test_processor_multiple_sources() {
        let processor = RollupProcessor::with_config(
            RollupConfig::default().with_schedule(EntitySchedule::uniform(5)),
        )
        .unwrap();
        let reports = processor
            .process_sources(vec![
                ("CT", worked_example()),
                ("Empty", Vec::new()),
            ])
            .unwrap();

        assert_eq!(reports.len(), 2);
        assert_eq!(reports["CT"].source, "CT");
        assert_eq!(reports["CT"].daily.len(), 2);
        assert!(reports["Empty"].daily.is_empty());
    }

    #[test]
    fn test_processor_rejects_duplicate_sources() {
        let processor = RollupProcessor::new();
        let result = processor.process_sources(vec![("A", Vec::new()), ("A", Vec::new())]);
        assert!(matches!(result, Err(RollupError::DuplicateSource(name)) if name == "A"));
    }

    #[test]
    fn test_records_to_report_rejects_invalid_schedule() {
        let records: Vec<RawRecord> = (8..=12)
            .map(|d| RawRecord::new("CT 1", format!("2024-01-{d:02}")))
            .collect();
        let config = RollupConfig::default().with_schedule(EntitySchedule::uniform(0));

        let result = records_to_report("s", &records, &config);
        assert!(matches!(result, Err(RollupError::InvalidSchedule(_))));

        let zero_override = RollupConfig::default()
            .with_schedule(EntitySchedule::default().with_override("CT1", 0));
        assert!(records_to_report("s", &records, &zero_override).is_err());
    }

    #[test]
    fn test_processor_rejects_invalid_schedule() {
        let config = RollupConfig::default().with_schedule(EntitySchedule::uniform(9));
        assert!(RollupProcessor::with_config(config).is_err());

        let mut processor = RollupProcessor::new();
        assert!(processor.load_config(r#"{"normalization": "strict"}"#).is_ok());
        assert_eq!(processor.config().normalization, NormalizationPolicy::Strict);
    }
}
