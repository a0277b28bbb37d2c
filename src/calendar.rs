//! Business-calendar expansion
//!
//! Re-indexes a daily wide table over every Monday–Friday in its date span so
//! that weekly averages see inactive days as zeros instead of skipping them.

use crate::error::RollupError;
use crate::types::{is_business_day, Granularity, PeriodKey, RowLabel, WideRow, WideTable};
use chrono::NaiveDate;
use std::collections::BTreeMap;

/// Every business day in the inclusive span `[start, end]`
pub fn business_days(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start
        .iter_days()
        .take_while(|d| *d <= end)
        .filter(|d| is_business_day(*d))
        .collect()
}

/// Calendar expander for daily tables
pub struct BusinessCalendar;

impl BusinessCalendar {
    /// Insert a zero row for every business day missing from the table.
    ///
    /// Weekend rows already present are kept; weekend days are never inserted.
    /// Rows come back sorted by date. Every row must be a calendar day.
    pub fn expand(table: &WideTable) -> Result<WideTable, RollupError> {
        let mut by_date: BTreeMap<NaiveDate, WideRow> = BTreeMap::new();
        for row in &table.rows {
            by_date.insert(row_date(row)?, row.clone());
        }

        let (Some(first), Some(last)) = (
            by_date.keys().next().copied(),
            by_date.keys().next_back().copied(),
        ) else {
            return Ok(table.clone());
        };

        let width = table.columns.len();
        let mut inserted = 0usize;
        for date in business_days(first, last) {
            by_date.entry(date).or_insert_with(|| {
                inserted += 1;
                WideRow {
                    label: RowLabel::Period(PeriodKey::day(date)),
                    values: vec![Some(0.0); width],
                }
            });
        }
        log::debug!(
            "expanded daily table {}..{}: {} rows, {} zero-filled",
            first,
            last,
            by_date.len(),
            inserted
        );

        let mut out = WideTable::new(table.period_column.clone(), table.columns.clone());
        out.rows = by_date.into_values().collect();
        Ok(out)
    }
}

/// Calendar date of a daily row; anything else is a caller bug
pub(crate) fn row_date(row: &WideRow) -> Result<NaiveDate, RollupError> {
    match &row.label {
        RowLabel::Period(key) if key.granularity() == Granularity::Day => {
            Ok(key.start())
        }
        other => Err(RollupError::InvalidPeriod(format!(
            "row '{other}' is not a calendar day"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Column;
    use chrono::Datelike;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn daily_table(rows: &[(NaiveDate, f64)]) -> WideTable {
        let mut table = WideTable::new("Date", vec![Column::entity("ROOMA"), Column::total()]);
        table.rows = rows
            .iter()
            .map(|(d, v)| WideRow {
                label: RowLabel::Period(PeriodKey::day(*d)),
                values: vec![Some(*v), Some(*v)],
            })
            .collect();
        table
    }

    #[test]
    fn test_business_days_skip_weekends() {
        // Fri 2024-01-05 .. Tue 2024-01-09
        let days = business_days(date(2024, 1, 5), date(2024, 1, 9));
        assert_eq!(
            days,
            vec![date(2024, 1, 5), date(2024, 1, 8), date(2024, 1, 9)]
        );
        assert!(business_days(date(2024, 1, 6), date(2024, 1, 7)).is_empty());
    }

    #[test]
    fn test_zero_fill_covers_every_business_day_once() {
        let table = daily_table(&[(date(2024, 1, 3), 4.0), (date(2024, 1, 16), 2.0)]);
        let expanded = BusinessCalendar::expand(&table).unwrap();

        let dates: Vec<NaiveDate> = expanded
            .rows
            .iter()
            .map(|r| r.label.period().unwrap().start())
            .collect();
        assert_eq!(dates, business_days(date(2024, 1, 3), date(2024, 1, 16)));
        assert_eq!(dates.len(), 10);

        let filled = expanded.row_by_label("2024-01-10").unwrap();
        assert_eq!(filled.values, vec![Some(0.0), Some(0.0)]);
        assert_eq!(expanded.row_by_label("2024-01-03").unwrap().values[0], Some(4.0));
        assert_eq!(expanded.column_sum("ROOMA"), 6.0);
    }

    #[test]
    fn test_weekend_rows_are_kept_not_inserted() {
        let table = daily_table(&[
            (date(2024, 1, 5), 1.0),
            (date(2024, 1, 6), 3.0),
            (date(2024, 1, 10), 1.0),
        ]);
        let expanded = BusinessCalendar::expand(&table).unwrap();

        assert!(expanded.row_by_label("2024-01-06").is_some());
        assert!(expanded.row_by_label("2024-01-07").is_none());
        let weekend_rows = expanded
            .rows
            .iter()
            .filter(|r| !is_business_day(r.label.period().unwrap().start()))
            .count();
        assert_eq!(weekend_rows, 1);
        assert_eq!(expanded.column_sum("ROOMA"), 5.0);
        // Sorted ascending
        let days: Vec<u32> = expanded
            .rows
            .iter()
            .map(|r| r.label.period().unwrap().start().day())
            .collect();
        assert_eq!(days, vec![5, 6, 8, 9, 10]);
    }

    #[test]
    fn test_expand_empty_table() {
        let table = daily_table(&[]);
        assert!(BusinessCalendar::expand(&table).unwrap().is_empty());
    }

    #[test]
    fn test_expand_rejects_synthetic_rows() {
        let mut table = daily_table(&[(date(2024, 1, 3), 1.0)]);
        table.rows.push(WideRow {
            label: RowLabel::Synthetic("Average".to_string()),
            values: vec![Some(1.0), Some(1.0)],
        });
        assert!(BusinessCalendar::expand(&table).is_err());
    }
}
