//! Weekly-average annotation
//!
//! Walks a zero-filled daily table week by week (Monday anchored) and inserts a
//! synthetic "Weekly Avg" row after every week whose Monday–Friday rows are all
//! present. Partial weeks at either end of the span are left unannotated.
//!
//! Each entity's weekly average divides its Mon–Fri volume by that entity's
//! scheduled working days, so the average row's total is the sum of the
//! per-entity averages rather than the total column divided by five.

use crate::calendar::row_date;
use crate::config::{EntitySchedule, NormalizationPolicy};
use crate::error::RollupError;
use crate::types::{
    is_business_day, week_monday, Column, ColumnKind, RowLabel, WideRow, WideTable,
};
use chrono::{Days, NaiveDate};

/// Business days in a complete week
pub const BUSINESS_DAYS_PER_WEEK: usize = 5;

/// Label of the synthetic row for the week starting `monday`
pub fn weekly_avg_label(monday: NaiveDate) -> String {
    let friday = monday + Days::new(4);
    format!(
        "Weekly Avg {}→{}",
        monday.format("%Y-%m-%d"),
        friday.format("%Y-%m-%d")
    )
}

/// Annotator that inserts weekly average rows into daily tables
pub struct WeeklyAverager<'a> {
    schedule: &'a EntitySchedule,
    policy: NormalizationPolicy,
}

impl<'a> WeeklyAverager<'a> {
    pub fn new(schedule: &'a EntitySchedule, policy: NormalizationPolicy) -> Self {
        Self { schedule, policy }
    }

    /// Return a copy of `table` with a weekly average row after each complete week.
    ///
    /// `table` should already be expanded over business days; every row must be
    /// a calendar day and rows must be in ascending date order.
    pub fn annotate(&self, table: &WideTable) -> Result<WideTable, RollupError> {
        let mut out = WideTable::new(table.period_column.clone(), table.columns.clone());
        let mut window: Vec<(NaiveDate, &WideRow)> = Vec::new();
        let mut current_week: Option<NaiveDate> = None;
        let mut previous: Option<NaiveDate> = None;
        let mut averaged_weeks = 0usize;

        for row in &table.rows {
            let date = row_date(row)?;
            if previous.is_some_and(|p| p >= date) {
                return Err(RollupError::InvalidPeriod(format!(
                    "daily rows out of order at {date}"
                )));
            }
            previous = Some(date);

            let monday = week_monday(date);
            if let Some(week) = current_week.filter(|w| *w != monday) {
                averaged_weeks += usize::from(self.flush(week, &window, &mut out));
                window.clear();
            }
            current_week = Some(monday);
            window.push((date, row));
        }
        if let Some(week) = current_week {
            averaged_weeks += usize::from(self.flush(week, &window, &mut out));
        }

        log::debug!(
            "annotated daily table: {} rows, {} weekly averages",
            table.len(),
            averaged_weeks
        );
        Ok(out)
    }

    /// Emit one week's rows, plus its average when the week is complete
    fn flush(
        &self,
        monday: NaiveDate,
        window: &[(NaiveDate, &WideRow)],
        out: &mut WideTable,
    ) -> bool {
        out.rows.extend(window.iter().map(|(_, row)| (*row).clone()));

        let business: Vec<&WideRow> = window
            .iter()
            .filter(|(date, _)| is_business_day(*date))
            .map(|(_, row)| *row)
            .collect();
        if business.len() != BUSINESS_DAYS_PER_WEEK {
            return false;
        }

        out.rows.push(WideRow {
            label: RowLabel::Synthetic(weekly_avg_label(monday)),
            values: self.week_averages(&out.columns, &business),
        });
        true
    }

    fn week_averages(&self, columns: &[Column], business: &[&WideRow]) -> Vec<Option<f64>> {
        let mut values: Vec<Option<f64>> = columns
            .iter()
            .enumerate()
            .map(|(idx, column)| match &column.kind {
                ColumnKind::Entity(key) => {
                    let sum: f64 = business
                        .iter()
                        .filter_map(|r| r.values.get(idx).copied().flatten())
                        .sum();
                    let days = self.schedule.days_for(key, self.policy);
                    Some(sum / f64::from(days))
                }
                ColumnKind::Total => None,
            })
            .collect();

        let total: f64 = columns
            .iter()
            .zip(&values)
            .filter(|(c, _)| !c.is_total())
            .filter_map(|(_, v)| *v)
            .sum();
        for (column, value) in columns.iter().zip(values.iter_mut()) {
            if column.is_total() {
                *value = Some(total);
            }
        }
        values
    }
}
