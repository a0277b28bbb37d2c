//! Wide-table projection
//!
//! This module pivots long-form counts into period-indexed wide tables and
//! derives the two table transformations the reports need:
//! - Period-over-period percent change
//! - An appended overall-average row
//!
//! Every transformation returns a new table. The projector does not look at
//! row labels: a synthetic row in the input is treated like any other row, so
//! callers drop averages (see [`WideTable::without_synthetic_rows`]) before
//! computing percent change.

use crate::error::RollupError;
use crate::types::{
    round_to, Column, Granularity, LongCount, PeriodKey, RowLabel, WideRow, WideTable,
    PCT_CHANGE_SUFFIX,
};
use std::collections::{BTreeMap, BTreeSet};

/// Decimal places kept in percent-change values
pub const PCT_CHANGE_DIGITS: u32 = 4;

/// Projector for wide tables
pub struct Projector;

impl Projector {
    /// Pivot long counts into one column per entity plus a total column.
    ///
    /// Entity columns are sorted by key; rows are sorted by period. Missing
    /// (entity, period) combinations are 0.
    pub fn project(
        counts: &[LongCount],
        granularity: Granularity,
    ) -> Result<WideTable, RollupError> {
        if let Some(bad) = counts
            .iter()
            .find(|c| c.period.granularity() != granularity)
        {
            return Err(RollupError::MixedGranularity {
                expected: granularity.as_str(),
                found: bad.period.granularity().as_str(),
            });
        }

        let entities: Vec<&str> = counts
            .iter()
            .map(|c| c.entity.as_str())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let position: BTreeMap<&str, usize> =
            entities.iter().enumerate().map(|(i, e)| (*e, i)).collect();

        let mut by_period: BTreeMap<PeriodKey, Vec<f64>> = BTreeMap::new();
        for count in counts {
            let row = by_period
                .entry(count.period)
                .or_insert_with(|| vec![0.0; entities.len()]);
            if let Some(&idx) = position.get(count.entity.as_str()) {
                row[idx] += count.volume as f64;
            }
        }

        let mut columns: Vec<Column> = entities.iter().map(|e| Column::entity(*e)).collect();
        columns.push(Column::total());

        let mut table = WideTable::new(granularity.period_column(), columns);
        table.rows = by_period
            .into_iter()
            .map(|(period, mut values)| {
                let total: f64 = values.iter().sum();
                values.push(total);
                WideRow {
                    label: RowLabel::Period(period),
                    values: values.into_iter().map(Some).collect(),
                }
            })
            .collect();

        Ok(table)
    }

    /// Period-over-period change `(v[i] - v[i-1]) / v[i-1]` for every column.
    ///
    /// The first row, and any cell whose prior value is zero or missing, has no
    /// baseline and is `None`. Values are rounded to four decimal places and
    /// columns are renamed with a ` %Δ` suffix.
    pub fn percent_change(table: &WideTable) -> WideTable {
        let columns = table
            .columns
            .iter()
            .map(|c| Column {
                name: format!("{}{}", c.name, PCT_CHANGE_SUFFIX),
                kind: c.kind.clone(),
            })
            .collect();

        let mut out = WideTable::new(table.period_column.clone(), columns);
        let mut previous: Option<&WideRow> = None;

        for row in &table.rows {
            let values = row
                .values
                .iter()
                .enumerate()
                .map(|(idx, current)| {
                    let prior = previous.and_then(|p| p.values.get(idx).copied().flatten());
                    change(prior, *current)
                })
                .collect();
            out.rows.push(WideRow {
                label: row.label.clone(),
                values,
            });
            previous = Some(row);
        }

        out
    }

    /// Append a row labeled `label` holding the mean of every column.
    ///
    /// The mean is a simple average over all rows present, not weighted by
    /// volume. A column with no values averages to `None`.
    pub fn append_average_row(table: &WideTable, label: impl Into<String>) -> WideTable {
        let averages = (0..table.columns.len())
            .map(|idx| {
                let values: Vec<f64> = table
                    .rows
                    .iter()
                    .filter_map(|r| r.values.get(idx).copied().flatten())
                    .collect();
                if values.is_empty() {
                    None
                } else {
                    Some(values.iter().sum::<f64>() / values.len() as f64)
                }
            })
            .collect();

        let mut out = table.clone();
        out.rows.push(WideRow {
            label: RowLabel::Synthetic(label.into()),
            values: averages,
        });
        out
    }
}

fn change(prior: Option<f64>, current: Option<f64>) -> Option<f64> {
    match (prior, current) {
        (Some(p), Some(c)) if p != 0.0 => {
            let pct = (c - p) / p;
            pct.is_finite().then(|| round_to(pct, PCT_CHANGE_DIGITS))
        }
        _ => None,
    }
}
