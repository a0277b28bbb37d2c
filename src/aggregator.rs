//! Period aggregation
//!
//! This module groups canonical events into long-form counts:
//! - Daily counts per (entity, date)
//! - Week/Month/Quarter/Year counts re-bucketed from the daily counts
//!
//! Output is ordered by (entity, period) so repeated runs are identical.

use crate::error::RollupError;
use crate::types::{CanonicalEvent, Granularity, LongCount, PeriodKey};
use std::collections::BTreeMap;

/// Aggregator for building long-form counts
pub struct PeriodAggregator;

impl PeriodAggregator {
    /// Sum event counts per (entity, day)
    pub fn daily(events: &[CanonicalEvent]) -> Vec<LongCount> {
        let mut buckets: BTreeMap<(&str, PeriodKey), u64> = BTreeMap::new();
        for event in events {
            *buckets
                .entry((event.entity.as_str(), PeriodKey::day(event.date)))
                .or_insert(0) += event.count;
        }
        collect(buckets)
    }

    /// Re-bucket daily counts into a coarser granularity.
    ///
    /// Only day-level rows (or rows already at `granularity`) are accepted; weeks
    /// do not nest inside months, so anything else is a caller bug.
    pub fn rebucket(
        daily: &[LongCount],
        granularity: Granularity,
    ) -> Result<Vec<LongCount>, RollupError> {
        let mut buckets: BTreeMap<(&str, PeriodKey), u64> = BTreeMap::new();
        for row in daily {
            let found = row.period.granularity();
            if found != Granularity::Day && found != granularity {
                return Err(RollupError::MixedGranularity {
                    expected: Granularity::Day.as_str(),
                    found: found.as_str(),
                });
            }
            let key = PeriodKey::containing(granularity, row.period.start());
            *buckets.entry((row.entity.as_str(), key)).or_insert(0) += row.volume;
        }
        Ok(collect(buckets))
    }
}

fn collect(buckets: BTreeMap<(&str, PeriodKey), u64>) -> Vec<LongCount> {
    buckets
        .into_iter()
        .map(|((entity, period), volume)| LongCount {
            entity: entity.to_string(),
            period,
            volume,
        })
        .collect()
}

/// Total volume for one entity across a set of long counts
pub fn entity_volume(counts: &[LongCount], entity: &str) -> u64 {
    counts
        .iter()
        .filter(|c| c.entity == entity)
        .map(|c| c.volume)
        .sum()
}
