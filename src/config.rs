//! Run configuration
//!
//! Holds everything that was a module-level constant in a spreadsheet tool:
//! the entity canonicalization policy, per-entity scheduled working days, and
//! the labels of appended average rows. Read-only for the duration of a run.

use crate::error::RollupError;
use crate::normalizer::Normalizer;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Scheduled working days for entities with no override or matching rule
pub const DEFAULT_SCHEDULE_DAYS: u8 = 5;

/// How raw entity labels are turned into canonical keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NormalizationPolicy {
    /// Trim and collapse whitespace; case is preserved
    Strict,
    /// Uppercase and drop every non-alphanumeric character
    #[default]
    AlnumOnly,
}

impl NormalizationPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            NormalizationPolicy::Strict => "strict",
            NormalizationPolicy::AlnumOnly => "alnum-only",
        }
    }
}

/// Assigns scheduled days to every entity whose key contains `pattern`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleRule {
    pub pattern: String,
    pub days: u8,
}

/// Scheduled working days per week for each entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntitySchedule {
    /// Fallback when nothing else matches
    pub default_days: u8,
    /// Exact overrides keyed by canonical entity
    pub overrides: BTreeMap<String, u8>,
    /// Substring rules, first match wins
    pub rules: Vec<ScheduleRule>,
}

impl Default for EntitySchedule {
    fn default() -> Self {
        Self {
            default_days: DEFAULT_SCHEDULE_DAYS,
            overrides: BTreeMap::new(),
            rules: vec![ScheduleRule {
                pattern: "ULTRASOUND".to_string(),
                days: 4,
            }],
        }
    }
}

impl EntitySchedule {
    /// A schedule where every entity works `days` per week
    pub fn uniform(days: u8) -> Self {
        Self {
            default_days: days,
            overrides: BTreeMap::new(),
            rules: Vec::new(),
        }
    }

    pub fn with_override(mut self, entity: impl Into<String>, days: u8) -> Self {
        self.overrides.insert(entity.into(), days);
        self
    }

    pub fn with_rule(mut self, pattern: impl Into<String>, days: u8) -> Self {
        self.rules.push(ScheduleRule {
            pattern: pattern.into(),
            days,
        });
        self
    }

    /// Scheduled days for a canonical entity key
    pub fn days_for(&self, entity: &str, policy: NormalizationPolicy) -> u8 {
        if let Some(days) = self.overrides.get(entity) {
            return *days;
        }

        let haystack = entity.to_uppercase();
        self.rules
            .iter()
            .find(|rule| {
                let needle = Normalizer::normalize_label(&rule.pattern, policy).to_uppercase();
                !needle.is_empty() && haystack.contains(&needle)
            })
            .map(|rule| rule.days)
            .unwrap_or(self.default_days)
    }

    /// Every configured day count must be a plausible working week
    pub fn validate(&self) -> Result<(), RollupError> {
        let check = |what: &str, days: u8| {
            if (1..=7).contains(&days) {
                Ok(())
            } else {
                Err(RollupError::InvalidSchedule(format!(
                    "{what} has {days} scheduled days; expected 1..=7"
                )))
            }
        };

        check("default", self.default_days)?;
        for (entity, days) in &self.overrides {
            check(&format!("entity '{entity}'"), *days)?;
        }
        for rule in &self.rules {
            check(&format!("rule '{}'", rule.pattern), rule.days)?;
        }
        Ok(())
    }
}

/// Labels of the average rows appended to period tables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AverageLabels {
    pub weekly: String,
    pub monthly: String,
    pub quarterly: String,
    pub yearly: String,
}

impl Default for AverageLabels {
    fn default() -> Self {
        Self {
            weekly: "Average (Weekly)".to_string(),
            monthly: "Average (Monthly)".to_string(),
            quarterly: "Average (Quarterly)".to_string(),
            yearly: "Average (Yearly)".to_string(),
        }
    }
}

/// Complete configuration for one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RollupConfig {
    pub normalization: NormalizationPolicy,
    pub schedule: EntitySchedule,
    pub average_labels: AverageLabels,
}

impl RollupConfig {
    /// Load configuration from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, RollupError> {
        let config: RollupConfig =
            serde_json::from_str(json).map_err(|e| RollupError::ConfigError(e.to_string()))?;
        config.schedule.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, RollupError> {
        serde_json::to_string_pretty(self).map_err(RollupError::JsonError)
    }

    pub fn with_normalization(mut self, policy: NormalizationPolicy) -> Self {
        self.normalization = policy;
        self
    }

    pub fn with_schedule(mut self, schedule: EntitySchedule) -> Self {
        self.schedule = schedule;
        self
    }

    /// Scheduled days for a canonical entity under this config's policy
    pub fn schedule_days(&self, entity: &str) -> u8 {
        self.schedule.days_for(entity, self.normalization)
    }
}
