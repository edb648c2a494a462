//! Aggregation periods and running totals

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{UsageEvent, micros_to_usd};

/// Aggregation window; keys are computed in UTC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodKind {
    Day,
    Month,
}

impl PeriodKind {
    pub const ALL: [PeriodKind; 2] = [PeriodKind::Day, PeriodKind::Month];

    /// Key of the period containing `at`, e.g. `2026-10-18` or `2026-10`
    pub fn key_for(&self, at: DateTime<Utc>) -> String {
        match self {
            Self::Day => at.format("%Y-%m-%d").to_string(),
            Self::Month => at.format("%Y-%m").to_string(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Month => "month",
        }
    }
}

impl fmt::Display for PeriodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Spend within one period. Only grows until the period rolls over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodTotal {
    pub period_kind: PeriodKind,
    pub period_key: String,
    pub spent_micros: i64,
    pub call_count: u64,
}

impl PeriodTotal {
    pub fn empty(period_kind: PeriodKind, at: DateTime<Utc>) -> Self {
        Self {
            period_kind,
            period_key: period_kind.key_for(at),
            spent_micros: 0,
            call_count: 0,
        }
    }

    pub fn spent(&self) -> f64 {
        micros_to_usd(self.spent_micros)
    }

    /// Whether the event falls inside this period
    pub fn covers(&self, event: &UsageEvent) -> bool {
        self.period_kind.key_for(event.timestamp) == self.period_key
    }

    pub(crate) fn add(&mut self, event: &UsageEvent) {
        self.spent_micros += event.cost_micros;
        self.call_count += u64::from(event.units);
    }
}

/// Spend attributed to a single search
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchTotal {
    pub spent_micros: i64,
    pub call_count: u64,
}

impl SearchTotal {
    pub fn spent(&self) -> f64 {
        micros_to_usd(self.spent_micros)
    }
}
