//! Billing snapshots published to the dashboard

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::usage::micros_to_usd;

/// How much the snapshot figures can be trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    /// Fetched from the billing collaborator on the last refresh
    Actual,
    /// Last actual figures, kept after a failed refresh
    Stale,
    /// No actual figures yet; values come from internal metering
    Estimated,
}

/// Billing integration status as shown to users
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingStatus {
    NotConfigured,
    Active,
    Error,
}

/// Billing period a fetch is made for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingPeriod {
    pub month_key: String,
    pub day_key: String,
}

/// Totals as reported by a billing provider
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BillingTotals {
    pub monthly_total_micros: i64,
    pub daily_total_micros: i64,
    pub free_tier_remaining_micros: Option<i64>,
    /// Monthly spend per billed service
    pub breakdown: BTreeMap<String, i64>,
}

/// Actual spend that diverged from the metered estimate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingDiscrepancy {
    pub monthly_estimate_micros: i64,
    pub monthly_actual_micros: i64,
    pub daily_estimate_micros: i64,
    pub daily_actual_micros: i64,
    pub detected_at: DateTime<Utc>,
}

impl BillingDiscrepancy {
    /// Actual minus estimate for the month, in USD
    pub fn monthly_delta(&self) -> f64 {
        micros_to_usd(self.monthly_actual_micros - self.monthly_estimate_micros)
    }

    pub fn daily_delta(&self) -> f64 {
        micros_to_usd(self.daily_actual_micros - self.daily_estimate_micros)
    }
}

/// Latest known billing position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingSnapshot {
    pub monthly_total_micros: i64,
    pub daily_total_micros: i64,
    pub free_tier_remaining_micros: i64,
    pub breakdown: BTreeMap<String, i64>,
    /// When the figures were last fetched successfully
    pub fetched_at: Option<DateTime<Utc>>,
    pub freshness: Freshness,
    pub status: BillingStatus,
    pub discrepancy: Option<BillingDiscrepancy>,
}

impl BillingSnapshot {
    /// Zeroed snapshot served before the first refresh
    pub fn initial(free_tier_micros: i64) -> Self {
        Self {
            monthly_total_micros: 0,
            daily_total_micros: 0,
            free_tier_remaining_micros: free_tier_micros,
            breakdown: BTreeMap::new(),
            fetched_at: None,
            freshness: Freshness::Estimated,
            status: BillingStatus::NotConfigured,
            discrepancy: None,
        }
    }

    pub fn monthly_total(&self) -> f64 {
        micros_to_usd(self.monthly_total_micros)
    }

    pub fn daily_total(&self) -> f64 {
        micros_to_usd(self.daily_total_micros)
    }

    pub fn free_tier_remaining(&self) -> f64 {
        micros_to_usd(self.free_tier_remaining_micros)
    }
}

/// Free tier left after `monthly_total_micros`, never negative
pub fn free_tier_remaining(free_tier_micros: i64, monthly_total_micros: i64) -> i64 {
    (free_tier_micros - monthly_total_micros).max(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_tier_remaining_floors_at_zero() {
        assert_eq!(free_tier_remaining(200_000_000, 50_000_000), 150_000_000);
        assert_eq!(free_tier_remaining(200_000_000, 250_000_000), 0);
    }

    #[test]
    fn test_initial_snapshot_is_estimated() {
        let snapshot = BillingSnapshot::initial(200_000_000);

        assert_eq!(snapshot.freshness, Freshness::Estimated);
        assert_eq!(snapshot.status, BillingStatus::NotConfigured);
        assert!(snapshot.fetched_at.is_none());
        assert!((snapshot.free_tier_remaining() - 200.0).abs() < 0.0001);
    }

    #[test]
    fn test_freshness_serialization() {
        assert_eq!(serde_json::to_string(&Freshness::Stale).unwrap(), "\"stale\"");
        assert_eq!(
            serde_json::to_string(&BillingStatus::NotConfigured).unwrap(),
            "\"not_configured\""
        );
    }
}
