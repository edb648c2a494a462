//! Dashboard summary assembly

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::domain::billing::{BillingDiscrepancy, BillingSnapshot, BillingStatus, Freshness};
use crate::domain::budget::PeriodBudgetStatus;
use crate::domain::usage::micros_to_usd;
use crate::infrastructure::billing::BillingReconciler;
use crate::infrastructure::budget::BudgetGuard;
use crate::infrastructure::usage::CostAggregator;

/// What the dashboard renders
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardSummary {
    /// Spend per the billing snapshot (actual when available)
    pub monthly_spend: f64,
    pub daily_spend: f64,
    /// Spend per internal metering
    pub monthly_estimate: f64,
    pub daily_estimate: f64,
    pub call_count: u64,
    pub free_tier_remaining: f64,
    pub last_updated: Option<DateTime<Utc>>,
    pub freshness: Freshness,
    pub status: BillingStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discrepancy: Option<BillingDiscrepancy>,
    pub budgets: Vec<PeriodBudgetStatus>,
    pub breakdown: BTreeMap<String, f64>,
    /// Month-to-date metered requests per billing service
    pub requests_by_service: BTreeMap<String, u64>,
}

/// Builds dashboard summaries from the reconciler, aggregator and guard
#[derive(Debug, Clone)]
pub struct DashboardService {
    reconciler: Arc<BillingReconciler>,
    aggregator: Arc<CostAggregator>,
    guard: Arc<BudgetGuard>,
}

impl DashboardService {
    pub fn new(
        reconciler: Arc<BillingReconciler>,
        aggregator: Arc<CostAggregator>,
        guard: Arc<BudgetGuard>,
    ) -> Self {
        Self {
            reconciler,
            aggregator,
            guard,
        }
    }

    /// Current summary; falls back to last-known or zero figures on error
    pub fn summary(&self) -> DashboardSummary {
        let snapshot = self.reconciler.latest();
        self.summarize(&snapshot)
    }

    /// Refresh billing once, then summarize
    pub async fn refresh(&self) -> DashboardSummary {
        match self.reconciler.refresh().await {
            Ok(snapshot) => self.summarize(&snapshot),
            Err(e) => {
                warn!("Billing refresh failed, serving fallback figures: {}", e);
                self.summary()
            }
        }
    }

    /// Summary for a snapshot received from the reconciler's channel
    pub fn summarize(&self, snapshot: &BillingSnapshot) -> DashboardSummary {
        let (monthly_estimate, daily_estimate, call_count) = match self.aggregator.snapshot() {
            Ok(totals) => (
                totals.month.spent(),
                totals.day.spent(),
                totals.month.call_count,
            ),
            Err(e) => {
                warn!("Metered totals unavailable for dashboard: {}", e);
                (0.0, 0.0, 0)
            }
        };

        let requests_by_service = match self.aggregator.call_counts() {
            Ok(counts) => {
                let mut by_service = BTreeMap::new();
                for (call_type, count) in counts {
                    *by_service.entry(call_type.service().to_string()).or_insert(0) += count;
                }
                by_service
            }
            Err(e) => {
                warn!("Request counts unavailable for dashboard: {}", e);
                BTreeMap::new()
            }
        };

        let budgets = self.guard.statuses().unwrap_or_else(|e| {
            warn!("Budget states unavailable for dashboard: {}", e);
            Vec::new()
        });

        DashboardSummary {
            monthly_spend: snapshot.monthly_total(),
            daily_spend: snapshot.daily_total(),
            monthly_estimate,
            daily_estimate,
            call_count,
            free_tier_remaining: snapshot.free_tier_remaining(),
            last_updated: snapshot.fetched_at,
            freshness: snapshot.freshness,
            status: snapshot.status,
            discrepancy: snapshot.discrepancy.clone(),
            budgets,
            breakdown: snapshot
                .breakdown
                .iter()
                .map(|(service, cost)| (service.clone(), micros_to_usd(*cost)))
                .collect(),
            requests_by_service,
        }
    }
}
