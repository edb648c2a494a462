//! Billing provider backed by local metering

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::billing::{BillingPeriod, BillingProvider, BillingTotals};
use crate::domain::DomainError;
use crate::infrastructure::usage::CostAggregator;

/// Reports the aggregator's own totals when no billing account is wired up
///
/// Never authoritative: its snapshots stay marked as estimates.
#[derive(Debug)]
pub struct EstimateBillingProvider {
    aggregator: Arc<CostAggregator>,
}

impl EstimateBillingProvider {
    pub fn new(aggregator: Arc<CostAggregator>) -> Self {
        Self { aggregator }
    }
}

#[async_trait]
impl BillingProvider for EstimateBillingProvider {
    fn is_authoritative(&self) -> bool {
        false
    }

    async fn fetch_billing(
        &self,
        _account_id: &str,
        _period: &BillingPeriod,
    ) -> Result<BillingTotals, DomainError> {
        let totals = self.aggregator.snapshot()?;

        let mut breakdown = BTreeMap::new();
        for (call_type, cost) in self.aggregator.breakdown()? {
            *breakdown.entry(call_type.service().to_string()).or_insert(0) += cost;
        }

        Ok(BillingTotals {
            monthly_total_micros: totals.month.spent_micros,
            daily_total_micros: totals.day.spent_micros,
            free_tier_remaining_micros: None,
            breakdown,
        })
    }
}
