//! Billing provider trait

use async_trait::async_trait;

use super::{BillingPeriod, BillingTotals};
use crate::domain::DomainError;

#[cfg(test)]
use mockall::automock;

/// Source of spend totals for an account
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BillingProvider: Send + Sync {
    /// Whether the totals come from the invoicing system rather than local metering
    fn is_authoritative(&self) -> bool;

    /// Fetch month and day totals for the account
    async fn fetch_billing(
        &self,
        account_id: &str,
        period: &BillingPeriod,
    ) -> Result<BillingTotals, DomainError>;
}
