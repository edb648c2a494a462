//! Billing domain

mod provider;
mod retry;
mod snapshot;

#[cfg(test)]
pub use provider::MockBillingProvider;
pub use provider::BillingProvider;
pub use retry::RetryPolicy;
pub use snapshot::{
    free_tier_remaining, BillingDiscrepancy, BillingPeriod, BillingSnapshot, BillingStatus,
    BillingTotals, Freshness,
};
