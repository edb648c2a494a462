//! Billing provider selection

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use super::estimate_provider::EstimateBillingProvider;
use super::http_provider::HttpBillingProvider;
use super::reconciler::ReconcilerSettings;
use crate::config::{BillingConfig, BillingProviderKind};
use crate::domain::billing::BillingProvider;
use crate::domain::DomainError;
use crate::infrastructure::usage::CostAggregator;

/// Build the provider named by `config`
pub fn create_billing_provider(
    config: &BillingConfig,
    aggregator: Arc<CostAggregator>,
) -> Result<Arc<dyn BillingProvider>, DomainError> {
    match config.provider {
        BillingProviderKind::Estimate => {
            info!("Billing reconciliation uses internal metering estimates");
            Ok(Arc::new(EstimateBillingProvider::new(aggregator)))
        }
        BillingProviderKind::Live => {
            let base_url = config
                .base_url
                .as_deref()
                .filter(|url| !url.is_empty())
                .ok_or_else(|| {
                    DomainError::configuration("billing.base_url is required for the live provider")
                })?;
            if config.account_id.is_empty() {
                return Err(DomainError::configuration(
                    "billing.account_id is required for the live provider",
                ));
            }

            info!(base_url, account_id = %config.account_id, "Billing reconciliation uses live billing API");
            Ok(Arc::new(HttpBillingProvider::new(
                base_url,
                config.api_key.clone(),
                Duration::from_secs(config.timeout_secs),
            )?))
        }
    }
}

/// Reconciler settings derived from `config`
pub fn reconciler_settings(config: &BillingConfig) -> ReconcilerSettings {
    ReconcilerSettings {
        account_id: config.account_id.clone(),
        refresh_interval: config.refresh_interval(),
        retry: config.retry.clone(),
        free_tier_micros: config.free_tier_micros(),
        divergence_threshold_micros: config.divergence_threshold_micros(),
    }
}
