//! Billing provider backed by the account billing API

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::domain::billing::{BillingPeriod, BillingProvider, BillingTotals};
use crate::domain::usage::usd_to_micros;
use crate::domain::DomainError;

/// Fetches invoiced spend over HTTP
#[derive(Debug, Clone)]
pub struct HttpBillingProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BillingResponse {
    monthly_total: f64,
    daily_total: f64,
    #[serde(default)]
    free_tier_remaining: Option<f64>,
    #[serde(default)]
    breakdown: BTreeMap<String, f64>,
}

impl HttpBillingProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, DomainError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DomainError::configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl BillingProvider for HttpBillingProvider {
    fn is_authoritative(&self) -> bool {
        true
    }

    async fn fetch_billing(
        &self,
        account_id: &str,
        period: &BillingPeriod,
    ) -> Result<BillingTotals, DomainError> {
        let url = format!("{}/v1/accounts/{}/billing", self.base_url, account_id);

        let mut request = self
            .client
            .get(&url)
            .query(&[("period", period.month_key.as_str())]);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| DomainError::billing_fetch(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DomainError::billing_fetch(format!("HTTP {}: {}", status, body)));
        }

        let body: BillingResponse = response
            .json()
            .await
            .map_err(|e| DomainError::billing_fetch(format!("Failed to parse response: {}", e)))?;

        if body.monthly_total < 0.0 || body.daily_total < 0.0 {
            return Err(DomainError::billing_fetch("Billing totals cannot be negative"));
        }

        Ok(BillingTotals {
            monthly_total_micros: usd_to_micros(body.monthly_total),
            daily_total_micros: usd_to_micros(body.daily_total),
            free_tier_remaining_micros: body.free_tier_remaining.map(usd_to_micros),
            breakdown: body
                .breakdown
                .into_iter()
                .map(|(service, usd)| (service, usd_to_micros(usd)))
                .collect(),
        })
    }
}
