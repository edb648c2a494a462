//! Prometheus metrics infrastructure

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use super::config::MetricsConfig;

/// Install the Prometheus exporter with its own scrape listener
///
/// Returns whether a recorder was installed. Without one every
/// `record_*` call below is a no-op.
pub fn init_metrics(config: &MetricsConfig) -> bool {
    if !config.enabled {
        tracing::info!("Prometheus metrics disabled");
        return false;
    }

    let addr: SocketAddr = match config.listen_addr.parse() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!(
                "Invalid metrics listen address '{}': {}",
                config.listen_addr,
                e
            );
            return false;
        }
    };

    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => {
            register_default_metrics();
            tracing::info!("Prometheus metrics exporter listening on {}", addr);
            true
        }
        Err(e) => {
            tracing::error!("Failed to initialize Prometheus metrics: {}", e);
            false
        }
    }
}

fn register_default_metrics() {
    gauge!("market_meter_info", "version" => env!("CARGO_PKG_VERSION")).set(1.0);
}

/// Record a geocode cache read: `hit`, `miss` or `coalesced`
pub fn record_cache_lookup(outcome: &'static str) {
    counter!("geocode_cache_requests_total", "outcome" => outcome).increment(1);
}

/// Record a cache eviction: `lru` or `expired`
pub fn record_cache_eviction(reason: &'static str, count: u64) {
    counter!("geocode_cache_evictions_total", "reason" => reason).increment(count);
}

pub fn record_cache_size(entries: usize) {
    gauge!("geocode_cache_entries").set(entries as f64);
}

/// Record an executed billable call
pub fn record_billable_call(call_type: &str, units: u32, cost_micros: i64) {
    let labels = [("call_type", call_type.to_string())];

    counter!("billable_calls_total", &labels).increment(u64::from(units));
    counter!("billable_spend_micros_total", &labels).increment(cost_micros.max(0) as u64);
}

/// Record an executed call whose usage event could not be logged
pub fn record_usage_log_failure(call_type: &str) {
    counter!("usage_log_failures_total", "call_type" => call_type.to_string()).increment(1);
}

/// Record a refused reservation; `scope` is `day`, `month` or `search`
pub fn record_budget_denial(scope: &'static str) {
    counter!("budget_denials_total", "scope" => scope).increment(1);
}

pub fn record_period_spend(period: &'static str, spent_usd: f64) {
    gauge!("period_spend_usd", "period" => period).set(spent_usd);
}

/// Record a billing refresh: `actual`, `estimated` or `failed`
pub fn record_billing_refresh(status: &'static str) {
    counter!("billing_refresh_total", "status" => status).increment(1);
}
