//! Market Meter
//!
//! API usage metering and cost safety for market research searches:
//! - Per-call pricing and immutable usage records
//! - Daily and monthly budgets with atomic reservations
//! - A TTL/LRU geocode cache with request coalescing
//! - Billing reconciliation feeding a spend dashboard

pub mod cli;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use config::AppConfig;

use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, TimeZone, Utc};
use tracing::info;

use domain::billing::BillingSnapshot;
use domain::usage::{PricingTable, UsageRepository};
use domain::{Clock, SystemClock};
use infrastructure::billing::{create_billing_provider, reconciler_settings, BillingReconciler};
use infrastructure::budget::BudgetGuard;
use infrastructure::cache::{CacheSettings, CacheSnapshotStore, GeocodeCache};
use infrastructure::geocoding::HttpGeocodingProvider;
use infrastructure::services::{DashboardService, MeteredGeocoder};
use infrastructure::usage::{
    CostAggregator, InMemoryUsageRepository, JsonlUsageRepository, RequestMeter,
};

/// Every long-lived component, wired together
#[derive(Debug, Clone)]
pub struct MeteringRuntime {
    pub config: AppConfig,
    pub clock: Arc<dyn Clock>,
    pub pricing: Arc<PricingTable>,
    pub aggregator: Arc<CostAggregator>,
    pub repository: Arc<dyn UsageRepository>,
    pub guard: Arc<BudgetGuard>,
    pub meter: Arc<RequestMeter>,
    pub cache: GeocodeCache,
    pub snapshot_store: Option<CacheSnapshotStore>,
    pub reconciler: Arc<BillingReconciler>,
    pub geocoder: MeteredGeocoder,
    pub dashboard: DashboardService,
}

impl MeteringRuntime {
    /// Persist the geocode cache if a snapshot path is configured
    pub async fn checkpoint_cache(&self) -> anyhow::Result<usize> {
        match &self.snapshot_store {
            Some(store) => Ok(store.checkpoint(&self.cache, self.clock.as_ref()).await?),
            None => Ok(0),
        }
    }

    pub fn billing_snapshot(&self) -> BillingSnapshot {
        self.reconciler.latest()
    }
}

/// Build the runtime from configuration using the system clock
pub async fn create_runtime(config: &AppConfig) -> anyhow::Result<MeteringRuntime> {
    create_runtime_with_clock(config, Arc::new(SystemClock)).await
}

/// Build the runtime with an explicit clock
pub async fn create_runtime_with_clock(
    config: &AppConfig,
    clock: Arc<dyn Clock>,
) -> anyhow::Result<MeteringRuntime> {
    config.validate()?;

    let pricing = Arc::new(config.pricing_table()?);
    let policy = config.budget.to_policy()?;
    let aggregator = Arc::new(CostAggregator::new(clock.clone()));

    let repository: Arc<dyn UsageRepository> = match &config.usage.log_path {
        Some(path) => {
            info!(path = %path, "Usage log: JSON lines file");
            Arc::new(JsonlUsageRepository::new(path))
        }
        None => {
            info!("Usage log: in-memory");
            Arc::new(InMemoryUsageRepository::new())
        }
    };

    let now = clock.now();
    let month_start = Utc
        .with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(now);
    let events = repository.list_since(month_start).await?;
    let replayed = aggregator.rebuild_from(&events)?;
    info!(replayed, "Rebuilt period totals from usage log");

    let guard = Arc::new(BudgetGuard::new(
        aggregator.clone(),
        pricing.clone(),
        policy,
        clock.clone(),
    ));
    guard.check_thresholds()?;

    let meter = Arc::new(
        RequestMeter::new(
            pricing.clone(),
            aggregator.clone(),
            repository.clone(),
            clock.clone(),
        )
        .with_budget_guard(guard.clone()),
    );

    let cache_settings = CacheSettings::from_secs(config.cache.ttl_secs, config.cache.capacity)?;
    let cache = GeocodeCache::new(cache_settings, clock.clone());

    let snapshot_store = config.cache.snapshot_path.as_ref().map(CacheSnapshotStore::new);
    if let Some(store) = &snapshot_store {
        store.restore_into(&cache).await?;
    }

    let provider = create_billing_provider(&config.billing, aggregator.clone())?;
    let reconciler = Arc::new(BillingReconciler::new(
        provider,
        aggregator.clone(),
        clock.clone(),
        reconciler_settings(&config.billing),
    ));

    let geocoding_provider = Arc::new(HttpGeocodingProvider::new(
        config.geocoding.base_url.clone(),
        config.geocoding.api_key.clone(),
        Duration::from_secs(config.geocoding.timeout_secs),
    )?);
    let geocoder = MeteredGeocoder::new(
        cache.clone(),
        guard.clone(),
        meter.clone(),
        geocoding_provider,
    );

    let dashboard = DashboardService::new(reconciler.clone(), aggregator.clone(), guard.clone());

    info!(
        pricing_entries = pricing.entries().len(),
        cached = cache.len()?,
        "Metering runtime ready"
    );

    Ok(MeteringRuntime {
        config: config.clone(),
        clock,
        pricing,
        aggregator,
        repository,
        guard,
        meter,
        cache,
        snapshot_store,
        reconciler,
        geocoder,
        dashboard,
    })
}
