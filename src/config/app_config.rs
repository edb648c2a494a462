use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

use crate::domain::DomainError;
use crate::domain::billing::RetryPolicy;
use crate::domain::budget::{BudgetLimits, BudgetPolicy};
use crate::domain::usage::{PricingTable, usd_to_micros};
use crate::infrastructure::cache::MAX_CACHE_TTL_SECS;
use crate::infrastructure::observability::MetricsConfig;

/// Application configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// USD unit cost overrides keyed by call type name
    #[serde(default)]
    pub pricing: HashMap<String, f64>,
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub usage: UsageConfig,
    #[serde(default)]
    pub billing: BillingConfig,
    #[serde(default)]
    pub geocoding: GeocodingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Soft and hard ceilings for one period, in USD
#[derive(Debug, Clone, Deserialize)]
pub struct LimitConfig {
    pub soft_limit_usd: f64,
    pub hard_limit_usd: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BudgetConfig {
    #[serde(default)]
    pub daily: Option<LimitConfig>,
    #[serde(default = "default_monthly_limits")]
    pub monthly: Option<LimitConfig>,
    /// Billable calls allowed per search; 0 disables the ceiling
    #[serde(default = "default_max_calls_per_search")]
    pub max_calls_per_search: u32,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            daily: None,
            monthly: default_monthly_limits(),
            max_calls_per_search: default_max_calls_per_search(),
        }
    }
}

impl BudgetConfig {
    pub fn to_policy(&self) -> Result<BudgetPolicy, DomainError> {
        let mut policy = BudgetPolicy::new().with_max_calls_per_search(self.max_calls_per_search);

        if let Some(daily) = &self.daily {
            policy = policy.with_daily(BudgetLimits::new(daily.soft_limit_usd, daily.hard_limit_usd)?);
        }
        if let Some(monthly) = &self.monthly {
            policy = policy
                .with_monthly(BudgetLimits::new(monthly.soft_limit_usd, monthly.hard_limit_usd)?);
        }

        Ok(policy)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
    /// Snapshot file; no persistence when unset
    #[serde(default)]
    pub snapshot_path: Option<String>,
    #[serde(default = "default_checkpoint_interval_secs")]
    pub checkpoint_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl_secs(),
            capacity: default_cache_capacity(),
            snapshot_path: None,
            checkpoint_interval_secs: default_checkpoint_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UsageConfig {
    /// JSON-lines usage log; events are kept in memory when unset
    #[serde(default)]
    pub log_path: Option<String>,
}

/// Which billing provider backs the reconciler
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingProviderKind {
    #[default]
    Estimate,
    Live,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BillingConfig {
    #[serde(default)]
    pub provider: BillingProviderKind,
    #[serde(default)]
    pub account_id: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_free_tier_usd")]
    pub free_tier_usd: f64,
    #[serde(default = "default_divergence_threshold_usd")]
    pub divergence_threshold_usd: f64,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            provider: BillingProviderKind::default(),
            account_id: String::new(),
            base_url: None,
            api_key: None,
            timeout_secs: default_http_timeout_secs(),
            refresh_interval_secs: default_refresh_interval_secs(),
            free_tier_usd: default_free_tier_usd(),
            divergence_threshold_usd: default_divergence_threshold_usd(),
            retry: RetryPolicy::default(),
        }
    }
}

impl BillingConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn free_tier_micros(&self) -> i64 {
        usd_to_micros(self.free_tier_usd)
    }

    pub fn divergence_threshold_micros(&self) -> i64 {
        usd_to_micros(self.divergence_threshold_usd)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeocodingConfig {
    #[serde(default = "default_geocoding_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GeocodingConfig {
    fn default() -> Self {
        Self {
            base_url: default_geocoding_base_url(),
            api_key: None,
            timeout_secs: default_http_timeout_secs(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_monthly_limits() -> Option<LimitConfig> {
    Some(LimitConfig {
        soft_limit_usd: 150.0,
        hard_limit_usd: 200.0,
    })
}

fn default_max_calls_per_search() -> u32 {
    200
}

fn default_cache_ttl_secs() -> u64 {
    30 * 24 * 60 * 60
}

fn default_cache_capacity() -> usize {
    10_000
}

fn default_checkpoint_interval_secs() -> u64 {
    600
}

fn default_http_timeout_secs() -> u64 {
    10
}

fn default_refresh_interval_secs() -> u64 {
    300
}

fn default_free_tier_usd() -> f64 {
    200.0
}

fn default_divergence_threshold_usd() -> f64 {
    1.0
}

fn default_geocoding_base_url() -> String {
    "https://maps.googleapis.com/maps/api/geocode/json".to_string()
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_with_env(None)
    }

    /// Load with `env` standing in for the process environment when given
    fn load_with_env(
        env: Option<config::Map<String, String>>,
    ) -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Reject settings the runtime cannot honor
    pub fn validate(&self) -> Result<(), DomainError> {
        self.budget.to_policy()?;
        self.pricing_table()?;

        if self.cache.capacity == 0 {
            return Err(DomainError::configuration("cache.capacity must be positive"));
        }
        if self.cache.ttl_secs == 0 {
            return Err(DomainError::configuration("cache.ttl_secs must be positive"));
        }
        if self.cache.ttl_secs > MAX_CACHE_TTL_SECS {
            return Err(DomainError::configuration(format!(
                "cache.ttl_secs cannot exceed {}",
                MAX_CACHE_TTL_SECS
            )));
        }
        if self.cache.checkpoint_interval_secs == 0 {
            return Err(DomainError::configuration(
                "cache.checkpoint_interval_secs must be positive",
            ));
        }
        if self.billing.refresh_interval_secs == 0 {
            return Err(DomainError::configuration(
                "billing.refresh_interval_secs must be positive",
            ));
        }
        if self.billing.free_tier_usd < 0.0 || self.billing.divergence_threshold_usd < 0.0 {
            return Err(DomainError::configuration(
                "billing amounts cannot be negative",
            ));
        }
        if self.billing.provider == BillingProviderKind::Live {
            if self.billing.base_url.as_deref().is_none_or(str::is_empty) {
                return Err(DomainError::configuration(
                    "billing.base_url is required for the live provider",
                ));
            }
            if self.billing.account_id.is_empty() {
                return Err(DomainError::configuration(
                    "billing.account_id is required for the live provider",
                ));
            }
        }

        Ok(())
    }

    /// Default maps pricing with configured overrides applied
    pub fn pricing_table(&self) -> Result<PricingTable, DomainError> {
        PricingTable::default_maps_pricing().with_overrides(&self.pricing)
    }
}
