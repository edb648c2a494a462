//! Configuration loading

mod app_config;

pub use app_config::{
    AppConfig, BillingConfig, BillingProviderKind, BudgetConfig, CacheConfig, GeocodingConfig,
    LimitConfig, LogFormat, LoggingConfig, UsageConfig,
};
