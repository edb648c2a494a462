//! Observability infrastructure - Prometheus metrics

mod config;
pub mod metrics;

pub use config::MetricsConfig;
pub use metrics::init_metrics;
