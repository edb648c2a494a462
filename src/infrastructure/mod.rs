//! Infrastructure layer - metering, budgets, caching and billing implementations

pub mod billing;
pub mod budget;
pub mod cache;
pub mod geocoding;
pub mod logging;
pub mod observability;
pub mod services;
pub mod usage;
