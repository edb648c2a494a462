//! Domain layer - metering entities, value outcomes and collaborator traits

pub mod billing;
pub mod budget;
pub mod cache;
pub mod clock;
pub mod error;
pub mod geocoding;
pub mod usage;

pub use billing::{BillingProvider, BillingSnapshot, BillingStatus, Freshness};
pub use budget::{BudgetLimits, BudgetNotification, BudgetPolicy, BudgetState, Denial};
pub use cache::{CacheEntry, CacheLookup, GeocodeKey, GeocodeResult};
pub use clock::{Clock, SystemClock};
pub use error::DomainError;
pub use geocoding::GeocodingProvider;
pub use usage::{
    CallType, PeriodKind, PeriodTotal, PricingEntry, PricingTable, UsageEvent, UsageRepository,
};
