//! Usage metering domain
//!
//! Call types and their unit prices, immutable usage events, and the
//! per-period running totals they roll up into.

mod period;
mod pricing;
mod record;
mod repository;

pub use period::{PeriodKind, PeriodTotal, SearchTotal};
pub use pricing::{CallType, CostEstimate, PricingEntry, PricingTable, SearchPlan};
pub use record::{UsageEvent, UsageEventId};
pub use repository::UsageRepository;

/// Convert a USD amount to micro-dollars
pub fn usd_to_micros(usd: f64) -> i64 {
    (usd * 1_000_000.0).round() as i64
}

/// Convert micro-dollars to a USD amount
pub fn micros_to_usd(micros: i64) -> f64 {
    micros as f64 / 1_000_000.0
}
