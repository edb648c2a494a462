//! Infrastructure services

mod dashboard_service;
mod metered_geocoder;

pub use dashboard_service::{DashboardService, DashboardSummary};
pub use metered_geocoder::{GeocodeOutcome, MeteredGeocoder};
