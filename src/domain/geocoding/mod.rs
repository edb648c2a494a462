//! Geocoding collaborator trait

use async_trait::async_trait;

use crate::domain::DomainError;
use crate::domain::cache::GeocodeResult;

#[cfg(test)]
use mockall::automock;

/// Billable address lookup service
#[cfg_attr(test, automock)]
#[async_trait]
pub trait GeocodingProvider: Send + Sync {
    /// Resolve an address or zip code; every call is billed
    async fn lookup(&self, address: &str) -> Result<GeocodeResult, DomainError>;
}
