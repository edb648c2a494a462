//! Budget-aware, cached geocoding

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::domain::budget::Denial;
use crate::domain::cache::{GeocodeKey, GeocodeResult};
use crate::domain::geocoding::GeocodingProvider;
use crate::domain::usage::CallType;
use crate::domain::DomainError;
use crate::infrastructure::budget::{BudgetGuard, ReservationOutcome};
use crate::infrastructure::cache::{FetchSource, GeocodeCache};
use crate::infrastructure::usage::RequestMeter;

/// Result of resolving one address
#[derive(Debug, Clone, PartialEq)]
pub enum GeocodeOutcome {
    /// Served from the cache without spending
    Cached(GeocodeResult),
    /// Looked up upstream and billed
    Fetched(GeocodeResult),
    /// The budget refused the lookup; stop paid calls for this search
    Denied(Denial),
}

impl GeocodeOutcome {
    pub fn result(&self) -> Option<&GeocodeResult> {
        match self {
            Self::Cached(result) | Self::Fetched(result) => Some(result),
            Self::Denied(_) => None,
        }
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, Self::Denied(_))
    }
}

/// Cache lookup, then reserve, call, record and store on a miss
#[derive(Clone)]
pub struct MeteredGeocoder {
    cache: GeocodeCache,
    guard: Arc<BudgetGuard>,
    meter: Arc<RequestMeter>,
    provider: Arc<dyn GeocodingProvider>,
}

impl MeteredGeocoder {
    pub fn new(
        cache: GeocodeCache,
        guard: Arc<BudgetGuard>,
        meter: Arc<RequestMeter>,
        provider: Arc<dyn GeocodingProvider>,
    ) -> Self {
        Self {
            cache,
            guard,
            meter,
            provider,
        }
    }

    pub fn cache(&self) -> &GeocodeCache {
        &self.cache
    }

    /// Resolve `address` on behalf of `search_id`
    ///
    /// Concurrent misses for the same key share one lookup, billed to the
    /// search that started it. A failed lookup records no usage and is not
    /// cached.
    pub async fn resolve(
        &self,
        address: &str,
        search_id: &str,
    ) -> Result<GeocodeOutcome, DomainError> {
        let key = GeocodeKey::normalize(address)?;

        let guard = self.guard.clone();
        let meter = self.meter.clone();
        let provider = self.provider.clone();
        let query = address.trim().to_string();
        let search_id = search_id.to_string();

        let fetched = self
            .cache
            .get_or_fetch(&key, move |key| async move {
                let reservation =
                    match guard.reserve_call(CallType::Geocoding, 1, Some(&search_id))? {
                        ReservationOutcome::Allowed(reservation) => reservation,
                        ReservationOutcome::Denied(denial) => {
                            info!(key = %key, search_id = %search_id, "Geocode lookup denied: {}", denial);
                            return Err(DomainError::budget_denied(denial));
                        }
                    };

                let result = provider.lookup(&query).await?;
                meter.settle(reservation, CallType::Geocoding, 1).await?;

                debug!(key = %key, search_id = %search_id, "Geocoded {}", result.formatted_address);
                Ok(result)
            })
            .await;

        match fetched {
            Ok(fetch) => Ok(match fetch.source {
                FetchSource::Cached => GeocodeOutcome::Cached(fetch.value),
                FetchSource::Fetched | FetchSource::Coalesced => GeocodeOutcome::Fetched(fetch.value),
            }),
            Err(DomainError::BudgetDenied { denial }) => Ok(GeocodeOutcome::Denied(denial)),
            Err(e) => Err(e),
        }
    }
}

impl fmt::Debug for MeteredGeocoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeteredGeocoder")
            .field("cache", &self.cache)
            .field("guard", &self.guard)
            .finish_non_exhaustive()
    }
}
