//! Cached geocode results

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::GeocodeKey;
use crate::domain::DomainError;

/// Result of a geocoding lookup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodeResult {
    pub formatted_address: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl GeocodeResult {
    pub fn new(formatted_address: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self {
            formatted_address: formatted_address.into(),
            latitude,
            longitude,
        }
    }
}

/// Cached value with its lifetime. Replaced whole, never patched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: GeocodeKey,
    pub value: GeocodeResult,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(
        key: GeocodeKey,
        value: GeocodeResult,
        created_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<Self, DomainError> {
        let expires_at = created_at
            .checked_add_signed(ttl)
            .ok_or_else(|| DomainError::validation(format!("Cache TTL {} is out of range", ttl)))?;

        Ok(Self {
            key,
            value,
            created_at,
            expires_at,
        })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
