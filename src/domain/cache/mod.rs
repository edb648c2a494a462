//! Geocode cache domain

mod entry;
mod key;

pub use entry::{CacheEntry, GeocodeResult};
pub use key::GeocodeKey;

/// Outcome of a plain cache read; a miss is a normal result, not an error
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Hit(GeocodeResult),
    Miss,
}

impl CacheLookup {
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }

    pub fn into_value(self) -> Option<GeocodeResult> {
        match self {
            Self::Hit(value) => Some(value),
            Self::Miss => None,
        }
    }
}
