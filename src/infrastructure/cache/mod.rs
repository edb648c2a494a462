//! Geocode cache infrastructure

mod geocode_cache;
mod snapshot;

pub use geocode_cache::{CacheFetch, CacheSettings, FetchSource, GeocodeCache, MAX_CACHE_TTL_SECS};
pub use snapshot::CacheSnapshotStore;
