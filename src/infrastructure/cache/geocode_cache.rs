//! Bounded geocode cache with TTL, exact LRU eviction and request coalescing

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, trace, warn};

use crate::domain::cache::{CacheEntry, CacheLookup, GeocodeKey, GeocodeResult};
use crate::domain::{Clock, DomainError};
use crate::infrastructure::observability::metrics;

/// Expired entries are swept at most this often outside capacity pressure
const SWEEP_INTERVAL_SECS: i64 = 300;

/// Longest TTL an entry may be given: ten years
pub const MAX_CACHE_TTL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

fn max_ttl() -> Duration {
    Duration::seconds(MAX_CACHE_TTL_SECS as i64)
}

type SharedLookup = Shared<BoxFuture<'static, Result<GeocodeResult, DomainError>>>;

/// Cache bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    pub ttl: Duration,
    pub capacity: usize,
}

impl CacheSettings {
    pub fn new(ttl: Duration, capacity: usize) -> Result<Self, DomainError> {
        if capacity == 0 {
            return Err(DomainError::validation("Cache capacity must be positive"));
        }
        if ttl <= Duration::zero() {
            return Err(DomainError::validation("Cache TTL must be positive"));
        }
        if ttl > max_ttl() {
            return Err(DomainError::validation(format!(
                "Cache TTL cannot exceed {} seconds",
                MAX_CACHE_TTL_SECS
            )));
        }

        Ok(Self { ttl, capacity })
    }

    /// Settings from a TTL in whole seconds
    pub fn from_secs(ttl_secs: u64, capacity: usize) -> Result<Self, DomainError> {
        let ttl = i64::try_from(ttl_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .ok_or_else(|| DomainError::validation(format!("Cache TTL {}s is out of range", ttl_secs)))?;

        Self::new(ttl, capacity)
    }
}

/// Where a [`GeocodeCache::get_or_fetch`] value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchSource {
    /// Served from the cache
    Cached,
    /// This caller ran the upstream lookup
    Fetched,
    /// Another caller's in-flight lookup was awaited
    Coalesced,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheFetch {
    pub value: GeocodeResult,
    pub source: FetchSource,
}

struct Slot {
    entry: CacheEntry,
    tick: u64,
}

struct CacheState {
    entries: HashMap<GeocodeKey, Slot>,
    /// Access order; the smallest tick is the least recently used key
    recency: BTreeMap<u64, GeocodeKey>,
    next_tick: u64,
    last_sweep: DateTime<Utc>,
}

impl CacheState {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            next_tick: 0,
            last_sweep: now,
        }
    }

    fn tick(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }

    fn touch(&mut self, key: &GeocodeKey) -> Option<GeocodeResult> {
        let tick = self.tick();
        let slot = self.entries.get_mut(key)?;
        let previous = std::mem::replace(&mut slot.tick, tick);
        let value = slot.entry.value.clone();

        self.recency.remove(&previous);
        self.recency.insert(tick, key.clone());
        Some(value)
    }

    fn remove(&mut self, key: &GeocodeKey) -> Option<CacheEntry> {
        let slot = self.entries.remove(key)?;
        self.recency.remove(&slot.tick);
        Some(slot.entry)
    }

    fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        self.last_sweep = now;

        let expired: Vec<GeocodeKey> = self
            .entries
            .iter()
            .filter(|(_, slot)| slot.entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.remove(key);
        }

        if !expired.is_empty() {
            metrics::record_cache_eviction("expired", expired.len() as u64);
            debug!(count = expired.len(), "Swept expired geocode entries");
        }
        expired.len()
    }

    fn evict_lru(&mut self) -> Option<GeocodeKey> {
        let (_, key) = self.recency.pop_first()?;
        self.entries.remove(&key);
        metrics::record_cache_eviction("lru", 1);
        trace!(key = %key, "Evicted least recently used geocode entry");
        Some(key)
    }

    fn insert(&mut self, entry: CacheEntry, capacity: usize, now: DateTime<Utc>) {
        if now - self.last_sweep >= Duration::seconds(SWEEP_INTERVAL_SECS) {
            self.sweep(now);
        }

        if self.remove(&entry.key).is_none() && self.entries.len() >= capacity {
            self.sweep(now);
            while self.entries.len() >= capacity {
                if self.evict_lru().is_none() {
                    break;
                }
            }
        }

        let tick = self.tick();
        self.recency.insert(tick, entry.key.clone());
        self.entries.insert(entry.key.clone(), Slot { entry, tick });
    }
}

struct CacheInner {
    settings: CacheSettings,
    clock: Arc<dyn Clock>,
    state: Mutex<CacheState>,
    in_flight: Mutex<HashMap<GeocodeKey, SharedLookup>>,
}

impl CacheInner {
    fn state(&self) -> Result<MutexGuard<'_, CacheState>, DomainError> {
        self.state
            .lock()
            .map_err(|e| DomainError::lock_poisoned("geocode cache", e))
    }

    fn read(&self, key: &GeocodeKey) -> Result<CacheLookup, DomainError> {
        let now = self.clock.now();
        let mut state = self.state()?;

        let expired = match state.entries.get(key) {
            Some(slot) => slot.entry.is_expired(now),
            None => return Ok(CacheLookup::Miss),
        };

        if expired {
            state.remove(key);
            metrics::record_cache_eviction("expired", 1);
            return Ok(CacheLookup::Miss);
        }

        Ok(state
            .touch(key)
            .map(CacheLookup::Hit)
            .unwrap_or(CacheLookup::Miss))
    }

    fn store(&self, key: GeocodeKey, value: GeocodeResult, ttl: Duration) -> Result<(), DomainError> {
        let now = self.clock.now();
        let entry = CacheEntry::new(key, value, now, ttl)?;

        let mut state = self.state()?;
        state.insert(entry, self.settings.capacity, now);
        metrics::record_cache_size(state.entries.len());
        Ok(())
    }
}

/// Normalized-location to geocode result cache
///
/// Cloning shares the same underlying cache.
#[derive(Clone)]
pub struct GeocodeCache {
    inner: Arc<CacheInner>,
}

impl GeocodeCache {
    pub fn new(settings: CacheSettings, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();

        Self {
            inner: Arc::new(CacheInner {
                settings,
                clock,
                state: Mutex::new(CacheState::new(now)),
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn settings(&self) -> CacheSettings {
        self.inner.settings
    }

    /// Read a key; expired entries are removed and reported as a miss
    pub fn get(&self, key: &GeocodeKey) -> Result<CacheLookup, DomainError> {
        let lookup = self.inner.read(key)?;
        metrics::record_cache_lookup(if lookup.is_hit() { "hit" } else { "miss" });
        Ok(lookup)
    }

    /// Insert with the default TTL
    pub fn put(&self, key: GeocodeKey, value: GeocodeResult) -> Result<(), DomainError> {
        self.inner.store(key, value, self.inner.settings.ttl)
    }

    pub fn put_with_ttl(
        &self,
        key: GeocodeKey,
        value: GeocodeResult,
        ttl: Duration,
    ) -> Result<(), DomainError> {
        self.inner.store(key, value, ttl)
    }

    pub fn remove(&self, key: &GeocodeKey) -> Result<Option<CacheEntry>, DomainError> {
        Ok(self.inner.state()?.remove(key))
    }

    /// Number of stored entries, including expired ones not yet swept
    pub fn len(&self) -> Result<usize, DomainError> {
        Ok(self.inner.state()?.entries.len())
    }

    pub fn is_empty(&self) -> Result<bool, DomainError> {
        Ok(self.len()? == 0)
    }

    pub fn sweep_expired(&self) -> Result<usize, DomainError> {
        let now = self.inner.clock.now();
        Ok(self.inner.state()?.sweep(now))
    }

    /// Live entries from least to most recently used
    pub fn entries(&self) -> Result<Vec<CacheEntry>, DomainError> {
        let now = self.inner.clock.now();
        let state = self.inner.state()?;

        Ok(state
            .recency
            .values()
            .filter_map(|key| state.entries.get(key))
            .filter(|slot| !slot.entry.is_expired(now))
            .map(|slot| slot.entry.clone())
            .collect())
    }

    /// Load entries in the given order, skipping expired ones
    pub fn restore(&self, entries: Vec<CacheEntry>) -> Result<usize, DomainError> {
        let now = self.inner.clock.now();
        let mut state = self.inner.state()?;
        let mut restored = 0;

        for entry in entries.into_iter().filter(|entry| !entry.is_expired(now)) {
            state.insert(entry, self.inner.settings.capacity, now);
            restored += 1;
        }

        metrics::record_cache_size(state.entries.len());
        Ok(restored)
    }

    /// Return the cached value or run `producer` once for all concurrent callers
    ///
    /// The lookup runs on its own task: it finishes and fills the cache even
    /// if the caller that started it is cancelled. A failed lookup is handed
    /// to every waiter and nothing is cached.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: &GeocodeKey,
        producer: F,
    ) -> Result<CacheFetch, DomainError>
    where
        F: FnOnce(GeocodeKey) -> Fut,
        Fut: Future<Output = Result<GeocodeResult, DomainError>> + Send + 'static,
    {
        if let CacheLookup::Hit(value) = self.inner.read(key)? {
            metrics::record_cache_lookup("hit");
            return Ok(CacheFetch {
                value,
                source: FetchSource::Cached,
            });
        }

        let (lookup, source) = {
            let mut in_flight = self
                .inner
                .in_flight
                .lock()
                .map_err(|e| DomainError::lock_poisoned("in-flight", e))?;

            match in_flight.get(key) {
                Some(existing) => (existing.clone(), FetchSource::Coalesced),
                None => {
                    // A lookup may have landed between the first read and taking the lock
                    if let CacheLookup::Hit(value) = self.inner.read(key)? {
                        metrics::record_cache_lookup("hit");
                        return Ok(CacheFetch {
                            value,
                            source: FetchSource::Cached,
                        });
                    }

                    let lookup = self.spawn_lookup(key.clone(), producer(key.clone()));
                    in_flight.insert(key.clone(), lookup.clone());
                    (lookup, FetchSource::Fetched)
                }
            }
        };

        match source {
            FetchSource::Coalesced => {
                metrics::record_cache_lookup("coalesced");
                trace!(key = %key, "Awaiting in-flight geocode lookup");
            }
            _ => metrics::record_cache_lookup("miss"),
        }

        let value = lookup.await?;
        Ok(CacheFetch { value, source })
    }

    fn spawn_lookup<Fut>(&self, key: GeocodeKey, lookup: Fut) -> SharedLookup
    where
        Fut: Future<Output = Result<GeocodeResult, DomainError>> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);

        let handle = tokio::spawn(async move {
            let result = lookup.await;

            match &result {
                Ok(value) => {
                    if let Err(e) = inner.store(key.clone(), value.clone(), inner.settings.ttl) {
                        warn!(key = %key, "Failed to cache geocode result: {}", e);
                    }
                }
                Err(e) => debug!(key = %key, "Geocode lookup failed, not caching: {}", e),
            }

            match inner.in_flight.lock() {
                Ok(mut in_flight) => {
                    in_flight.remove(&key);
                }
                Err(e) => warn!(key = %key, "Failed to clear in-flight lookup: {}", e),
            }

            result
        });

        handle
            .map(|joined| {
                joined.unwrap_or_else(|e| {
                    Err(DomainError::internal(format!(
                        "Geocode lookup task failed: {}",
                        e
                    )))
                })
            })
            .boxed()
            .shared()
    }
}

impl fmt::Debug for GeocodeCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeocodeCache")
            .field("settings", &self.inner.settings)
            .finish_non_exhaustive()
    }
}
