//! Cache snapshot persistence

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::GeocodeCache;
use crate::domain::cache::CacheEntry;
use crate::domain::{Clock, DomainError};

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct CacheSnapshot {
    version: u32,
    saved_at: DateTime<Utc>,
    entries: Vec<CacheEntry>,
}

/// JSON file holding the cache between runs
#[derive(Debug, Clone)]
pub struct CacheSnapshotStore {
    path: PathBuf,
}

impl CacheSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the snapshot; a missing or unreadable file yields no entries
    pub async fn load(&self) -> Vec<CacheEntry> {
        let contents = match fs::read(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No cache snapshot found, starting empty");
                return Vec::new();
            }
            Err(e) => {
                warn!(path = %self.path.display(), "Failed to read cache snapshot, starting empty: {}", e);
                return Vec::new();
            }
        };

        match serde_json::from_slice::<CacheSnapshot>(&contents) {
            Ok(snapshot) if snapshot.version == SNAPSHOT_VERSION => {
                debug!(
                    path = %self.path.display(),
                    entries = snapshot.entries.len(),
                    saved_at = %snapshot.saved_at,
                    "Loaded cache snapshot"
                );
                snapshot.entries
            }
            Ok(snapshot) => {
                warn!(
                    path = %self.path.display(),
                    version = snapshot.version,
                    "Unsupported cache snapshot version, starting empty"
                );
                Vec::new()
            }
            Err(e) => {
                warn!(path = %self.path.display(), "Corrupt cache snapshot, starting empty: {}", e);
                Vec::new()
            }
        }
    }

    /// Write the snapshot through a temp file and rename
    pub async fn save(&self, entries: Vec<CacheEntry>, saved_at: DateTime<Utc>) -> Result<usize, DomainError> {
        let count = entries.len();
        let snapshot = CacheSnapshot {
            version: SNAPSHOT_VERSION,
            saved_at,
            entries,
        };

        let bytes = serde_json::to_vec(&snapshot)
            .map_err(|e| DomainError::persistence(format!("Failed to encode cache snapshot: {}", e)))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(|e| {
                DomainError::persistence(format!(
                    "Failed to create snapshot directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, &bytes).await.map_err(|e| {
            DomainError::persistence(format!("Failed to write {}: {}", tmp.display(), e))
        })?;
        fs::rename(&tmp, &self.path).await.map_err(|e| {
            DomainError::persistence(format!(
                "Failed to move snapshot into place at {}: {}",
                self.path.display(),
                e
            ))
        })?;

        Ok(count)
    }

    /// Restore `cache` from disk, returning the number of live entries loaded
    pub async fn restore_into(&self, cache: &GeocodeCache) -> Result<usize, DomainError> {
        let entries = self.load().await;
        let restored = cache.restore(entries)?;
        info!(path = %self.path.display(), restored, "Restored geocode cache");
        Ok(restored)
    }

    /// Persist the live entries of `cache`
    pub async fn checkpoint(&self, cache: &GeocodeCache, clock: &dyn Clock) -> Result<usize, DomainError> {
        let saved = self.save(cache.entries()?, clock.now()).await?;
        debug!(path = %self.path.display(), saved, "Checkpointed geocode cache");
        Ok(saved)
    }

    /// Checkpoint every `interval` until cancelled, then once more
    pub fn spawn_checkpoints(
        self,
        cache: GeocodeCache,
        clock: Arc<dyn Clock>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        if let Err(e) = self.checkpoint(&cache, clock.as_ref()).await {
                            warn!("Cache checkpoint failed: {}", e);
                        }
                    }
                }
            }

            match self.checkpoint(&cache, clock.as_ref()).await {
                Ok(saved) => info!(saved, "Saved geocode cache on shutdown"),
                Err(e) => warn!("Failed to save geocode cache on shutdown: {}", e),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;

    use super::*;
    use crate::domain::cache::{GeocodeKey, GeocodeResult};
    use crate::domain::clock::mock::ManualClock;
    use crate::infrastructure::cache::CacheSettings;

    fn cache_with(clock: Arc<ManualClock>) -> GeocodeCache {
        GeocodeCache::new(
            CacheSettings::new(ChronoDuration::hours(1), 100).unwrap(),
            clock,
        )
    }

    #[tokio::test]
    async fn test_snapshot_round_trip_through_cache() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheSnapshotStore::new(dir.path().join("cache").join("geocode.json"));
        let clock = Arc::new(ManualClock::at(2026, 9, 1, 12, 0));

        let cache = cache_with(clock.clone());
        cache
            .put(
                GeocodeKey::normalize("02139").unwrap(),
                GeocodeResult::new("Cambridge, MA 02139", 42.36, -71.1),
            )
            .unwrap();
        assert_eq!(store.checkpoint(&cache, clock.as_ref()).await.unwrap(), 1);

        let reloaded = cache_with(clock.clone());
        assert_eq!(store.restore_into(&reloaded).await.unwrap(), 1);
        assert!(
            reloaded
                .get(&GeocodeKey::normalize("02139").unwrap())
                .unwrap()
                .is_hit()
        );
    }

    #[tokio::test]
    async fn test_expired_entries_dropped_on_restore() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheSnapshotStore::new(dir.path().join("geocode.json"));
        let clock = Arc::new(ManualClock::at(2026, 9, 1, 12, 0));

        let cache = cache_with(clock.clone());
        cache
            .put(
                GeocodeKey::normalize("02139").unwrap(),
                GeocodeResult::new("Cambridge, MA 02139", 42.36, -71.1),
            )
            .unwrap();
        store.checkpoint(&cache, clock.as_ref()).await.unwrap();

        clock.advance(ChronoDuration::hours(2));
        let reloaded = cache_with(clock.clone());
        assert_eq!(store.restore_into(&reloaded).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_snapshot_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheSnapshotStore::new(dir.path().join("absent.json"));

        assert!(store.load().await.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geocode.json");
        tokio::fs::write(&path, b"{ this is not json").await.unwrap();

        let store = CacheSnapshotStore::new(&path);
        assert!(store.load().await.is_empty());
    }

    #[tokio::test]
    async fn test_checkpoint_task_saves_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geocode.json");
        let clock = Arc::new(ManualClock::at(2026, 9, 1, 12, 0));
        let cache = cache_with(clock.clone());
        cache
            .put(
                GeocodeKey::normalize("73301").unwrap(),
                GeocodeResult::new("Austin, TX 73301", 30.27, -97.74),
            )
            .unwrap();

        let cancel = CancellationToken::new();
        let handle = CacheSnapshotStore::new(&path).spawn_checkpoints(
            cache,
            clock,
            Duration::from_secs(3600),
            cancel.clone(),
        );

        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(CacheSnapshotStore::new(&path).load().await.len(), 1);
    }
}
