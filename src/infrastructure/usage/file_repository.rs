//! JSON-lines usage log

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::domain::DomainError;
use crate::domain::usage::{UsageEvent, UsageRepository};

/// Append-only usage log, one JSON event per line
///
/// A line that does not parse is corrupted persisted state and fails the
/// read instead of being skipped, since skipping it would understate spend.
#[derive(Debug)]
pub struct JsonlUsageRepository {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlUsageRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<Vec<UsageEvent>, DomainError> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(DomainError::persistence(format!(
                    "Failed to read usage log {}: {}",
                    self.path.display(),
                    e
                )));
            }
        };

        contents
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(index, line)| {
                serde_json::from_str(line).map_err(|e| {
                    DomainError::persistence(format!(
                        "Corrupt usage log {} at line {}: {}",
                        self.path.display(),
                        index + 1,
                        e
                    ))
                })
            })
            .collect()
    }
}

#[async_trait]
impl UsageRepository for JsonlUsageRepository {
    async fn append(&self, event: &UsageEvent) -> Result<(), DomainError> {
        let mut line = serde_json::to_string(event)
            .map_err(|e| DomainError::persistence(format!("Failed to encode usage event: {}", e)))?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(|e| {
                DomainError::persistence(format!(
                    "Failed to create usage log directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| {
                DomainError::persistence(format!(
                    "Failed to open usage log {}: {}",
                    self.path.display(),
                    e
                ))
            })?;

        file.write_all(line.as_bytes())
            .await
            .map_err(|e| DomainError::persistence(format!("Failed to append usage event: {}", e)))?;
        file.flush()
            .await
            .map_err(|e| DomainError::persistence(format!("Failed to flush usage log: {}", e)))?;

        Ok(())
    }

    async fn list_since(&self, since: DateTime<Utc>) -> Result<Vec<UsageEvent>, DomainError> {
        let mut events = self.read_all().await?;
        events.retain(|event| event.timestamp >= since);
        Ok(events)
    }

    async fn count(&self) -> Result<usize, DomainError> {
        Ok(self.read_all().await?.len())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::domain::usage::CallType;

    #[tokio::test]
    async fn test_missing_log_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonlUsageRepository::new(dir.path().join("usage.jsonl"));

        assert_eq!(repo.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_events_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("usage.jsonl");
        let at = Utc.with_ymd_and_hms(2026, 7, 4, 10, 0, 0).unwrap();

        let first = UsageEvent::new(at, CallType::Geocoding, 1, 5_000, Some("s-1".to_string()));
        let second = UsageEvent::new(at, CallType::PlaceDetails, 2, 34_000, None);

        {
            let repo = JsonlUsageRepository::new(&path);
            repo.append(&first).await.unwrap();
            repo.append(&second).await.unwrap();
        }

        let reopened = JsonlUsageRepository::new(&path);
        let events = reopened.list_since(at).await.unwrap();
        assert_eq!(events, vec![first, second]);
    }

    #[tokio::test]
    async fn test_corrupt_line_is_hard_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usage.jsonl");
        tokio::fs::write(&path, "{\"not\": \"an event\"}\n").await.unwrap();

        let repo = JsonlUsageRepository::new(&path);
        let result = repo.list_since(Utc::now()).await;

        assert!(matches!(result, Err(DomainError::Persistence { .. })));
    }
}
