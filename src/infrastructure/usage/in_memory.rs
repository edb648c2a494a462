//! In-memory usage event repository

use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::DomainError;
use crate::domain::usage::{UsageEvent, UsageRepository};

/// Usage repository kept in process memory; lost on restart
#[derive(Debug, Default)]
pub struct InMemoryUsageRepository {
    events: RwLock<Vec<UsageEvent>>,
}

impl InMemoryUsageRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UsageRepository for InMemoryUsageRepository {
    async fn append(&self, event: &UsageEvent) -> Result<(), DomainError> {
        let mut events = self
            .events
            .write()
            .map_err(|e| DomainError::lock_poisoned("usage write", e))?;

        events.push(event.clone());
        Ok(())
    }

    async fn list_since(&self, since: DateTime<Utc>) -> Result<Vec<UsageEvent>, DomainError> {
        let events = self
            .events
            .read()
            .map_err(|e| DomainError::lock_poisoned("usage read", e))?;

        Ok(events
            .iter()
            .filter(|event| event.timestamp >= since)
            .cloned()
            .collect())
    }

    async fn count(&self) -> Result<usize, DomainError> {
        let events = self
            .events
            .read()
            .map_err(|e| DomainError::lock_poisoned("usage read", e))?;

        Ok(events.len())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::domain::usage::CallType;

    #[tokio::test]
    async fn test_append_and_list_since() {
        let repo = InMemoryUsageRepository::new();
        let start = Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap();

        let old = UsageEvent::new(start - Duration::days(1), CallType::Geocoding, 1, 5_000, None);
        let current = UsageEvent::new(start, CallType::PlaceDetails, 1, 17_000, None);

        repo.append(&old).await.unwrap();
        repo.append(&current).await.unwrap();

        let listed = repo.list_since(start).await.unwrap();
        assert_eq!(listed, vec![current]);
        assert_eq!(repo.count().await.unwrap(), 2);
    }
}
