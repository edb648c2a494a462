//! Usage event persistence trait

use std::fmt::Debug;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::UsageEvent;
use crate::domain::DomainError;

/// Append-only store of usage events
#[async_trait]
pub trait UsageRepository: Send + Sync + Debug {
    /// Append an event; events are never updated or deleted
    async fn append(&self, event: &UsageEvent) -> Result<(), DomainError>;

    /// Events with `timestamp >= since`, in append order
    async fn list_since(&self, since: DateTime<Utc>) -> Result<Vec<UsageEvent>, DomainError>;

    /// Number of stored events
    async fn count(&self) -> Result<usize, DomainError>;
}
