//! Usage event entity

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{CallType, micros_to_usd};

/// Unique identifier for a usage event
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UsageEventId(String);

impl UsageEventId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a new unique ID
    pub fn generate() -> Self {
        Self(format!("usage-{}", uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for UsageEventId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for UsageEventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One executed billable call. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEvent {
    pub id: UsageEventId,
    pub timestamp: DateTime<Utc>,
    pub call_type: CallType,
    pub units: u32,
    /// Total cost of the event in micro-dollars
    pub cost_micros: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_id: Option<String>,
}

impl UsageEvent {
    pub fn new(
        timestamp: DateTime<Utc>,
        call_type: CallType,
        units: u32,
        cost_micros: i64,
        search_id: Option<String>,
    ) -> Self {
        Self {
            id: UsageEventId::generate(),
            timestamp,
            call_type,
            units,
            cost_micros,
            search_id,
        }
    }

    pub fn cost(&self) -> f64 {
        micros_to_usd(self.cost_micros)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_unique() {
        let a = UsageEventId::generate();
        let b = UsageEventId::generate();

        assert!(a.as_str().starts_with("usage-"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_event_serializes_as_snake_case() {
        let event = UsageEvent::new(Utc::now(), CallType::PlaceDetails, 2, 34_000, None);
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["call_type"], "place_details");
        assert_eq!(json["cost_micros"], 34_000);
        assert!(json.get("search_id").is_none());
        assert!((event.cost() - 0.034).abs() < 0.0000001);
    }
}
