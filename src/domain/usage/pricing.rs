//! Call type pricing

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{micros_to_usd, usd_to_micros};
use crate::domain::DomainError;

/// Kind of billable outbound call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallType {
    PlacesNearbySearch,
    PlacesTextSearch,
    PlaceDetails,
    Geocoding,
    MapsJavascriptLoad,
}

impl CallType {
    pub const ALL: [CallType; 5] = [
        CallType::PlacesNearbySearch,
        CallType::PlacesTextSearch,
        CallType::PlaceDetails,
        CallType::Geocoding,
        CallType::MapsJavascriptLoad,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PlacesNearbySearch => "places_nearby_search",
            Self::PlacesTextSearch => "places_text_search",
            Self::PlaceDetails => "place_details",
            Self::Geocoding => "geocoding",
            Self::MapsJavascriptLoad => "maps_javascript_load",
        }
    }

    /// Billing service the call is invoiced under
    pub fn service(&self) -> &'static str {
        match self {
            Self::PlacesNearbySearch | Self::PlacesTextSearch | Self::PlaceDetails => "places_api",
            Self::Geocoding => "geocoding_api",
            Self::MapsJavascriptLoad => "maps_javascript_api",
        }
    }
}

impl fmt::Display for CallType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CallType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");

        Self::ALL
            .into_iter()
            .find(|call_type| call_type.as_str() == normalized)
            .ok_or_else(|| DomainError::unknown_call_type(s))
    }
}

/// Unit cost of one call type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingEntry {
    pub call_type: CallType,
    /// Cost of a single call in micro-dollars
    pub unit_cost_micros: i64,
}

impl PricingEntry {
    pub fn new(call_type: CallType, unit_cost_usd: f64) -> Self {
        Self {
            call_type,
            unit_cost_micros: usd_to_micros(unit_cost_usd),
        }
    }

    pub fn unit_cost(&self) -> f64 {
        micros_to_usd(self.unit_cost_micros)
    }
}

/// Static call type to unit cost mapping, fixed at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricingTable {
    entries: HashMap<CallType, PricingEntry>,
}

impl PricingTable {
    pub fn new(entries: impl IntoIterator<Item = PricingEntry>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|entry| (entry.call_type, entry))
                .collect(),
        }
    }

    /// Published per-request prices for the maps platform
    pub fn default_maps_pricing() -> Self {
        Self::new([
            PricingEntry::new(CallType::PlacesNearbySearch, 0.032),
            PricingEntry::new(CallType::PlacesTextSearch, 0.032),
            PricingEntry::new(CallType::PlaceDetails, 0.017),
            PricingEntry::new(CallType::Geocoding, 0.005),
            PricingEntry::new(CallType::MapsJavascriptLoad, 0.007),
        ])
    }

    /// Apply USD overrides keyed by call type name
    pub fn with_overrides(mut self, overrides: &HashMap<String, f64>) -> Result<Self, DomainError> {
        for (name, usd) in overrides {
            let call_type: CallType = name.parse()?;

            if !usd.is_finite() || *usd < 0.0 {
                return Err(DomainError::validation(format!(
                    "Unit cost for '{}' must be a non-negative amount, got {}",
                    name, usd
                )));
            }

            self.entries
                .insert(call_type, PricingEntry::new(call_type, *usd));
        }

        Ok(self)
    }

    /// Unit cost in micro-dollars; a missing entry is never priced at zero
    pub fn unit_cost_micros(&self, call_type: CallType) -> Result<i64, DomainError> {
        self.entries
            .get(&call_type)
            .map(|entry| entry.unit_cost_micros)
            .ok_or_else(|| DomainError::unknown_call_type(call_type.as_str()))
    }

    /// Cost of `units` calls in micro-dollars
    pub fn cost_for(&self, call_type: CallType, units: u32) -> Result<i64, DomainError> {
        Ok(self.unit_cost_micros(call_type)? * i64::from(units))
    }

    /// Entries sorted by call type
    pub fn entries(&self) -> Vec<&PricingEntry> {
        let mut entries: Vec<_> = self.entries.values().collect();
        entries.sort_by_key(|entry| entry.call_type);
        entries
    }

    /// Worst-case cost of a search before it runs
    pub fn estimate(&self, plan: &SearchPlan) -> Result<CostEstimate, DomainError> {
        let nearby_search_calls = u64::from(plan.locations);
        let place_details_calls = u64::from(plan.locations) * u64::from(plan.places_per_location);

        let nearby_search_cost_micros =
            self.unit_cost_micros(CallType::PlacesNearbySearch)? * nearby_search_calls as i64;
        let place_details_cost_micros =
            self.unit_cost_micros(CallType::PlaceDetails)? * place_details_calls as i64;

        Ok(CostEstimate {
            nearby_search_calls,
            place_details_calls,
            total_calls: nearby_search_calls + place_details_calls,
            nearby_search_cost_micros,
            place_details_cost_micros,
            total_cost_micros: nearby_search_cost_micros + place_details_cost_micros,
        })
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::default_maps_pricing()
    }
}

/// Shape of a planned search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchPlan {
    pub locations: u32,
    pub places_per_location: u32,
}

impl Default for SearchPlan {
    fn default() -> Self {
        Self {
            locations: 50,
            places_per_location: 20,
        }
    }
}

/// Predicted call counts and spend for a [`SearchPlan`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostEstimate {
    pub nearby_search_calls: u64,
    pub place_details_calls: u64,
    pub total_calls: u64,
    pub nearby_search_cost_micros: i64,
    pub place_details_cost_micros: i64,
    pub total_cost_micros: i64,
}

impl CostEstimate {
    pub fn total_cost(&self) -> f64 {
        micros_to_usd(self.total_cost_micros)
    }
}
