//! Budget domain
//!
//! Soft and hard spend ceilings per period, the state they put a period in,
//! and the values a reservation attempt can produce.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::DomainError;
use crate::domain::usage::{PeriodKind, micros_to_usd, usd_to_micros};

/// Soft and hard ceilings for one period kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetLimits {
    pub soft_limit_micros: i64,
    pub hard_limit_micros: i64,
}

impl BudgetLimits {
    pub fn new(soft_limit_usd: f64, hard_limit_usd: f64) -> Result<Self, DomainError> {
        let limits = Self {
            soft_limit_micros: usd_to_micros(soft_limit_usd),
            hard_limit_micros: usd_to_micros(hard_limit_usd),
        };
        limits.validate()?;
        Ok(limits)
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.hard_limit_micros <= 0 {
            return Err(DomainError::validation("Hard limit must be positive"));
        }

        if self.soft_limit_micros < 0 || self.soft_limit_micros > self.hard_limit_micros {
            return Err(DomainError::validation(format!(
                "Soft limit {:.2} must be between 0 and the hard limit {:.2}",
                micros_to_usd(self.soft_limit_micros),
                micros_to_usd(self.hard_limit_micros)
            )));
        }

        Ok(())
    }

    pub fn soft_limit(&self) -> f64 {
        micros_to_usd(self.soft_limit_micros)
    }

    pub fn hard_limit(&self) -> f64 {
        micros_to_usd(self.hard_limit_micros)
    }

    /// State a period is in after spending `spent_micros`
    pub fn state_for(&self, spent_micros: i64) -> BudgetState {
        if spent_micros >= self.hard_limit_micros {
            BudgetState::Blocked
        } else if spent_micros >= self.soft_limit_micros {
            BudgetState::Warning
        } else {
            BudgetState::Ok
        }
    }
}

/// Budget limits per period kind plus the per-search call ceiling
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BudgetPolicy {
    pub daily: Option<BudgetLimits>,
    pub monthly: Option<BudgetLimits>,
    /// Maximum billable calls per search; 0 disables the ceiling
    pub max_calls_per_search: u32,
}

impl BudgetPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_daily(mut self, limits: BudgetLimits) -> Self {
        self.daily = Some(limits);
        self
    }

    pub fn with_monthly(mut self, limits: BudgetLimits) -> Self {
        self.monthly = Some(limits);
        self
    }

    pub fn with_max_calls_per_search(mut self, max_calls: u32) -> Self {
        self.max_calls_per_search = max_calls;
        self
    }

    pub fn limits_for(&self, kind: PeriodKind) -> Option<&BudgetLimits> {
        match kind {
            PeriodKind::Day => self.daily.as_ref(),
            PeriodKind::Month => self.monthly.as_ref(),
        }
    }
}

/// Spend state of a period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetState {
    Ok,
    Warning,
    Blocked,
}

impl fmt::Display for BudgetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Warning => write!(f, "warning"),
            Self::Blocked => write!(f, "blocked"),
        }
    }
}

/// Why a reservation was refused
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Denial {
    /// The call would push the period past its hard limit
    Budget {
        period_kind: PeriodKind,
        state: BudgetState,
    },
    /// The search already used its call allowance
    SearchCap { search_id: String, limit: u32 },
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Budget { period_kind, state } => {
                write!(f, "{} budget exhausted (state: {})", period_kind, state)
            }
            Self::SearchCap { search_id, limit } => {
                write!(f, "search '{}' reached its limit of {} calls", search_id, limit)
            }
        }
    }
}

/// What a budget notification reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    SoftLimitReached,
    HardLimitReached,
    ReservationDenied,
}

/// Raised at most once per kind, period kind and period key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetNotification {
    pub kind: NotificationKind,
    pub period_kind: PeriodKind,
    pub period_key: String,
    pub state: BudgetState,
    pub spent_micros: i64,
    pub limit_micros: i64,
    pub raised_at: DateTime<Utc>,
}

/// Budget position of one period, for the dashboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodBudgetStatus {
    pub period_kind: PeriodKind,
    pub period_key: String,
    pub state: BudgetState,
    pub spent: f64,
    pub soft_limit: f64,
    pub hard_limit: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_thresholds() {
        let limits = BudgetLimits::new(8.0, 10.0).unwrap();

        assert_eq!(limits.state_for(0), BudgetState::Ok);
        assert_eq!(limits.state_for(7_999_999), BudgetState::Ok);
        assert_eq!(limits.state_for(8_000_000), BudgetState::Warning);
        assert_eq!(limits.state_for(10_000_000), BudgetState::Blocked);
    }

    #[test]
    fn test_limits_validation() {
        assert!(BudgetLimits::new(5.0, 5.0).is_ok());
        assert!(BudgetLimits::new(11.0, 10.0).is_err());
        assert!(BudgetLimits::new(0.0, 0.0).is_err());
    }

    #[test]
    fn test_policy_limits_for() {
        let monthly = BudgetLimits::new(150.0, 200.0).unwrap();
        let policy = BudgetPolicy::new().with_monthly(monthly);

        assert_eq!(policy.limits_for(PeriodKind::Month), Some(&monthly));
        assert_eq!(policy.limits_for(PeriodKind::Day), None);
    }

    #[test]
    fn test_denial_display() {
        let denial = Denial::SearchCap {
            search_id: "search-1".to_string(),
            limit: 200,
        };
        assert_eq!(
            denial.to_string(),
            "search 'search-1' reached its limit of 200 calls"
        );
    }
}
