use thiserror::Error;

use super::budget::Denial;

/// Core domain errors
///
/// Cloneable so a single failed lookup can be handed to every coalesced waiter.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DomainError {
    #[error("Unknown call type: {call_type}")]
    UnknownCallType { call_type: String },

    #[error("Budget denied: {denial}")]
    BudgetDenied { denial: Denial },

    #[error("Upstream lookup failed: {provider} - {message}")]
    UpstreamLookup { provider: String, message: String },

    #[error("Billing fetch failed: {message}")]
    BillingFetch { message: String },

    #[error("Persistence error: {message}")]
    Persistence { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DomainError {
    pub fn unknown_call_type(call_type: impl Into<String>) -> Self {
        Self::UnknownCallType {
            call_type: call_type.into(),
        }
    }

    pub fn budget_denied(denial: Denial) -> Self {
        Self::BudgetDenied { denial }
    }

    pub fn upstream_lookup(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UpstreamLookup {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn billing_fetch(message: impl Into<String>) -> Self {
        Self::BillingFetch {
            message: message.into(),
        }
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Lock poisoning is the only way a guarded section can fail
    pub fn lock_poisoned(what: &str, error: impl std::fmt::Display) -> Self {
        Self::internal(format!("Failed to acquire {} lock: {}", what, error))
    }
}
