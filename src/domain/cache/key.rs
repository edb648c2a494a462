//! Normalized geocode cache keys

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::DomainError;

static ZIP_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{5})(?:-\d{4})?$").expect("valid zip regex"));

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

static COMMA_SPACING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*,\s*").expect("valid comma regex"));

/// Case and format normalized lookup key
///
/// US zip codes collapse to `zip:<5 digits>` so `90210`, ` 902 10 ` and
/// `90210-1234` share one entry; anything else becomes `addr:<text>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GeocodeKey(String);

impl GeocodeKey {
    pub fn normalize(raw: &str) -> Result<Self, DomainError> {
        let trimmed = raw.trim();

        if trimmed.is_empty() {
            return Err(DomainError::validation("Geocode key cannot be empty"));
        }

        let compact: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
        if let Some(captures) = ZIP_PATTERN.captures(&compact) {
            return Ok(Self(format!("zip:{}", &captures[1])));
        }

        let collapsed = WHITESPACE.replace_all(trimmed, " ").to_lowercase();
        let spaced = COMMA_SPACING.replace_all(&collapsed, ", ");

        Ok(Self(format!("addr:{}", spaced.trim_end_matches([',', ' ']))))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the key was derived from a zip code
    pub fn is_zip(&self) -> bool {
        self.0.starts_with("zip:")
    }
}

impl fmt::Display for GeocodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
