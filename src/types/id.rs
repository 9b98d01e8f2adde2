// ABOUTME: Opaque release attempt identifier backed by a random UUID.
// ABOUTME: Assigned once at trigger time and used as the key for stored state.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
#[error("invalid attempt id '{input}': {source}")]
pub struct ParseAttemptIdError {
    input: String,
    source: uuid::Error,
}

/// Identifier of a single release attempt.
#[must_use = "IDs reference stored attempts and should not be ignored"]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttemptId(Uuid);

impl AttemptId {
    /// Generate a fresh identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for AttemptId {
    type Err = ParseAttemptIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|source| ParseAttemptIdError {
                input: s.to_string(),
                source,
            })
    }
}

impl Serialize for AttemptId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AttemptId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(AttemptId::generate(), AttemptId::generate());
    }

    #[test]
    fn display_parses_back() {
        let id = AttemptId::generate();
        let parsed: AttemptId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn garbage_is_rejected() {
        let err = "not-an-id".parse::<AttemptId>().unwrap_err();
        assert!(err.to_string().contains("not-an-id"));
    }
}
