// ABOUTME: Content-addressed artifact reference parsing and validation.
// ABOUTME: Handles bare digests (sha256:abc) and repository[:tag][@digest] forms.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const DIGEST_ALGORITHMS: &[&str] = &["sha256", "sha384", "sha512"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseArtifactRefError {
    #[error("artifact reference cannot be empty")]
    Empty,

    #[error("invalid character in artifact reference: {0}")]
    InvalidChar(char),

    #[error("invalid digest '{0}': expected <algorithm>:<hex>")]
    InvalidDigest(String),

    #[error("artifact reference '{0}' has neither a tag nor a digest")]
    Unpinned(String),

    #[error("invalid artifact reference format: {0}")]
    InvalidFormat(String),
}

/// Reference to an immutable build output.
///
/// Either a bare digest (`sha256:1f2e...`) or a repository reference carrying
/// a tag and/or digest (`registry.example.com/app:v1@sha256:...`). A reference
/// without tag or digest is rejected since it would not identify one artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactRef {
    repository: Option<String>,
    tag: Option<String>,
    digest: Option<String>,
}

impl ArtifactRef {
    pub fn parse(input: &str) -> Result<Self, ParseArtifactRefError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ParseArtifactRefError::Empty);
        }

        if let Some(c) = input.chars().find(|c| {
            !c.is_ascii_alphanumeric() && !matches!(c, '/' | ':' | '.' | '-' | '_' | '@')
        }) {
            return Err(ParseArtifactRefError::InvalidChar(c));
        }

        // Bare digest: no repository part at all
        if !input.contains('/')
            && !input.contains('@')
            && let Some((algorithm, _)) = input.split_once(':')
            && DIGEST_ALGORITHMS.contains(&algorithm)
        {
            return Ok(Self {
                repository: None,
                tag: None,
                digest: Some(validate_digest(input)?),
            });
        }

        let (without_digest, digest) = match input.split_once('@') {
            Some((before, after)) => (before, Some(validate_digest(after)?)),
            None => (input, None),
        };

        // A colon after the last slash separates the tag; earlier colons
        // belong to a registry port.
        let (repository, tag) = match without_digest.rsplit_once(':') {
            Some((before, after)) if !after.contains('/') => (before, Some(after.to_string())),
            _ => (without_digest, None),
        };

        if repository.is_empty() || repository.starts_with('/') || repository.ends_with('/') {
            return Err(ParseArtifactRefError::InvalidFormat(input.to_string()));
        }
        if tag.as_deref() == Some("") {
            return Err(ParseArtifactRefError::InvalidFormat(input.to_string()));
        }
        if tag.is_none() && digest.is_none() {
            return Err(ParseArtifactRefError::Unpinned(input.to_string()));
        }

        Ok(Self {
            repository: Some(repository.to_string()),
            tag,
            digest,
        })
    }

    pub fn repository(&self) -> Option<&str> {
        self.repository.as_deref()
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// True when the reference pins content by digest rather than a movable tag.
    pub fn is_content_addressed(&self) -> bool {
        self.digest.is_some()
    }
}

fn validate_digest(digest: &str) -> Result<String, ParseArtifactRefError> {
    let invalid = || ParseArtifactRefError::InvalidDigest(digest.to_string());
    let (algorithm, hex) = digest.split_once(':').ok_or_else(invalid)?;
    if !DIGEST_ALGORITHMS.contains(&algorithm)
        || hex.is_empty()
        || !hex.chars().all(|c| c.is_ascii_hexdigit())
    {
        return Err(invalid());
    }
    Ok(digest.to_ascii_lowercase())
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref repository) = self.repository {
            write!(f, "{}", repository)?;
            if let Some(ref tag) = self.tag {
                write!(f, ":{}", tag)?;
            }
            if let Some(ref digest) = self.digest {
                write!(f, "@{}", digest)?;
            }
            Ok(())
        } else {
            write!(f, "{}", self.digest.as_deref().unwrap_or_default())
        }
    }
}

impl FromStr for ArtifactRef {
    type Err = ParseArtifactRefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for ArtifactRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ArtifactRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Self::parse(&value).map_err(serde::de::Error::custom)
    }
}
