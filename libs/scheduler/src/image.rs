//! Container image references.
//!
//! References use the familiar `[registry/]repository[:tag][@digest]` form,
//! for example `quay.io/acme/web:v42@sha256:4fe1...`.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Errors that can occur when parsing an image reference.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ImageError {
    /// The reference string is empty.
    #[error("image reference cannot be empty")]
    Empty,

    /// The repository component is missing.
    #[error("image reference missing repository: {0}")]
    EmptyRepository(String),

    /// The tag separator is present but the tag is empty.
    #[error("image reference has an empty tag: {0}")]
    EmptyTag(String),

    /// The digest is not in `algorithm:hex` form.
    #[error("invalid image digest: {0}")]
    InvalidDigest(String),
}

/// A reference to a container image.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Image {
    /// Registry host, e.g. `quay.io` or `localhost:5000`.
    pub registry: Option<String>,

    /// Repository path, e.g. `acme/web`.
    pub repository: String,

    /// Tag, e.g. `v42`.
    pub tag: Option<String>,

    /// Content digest, e.g. `sha256:4fe1...`.
    pub digest: Option<String>,
}

impl Image {
    /// Create a reference to `repository` with no registry, tag or digest.
    pub fn new(repository: impl Into<String>) -> Self {
        Self {
            registry: None,
            repository: repository.into(),
            tag: None,
            digest: None,
        }
    }

    /// Set the tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Returns true if the reference pins a content digest.
    pub fn is_pinned(&self) -> bool {
        self.digest.is_some()
    }
}

fn is_registry(segment: &str) -> bool {
    segment.contains('.') || segment.contains(':') || segment == "localhost"
}

fn valid_digest(digest: &str) -> bool {
    let Some((algorithm, hex)) = digest.split_once(':') else {
        return false;
    };
    !algorithm.is_empty()
        && algorithm
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '+' || c == '.' || c == '_' || c == '-')
        && !hex.is_empty()
        && hex.chars().all(|c| c.is_ascii_hexdigit())
}

impl FromStr for Image {
    type Err = ImageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ImageError::Empty);
        }

        let (name, digest) = match s.split_once('@') {
            Some((name, digest)) => {
                if !valid_digest(digest) {
                    return Err(ImageError::InvalidDigest(digest.to_string()));
                }
                (name, Some(digest.to_string()))
            }
            None => (s, None),
        };

        let (registry, rest) = match name.split_once('/') {
            Some((first, rest)) if is_registry(first) => (Some(first.to_string()), rest),
            _ => (None, name),
        };

        // A ':' after the last '/' separates the tag.
        let last_segment = rest.rfind('/').map_or(0, |i| i + 1);
        let (repository, tag) = match rest[last_segment..].rfind(':') {
            Some(i) => {
                let split = last_segment + i;
                let tag = &rest[split + 1..];
                if tag.is_empty() {
                    return Err(ImageError::EmptyTag(s.to_string()));
                }
                (&rest[..split], Some(tag.to_string()))
            }
            None => (rest, None),
        };

        if repository.is_empty() {
            return Err(ImageError::EmptyRepository(s.to_string()));
        }

        Ok(Self {
            registry,
            repository: repository.to_string(),
            tag,
            digest,
        })
    }
}

impl fmt::Display for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(registry) = &self.registry {
            write!(f, "{registry}/")?;
        }
        write!(f, "{}", self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}
