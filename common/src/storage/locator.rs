use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum LocatorError {
    #[error("Unparseable document locator '{raw}': {source}")]
    Unparseable {
        raw: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Unsupported locator scheme '{0}'")]
    UnsupportedScheme(String),

    #[error("Locator '{0}' has no bucket component")]
    MissingBucket(String),

    #[error("Locator '{0}' has no key component")]
    MissingKey(String),
}

/// Identifier of a stored document: bucket plus key path.
///
/// Two locators pointing at the same physical object compare equal, which is
/// what source deduplication keys on. The canonical form is `s3://bucket/key`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentLocator {
    bucket: String,
    key: String,
}

impl DocumentLocator {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Parses a raw locator string as cited by the generation chain.
    ///
    /// Accepts the canonical `s3://bucket/key` form, and the path-style HTTP
    /// form `https://host/bucket/key` emitted by some search backends, where
    /// the bucket is the first path segment and the key is everything after.
    pub fn parse(raw: &str) -> Result<Self, LocatorError> {
        let url = Url::parse(raw).map_err(|source| LocatorError::Unparseable {
            raw: raw.to_string(),
            source,
        })?;

        match url.scheme() {
            "s3" => {
                let bucket = url
                    .host_str()
                    .ok_or_else(|| LocatorError::MissingBucket(raw.to_string()))?;
                let key = url.path().trim_start_matches('/');
                if key.is_empty() {
                    return Err(LocatorError::MissingKey(raw.to_string()));
                }
                Ok(Self::new(bucket, key))
            }
            "http" | "https" => {
                let mut segments = url
                    .path_segments()
                    .ok_or_else(|| LocatorError::MissingBucket(raw.to_string()))?;
                let bucket = segments
                    .next()
                    .filter(|segment| !segment.is_empty())
                    .ok_or_else(|| LocatorError::MissingBucket(raw.to_string()))?
                    .to_string();
                let key = segments.collect::<Vec<_>>().join("/");
                if key.is_empty() {
                    return Err(LocatorError::MissingKey(raw.to_string()));
                }
                Ok(Self::new(bucket, key))
            }
            other => Err(LocatorError::UnsupportedScheme(other.to_string())),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the key with the given documents prefix stripped.
    ///
    /// Presentation only; resolution is always keyed on the full locator.
    pub fn display_name(&self, prefix: &str) -> String {
        self.key
            .strip_prefix(prefix)
            .unwrap_or(&self.key)
            .to_string()
    }
}

impl fmt::Display for DocumentLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}
