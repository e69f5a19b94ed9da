use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    Retry,
};
use tracing::warn;
use url::Url;

use common::{
    error::AppError,
    storage::{locator::DocumentLocator, store::StorageManager},
    utils::format::bytes_to_mb,
};

/// Removes repeated locators, keeping the first occurrence's position.
///
/// Equality is structural equality on the locator's canonical form. Stateless
/// and infallible; empty input yields empty output.
pub fn dedupe_locators(
    locators: impl IntoIterator<Item = DocumentLocator>,
) -> Vec<DocumentLocator> {
    let mut seen = HashSet::new();
    locators
        .into_iter()
        .filter(|locator| seen.insert(locator.clone()))
        .collect()
}

#[derive(Error, Debug)]
#[error("Failed to resolve source {locator}: {cause}")]
pub struct ResolveError {
    pub locator: DocumentLocator,
    #[source]
    pub cause: AppError,
}

/// Backend operations needed to turn a locator into a rendered reference.
///
/// Both operations are idempotent reads, so retrying them is safe.
#[async_trait]
pub trait SourceAccess: Send + Sync {
    async fn signed_url(
        &self,
        locator: &DocumentLocator,
        expires_in: Duration,
    ) -> Result<Url, AppError>;

    async fn size_bytes(&self, locator: &DocumentLocator) -> Result<u64, AppError>;
}

#[async_trait]
impl SourceAccess for StorageManager {
    async fn signed_url(
        &self,
        locator: &DocumentLocator,
        expires_in: Duration,
    ) -> Result<Url, AppError> {
        self.signed_get_url(locator.key(), expires_in).await
    }

    async fn size_bytes(&self, locator: &DocumentLocator) -> Result<u64, AppError> {
        StorageManager::size_bytes(self, locator.key()).await
    }
}

/// A cited document resolved for rendering: display name plus a time-limited
/// access link. Created on demand per render and never stored on the session.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedSource {
    pub locator: DocumentLocator,
    pub display_name: String,
    #[serde(flatten)]
    pub link: SourceLink,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SourceLink {
    Available {
        url: Url,
        size_bytes: u64,
        size_mb: f64,
    },
    Unavailable,
}

impl ResolvedSource {
    pub fn is_available(&self) -> bool {
        matches!(self.link, SourceLink::Available { .. })
    }
}

/// Turns cited locators into displayable, time-limited references.
///
/// Stateless and safe to call concurrently; resolutions of distinct locators
/// are independent reads.
#[derive(Clone)]
pub struct SourceResolver {
    access: Arc<dyn SourceAccess>,
    documents_prefix: String,
    url_expiry: Duration,
    call_timeout: Duration,
}

impl SourceResolver {
    pub fn new(
        access: Arc<dyn SourceAccess>,
        documents_prefix: impl Into<String>,
        url_expiry: Duration,
        call_timeout: Duration,
    ) -> Self {
        Self {
            access,
            documents_prefix: documents_prefix.into(),
            url_expiry,
            call_timeout,
        }
    }

    /// Resolves a single locator to an access URL and size in bytes.
    pub async fn resolve(&self, locator: &DocumentLocator) -> Result<ResolvedSource, ResolveError> {
        let resolved = tokio::try_join!(
            self.signed_url_with_retry(locator),
            self.size_bytes_with_retry(locator)
        );

        match resolved {
            Ok((url, size_bytes)) => Ok(ResolvedSource {
                locator: locator.clone(),
                display_name: locator.display_name(&self.documents_prefix),
                link: SourceLink::Available {
                    url,
                    size_bytes,
                    size_mb: bytes_to_mb(size_bytes),
                },
            }),
            Err(cause) => Err(ResolveError {
                locator: locator.clone(),
                cause,
            }),
        }
    }

    /// Resolves every locator, recovering per source: a failed resolution
    /// renders as unavailable while its siblings still resolve normally.
    pub async fn resolve_all(&self, locators: &[DocumentLocator]) -> Vec<ResolvedSource> {
        let resolutions = locators
            .iter()
            .map(|locator| self.resolve_or_unavailable(locator));
        futures::future::join_all(resolutions).await
    }

    async fn resolve_or_unavailable(&self, locator: &DocumentLocator) -> ResolvedSource {
        match self.resolve(locator).await {
            Ok(resolved) => resolved,
            Err(error) => {
                warn!(
                    locator = %error.locator,
                    error = %error.cause,
                    "Source resolution failed; rendering reference as unavailable"
                );
                ResolvedSource {
                    locator: locator.clone(),
                    display_name: locator.display_name(&self.documents_prefix),
                    link: SourceLink::Unavailable,
                }
            }
        }
    }

    async fn signed_url_with_retry(&self, locator: &DocumentLocator) -> Result<Url, AppError> {
        let retry_strategy = ExponentialBackoff::from_millis(100).map(jitter).take(2);
        Retry::spawn(retry_strategy, || async {
            tokio::time::timeout(
                self.call_timeout,
                self.access.signed_url(locator, self.url_expiry),
            )
            .await
            .map_err(|_| AppError::Timeout(self.call_timeout))?
        })
        .await
    }

    async fn size_bytes_with_retry(&self, locator: &DocumentLocator) -> Result<u64, AppError> {
        let retry_strategy = ExponentialBackoff::from_millis(100).map(jitter).take(2);
        Retry::spawn(retry_strategy, || async {
            tokio::time::timeout(self.call_timeout, self.access.size_bytes(locator))
                .await
                .map_err(|_| AppError::Timeout(self.call_timeout))?
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StaticSourceAccess;

    fn locator(key: &str) -> DocumentLocator {
        DocumentLocator::new("kb-bucket", key)
    }

    fn resolver(access: StaticSourceAccess) -> SourceResolver {
        SourceResolver::new(
            Arc::new(access),
            "Documents/",
            Duration::from_secs(3600),
            Duration::from_secs(5),
        )
    }

    #[test]
    fn test_dedupe_keeps_first_occurrence_order() {
        let a = locator("Documents/a.pdf");
        let b = locator("Documents/b.pdf");
        let c = locator("Documents/c.pdf");

        let deduped = dedupe_locators(vec![a.clone(), b.clone(), a.clone(), c.clone(), b.clone()]);
        assert_eq!(deduped, vec![a, b, c]);
    }

    #[test]
    fn test_dedupe_empty_and_single() {
        assert_eq!(dedupe_locators(Vec::new()), Vec::new());

        let a = locator("Documents/a.pdf");
        assert_eq!(dedupe_locators(vec![a.clone()]), vec![a]);
    }

    #[tokio::test]
    async fn test_resolve_available_source() {
        let access = StaticSourceAccess::new().with_object(locator("Documents/manual.pdf"), 2_097_152);

        let resolved = resolver(access)
            .resolve(&locator("Documents/manual.pdf"))
            .await
            .expect("resolution should succeed");

        assert_eq!(resolved.display_name, "manual.pdf");
        match resolved.link {
            SourceLink::Available {
                size_bytes,
                size_mb,
                ..
            } => {
                assert_eq!(size_bytes, 2_097_152);
                assert!((size_mb - 2.0).abs() < f64::EPSILON);
            }
            SourceLink::Unavailable => panic!("expected an available link"),
        }
    }

    #[tokio::test]
    async fn test_resolve_missing_source_fails() {
        let result = resolver(StaticSourceAccess::new())
            .resolve(&locator("Documents/missing.pdf"))
            .await;

        let error = result.expect_err("resolution should fail");
        assert_eq!(error.locator, locator("Documents/missing.pdf"));
    }

    #[tokio::test]
    async fn test_resolve_all_recovers_per_source() {
        let good = locator("Documents/good.pdf");
        let bad = locator("Documents/bad.pdf");
        let access = StaticSourceAccess::new().with_object(good.clone(), 1024);

        let resolved = resolver(access).resolve_all(&[good, bad]).await;

        assert_eq!(resolved.len(), 2);
        assert!(resolved[0].is_available());
        assert!(!resolved[1].is_available());
        assert_eq!(resolved[1].display_name, "bad.pdf");
    }

    #[tokio::test]
    async fn test_resolve_all_empty_input() {
        let resolved = resolver(StaticSourceAccess::new()).resolve_all(&[]).await;
        assert!(resolved.is_empty());
    }
}
