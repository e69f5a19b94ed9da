//! Test doubles for the answer pipeline, shared with downstream crates via
//! the `test-utils` feature.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use common::{error::AppError, storage::locator::DocumentLocator};

use crate::chain::{AnswerChain, AnswerResult, GenerationError, SourceDocument};
use crate::session::Turn;
use crate::sources::SourceAccess;

/// Chain stub returning a fixed answer and cited source URIs.
pub struct StaticAnswerChain {
    answer: String,
    cited_sources: Vec<String>,
}

impl StaticAnswerChain {
    pub fn new(answer: impl Into<String>, cited_sources: Vec<String>) -> Self {
        Self {
            answer: answer.into(),
            cited_sources,
        }
    }
}

#[async_trait]
impl AnswerChain for StaticAnswerChain {
    async fn run(
        &self,
        _question: &str,
        _history: &[Turn],
    ) -> Result<AnswerResult, GenerationError> {
        let source_documents = if self.cited_sources.is_empty() {
            None
        } else {
            Some(
                self.cited_sources
                    .iter()
                    .map(|source| SourceDocument {
                        source: source.clone(),
                        excerpt: None,
                    })
                    .collect(),
            )
        };

        Ok(AnswerResult {
            answer: self.answer.clone(),
            source_documents,
        })
    }
}

/// Chain stub that always fails, for exercising the errored path.
pub struct FailingAnswerChain;

#[async_trait]
impl AnswerChain for FailingAnswerChain {
    async fn run(
        &self,
        _question: &str,
        _history: &[Turn],
    ) -> Result<AnswerResult, GenerationError> {
        Err(GenerationError::Malformed(
            "stubbed chain failure".to_string(),
        ))
    }
}

/// Chain stub that sleeps before answering, for exercising timeouts.
pub struct DelayedAnswerChain {
    delay: Duration,
    inner: StaticAnswerChain,
}

impl DelayedAnswerChain {
    pub fn new(delay: Duration, inner: StaticAnswerChain) -> Self {
        Self { delay, inner }
    }
}

#[async_trait]
impl AnswerChain for DelayedAnswerChain {
    async fn run(
        &self,
        question: &str,
        history: &[Turn],
    ) -> Result<AnswerResult, GenerationError> {
        tokio::time::sleep(self.delay).await;
        self.inner.run(question, history).await
    }
}

/// Source access stub over an in-memory object map. Locators absent from the
/// map fail both backend calls.
#[derive(Default)]
pub struct StaticSourceAccess {
    objects: HashMap<DocumentLocator, u64>,
}

impl StaticSourceAccess {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object(mut self, locator: DocumentLocator, size_bytes: u64) -> Self {
        self.objects.insert(locator, size_bytes);
        self
    }
}

#[async_trait]
impl SourceAccess for StaticSourceAccess {
    async fn signed_url(
        &self,
        locator: &DocumentLocator,
        expires_in: Duration,
    ) -> Result<Url, AppError> {
        if !self.objects.contains_key(locator) {
            return Err(AppError::NotFound(locator.to_string()));
        }

        let url = format!(
            "https://signed.example/{}/{}?expires={}",
            locator.bucket(),
            locator.key(),
            expires_in.as_secs()
        );
        Url::parse(&url).map_err(|e| AppError::InternalError(e.to_string()))
    }

    async fn size_bytes(&self, locator: &DocumentLocator) -> Result<u64, AppError> {
        self.objects
            .get(locator)
            .copied()
            .ok_or_else(|| AppError::NotFound(locator.to_string()))
    }
}
