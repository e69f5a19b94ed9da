use std::time::Duration;

use state_machines::core::GuardError;
use tracing::{debug, instrument, warn};

use common::{error::AppError, storage::locator::DocumentLocator};

use crate::chain::{AnswerChain, AnswerResult, GenerationError};
use crate::session::Turn;
use crate::sources::{dedupe_locators, ResolvedSource, SourceResolver};

use super::state::{AwaitingGeneration, Decorating, Idle, QueryExchangeMachine};
use super::ExchangeError;

pub struct ExchangeContext<'a> {
    pub chain: &'a dyn AnswerChain,
    pub resolver: &'a SourceResolver,
    pub question: String,
    pub history: Vec<Turn>,
    pub generation_timeout: Duration,
    pub answer: Option<AnswerResult>,
}

/// Everything needed to commit and render one completed exchange.
pub struct DecoratedAnswer {
    pub answer: AnswerResult,
    pub sources: Vec<DocumentLocator>,
    pub resolved_sources: Vec<ResolvedSource>,
}

#[instrument(level = "trace", skip_all)]
pub fn accept(
    machine: QueryExchangeMachine<(), Idle>,
    ctx: &ExchangeContext<'_>,
) -> Result<QueryExchangeMachine<(), AwaitingGeneration>, ExchangeError> {
    debug!(history_len = ctx.history.len(), "Accepted question");

    machine
        .accept()
        .map_err(|(_, guard)| map_guard_error("accept", guard).into())
}

#[instrument(level = "trace", skip_all)]
pub async fn generate(
    machine: QueryExchangeMachine<(), AwaitingGeneration>,
    ctx: &mut ExchangeContext<'_>,
) -> Result<QueryExchangeMachine<(), Decorating>, ExchangeError> {
    debug!("Invoking generation chain");
    let result = tokio::time::timeout(
        ctx.generation_timeout,
        ctx.chain.run(&ctx.question, &ctx.history),
    )
    .await
    .map_err(|_| GenerationError::Timeout(ctx.generation_timeout))??;

    ctx.answer = Some(result);

    machine
        .generated()
        .map_err(|(_, guard)| map_guard_error("generated", guard).into())
}

#[instrument(level = "trace", skip_all)]
pub async fn decorate(
    machine: QueryExchangeMachine<(), Decorating>,
    ctx: &mut ExchangeContext<'_>,
) -> Result<DecoratedAnswer, ExchangeError> {
    let answer = ctx.answer.take().ok_or_else(|| {
        AppError::InternalError("generation result missing before decoration".to_string())
    })?;

    // An absent document sequence is a valid zero-source answer.
    let cited = answer.source_documents.as_deref().unwrap_or_default();
    let mut locators = Vec::new();
    for document in cited {
        match DocumentLocator::parse(&document.source) {
            Ok(locator) => locators.push(locator),
            Err(e) => warn!(
                source = %document.source,
                error = %e,
                "Skipping cited source with unusable locator"
            ),
        }
    }

    let sources = dedupe_locators(locators);
    let resolved_sources = ctx.resolver.resolve_all(&sources).await;
    debug!(
        cited = cited.len(),
        unique = sources.len(),
        "Decorated generation result with resolved sources"
    );

    machine
        .decorated()
        .map_err(|(_, guard)| ExchangeError::from(map_guard_error("decorated", guard)))?;

    Ok(DecoratedAnswer {
        answer,
        sources,
        resolved_sources,
    })
}

fn map_guard_error(stage: &'static str, err: GuardError) -> AppError {
    AppError::InternalError(format!(
        "state machine guard '{stage}' failed: guard={}, event={}, kind={:?}",
        err.guard, err.event, err.kind
    ))
}
