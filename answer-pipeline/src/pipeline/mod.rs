mod stages;
mod state;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, instrument};

use common::error::AppError;

use crate::chain::{AnswerChain, GenerationError};
use crate::session::{ConversationSession, Exchange};
use crate::sources::{ResolvedSource, SourceResolver};

#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Internal(#[from] AppError),
}

/// One committed exchange plus its render-ready resolved sources.
#[derive(Debug)]
pub struct CompletedExchange {
    pub exchange: Exchange,
    pub resolved_sources: Vec<ResolvedSource>,
}

/// Drives one question through generation and decoration, and owns all
/// mutation of session state.
///
/// Session mutation is all-or-nothing at the commit: a question that fails
/// in generation or decoration leaves the exchange list and the history
/// window untouched, so a failed turn never pollutes later context.
pub struct QueryOrchestrator {
    chain: Arc<dyn AnswerChain>,
    resolver: SourceResolver,
    generation_timeout: Duration,
}

impl QueryOrchestrator {
    pub fn new(
        chain: Arc<dyn AnswerChain>,
        resolver: SourceResolver,
        generation_timeout: Duration,
    ) -> Self {
        Self {
            chain,
            resolver,
            generation_timeout,
        }
    }

    /// Runs one question against the given session. Callers serialize
    /// invocations per session; distinct sessions may run in parallel.
    #[instrument(skip_all, fields(session_id = %session.session_id))]
    pub async fn run_exchange(
        &self,
        session: &mut ConversationSession,
        question: &str,
    ) -> Result<CompletedExchange, ExchangeError> {
        let mut ctx = stages::ExchangeContext {
            chain: self.chain.as_ref(),
            resolver: &self.resolver,
            question: question.to_string(),
            history: session.history.as_context().to_vec(),
            generation_timeout: self.generation_timeout,
            answer: None,
        };

        let machine = state::idle();
        let machine = stages::accept(machine, &ctx)?;
        let machine = stages::generate(machine, &mut ctx).await?;
        let decorated = stages::decorate(machine, &mut ctx).await?;

        let resolved_sources = decorated.resolved_sources;
        let exchange = session.record_exchange(ctx.question, decorated.answer, decorated.sources);
        info!(
            exchange_id = exchange.id,
            sources = resolved_sources.len(),
            "Exchange complete"
        );

        Ok(CompletedExchange {
            exchange,
            resolved_sources,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Turn;
    use crate::testing::{
        DelayedAnswerChain, FailingAnswerChain, StaticAnswerChain, StaticSourceAccess,
    };
    use common::storage::locator::DocumentLocator;

    fn resolver(access: StaticSourceAccess) -> SourceResolver {
        SourceResolver::new(
            Arc::new(access),
            "Documents/",
            Duration::from_secs(3600),
            Duration::from_secs(5),
        )
    }

    fn orchestrator(chain: Arc<dyn AnswerChain>, access: StaticSourceAccess) -> QueryOrchestrator {
        QueryOrchestrator::new(chain, resolver(access), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_exchange_with_duplicate_citations() {
        // The end-to-end scenario: two citations of the same document collapse
        // into a single resolved source.
        let locator = DocumentLocator::new("kb-bucket", "Documents/refund-policy.pdf");
        let chain = Arc::new(StaticAnswerChain::new(
            "Refunds within 30 days.",
            vec![locator.to_string(), locator.to_string()],
        ));
        let access = StaticSourceAccess::new().with_object(locator.clone(), 1024);
        let orchestrator = orchestrator(chain, access);

        let mut session = ConversationSession::new();
        let completed = orchestrator
            .run_exchange(&mut session, "What is the refund policy?")
            .await
            .expect("exchange should complete");

        assert_eq!(completed.exchange.id, 0);
        assert_eq!(completed.exchange.answer.answer, "Refunds within 30 days.");
        assert_eq!(completed.exchange.sources, vec![locator]);
        assert_eq!(completed.resolved_sources.len(), 1);
        assert!(completed.resolved_sources[0].is_available());
        assert_eq!(completed.resolved_sources[0].display_name, "refund-policy.pdf");

        assert_eq!(
            session.history.as_context(),
            &[Turn::new(
                "What is the refund policy?",
                "Refunds within 30 days."
            )]
        );
        assert_eq!(session.exchanges.len(), 1);
    }

    #[tokio::test]
    async fn test_exchange_ids_increase_across_questions() {
        let chain = Arc::new(StaticAnswerChain::new("An answer.", Vec::new()));
        let orchestrator = orchestrator(chain, StaticSourceAccess::new());

        let mut session = ConversationSession::new();
        for expected_id in 0..3 {
            let completed = orchestrator
                .run_exchange(&mut session, "A question?")
                .await
                .expect("exchange should complete");
            assert_eq!(completed.exchange.id, expected_id);
        }
    }

    #[tokio::test]
    async fn test_zero_source_answer_is_valid() {
        let chain = Arc::new(StaticAnswerChain::new("No citations here.", Vec::new()));
        let orchestrator = orchestrator(chain, StaticSourceAccess::new());

        let mut session = ConversationSession::new();
        let completed = orchestrator
            .run_exchange(&mut session, "A question?")
            .await
            .expect("exchange should complete");

        assert!(completed.exchange.sources.is_empty());
        assert!(completed.resolved_sources.is_empty());
    }

    #[tokio::test]
    async fn test_failed_generation_leaves_session_unchanged() {
        let failing = orchestrator(Arc::new(FailingAnswerChain), StaticSourceAccess::new());
        let mut session = ConversationSession::new();

        let result = failing.run_exchange(&mut session, "Doomed question?").await;
        assert!(matches!(result, Err(ExchangeError::Generation(_))));
        assert!(session.exchanges.is_empty());
        assert!(session.history.is_empty());

        // The session stays usable and ids continue from the last success.
        let working = orchestrator(
            Arc::new(StaticAnswerChain::new("Recovered.", Vec::new())),
            StaticSourceAccess::new(),
        );
        let completed = working
            .run_exchange(&mut session, "Working question?")
            .await
            .expect("exchange should complete");
        assert_eq!(completed.exchange.id, 0);
    }

    #[tokio::test]
    async fn test_generation_timeout_is_errored() {
        let chain = Arc::new(DelayedAnswerChain::new(
            Duration::from_millis(200),
            StaticAnswerChain::new("Too late.", Vec::new()),
        ));
        let orchestrator = QueryOrchestrator::new(
            chain,
            resolver(StaticSourceAccess::new()),
            Duration::from_millis(10),
        );

        let mut session = ConversationSession::new();
        let result = orchestrator.run_exchange(&mut session, "Slow question?").await;

        assert!(matches!(
            result,
            Err(ExchangeError::Generation(GenerationError::Timeout(_)))
        ));
        assert!(session.exchanges.is_empty());
        assert!(session.history.is_empty());
    }

    #[tokio::test]
    async fn test_failed_resolution_does_not_abort_exchange() {
        let good = DocumentLocator::new("kb-bucket", "Documents/good.pdf");
        let bad = DocumentLocator::new("kb-bucket", "Documents/bad.pdf");
        let chain = Arc::new(StaticAnswerChain::new(
            "Partially cited.",
            vec![good.to_string(), bad.to_string()],
        ));
        let access = StaticSourceAccess::new().with_object(good.clone(), 1024);
        let orchestrator = orchestrator(chain, access);

        let mut session = ConversationSession::new();
        let completed = orchestrator
            .run_exchange(&mut session, "A question?")
            .await
            .expect("exchange should complete despite one failed source");

        assert_eq!(completed.exchange.sources, vec![good, bad]);
        assert!(completed.resolved_sources[0].is_available());
        assert!(!completed.resolved_sources[1].is_available());
        assert_eq!(session.exchanges.len(), 1);
    }

    #[tokio::test]
    async fn test_unparseable_citation_is_skipped() {
        let chain = Arc::new(StaticAnswerChain::new(
            "Oddly cited.",
            vec!["not a locator".to_string()],
        ));
        let orchestrator = orchestrator(chain, StaticSourceAccess::new());

        let mut session = ConversationSession::new();
        let completed = orchestrator
            .run_exchange(&mut session, "A question?")
            .await
            .expect("exchange should complete");

        assert!(completed.exchange.sources.is_empty());
    }

    #[tokio::test]
    async fn test_history_window_feeds_generation_and_stays_bounded() {
        let chain = Arc::new(StaticAnswerChain::new("An answer.", Vec::new()));
        let orchestrator = orchestrator(chain, StaticSourceAccess::new());

        let mut session = ConversationSession::new();
        for i in 0..7 {
            orchestrator
                .run_exchange(&mut session, &format!("Question {i}?"))
                .await
                .expect("exchange should complete");
        }

        assert_eq!(session.history.len(), crate::session::MAX_HISTORY_LENGTH);
        assert_eq!(session.exchanges.len(), 7);
        assert_eq!(
            session.history.as_context()[0].question,
            "Question 2?"
        );
    }
}
