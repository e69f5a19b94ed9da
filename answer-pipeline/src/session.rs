use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

use common::storage::locator::DocumentLocator;

use crate::chain::AnswerResult;

/// Maximum number of (question, answer) turns supplied to the generation
/// chain as conversational context.
pub const MAX_HISTORY_LENGTH: usize = 5;

/// One completed (question, answer) pair contributing conversational context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Turn {
    pub question: String,
    pub answer: String,
}

impl Turn {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
        }
    }
}

impl fmt::Display for Turn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "User: {}\nAI: {}", self.question, self.answer)
    }
}

// helper function to format a window of turns for the generation prompt
pub fn format_history(turns: &[Turn]) -> String {
    turns
        .iter()
        .map(|turn| format!("{turn}"))
        .collect::<Vec<String>>()
        .join("\n")
}

/// Bounded FIFO of the most recent turns, most-recent-last.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryWindow {
    turns: Vec<Turn>,
}

impl HistoryWindow {
    /// Appends a turn. When the window is already at capacity the oldest turn
    /// is evicted first; eviction only happens on the push that would exceed
    /// the capacity, never proactively.
    pub fn push(&mut self, turn: Turn) {
        if self.turns.len() == MAX_HISTORY_LENGTH {
            self.turns.remove(0);
        }
        self.turns.push(turn);
    }

    /// The current window, unchanged, for passing to the generation chain.
    pub fn as_context(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

/// One complete question/answer interaction, including its cited sources.
///
/// Ids are dense and strictly increasing from 0 within a session and equal
/// the exchange's position in the exchange list at creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exchange {
    pub id: u64,
    pub question: String,
    pub answer: AnswerResult,
    pub sources: Vec<DocumentLocator>,
}

/// Conversational state for one connected user.
///
/// Lives in process memory only; lifetime is the process lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSession {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub history: HistoryWindow,
    pub exchanges: Vec<Exchange>,
}

impl ConversationSession {
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            history: HistoryWindow::default(),
            exchanges: Vec::new(),
        }
    }

    /// Clears history and exchanges in place; the session id is kept.
    pub fn reset(&mut self) {
        self.history = HistoryWindow::default();
        self.exchanges.clear();
    }

    /// Appends a completed exchange and pushes its turn into the history
    /// window. Only the query orchestrator calls this, after generation and
    /// decoration both succeeded.
    pub(crate) fn record_exchange(
        &mut self,
        question: String,
        answer: AnswerResult,
        sources: Vec<DocumentLocator>,
    ) -> Exchange {
        let id = self.exchanges.len() as u64;
        let turn = Turn::new(question.clone(), answer.answer.clone());
        let exchange = Exchange {
            id,
            question,
            answer,
            sources,
        };
        self.exchanges.push(exchange.clone());
        self.history.push(turn);
        exchange
    }
}

impl Default for ConversationSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry mapping a connection id to its conversation session.
///
/// Sessions are created lazily, one per connection id, and the session id is
/// generated once and reused for all subsequent requests from that
/// connection. The per-session mutex is the serialization point for question
/// handling: a session already driving an exchange rejects a second
/// submission via `try_lock`.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Mutex<ConversationSession>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the session bound to `connection_id`, creating it on first
    /// use. Idempotent per connection id.
    pub async fn get_or_create(&self, connection_id: &str) -> Arc<Mutex<ConversationSession>> {
        if let Some(slot) = self.sessions.read().await.get(connection_id) {
            return slot.clone();
        }

        let mut sessions = self.sessions.write().await;
        sessions
            .entry(connection_id.to_string())
            .or_insert_with(|| {
                debug!(%connection_id, "Creating conversation session");
                Arc::new(Mutex::new(ConversationSession::new()))
            })
            .clone()
    }
}
