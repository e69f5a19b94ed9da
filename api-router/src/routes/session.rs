use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use serde_json::json;
use tracing::info;

use crate::{api_state::ApiState, error::ApiError, routes::query::SourceView};

#[derive(Debug, Serialize)]
pub struct ExchangeView {
    pub id: u64,
    pub question: String,
    pub answer: String,
    pub sources: Vec<SourceView>,
}

#[derive(Debug, Serialize)]
pub struct SessionView {
    pub session_id: String,
    pub exchanges: Vec<ExchangeView>,
}

/// Renders the session transcript. Source references are resolved on demand
/// for each render; signed URLs are never stored on the session.
pub async fn show_session(
    Path(connection_id): Path<String>,
    State(state): State<ApiState>,
) -> Result<impl IntoResponse, ApiError> {
    let slot = state.sessions.get_or_create(&connection_id).await;
    let session = slot.lock().await.clone();

    let mut exchanges = Vec::with_capacity(session.exchanges.len());
    for exchange in &session.exchanges {
        let resolved = state.resolver.resolve_all(&exchange.sources).await;
        exchanges.push(ExchangeView {
            id: exchange.id,
            question: exchange.question.clone(),
            answer: exchange.answer.answer.clone(),
            sources: resolved.iter().map(Into::into).collect(),
        });
    }

    Ok((
        StatusCode::OK,
        Json(SessionView {
            session_id: session.session_id,
            exchanges,
        }),
    ))
}

/// Clears the session's history and exchanges in place. The session id is
/// kept, and clearing an unknown connection id simply yields a fresh, empty
/// session.
pub async fn clear_session(
    Path(connection_id): Path<String>,
    State(state): State<ApiState>,
) -> Result<impl IntoResponse, ApiError> {
    let slot = state.sessions.get_or_create(&connection_id).await;
    let mut session = slot.lock().await;
    session.reset();
    info!(session_id = %session.session_id, "Cleared conversation session");

    Ok((
        StatusCode::OK,
        Json(json!({
            "session_id": session.session_id,
            "status": "cleared"
        })),
    ))
}
