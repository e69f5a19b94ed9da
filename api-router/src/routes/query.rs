use answer_pipeline::sources::{ResolvedSource, SourceLink};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use url::Url;

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct QueryParams {
    question: String,
}

/// One cited source as rendered to the user: display name plus a
/// time-limited link, or an explicit unavailable marker.
#[derive(Debug, Serialize)]
pub struct SourceView {
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<Url>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_mb: Option<f64>,
    pub available: bool,
}

impl From<&ResolvedSource> for SourceView {
    fn from(resolved: &ResolvedSource) -> Self {
        match &resolved.link {
            SourceLink::Available { url, size_mb, .. } => Self {
                display_name: resolved.display_name.clone(),
                url: Some(url.clone()),
                size_mb: Some(*size_mb),
                available: true,
            },
            SourceLink::Unavailable => Self {
                display_name: resolved.display_name.clone(),
                url: None,
                size_mb: None,
                available: false,
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ExchangeResponse {
    pub session_id: String,
    pub exchange_id: u64,
    pub question: String,
    pub answer: String,
    pub sources: Vec<SourceView>,
}

/// Submits one question for the session bound to `connection_id`.
///
/// Questions are serialized per session: while an exchange is in flight, a
/// second submission for the same session is rejected with 409.
pub async fn submit_question(
    Path(connection_id): Path<String>,
    State(state): State<ApiState>,
    Json(params): Json<QueryParams>,
) -> Result<impl IntoResponse, ApiError> {
    let question = params.question.trim().to_string();
    if question.is_empty() {
        return Err(ApiError::ValidationError(
            "question must not be empty".to_string(),
        ));
    }

    let slot = state.sessions.get_or_create(&connection_id).await;
    let mut session = slot.try_lock().map_err(|_| {
        ApiError::SessionBusy(
            "a question is already being answered for this session".to_string(),
        )
    })?;

    info!(session_id = %session.session_id, "Handling question");
    let completed = state
        .orchestrator
        .run_exchange(&mut session, &question)
        .await?;

    let response = ExchangeResponse {
        session_id: session.session_id.clone(),
        exchange_id: completed.exchange.id,
        question: completed.exchange.question.clone(),
        answer: completed.exchange.answer.answer.clone(),
        sources: completed.resolved_sources.iter().map(Into::into).collect(),
    };

    Ok((StatusCode::OK, Json(response)))
}
