use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::api_state::ApiState;

/// Readiness probe: returns 200 if the storage backend is reachable, else 503.
pub async fn ready(State(state): State<ApiState>) -> impl IntoResponse {
    match state
        .storage
        .prefix_exists(&state.config.documents_prefix)
        .await
    {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "checks": { "storage": "ok" }
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "error",
                "checks": { "storage": "fail" },
                "reason": e.to_string()
            })),
        ),
    }
}
