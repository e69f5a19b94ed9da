use api_state::ApiState;
use axum::{
    extract::{DefaultBodyLimit, FromRef},
    routing::{get, post},
    Router,
};
use routes::{
    documents::{list_documents, upload_documents},
    liveness::live,
    query::submit_question,
    readiness::ready,
    session::{clear_session, show_session},
};

pub mod api_state;
pub mod error;
mod routes;

/// Router for API functionality, version 1
pub fn api_routes_v1<S>(app_state: &ApiState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    Router::new()
        .route("/ready", get(ready))
        .route("/live", get(live))
        .route("/sessions/{connection_id}", get(show_session))
        .route("/sessions/{connection_id}/query", post(submit_question))
        .route("/sessions/{connection_id}/clear", post(clear_session))
        .route(
            "/documents",
            get(list_documents)
                .post(upload_documents)
                .layer(DefaultBodyLimit::max(app_state.config.upload_max_body_bytes)),
        )
}
