use std::sync::Arc;
use std::time::Duration;

use answer_pipeline::{
    chain::OpenAiAnswerChain,
    pipeline::QueryOrchestrator,
    session::SessionRegistry,
    sources::{SourceAccess, SourceResolver},
};
use api_router::{api_routes_v1, api_state::ApiState};
use axum::Router;
use common::{
    search_index::{IndexSync, SearchIndexClient},
    storage::store::StorageManager,
    utils::config::get_config,
};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    // Get config; missing required values are fatal here.
    let config = get_config()?;

    // Storage and external collaborators
    let storage = StorageManager::new(&config).await?;
    let openai_client = Arc::new(async_openai::Client::with_config(
        async_openai::config::OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    ));
    let index_client: Arc<dyn IndexSync> = Arc::new(SearchIndexClient::from_config(&config)?);

    // Answer pipeline
    let chain = Arc::new(OpenAiAnswerChain::new(
        openai_client,
        config.query_model.clone(),
    ));
    let source_access: Arc<dyn SourceAccess> = Arc::new(storage.clone());
    let resolver = SourceResolver::new(
        source_access,
        config.documents_prefix.clone(),
        Duration::from_secs(config.signed_url_expiry_secs),
        Duration::from_secs(config.resolve_timeout_secs),
    );
    let orchestrator = Arc::new(QueryOrchestrator::new(
        chain,
        resolver.clone(),
        Duration::from_secs(config.generation_timeout_secs),
    ));

    let api_state = ApiState {
        sessions: Arc::new(SessionRegistry::new()),
        orchestrator,
        resolver,
        storage,
        index: index_client,
        config: config.clone(),
    };

    // Create Axum router
    let app = Router::new()
        .nest("/api/v1", api_routes_v1(&api_state))
        .with_state(api_state);

    info!("Starting server listening on 0.0.0.0:{}", config.http_port);
    let serve_address = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(serve_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use answer_pipeline::testing::{StaticAnswerChain, StaticSourceAccess};
    use async_trait::async_trait;
    use axum::{body::Body, http::Request, http::StatusCode};
    use common::{
        error::AppError,
        search_index::SyncJob,
        utils::config::{AppConfig, StorageKind},
    };
    use tower::ServiceExt;

    struct StaticIndexSync;

    #[async_trait]
    impl IndexSync for StaticIndexSync {
        async fn start_sync(&self) -> Result<SyncJob, AppError> {
            Ok(SyncJob {
                job_id: "job-1".to_string(),
            })
        }
    }

    fn smoke_test_config() -> AppConfig {
        serde_json::from_value(serde_json::json!({
            "openai_api_key": "test-key",
            "http_port": 0,
            "storage": "memory"
        }))
        .expect("smoke test config should deserialize")
    }

    #[tokio::test]
    async fn smoke_startup_with_memory_storage() {
        let config = smoke_test_config();
        let storage = StorageManager::new(&config)
            .await
            .expect("failed to build storage manager");
        assert_eq!(*storage.backend_kind(), StorageKind::Memory);

        let source_access: Arc<dyn SourceAccess> = Arc::new(StaticSourceAccess::new());
        let resolver = SourceResolver::new(
            source_access,
            config.documents_prefix.clone(),
            Duration::from_secs(config.signed_url_expiry_secs),
            Duration::from_secs(config.resolve_timeout_secs),
        );
        let orchestrator = Arc::new(QueryOrchestrator::new(
            Arc::new(StaticAnswerChain::new("An answer.", Vec::new())),
            resolver.clone(),
            Duration::from_secs(config.generation_timeout_secs),
        ));

        let api_state = ApiState {
            sessions: Arc::new(SessionRegistry::new()),
            orchestrator,
            resolver,
            storage,
            index: Arc::new(StaticIndexSync),
            config,
        };

        let app = Router::new()
            .nest("/api/v1", api_routes_v1(&api_state))
            .with_state(api_state);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/v1/live")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("router response");
        assert_eq!(response.status(), StatusCode::OK);

        let ready_response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/ready")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("ready response");
        assert_eq!(ready_response.status(), StatusCode::OK);
    }
}
