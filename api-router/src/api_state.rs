use std::sync::Arc;

use answer_pipeline::{
    pipeline::QueryOrchestrator, session::SessionRegistry, sources::SourceResolver,
};
use common::{search_index::IndexSync, storage::store::StorageManager, utils::config::AppConfig};

#[derive(Clone)]
pub struct ApiState {
    pub sessions: Arc<SessionRegistry>,
    pub orchestrator: Arc<QueryOrchestrator>,
    pub resolver: SourceResolver,
    pub storage: StorageManager,
    pub index: Arc<dyn IndexSync>,
    pub config: AppConfig,
}
