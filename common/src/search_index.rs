use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use crate::{error::AppError, utils::config::AppConfig};

/// Identifier of a re-synchronization job started on the search backend.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncJob {
    pub job_id: String,
}

/// Seam for triggering a re-synchronization of the document data source,
/// so callers can be tested without a live search backend.
#[async_trait]
pub trait IndexSync: Send + Sync {
    async fn start_sync(&self) -> Result<SyncJob, AppError>;
}

/// HTTP client for the search backend's data-source sync endpoint.
#[derive(Clone)]
pub struct SearchIndexClient {
    http: reqwest::Client,
    base_url: String,
    index_id: String,
    data_source_id: String,
}

impl SearchIndexClient {
    pub fn from_config(cfg: &AppConfig) -> Result<Self, AppError> {
        let base_url = cfg.search_sync_base_url.clone().ok_or_else(|| {
            AppError::Validation("search_sync_base_url is required".to_string())
        })?;
        let index_id = cfg
            .search_index_id
            .clone()
            .ok_or_else(|| AppError::Validation("search_index_id is required".to_string()))?;
        let data_source_id = cfg.search_data_source_id.clone().ok_or_else(|| {
            AppError::Validation("search_data_source_id is required".to_string())
        })?;

        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
            index_id,
            data_source_id,
        })
    }
}

#[async_trait]
impl IndexSync for SearchIndexClient {
    async fn start_sync(&self) -> Result<SyncJob, AppError> {
        let url = format!(
            "{}/indexes/{}/data-sources/{}/sync",
            self.base_url.trim_end_matches('/'),
            self.index_id,
            self.data_source_id
        );
        info!(index_id = %self.index_id, data_source_id = %self.data_source_id, "Triggering search index sync");

        let response = self.http.post(&url).send().await?.error_for_status()?;
        let job = response.json::<SyncJob>().await?;
        info!(job_id = %job.job_id, "Search index sync started");

        Ok(job)
    }
}
