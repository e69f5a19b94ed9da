use std::path::Path as FsPath;
use std::time::Duration;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use axum_typed_multipart::{FieldData, TryFromMultipart, TypedMultipart};
use bytes::Bytes;
use serde::Serialize;
use serde_json::json;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use common::{error::AppError, utils::format::bytes_to_mb};

use crate::{api_state::ApiState, error::ApiError};

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("File name missing in upload metadata")]
    MissingFileName,

    #[error("Unsupported file type: '{0}'")]
    UnsupportedType(String),

    #[error("IO error occurred: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] AppError),
}

/// One knowledge-base document as rendered in the listing.
#[derive(Debug, Serialize)]
pub struct DocumentView {
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<Url>,
    pub size_mb: f64,
}

/// Lists the documents under the configured prefix with a time-limited
/// access URL and size per document. Zero-byte objects are folder markers
/// and are skipped.
pub async fn list_documents(State(state): State<ApiState>) -> Result<impl IntoResponse, ApiError> {
    let prefix = state.config.documents_prefix.clone();
    let objects = state.storage.list(Some(&prefix)).await?;

    let mut documents = Vec::new();
    for meta in objects {
        if meta.size == 0 {
            continue;
        }

        let location = meta.location.as_ref();
        let url = match state
            .storage
            .signed_get_url(
                location,
                Duration::from_secs(state.config.signed_url_expiry_secs),
            )
            .await
        {
            Ok(url) => Some(url),
            Err(e) => {
                warn!(location, error = %e, "Could not sign document URL");
                None
            }
        };

        documents.push(DocumentView {
            display_name: location
                .strip_prefix(prefix.as_str())
                .unwrap_or(location)
                .to_string(),
            url,
            size_mb: bytes_to_mb(meta.size as u64),
        });
    }

    let count = documents.len();
    Ok((
        StatusCode::OK,
        Json(json!({ "documents": documents, "count": count })),
    ))
}

#[derive(Debug, TryFromMultipart)]
pub struct UploadParams {
    #[form_data(limit = "52428800")]
    #[form_data(default)]
    pub files: Vec<FieldData<NamedTempFile>>,
}

#[derive(Debug, Serialize)]
pub struct FileUploadResult {
    pub file_name: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Uploads documents into the knowledge base.
///
/// Failures are reported per file and do not abort the remaining files. If
/// at least one file was stored, a search-index re-sync is triggered so the
/// new documents become retrievable.
pub async fn upload_documents(
    State(state): State<ApiState>,
    TypedMultipart(input): TypedMultipart<UploadParams>,
) -> Result<impl IntoResponse, ApiError> {
    if input.files.is_empty() {
        return Err(ApiError::ValidationError(
            "no files provided".to_string(),
        ));
    }
    info!(file_count = input.files.len(), "Received document upload");

    let mut results = Vec::new();
    let mut uploaded = 0usize;
    for file in input.files {
        let submitted_name = file.metadata.file_name.clone().unwrap_or_default();
        match store_document(&state, file).await {
            Ok(stored_name) => {
                uploaded += 1;
                results.push(FileUploadResult {
                    file_name: stored_name,
                    status: "uploaded",
                    error: None,
                });
            }
            Err(e) => {
                warn!(file_name = %submitted_name, error = %e, "Document upload failed");
                results.push(FileUploadResult {
                    file_name: submitted_name,
                    status: "failed",
                    error: Some(e.to_string()),
                });
            }
        }
    }

    // Sync whatever made it into storage, even when some files failed.
    let sync_job_id = if uploaded > 0 {
        match state.index.start_sync().await {
            Ok(job) => Some(job.job_id),
            Err(e) => {
                error!(error = %e, "Index sync trigger failed after upload");
                None
            }
        }
    } else {
        None
    };

    Ok((
        StatusCode::OK,
        Json(json!({
            "results": results,
            "uploaded": uploaded,
            "sync_job_id": sync_job_id
        })),
    ))
}

async fn store_document(
    state: &ApiState,
    file: FieldData<NamedTempFile>,
) -> Result<String, UploadError> {
    let file_name = file
        .metadata
        .file_name
        .clone()
        .ok_or(UploadError::MissingFileName)?;
    let sanitized = sanitize_file_name(&file_name);

    let extension = FsPath::new(&sanitized)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();
    if !state
        .config
        .allowed_document_extensions
        .iter()
        .any(|allowed| *allowed == extension)
    {
        return Err(UploadError::UnsupportedType(extension));
    }

    let content_type = mime_guess::from_path(&sanitized)
        .first_or(mime::APPLICATION_OCTET_STREAM)
        .to_string();

    let contents = tokio::fs::read(file.contents.path()).await?;
    let location = format!("{}{}", state.config.documents_prefix, sanitized);
    state
        .storage
        .put(&location, Bytes::from(contents), Some(&content_type))
        .await?;
    info!(%location, "Uploaded document");

    Ok(sanitized)
}

/// Sanitizes the file name to prevent directory traversal in object keys.
/// Replaces any non-alphanumeric characters (excluding '.' and '_') with underscores.
fn sanitize_file_name(file_name: &str) -> String {
    if let Some(idx) = file_name.rfind('.') {
        let (name, ext) = file_name.split_at(idx);
        let sanitized_name: String = name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        format!("{}{}", sanitized_name, ext)
    } else {
        file_name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }
}
