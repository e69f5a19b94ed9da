use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::signer::Signer as Sign;
use object_store::{
    path::Path as ObjPath, Attribute, Attributes, ObjectMeta, ObjectStore, PutOptions, PutPayload,
};
use reqwest::Method;
use url::Url;

use crate::error::AppError;
use crate::utils::config::{AppConfig, StorageKind};

pub type DynStore = Arc<dyn ObjectStore>;

/// Storage manager over the configured object-store backend.
///
/// S3 in production; local filesystem and in-memory backends for development
/// and tests. Only the S3 backend can issue time-limited signed URLs.
#[derive(Clone)]
pub struct StorageManager {
    store: DynStore,
    signer: Option<Arc<dyn Sign>>,
    backend_kind: StorageKind,
}

impl StorageManager {
    /// Create a new StorageManager with the specified configuration.
    pub async fn new(cfg: &AppConfig) -> Result<Self, AppError> {
        match cfg.storage {
            StorageKind::S3 => {
                let bucket = cfg.documents_bucket.as_deref().ok_or_else(|| {
                    AppError::Validation(
                        "documents_bucket is required for the s3 storage backend".to_string(),
                    )
                })?;
                let s3 = Arc::new(
                    AmazonS3Builder::from_env()
                        .with_bucket_name(bucket)
                        .build()?,
                );
                let signer: Arc<dyn Sign> = s3.clone();
                let store: DynStore = s3;
                Ok(Self {
                    store,
                    signer: Some(signer),
                    backend_kind: StorageKind::S3,
                })
            }
            StorageKind::Local => {
                let base = resolve_base_dir(cfg);
                if !base.exists() {
                    tokio::fs::create_dir_all(&base).await.map_err(|e| {
                        object_store::Error::Generic {
                            store: "LocalFileSystem",
                            source: e.into(),
                        }
                    })?;
                }
                let store = LocalFileSystem::new_with_prefix(base)?;
                Ok(Self {
                    store: Arc::new(store),
                    signer: None,
                    backend_kind: StorageKind::Local,
                })
            }
            StorageKind::Memory => Ok(Self {
                store: Arc::new(InMemory::new()),
                signer: None,
                backend_kind: StorageKind::Memory,
            }),
        }
    }

    /// Create a StorageManager with a custom storage backend.
    ///
    /// This method is useful for testing scenarios where you want to inject
    /// a specific storage backend.
    pub fn with_backend(store: DynStore, backend_kind: StorageKind) -> Self {
        Self {
            store,
            signer: None,
            backend_kind,
        }
    }

    /// Get the storage backend kind.
    pub fn backend_kind(&self) -> &StorageKind {
        &self.backend_kind
    }

    /// Store bytes at the specified location, recording the content type when
    /// one is known.
    pub async fn put(
        &self,
        location: &str,
        data: Bytes,
        content_type: Option<&str>,
    ) -> Result<(), AppError> {
        let path = ObjPath::from(location);
        let payload = PutPayload::from_bytes(data);

        let mut attributes = Attributes::new();
        if let Some(content_type) = content_type {
            attributes.insert(Attribute::ContentType, content_type.to_string().into());
        }
        let opts = PutOptions {
            attributes,
            ..Default::default()
        };

        self.store.put_opts(&path, payload, opts).await?;
        Ok(())
    }

    /// List all objects below the specified prefix.
    pub async fn list(&self, prefix: Option<&str>) -> Result<Vec<ObjectMeta>, AppError> {
        let prefix_path = prefix.map(ObjPath::from);
        let metas = self
            .store
            .list(prefix_path.as_ref())
            .try_collect::<Vec<_>>()
            .await?;
        Ok(metas)
    }

    /// Retrieve the size in bytes of the object at the specified location.
    pub async fn size_bytes(&self, location: &str) -> Result<u64, AppError> {
        let path = ObjPath::from(location);
        let meta = self.store.head(&path).await?;
        Ok(meta.size as u64)
    }

    /// Check if an object exists at the specified location.
    pub async fn exists(&self, location: &str) -> Result<bool, AppError> {
        let path = ObjPath::from(location);
        match self.store.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Check if any object exists below the specified prefix.
    pub async fn prefix_exists(&self, prefix: &str) -> Result<bool, AppError> {
        let prefix_path = ObjPath::from(prefix);
        match self.store.list(Some(&prefix_path)).next().await {
            Some(Ok(_)) => Ok(true),
            Some(Err(e)) => Err(e.into()),
            None => Ok(false),
        }
    }

    /// Issue a time-limited GET URL for the object at the specified location.
    ///
    /// Only signing backends support this; the local and memory backends
    /// return an error, which callers surface as an unavailable reference.
    pub async fn signed_get_url(
        &self,
        location: &str,
        expires_in: Duration,
    ) -> Result<Url, AppError> {
        let Some(signer) = &self.signer else {
            return Err(AppError::InternalError(format!(
                "storage backend {:?} cannot issue signed URLs",
                self.backend_kind
            )));
        };

        let path = ObjPath::from(location);
        let url = signer.signed_url(Method::GET, &path, expires_in).await?;
        Ok(url)
    }
}

/// Resolve the absolute base directory used for local storage from config.
///
/// If `data_dir` is relative, it is resolved against the current working directory.
fn resolve_base_dir(cfg: &AppConfig) -> PathBuf {
    if cfg.data_dir.starts_with('/') {
        PathBuf::from(&cfg.data_dir)
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(&cfg.data_dir)
    }
}
