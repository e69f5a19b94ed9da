use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    S3,
    Local,
    Memory,
}

fn default_storage_kind() -> StorageKind {
    StorageKind::Local
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub openai_api_key: String,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_query_model")]
    pub query_model: String,
    pub http_port: u16,
    #[serde(default = "default_storage_kind")]
    pub storage: StorageKind,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    pub documents_bucket: Option<String>,
    #[serde(default = "default_documents_prefix")]
    pub documents_prefix: String,
    #[serde(default = "default_signed_url_expiry_secs")]
    pub signed_url_expiry_secs: u64,
    #[serde(default = "default_generation_timeout_secs")]
    pub generation_timeout_secs: u64,
    #[serde(default = "default_resolve_timeout_secs")]
    pub resolve_timeout_secs: u64,
    #[serde(default = "default_upload_max_body_bytes")]
    pub upload_max_body_bytes: usize,
    #[serde(default = "default_allowed_document_extensions")]
    pub allowed_document_extensions: Vec<String>,
    pub search_sync_base_url: Option<String>,
    pub search_index_id: Option<String>,
    pub search_data_source_id: Option<String>,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_query_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_documents_prefix() -> String {
    "Documents/".to_string()
}

fn default_signed_url_expiry_secs() -> u64 {
    3600
}

fn default_generation_timeout_secs() -> u64 {
    90
}

fn default_resolve_timeout_secs() -> u64 {
    10
}

fn default_upload_max_body_bytes() -> usize {
    50_000_000
}

fn default_allowed_document_extensions() -> Vec<String> {
    ["pdf", "docx", "doc", "xlsx", "xls", "pptx", "ppt", "csv", "txt"]
        .iter()
        .map(|ext| (*ext).to_string())
        .collect()
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}
