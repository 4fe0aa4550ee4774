use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::analysis::AnalysisFeature;
use crate::document::FieldName;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    #[serde(default = "default_tenant_id")]
    pub tenant_id: String,
    #[serde(default)]
    pub database_path: Option<String>,
    #[serde(default)]
    pub storage_root: Option<String>,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_tenant_id() -> String {
    "default".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            tenant_id: default_tenant_id(),
            database_path: None,
            storage_root: None,
            upload: UploadConfig::default(),
            extraction: ExtractionConfig::default(),
            model: ModelConfig::default(),
            workers: WorkersConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Configured database path, or `~/.policy-intake/data/documents.db`.
    pub fn resolved_database_path(&self) -> Option<PathBuf> {
        match &self.database_path {
            Some(path) => Some(PathBuf::from(path)),
            None => crate::db::default_database_path(),
        }
    }

    /// Configured object storage root, or `~/.policy-intake/objects`.
    pub fn resolved_storage_root(&self) -> Option<PathBuf> {
        match &self.storage_root {
            Some(path) => Some(PathBuf::from(path)),
            None => dirs::home_dir().map(|h| h.join(".policy-intake").join("objects")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_allowed_content_types")]
    pub allowed_content_types: Vec<String>,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    #[serde(default = "default_url_expiry_secs")]
    pub url_expiry_secs: u64,
}

fn default_allowed_content_types() -> Vec<String> {
    vec![
        "application/pdf".to_string(),
        "image/png".to_string(),
        "image/jpeg".to_string(),
    ]
}

fn default_max_file_bytes() -> u64 {
    20 * 1024 * 1024
}

fn default_url_expiry_secs() -> u64 {
    300
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            allowed_content_types: default_allowed_content_types(),
            max_file_bytes: default_max_file_bytes(),
            url_expiry_secs: default_url_expiry_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractorStrategy {
    #[default]
    Pattern,
    Model,
}

impl std::str::FromStr for ExtractorStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pattern" => Ok(ExtractorStrategy::Pattern),
            "model" => Ok(ExtractorStrategy::Model),
            other => Err(format!("unknown extractor strategy '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    #[serde(default)]
    pub strategy: ExtractorStrategy,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    #[serde(default = "default_required_fields")]
    pub required_fields: Vec<FieldName>,
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,
    #[serde(default = "default_notification_target")]
    pub notification_target: String,
    #[serde(default = "default_features")]
    pub features: Vec<AnalysisFeature>,
}

fn default_confidence_threshold() -> f64 {
    0.75
}

fn default_required_fields() -> Vec<FieldName> {
    vec![
        FieldName::PolicyNumber,
        FieldName::InsuredName,
        FieldName::StartDate,
        FieldName::EndDate,
    ]
}

fn default_retry_budget() -> u32 {
    3
}

fn default_notification_target() -> String {
    "analysis-completions".to_string()
}

fn default_features() -> Vec<AnalysisFeature> {
    vec![AnalysisFeature::Forms, AnalysisFeature::Tables]
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            strategy: ExtractorStrategy::default(),
            confidence_threshold: default_confidence_threshold(),
            required_fields: default_required_fields(),
            retry_budget: default_retry_budget(),
            notification_target: default_notification_target(),
            features: default_features(),
        }
    }
}

/// Settings for the model-based extractor's completion endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_file: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_timeout_secs() -> u64 {
    60
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            model: None,
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
            api_key: None,
            api_key_file: None,
            api_key_env: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersConfig {
    #[serde(default = "default_concurrency")]
    pub extract_concurrency: usize,
    #[serde(default = "default_concurrency")]
    pub parse_concurrency: usize,
    #[serde(default = "default_max_receive_count")]
    pub max_receive_count: u32,
}

fn default_concurrency() -> usize {
    num_cpus::get()
}

fn default_max_receive_count() -> u32 {
    5
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            extract_concurrency: default_concurrency(),
            parse_concurrency: default_concurrency(),
            max_receive_count: default_max_receive_count(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}
