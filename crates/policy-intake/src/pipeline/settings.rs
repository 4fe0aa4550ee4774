use std::time::Duration;

use crate::analysis::AnalysisFeature;
use crate::config::Config;
use crate::document::FieldName;

/// Immutable settings shared by every pipeline entry point.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub tenant_id: String,
    pub allowed_content_types: Vec<String>,
    pub max_file_bytes: u64,
    pub upload_url_expiry: Duration,
    pub confidence_threshold: f64,
    pub required_fields: Vec<FieldName>,
    /// Transient start failures tolerated before a document is failed.
    pub retry_budget: u32,
    pub notification_target: String,
    pub features: Vec<AnalysisFeature>,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            tenant_id: config.tenant_id.clone(),
            allowed_content_types: config.upload.allowed_content_types.clone(),
            max_file_bytes: config.upload.max_file_bytes,
            upload_url_expiry: Duration::from_secs(config.upload.url_expiry_secs),
            confidence_threshold: config.extraction.confidence_threshold,
            required_fields: config.extraction.required_fields.clone(),
            retry_budget: config.extraction.retry_budget,
            notification_target: config.extraction.notification_target.clone(),
            features: config.extraction.features.clone(),
        }
    }

    pub fn is_allowed_content_type(&self, content_type: &str) -> bool {
        self.allowed_content_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(content_type.trim()))
    }
}
