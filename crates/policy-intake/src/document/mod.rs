//! The document record tracked through the ingestion pipeline.

pub mod fields;
pub mod status;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use fields::{normalize_confidence, FieldConfidence, FieldName, PolicyFields, PolicyType};
pub use status::DocumentStatus;

/// Immutable identity of a document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentKey {
    pub tenant_id: String,
    pub document_id: String,
}

impl DocumentKey {
    pub fn new(tenant_id: impl Into<String>, document_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            document_id: document_id.into(),
        }
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant_id, self.document_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub tenant_id: String,
    pub document_id: String,
    pub owner_id: String,
    pub status: DocumentStatus,
    pub source_object_key: String,
    pub content_type: String,
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_job_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_result_key: Option<String>,
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(flatten)]
    pub fields: PolicyFields,
    #[serde(default)]
    pub field_confidence: FieldConfidence,
    #[serde(default)]
    pub needs_review_fields: Vec<FieldName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraction_version: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_by_user_id: Option<String>,
}

impl Document {
    /// A freshly created record awaiting its upload.
    pub fn new(
        key: DocumentKey,
        owner_id: impl Into<String>,
        source_object_key: impl Into<String>,
        content_type: impl Into<String>,
        size_bytes: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            tenant_id: key.tenant_id,
            document_id: key.document_id,
            owner_id: owner_id.into(),
            status: DocumentStatus::Created,
            source_object_key: source_object_key.into(),
            content_type: content_type.into(),
            size_bytes,
            file_name: None,
            analysis_job_id: None,
            analysis_result_key: None,
            retry_count: 0,
            last_error: None,
            fields: PolicyFields::default(),
            field_confidence: FieldConfidence::new(),
            needs_review_fields: Vec::new(),
            extraction_version: None,
            created_at: now,
            updated_at: now,
            processing_started_at: None,
            processing_ended_at: None,
            verified_at: None,
            verified_by_user_id: None,
        }
    }

    pub fn key(&self) -> DocumentKey {
        DocumentKey::new(&self.tenant_id, &self.document_id)
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.owner_id == user_id
    }
}
