//! Upload request handling: issues a write URL and creates the `CREATED`
//! record the rest of the pipeline advances.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, info_span};

use super::{PipelineError, PipelineSettings};
use crate::db::{document_repo, Database};
use crate::document::{Document, DocumentKey};
use crate::sanitize::hash_id;
use crate::storage::{validate_key, UploadUrlIssuer};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    pub owner_id: String,
    pub content_type: String,
    pub size_bytes: u64,
    #[serde(default)]
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadTicket {
    pub document_id: String,
    pub object_key: String,
    pub upload_url: String,
    pub expires_in_secs: u64,
}

/// Extension for the stored original: the file name's when it has one,
/// otherwise one derived from the content type.
fn object_extension(file_name: Option<&str>, content_type: &str) -> String {
    let from_name = file_name
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()));
    if let Some(ext) = from_name {
        return ext;
    }

    match content_type.trim().to_ascii_lowercase().as_str() {
        "application/pdf" => "pdf".to_string(),
        "image/png" => "png".to_string(),
        "image/jpeg" | "image/jpg" => "jpg".to_string(),
        other => mime_guess::get_mime_extensions_str(other)
            .and_then(|exts| exts.first())
            .map(|ext| ext.to_string())
            .unwrap_or_else(|| "bin".to_string()),
    }
}

pub struct UploadHandler {
    settings: Arc<PipelineSettings>,
    db: Database,
    issuer: Arc<dyn UploadUrlIssuer>,
}

impl UploadHandler {
    pub fn new(
        settings: Arc<PipelineSettings>,
        db: Database,
        issuer: Arc<dyn UploadUrlIssuer>,
    ) -> Self {
        Self {
            settings,
            db,
            issuer,
        }
    }

    fn validate(&self, request: &UploadRequest) -> Result<(), PipelineError> {
        let owner = request.owner_id.trim();
        if owner.is_empty() || owner.contains('/') {
            return Err(PipelineError::Validation("ownerId is invalid".to_string()));
        }
        if !self.settings.is_allowed_content_type(&request.content_type) {
            return Err(PipelineError::Validation(format!(
                "contentType '{}' is not allowed",
                request.content_type
            )));
        }
        if request.size_bytes == 0 {
            return Err(PipelineError::Validation(
                "sizeBytes must be greater than 0".to_string(),
            ));
        }
        if request.size_bytes > self.settings.max_file_bytes {
            return Err(PipelineError::Validation(format!(
                "sizeBytes exceeds the limit of {} bytes",
                self.settings.max_file_bytes
            )));
        }
        Ok(())
    }

    pub fn handle(&self, request: &UploadRequest) -> Result<UploadTicket, PipelineError> {
        let _span = info_span!("upload", owner = %hash_id(&request.owner_id)).entered();
        self.validate(request)?;

        let tenant = &self.settings.tenant_id;
        let owner = request.owner_id.trim();
        let document_id = uuid::Uuid::new_v4().to_string();
        let extension = object_extension(request.file_name.as_deref(), &request.content_type);
        let object_key = format!(
            "documents/{}/{}/{}/original.{}",
            tenant, owner, document_id, extension
        );
        validate_key(&object_key)
            .map_err(|_| PipelineError::Validation("ownerId is invalid".to_string()))?;

        let url = self.issuer.issue(
            &object_key,
            &request.content_type,
            request.size_bytes,
            self.settings.upload_url_expiry,
        )?;

        let mut document = Document::new(
            DocumentKey::new(tenant, &document_id),
            owner,
            &object_key,
            request.content_type.trim(),
            request.size_bytes,
            Utc::now(),
        );
        document.file_name = request.file_name.clone();
        document_repo::insert(&self.db, &document)?;

        info!(document_id = %document_id, size_bytes = request.size_bytes, "document created");

        Ok(UploadTicket {
            document_id,
            object_key,
            upload_url: url.url,
            expires_in_secs: url.expires_in.as_secs(),
        })
    }
}
