//! Message bodies carried on the work queues.

use serde::{Deserialize, Serialize};

use crate::document::{Document, DocumentKey};

/// Request to start analysis of an uploaded document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionJob {
    pub tenant_id: String,
    pub document_id: String,
    pub owner_id: String,
    pub source_object_key: String,
    pub content_type: String,
}

impl ExtractionJob {
    pub fn for_document(document: &Document) -> Self {
        Self {
            tenant_id: document.tenant_id.clone(),
            document_id: document.document_id.clone(),
            owner_id: document.owner_id.clone(),
            source_object_key: document.source_object_key.clone(),
            content_type: document.content_type.clone(),
        }
    }

    pub fn key(&self) -> DocumentKey {
        DocumentKey::new(&self.tenant_id, &self.document_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompletionStatus {
    Succeeded,
    PartialSuccess,
    Failed,
    Error,
}

impl CompletionStatus {
    /// Partial results are still parsed; missing fields surface as review
    /// flags.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            CompletionStatus::Succeeded | CompletionStatus::PartialSuccess
        )
    }
}

/// Notification published by the analysis service when a job finishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AnalysisCompletion {
    pub job_id: String,
    pub status: CompletionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_tag: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "Message")]
    message: String,
}

impl AnalysisCompletion {
    /// Parses a queue body. The notification may arrive directly or wrapped
    /// in a topic envelope whose `Message` holds it as a JSON string.
    pub fn from_body(body: &str) -> Result<Self, serde_json::Error> {
        match serde_json::from_str::<Envelope>(body) {
            Ok(envelope) => serde_json::from_str(&envelope.message),
            Err(_) => serde_json::from_str(body),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaggedReference {
    tenant_id: Option<String>,
    document_id: String,
}

/// Recovers the document a completion belongs to from its job tag.
///
/// A tag is either a bare document id, resolved against the default tenant,
/// or a JSON object with `tenantId` and `documentId`.
pub fn parse_document_reference(tag: &str, default_tenant: &str) -> Option<DocumentKey> {
    let tag = tag.trim();
    if tag.is_empty() {
        return None;
    }
    if tag.starts_with('{') {
        let tagged: TaggedReference = serde_json::from_str(tag).ok()?;
        if tagged.document_id.trim().is_empty() {
            return None;
        }
        let tenant = tagged
            .tenant_id
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| default_tenant.to_string());
        return Some(DocumentKey::new(tenant, tagged.document_id));
    }
    Some(DocumentKey::new(default_tenant, tag))
}

/// Builds the job tag for a document, the inverse of
/// [`parse_document_reference`].
///
/// Documents of the default tenant get the plain id. Other tenants get the
/// JSON form, which only works when the analysis service accepts job tags of
/// that length and character set; services that limit tags to short
/// alphanumeric strings must run one default tenant per deployment.
pub fn document_reference_tag(key: &DocumentKey, default_tenant: &str) -> String {
    if key.tenant_id == default_tenant {
        key.document_id.clone()
    } else {
        serde_json::json!({
            "tenantId": key.tenant_id,
            "documentId": key.document_id,
        })
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extraction_job_wire_format() {
        let job = ExtractionJob {
            tenant_id: "acme".to_string(),
            document_id: "d1".to_string(),
            owner_id: "u1".to_string(),
            source_object_key: "documents/acme/u1/d1/original.pdf".to_string(),
            content_type: "application/pdf".to_string(),
        };
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["sourceObjectKey"], "documents/acme/u1/d1/original.pdf");
        assert_eq!(json["tenantId"], "acme");
    }

    #[test]
    fn test_completion_direct_and_enveloped() {
        let direct = r#"{"JobId":"j1","Status":"SUCCEEDED","JobTag":"d1"}"#;
        let parsed = AnalysisCompletion::from_body(direct).unwrap();
        assert_eq!(parsed.job_id, "j1");
        assert!(parsed.status.is_success());

        let enveloped = serde_json::json!({
            "Type": "Notification",
            "Message": r#"{"JobId":"j2","Status":"FAILED","StatusMessage":"bad pdf","JobTag":"d2"}"#,
        })
        .to_string();
        let parsed = AnalysisCompletion::from_body(&enveloped).unwrap();
        assert_eq!(parsed.status, CompletionStatus::Failed);
        assert_eq!(parsed.status_message.as_deref(), Some("bad pdf"));

        assert!(AnalysisCompletion::from_body("not json").is_err());
    }

    #[test]
    fn test_partial_success_counts_as_success() {
        assert!(CompletionStatus::PartialSuccess.is_success());
        assert!(!CompletionStatus::Error.is_success());
    }

    #[test]
    fn test_document_reference_forms() {
        assert_eq!(
            parse_document_reference("d1", "default"),
            Some(DocumentKey::new("default", "d1"))
        );
        assert_eq!(
            parse_document_reference(r#"{"tenantId":"acme","documentId":"d9"}"#, "default"),
            Some(DocumentKey::new("acme", "d9"))
        );
        assert_eq!(
            parse_document_reference(r#"{"documentId":"d9"}"#, "default"),
            Some(DocumentKey::new("default", "d9"))
        );
        assert_eq!(parse_document_reference("  ", "default"), None);
        assert_eq!(parse_document_reference("{broken", "default"), None);
    }

    #[test]
    fn test_tag_round_trip() {
        for key in [DocumentKey::new("default", "d1"), DocumentKey::new("acme", "d2")] {
            let tag = document_reference_tag(&key, "default");
            assert_eq!(parse_document_reference(&tag, "default"), Some(key));
        }
        assert_eq!(
            document_reference_tag(&DocumentKey::new("default", "d1"), "default"),
            "d1"
        );
    }
}
