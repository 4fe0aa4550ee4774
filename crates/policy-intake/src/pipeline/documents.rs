//! Owner- and reviewer-facing document operations.

use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};
use serde::Serialize;
use tracing::{info, info_span, warn};

use super::{PipelineError, PipelineSettings};
use crate::db::{document_repo, Database, DocumentFilter, FieldWrite, StatusChange, WriteOutcome};
use crate::document::{Document, DocumentKey, DocumentStatus, FieldName, PolicyFields, PolicyType};
use crate::renewal::{
    format_date, parse_policy_date, renewal_date, renewal_status, RenewalStatus,
};
use crate::sanitize::hash_id;
use crate::storage::ObjectStore;

/// Statuses whose extracted fields are worth showing in a renewal scan.
const RENEWAL_STATUSES: [DocumentStatus; 3] = [
    DocumentStatus::Extracted,
    DocumentStatus::NeedsReview,
    DocumentStatus::Verified,
];

/// A document as returned to its owner, with renewal information filled in.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentView {
    #[serde(flatten)]
    pub document: Document,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub renewal_status: Option<RenewalStatus>,
}

impl DocumentView {
    pub fn at(mut document: Document, today: NaiveDate) -> Self {
        if document.fields.renewal_date.is_none() {
            document.fields.renewal_date = renewal_date(
                document.fields.policy_type.as_deref(),
                document.fields.start_date.as_deref(),
            )
            .map(format_date);
        }
        let renewal_status = document
            .fields
            .renewal_date
            .as_deref()
            .and_then(parse_policy_date)
            .map(|renewal| renewal_status(renewal, today));
        Self {
            document,
            renewal_status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentPage {
    pub items: Vec<DocumentView>,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenewalDue {
    pub end_date: NaiveDate,
    pub days_remaining: i64,
    pub document: Document,
}

/// Normalizes reviewer corrections to the stored vocabularies.
fn normalize_corrections(corrections: &PolicyFields) -> Result<PolicyFields, PipelineError> {
    let mut normalized = corrections.clone();
    normalized.renewal_date = None;

    for (name, value) in [
        (FieldName::StartDate, &mut normalized.start_date),
        (FieldName::EndDate, &mut normalized.end_date),
    ] {
        if let Some(raw) = value.as_deref() {
            let date = parse_policy_date(raw).ok_or_else(|| {
                PipelineError::Validation(format!("{} '{}' is not a valid date", name, raw))
            })?;
            *value = Some(format_date(date));
        }
    }
    if let Some(raw) = normalized.policy_type.as_deref() {
        let kind = PolicyType::from_label(raw).ok_or_else(|| {
            PipelineError::Validation(format!("policyType '{}' is not recognised", raw))
        })?;
        normalized.policy_type = Some(kind.as_str().to_string());
    }
    if let Some(currency) = normalized.currency.as_mut() {
        *currency = currency.trim().to_uppercase();
    }
    if matches!(normalized.premium_total, Some(p) if !p.is_finite() || p < 0.0) {
        return Err(PipelineError::Validation(
            "premiumTotal must be a non-negative number".to_string(),
        ));
    }
    Ok(normalized)
}

pub struct DocumentService {
    settings: Arc<PipelineSettings>,
    db: Database,
    store: Arc<dyn ObjectStore>,
}

impl DocumentService {
    pub fn new(settings: Arc<PipelineSettings>, db: Database, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            settings,
            db,
            store,
        }
    }

    fn key(&self, document_id: &str) -> DocumentKey {
        DocumentKey::new(&self.settings.tenant_id, document_id)
    }

    fn load_owned(&self, owner_id: &str, document_id: &str) -> Result<Document, PipelineError> {
        let document = document_repo::find(&self.db, &self.key(document_id))?
            .ok_or_else(|| PipelineError::NotFound(document_id.to_string()))?;
        if !document.is_owned_by(owner_id) {
            return Err(PipelineError::Forbidden(document_id.to_string()));
        }
        Ok(document)
    }

    pub fn get(&self, owner_id: &str, document_id: &str) -> Result<DocumentView, PipelineError> {
        self.get_at(owner_id, document_id, Utc::now().date_naive())
    }

    pub fn get_at(
        &self,
        owner_id: &str,
        document_id: &str,
        today: NaiveDate,
    ) -> Result<DocumentView, PipelineError> {
        let document = self.load_owned(owner_id, document_id)?;
        Ok(DocumentView::at(document, today))
    }

    /// The owner's documents, newest first.
    pub fn list(
        &self,
        owner_id: &str,
        limit: u64,
        offset: u64,
    ) -> Result<DocumentPage, PipelineError> {
        let filter = DocumentFilter {
            tenant_id: Some(self.settings.tenant_id.clone()),
            owner_id: Some(owner_id.to_string()),
            limit: Some(limit),
            offset: Some(offset),
            ..Default::default()
        };
        let (documents, total) = document_repo::query(&self.db, &filter)?;
        let today = Utc::now().date_naive();
        Ok(DocumentPage {
            items: documents
                .into_iter()
                .map(|d| DocumentView::at(d, today))
                .collect(),
            total,
        })
    }

    /// Accepts a reviewed document, applying the reviewer's corrections.
    pub fn verify(
        &self,
        reviewer_id: &str,
        document_id: &str,
        corrections: &PolicyFields,
    ) -> Result<DocumentView, PipelineError> {
        let _span = info_span!(
            "verify",
            document_id = %document_id,
            reviewer = %hash_id(reviewer_id),
        )
        .entered();

        let document = self.load_owned(reviewer_id, document_id)?;
        if document.status != DocumentStatus::NeedsReview {
            return Err(PipelineError::Conflict {
                status: document.status,
            });
        }

        let corrections = normalize_corrections(corrections)?;
        let mut fields = document.fields.clone();
        fields.apply(&corrections);
        fields.renewal_date =
            renewal_date(fields.policy_type.as_deref(), fields.start_date.as_deref())
                .map(format_date);

        let mut confidence = document.field_confidence.clone();
        for name in corrections.present() {
            confidence.insert(name, 1.0);
        }
        confidence.retain(|name, _| fields.is_present(*name));

        let key = document.key();
        let change = StatusChange::to(DocumentStatus::Verified, Utc::now())
            .with_fields(FieldWrite {
                fields,
                confidence: Some(confidence),
                needs_review: Vec::new(),
                extraction_version: None,
            })
            .verified_by(reviewer_id);
        let outcome =
            document_repo::transition(&self.db, &key, &[DocumentStatus::NeedsReview], &change)?;
        if outcome == WriteOutcome::AlreadyAdvanced {
            let current = self.load_owned(reviewer_id, document_id)?;
            return Err(PipelineError::Conflict {
                status: current.status,
            });
        }

        info!(corrected = corrections.present().len(), "document verified");
        self.get(reviewer_id, document_id)
    }

    /// Removes a document's objects and record. An analysis job that is
    /// still running is not cancelled; its notification is later dropped.
    pub fn delete(&self, owner_id: &str, document_id: &str) -> Result<(), PipelineError> {
        let _span = info_span!(
            "delete",
            document_id = %document_id,
            owner = %hash_id(owner_id),
        )
        .entered();

        let document = self.load_owned(owner_id, document_id)?;
        let objects = std::iter::once(document.source_object_key.as_str())
            .chain(document.analysis_result_key.as_deref());
        for object_key in objects {
            if !self.store.delete(object_key)? {
                warn!(object_key = %object_key, "object already absent");
            }
        }

        document_repo::delete(&self.db, &document.key())?;
        info!("document deleted");
        Ok(())
    }

    /// Documents whose policy ends within `window_days` of `today`,
    /// soonest first.
    pub fn renewals_due(
        &self,
        tenant_id: &str,
        today: NaiveDate,
        window_days: u32,
    ) -> Result<Vec<RenewalDue>, PipelineError> {
        let filter = DocumentFilter {
            tenant_id: Some(tenant_id.to_string()),
            statuses: RENEWAL_STATUSES.to_vec(),
            ..Default::default()
        };
        let (documents, _) = document_repo::query(&self.db, &filter)?;
        let horizon = today + Duration::days(i64::from(window_days));

        let mut due: Vec<RenewalDue> = documents
            .into_iter()
            .filter_map(|document| {
                let end_date = parse_policy_date(document.fields.end_date.as_deref()?)?;
                (today..=horizon).contains(&end_date).then(|| RenewalDue {
                    end_date,
                    days_remaining: (end_date - today).num_days(),
                    document,
                })
            })
            .collect();
        due.sort_by(|a, b| {
            a.end_date
                .cmp(&b.end_date)
                .then_with(|| a.document.document_id.cmp(&b.document.document_id))
        });
        Ok(due)
    }
}
