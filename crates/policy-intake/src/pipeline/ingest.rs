//! Ingestion trigger: moves an uploaded document to `UPLOADED` and enqueues
//! exactly one extraction job per readiness.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, info_span, warn};

use super::{PipelineError, PipelineSettings};
use crate::db::{document_repo, Database, StatusChange, WriteOutcome};
use crate::document::{Document, DocumentKey, DocumentStatus};
use crate::sanitize::hash_id;
use crate::worker::{ExtractionJob, WorkQueue};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The document advanced and a job was published.
    Enqueued { message_id: String },
    /// A previous call already advanced the document; nothing was published.
    AlreadyUploaded,
}

pub struct IngestionTrigger {
    settings: Arc<PipelineSettings>,
    db: Database,
    queue: Arc<dyn WorkQueue>,
}

impl IngestionTrigger {
    pub fn new(settings: Arc<PipelineSettings>, db: Database, queue: Arc<dyn WorkQueue>) -> Self {
        Self {
            settings,
            db,
            queue,
        }
    }

    fn load_owned(&self, key: &DocumentKey, owner_id: &str) -> Result<Document, PipelineError> {
        let document = document_repo::find(&self.db, key)?
            .ok_or_else(|| PipelineError::NotFound(key.document_id.clone()))?;
        if !document.is_owned_by(owner_id) {
            return Err(PipelineError::Forbidden(key.document_id.clone()));
        }
        Ok(document)
    }

    pub fn ingest(&self, document_id: &str, owner_id: &str) -> Result<IngestOutcome, PipelineError> {
        let _span = info_span!(
            "ingest",
            document_id = %document_id,
            owner = %hash_id(owner_id),
        )
        .entered();

        let key = DocumentKey::new(&self.settings.tenant_id, document_id);
        let document = self.load_owned(&key, owner_id)?;

        let change = match document.status {
            DocumentStatus::Uploaded => {
                info!("document already uploaded; not re-publishing");
                return Ok(IngestOutcome::AlreadyUploaded);
            }
            DocumentStatus::Created => StatusChange::to(DocumentStatus::Uploaded, Utc::now()),
            DocumentStatus::Failed => StatusChange::to(DocumentStatus::Uploaded, Utc::now())
                .clear_error()
                .increment_retry(),
            status => return Err(PipelineError::Conflict { status }),
        };

        let outcome = document_repo::transition(&self.db, &key, &[document.status], &change)?;
        if outcome == WriteOutcome::AlreadyAdvanced {
            let current = self.load_owned(&key, owner_id)?;
            return match current.status {
                DocumentStatus::Uploaded => Ok(IngestOutcome::AlreadyUploaded),
                status => Err(PipelineError::Conflict { status }),
            };
        }

        let body = serde_json::to_string(&ExtractionJob::for_document(&document))
            .map_err(|e| PipelineError::InvalidMessage(e.to_string()))?;

        match self.queue.publish(body) {
            Ok(message_id) => {
                info!(message_id = %message_id, "extraction job enqueued");
                Ok(IngestOutcome::Enqueued { message_id })
            }
            Err(e) => {
                warn!(error = %e, "enqueue failed; marking document failed");
                let rollback = StatusChange::to(DocumentStatus::Failed, Utc::now())
                    .with_error(format!("enqueue failed: {}", e));
                document_repo::transition(
                    &self.db,
                    &key,
                    &[DocumentStatus::Uploaded],
                    &rollback,
                )?;
                Err(PipelineError::TransientDependency {
                    dependency: "work queue",
                    message: e.to_string(),
                })
            }
        }
    }
}
