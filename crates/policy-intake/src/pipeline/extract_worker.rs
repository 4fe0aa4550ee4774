//! Extraction worker: starts the asynchronous analysis job for an uploaded
//! document and records its handle.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, info_span, warn, Instrument};

use super::{PipelineError, PipelineSettings};
use crate::analysis::{AnalysisService, StartAnalysisRequest};
use crate::db::{document_repo, Database, StatusChange, WriteOutcome};
use crate::document::{Document, DocumentKey, DocumentStatus};
use crate::worker::{document_reference_tag, ExtractionJob, MessageHandler};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractOutcome {
    /// The analysis job was started and recorded.
    Started { job_id: String },
    /// Redelivered or concurrent message; nothing to do.
    Duplicate,
    /// The document is in a status this worker does not act on.
    Skipped { status: DocumentStatus },
    /// The referenced document does not exist.
    Dropped,
    /// The start failed for good and the document was marked failed.
    Failed { error: String },
}

/// Where the raw analysis result for a source object is archived: next to
/// the original.
pub fn analysis_result_key(source_object_key: &str) -> String {
    match source_object_key.rsplit_once('/') {
        Some((parent, _)) => format!("{}/analysis/result.json", parent),
        None => format!("{}/analysis/result.json", source_object_key),
    }
}

pub struct ExtractionWorker {
    settings: Arc<PipelineSettings>,
    db: Database,
    analysis: Arc<dyn AnalysisService>,
}

impl ExtractionWorker {
    pub fn new(
        settings: Arc<PipelineSettings>,
        db: Database,
        analysis: Arc<dyn AnalysisService>,
    ) -> Self {
        Self {
            settings,
            db,
            analysis,
        }
    }

    pub async fn handle(&self, job: &ExtractionJob) -> Result<ExtractOutcome, PipelineError> {
        let span = info_span!(
            "extract_worker",
            tenant_id = %job.tenant_id,
            document_id = %job.document_id,
        );
        self.process(job.key()).instrument(span).await
    }

    async fn process(&self, key: DocumentKey) -> Result<ExtractOutcome, PipelineError> {
        let Some(document) = document_repo::find(&self.db, &key)? else {
            warn!("document not found; dropping job");
            return Ok(ExtractOutcome::Dropped);
        };

        if document.status.is_terminal()
            || (document.status == DocumentStatus::Processing && document.analysis_job_id.is_some())
        {
            info!(status = %document.status, "duplicate delivery");
            return Ok(ExtractOutcome::Duplicate);
        }

        match document.status {
            DocumentStatus::Uploaded => {
                let change =
                    StatusChange::to(DocumentStatus::Processing, Utc::now()).processing_started();
                let outcome = document_repo::transition(
                    &self.db,
                    &key,
                    &[DocumentStatus::Uploaded],
                    &change,
                )?;
                if outcome == WriteOutcome::AlreadyAdvanced {
                    info!("concurrent delivery already advanced the document");
                    return Ok(ExtractOutcome::Duplicate);
                }
            }
            // A previous attempt died between the status write and the job
            // start; start again.
            DocumentStatus::Processing => {}
            status => {
                warn!(status = %status, "unexpected status for extraction");
                return Ok(ExtractOutcome::Skipped { status });
            }
        }

        self.start_job(&key, &document).await
    }

    async fn start_job(
        &self,
        key: &DocumentKey,
        document: &Document,
    ) -> Result<ExtractOutcome, PipelineError> {
        let request = StartAnalysisRequest {
            source_object_key: document.source_object_key.clone(),
            features: self.settings.features.clone(),
            notification_target: self.settings.notification_target.clone(),
            job_tag: document_reference_tag(key, &self.settings.tenant_id),
        };

        let error = match self.analysis.start(&request).await {
            Ok(job_id) => {
                let change = StatusChange::to(DocumentStatus::Processing, Utc::now())
                    .with_analysis_job(&job_id, analysis_result_key(&document.source_object_key));
                let outcome = document_repo::transition(
                    &self.db,
                    key,
                    &[DocumentStatus::Processing],
                    &change,
                )?;
                if outcome == WriteOutcome::AlreadyAdvanced {
                    warn!(job_id = %job_id, "document left PROCESSING before the job was recorded");
                }
                info!(job_id = %job_id, "analysis job started");
                return Ok(ExtractOutcome::Started { job_id });
            }
            Err(error) => error,
        };

        let exhausted = document.retry_count >= self.settings.retry_budget;
        if error.is_permanent() || exhausted {
            warn!(
                error = %error,
                permanent = error.is_permanent(),
                retry_count = document.retry_count,
                "analysis start failed; marking document failed"
            );
            let change = StatusChange::to(DocumentStatus::Failed, Utc::now())
                .with_error(error.to_string())
                .processing_ended();
            let outcome =
                document_repo::transition(&self.db, key, &[DocumentStatus::Processing], &change)?;
            if outcome == WriteOutcome::AlreadyAdvanced {
                info!("document left PROCESSING before the failure was recorded");
                return Ok(ExtractOutcome::Duplicate);
            }
            return Ok(ExtractOutcome::Failed {
                error: error.to_string(),
            });
        }

        warn!(
            error = %error,
            retry_count = document.retry_count,
            "transient analysis start failure; returning document for retry"
        );
        let change = StatusChange::to(DocumentStatus::Uploaded, Utc::now()).increment_retry();
        let outcome =
            document_repo::transition(&self.db, key, &[DocumentStatus::Processing], &change)?;
        if outcome == WriteOutcome::AlreadyAdvanced {
            return Ok(ExtractOutcome::Duplicate);
        }
        Err(PipelineError::TransientDependency {
            dependency: "analysis service",
            message: error.to_string(),
        })
    }
}

#[async_trait]
impl MessageHandler for ExtractionWorker {
    async fn handle(&self, body: &str) -> Result<(), PipelineError> {
        let job: ExtractionJob =
            serde_json::from_str(body).map_err(|e| PipelineError::InvalidMessage(e.to_string()))?;
        ExtractionWorker::handle(self, &job).await.map(|_| ())
    }
}
