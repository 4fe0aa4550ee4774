//! Parse worker: consumes analysis-completion notifications, runs field
//! extraction and finalizes the document.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, info_span, warn, Instrument};

use super::{analysis_result_key, PipelineError, PipelineSettings};
use crate::analysis::{fetch_all_blocks, AnalysisService, Block, BlockArchive};
use crate::db::{document_repo, Database, FieldWrite, StatusChange, WriteOutcome};
use crate::document::{
    normalize_confidence, DocumentStatus, FieldConfidence, FieldName, PolicyFields,
};
use crate::extract::{FieldExtractor, RecognizedDocument};
use crate::renewal::{format_date, renewal_date};
use crate::storage::ObjectStore;
use crate::worker::{parse_document_reference, AnalysisCompletion, MessageHandler};

/// Version marker written with every extraction result.
pub const EXTRACTION_VERSION: u32 = 1;

const DEFAULT_FAILURE_MESSAGE: &str = "analysis failed";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    Completed {
        status: DocumentStatus,
        needs_review: Vec<FieldName>,
    },
    /// The analysis service reported failure and the document was failed.
    MarkedFailed,
    Duplicate,
    Dropped { reason: &'static str },
}

/// Fields needing human review: required fields that are missing (in
/// configured order), then present fields below the threshold, then fields
/// the extractor flagged. Each field appears once.
///
/// A present field without a confidence counts as zero. The renewal date is
/// derived, not extracted, and is never checked against the threshold.
pub fn needs_review_fields(
    fields: &PolicyFields,
    confidence: &FieldConfidence,
    flagged: &[FieldName],
    required: &[FieldName],
    threshold: f64,
) -> Vec<FieldName> {
    let mut review: Vec<FieldName> = Vec::new();
    let mut push = |name: FieldName| {
        if !review.contains(&name) {
            review.push(name);
        }
    };

    for name in required {
        if !fields.is_present(*name) {
            push(*name);
        }
    }
    for name in fields.present() {
        if name == FieldName::RenewalDate {
            continue;
        }
        if confidence.get(&name).copied().unwrap_or(0.0) < threshold {
            push(name);
        }
    }
    for name in flagged {
        push(*name);
    }
    review
}

pub struct ParseWorker {
    settings: Arc<PipelineSettings>,
    db: Database,
    analysis: Arc<dyn AnalysisService>,
    store: Arc<dyn ObjectStore>,
    extractor: Arc<dyn FieldExtractor>,
}

impl ParseWorker {
    pub fn new(
        settings: Arc<PipelineSettings>,
        db: Database,
        analysis: Arc<dyn AnalysisService>,
        store: Arc<dyn ObjectStore>,
        extractor: Arc<dyn FieldExtractor>,
    ) -> Self {
        Self {
            settings,
            db,
            analysis,
            store,
            extractor,
        }
    }

    /// Handles one raw notification body.
    pub async fn handle(&self, body: &str) -> Result<ParseOutcome, PipelineError> {
        let completion = AnalysisCompletion::from_body(body)
            .map_err(|e| PipelineError::InvalidMessage(e.to_string()))?;
        let span = info_span!(
            "parse_worker",
            job_id = %completion.job_id,
            status = ?completion.status,
        );
        self.process(&completion).instrument(span).await
    }

    async fn process(&self, completion: &AnalysisCompletion) -> Result<ParseOutcome, PipelineError> {
        let Some(key) = completion
            .job_tag
            .as_deref()
            .and_then(|tag| parse_document_reference(tag, &self.settings.tenant_id))
        else {
            warn!("notification carries no document reference; dropping");
            return Ok(ParseOutcome::Dropped {
                reason: "missing document reference",
            });
        };

        let Some(document) = document_repo::find(&self.db, &key)? else {
            warn!(document_id = %key.document_id, "document not found; dropping notification");
            return Ok(ParseOutcome::Dropped {
                reason: "document not found",
            });
        };

        if document.status.is_terminal() {
            info!(status = %document.status, "duplicate notification");
            return Ok(ParseOutcome::Duplicate);
        }

        if let Some(recorded) = document.analysis_job_id.as_deref() {
            if recorded != completion.job_id {
                warn!(recorded = %recorded, "notification for a superseded job; dropping");
                return Ok(ParseOutcome::Dropped {
                    reason: "job id mismatch",
                });
            }
        }

        // A completion can overtake the extraction worker's job-id write.
        let result_key = document
            .analysis_result_key
            .clone()
            .unwrap_or_else(|| analysis_result_key(&document.source_object_key));
        let record_job = document.analysis_job_id.is_none();

        if !completion.status.is_success() {
            let message = completion
                .status_message
                .clone()
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_string());
            warn!(error = %message, "analysis job failed");
            let mut change = StatusChange::to(DocumentStatus::Failed, Utc::now())
                .with_error(message)
                .processing_ended();
            if record_job {
                change = change.with_analysis_job(&completion.job_id, &result_key);
            }
            let outcome = document_repo::transition(
                &self.db,
                &key,
                &[DocumentStatus::Processing, DocumentStatus::Uploaded],
                &change,
            )?;
            return Ok(match outcome {
                WriteOutcome::Applied => ParseOutcome::MarkedFailed,
                WriteOutcome::AlreadyAdvanced => ParseOutcome::Duplicate,
            });
        }

        if document.status != DocumentStatus::Processing {
            warn!(status = %document.status, "completion for a document not in PROCESSING");
            return Ok(ParseOutcome::Dropped {
                reason: "document not processing",
            });
        }

        let blocks = fetch_all_blocks(self.analysis.as_ref(), &completion.job_id)
            .await
            .map_err(|e| PipelineError::TransientDependency {
                dependency: "analysis service",
                message: e.to_string(),
            })?;
        debug!(blocks = blocks.len(), "analysis result retrieved");

        self.archive(&result_key, &blocks);

        let recognized = RecognizedDocument::from_blocks(&blocks);
        let extraction = self.extractor.extract(&recognized).await?;

        let mut fields = document.fields.clone();
        fields.apply(&extraction.fields);
        fields.renewal_date =
            renewal_date(fields.policy_type.as_deref(), fields.start_date.as_deref())
                .map(format_date);

        let confidence: FieldConfidence = extraction
            .confidence
            .iter()
            .filter(|(name, _)| fields.is_present(**name))
            .map(|(name, score)| (*name, normalize_confidence(*score)))
            .collect();

        let needs_review = needs_review_fields(
            &fields,
            &confidence,
            &extraction.flagged,
            &self.settings.required_fields,
            self.settings.confidence_threshold,
        );
        let status = if needs_review.is_empty() {
            DocumentStatus::Extracted
        } else {
            DocumentStatus::NeedsReview
        };

        let mut change = StatusChange::to(status, Utc::now())
            .with_fields(FieldWrite {
                fields,
                confidence: Some(confidence),
                needs_review: needs_review.clone(),
                extraction_version: Some(EXTRACTION_VERSION),
            })
            .processing_ended();
        if record_job {
            change = change.with_analysis_job(&completion.job_id, &result_key);
        }
        let outcome =
            document_repo::transition(&self.db, &key, &[DocumentStatus::Processing], &change)?;
        if outcome == WriteOutcome::AlreadyAdvanced {
            info!("document finalized by a concurrent delivery");
            return Ok(ParseOutcome::Duplicate);
        }

        info!(
            status = %status,
            extractor = self.extractor.name(),
            review = needs_review.len(),
            "document finalized"
        );
        Ok(ParseOutcome::Completed {
            status,
            needs_review,
        })
    }

    /// Stores the raw blocks at the document's result key. Failure only
    /// loses the archive copy.
    fn archive(&self, result_key: &str, blocks: &[Block]) {
        let stored = serde_json::to_vec(&BlockArchive { blocks })
            .map_err(|e| e.to_string())
            .and_then(|bytes| {
                self.store
                    .put(result_key, &bytes)
                    .map_err(|e| e.to_string())
            });
        if let Err(e) = stored {
            warn!(result_key = %result_key, error = %e, "could not archive analysis result");
        }
    }
}

#[async_trait]
impl MessageHandler for ParseWorker {
    async fn handle(&self, body: &str) -> Result<(), PipelineError> {
        ParseWorker::handle(self, body).await.map(|_| ())
    }
}
