//! End-to-end pipeline scenarios: upload, ingestion, analysis start,
//! completion handling, review and housekeeping.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use common::harness::{StaticCompletionClient, OWNER};
use common::*;
use policy_intake::analysis::AnalysisError;
use policy_intake::db::{document_repo, StatusChange, WriteOutcome};
use policy_intake::document::{DocumentStatus, FieldName, PolicyFields};
use policy_intake::extract::ModelExtractor;
use policy_intake::pipeline::{
    ExtractOutcome, ExtractionWorker, IngestOutcome, ParseOutcome, PipelineError, UploadRequest,
};
use policy_intake::worker::{ConsumerPool, Disposition};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Uploads a document and starts its analysis job; returns the document id
/// and the job id.
async fn started_document(harness: &TestHarness) -> (String, String) {
    let id = harness.upload_and_ingest("poliza.pdf");
    let outcomes = harness.run_extract_queue().await;
    match outcomes.as_slice() {
        [Ok(ExtractOutcome::Started { job_id })] => (id, job_id.clone()),
        other => panic!("unexpected extract outcomes: {:?}", other),
    }
}

#[tokio::test]
async fn test_upload_then_ingest_publishes_once() {
    let harness = TestHarness::new();

    let ticket = harness
        .uploads
        .handle(&UploadRequest {
            owner_id: OWNER.to_string(),
            content_type: "application/pdf".to_string(),
            size_bytes: 500_000,
            file_name: None,
        })
        .unwrap();
    assert_eq!(
        ticket.object_key,
        format!("documents/default/{}/{}/original.pdf", OWNER, ticket.document_id)
    );
    assert_eq!(harness.document(&ticket.document_id).status, DocumentStatus::Created);

    let first = harness.ingestion.ingest(&ticket.document_id, OWNER).unwrap();
    assert!(matches!(first, IngestOutcome::Enqueued { .. }));
    assert_eq!(harness.document(&ticket.document_id).status, DocumentStatus::Uploaded);

    let second = harness.ingestion.ingest(&ticket.document_id, OWNER).unwrap();
    assert_eq!(second, IngestOutcome::AlreadyUploaded);
    assert_eq!(harness.extract_queue.len(), 1);
}

#[tokio::test]
async fn test_ingest_by_another_owner_is_forbidden() {
    let harness = TestHarness::new();
    let id = harness.upload_and_ingest("poliza.pdf");

    let err = harness.ingestion.ingest(&id, "someone-else").unwrap_err();
    assert!(matches!(err, PipelineError::Forbidden(_)));
}

#[tokio::test]
async fn test_start_records_job_and_ignores_redelivery() {
    let harness = TestHarness::new();
    let (id, job_id) = started_document(&harness).await;
    assert_eq!(job_id, "job-1");

    let document = harness.document(&id);
    assert_eq!(document.status, DocumentStatus::Processing);
    assert_eq!(document.analysis_job_id.as_deref(), Some("job-1"));
    assert_eq!(
        document.analysis_result_key,
        Some(format!("documents/default/{}/{}/analysis/result.json", OWNER, id))
    );

    let started = harness.analysis.started();
    assert_eq!(started.len(), 1);
    assert_eq!(started[0].job_tag, id);
    assert_eq!(started[0].source_object_key, document.source_object_key);

    let again = harness
        .extract_worker
        .handle(&harness.job_for(&id))
        .await
        .unwrap();
    assert_eq!(again, ExtractOutcome::Duplicate);
    assert_eq!(harness.analysis.started().len(), 1);
}

#[tokio::test]
async fn test_confident_complete_result_is_extracted() {
    let harness = TestHarness::new();
    let (id, job_id) = started_document(&harness).await;
    harness
        .analysis
        .set_result(&job_id, complete_policy(96.0).build());

    let outcome = harness
        .parse_worker
        .handle(&completion_body(&job_id, "SUCCEEDED", &id, None))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        ParseOutcome::Completed {
            status: DocumentStatus::Extracted,
            needs_review: vec![],
        }
    );

    let document = harness.document(&id);
    assert_eq!(document.status, DocumentStatus::Extracted);
    assert_eq!(document.fields.policy_number.as_deref(), Some("GNP-7788123"));
    assert_eq!(document.fields.insured_name.as_deref(), Some("María Pérez López"));
    assert_eq!(document.fields.policy_type.as_deref(), Some("auto"));
    assert_eq!(document.fields.start_date.as_deref(), Some("2024-02-01"));
    assert_eq!(document.fields.end_date.as_deref(), Some("2025-02-01"));
    assert_eq!(document.fields.renewal_date.as_deref(), Some("2025-02-01"));
    assert_eq!(document.fields.premium_total, Some(12480.0));
    assert_eq!(document.fields.currency.as_deref(), Some("MXN"));
    assert_eq!(document.field_confidence[&FieldName::PolicyNumber], 0.96);
    assert!(!document.field_confidence.contains_key(&FieldName::Insurer));
    assert_eq!(document.extraction_version, Some(1));
    assert!(document.processing_ended_at.is_some());

    let archive = document.analysis_result_key.unwrap();
    assert!(harness.object_exists(&archive));
}

#[tokio::test]
async fn test_missing_end_date_needs_review() {
    let harness = TestHarness::new();
    let (id, job_id) = started_document(&harness).await;
    harness
        .analysis
        .set_result(&job_id, policy_without_end_date(95.0).build());

    let outcome = harness
        .parse_worker
        .handle(&completion_body(&job_id, "SUCCEEDED", &id, None))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        ParseOutcome::Completed {
            status: DocumentStatus::NeedsReview,
            needs_review: vec![FieldName::EndDate],
        }
    );

    let document = harness.document(&id);
    assert_eq!(document.status, DocumentStatus::NeedsReview);
    assert!(document.needs_review_fields.contains(&FieldName::EndDate));
    assert!(document.fields.end_date.is_none());
}

#[tokio::test]
async fn test_low_confidence_fields_need_review() {
    let harness = TestHarness::new();
    let (id, job_id) = started_document(&harness).await;
    harness
        .analysis
        .set_result(&job_id, complete_policy(60.0).build());

    harness
        .parse_worker
        .handle(&completion_body(&job_id, "SUCCEEDED", &id, None))
        .await
        .unwrap();

    let document = harness.document(&id);
    assert_eq!(document.status, DocumentStatus::NeedsReview);
    assert!(document.needs_review_fields.contains(&FieldName::PolicyNumber));
    assert!(document.needs_review_fields.contains(&FieldName::PremiumTotal));
    // Defaulted currency is certain.
    assert!(!document.needs_review_fields.contains(&FieldName::Currency));
}

#[tokio::test]
async fn test_permanent_start_error_fails_immediately() {
    let harness = TestHarness::new();
    harness.analysis.push_start(Err(AnalysisError::new(
        "UnsupportedDocumentException",
        "Request has unsupported document format",
    )));
    let id = harness.upload_and_ingest("poliza.pdf");

    let outcomes = harness.run_extract_queue().await;
    assert!(matches!(
        outcomes.as_slice(),
        [Ok(ExtractOutcome::Failed { .. })]
    ));

    let document = harness.document(&id);
    assert_eq!(document.status, DocumentStatus::Failed);
    assert_eq!(document.retry_count, 0);
    assert!(document
        .last_error
        .unwrap()
        .starts_with("UnsupportedDocumentException"));
}

#[tokio::test]
async fn test_transient_start_errors_exhaust_retry_budget() {
    let harness = TestHarness::new();
    for attempt in 1..=4 {
        harness.analysis.push_start(Err(AnalysisError::new(
            "ThrottlingException",
            format!("Rate exceeded ({})", attempt),
        )));
    }
    let id = harness.upload_and_ingest("poliza.pdf");

    let first = harness.run_extract_queue().await;
    assert!(matches!(
        first.as_slice(),
        [Err(PipelineError::TransientDependency { .. })]
    ));

    for _ in 0..2 {
        let err = harness
            .extract_worker
            .handle(&harness.job_for(&id))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
    let document = harness.document(&id);
    assert_eq!(document.status, DocumentStatus::Uploaded);
    assert_eq!(document.retry_count, 3);

    let last = harness
        .extract_worker
        .handle(&harness.job_for(&id))
        .await
        .unwrap();
    assert!(matches!(last, ExtractOutcome::Failed { .. }));

    let document = harness.document(&id);
    assert_eq!(document.status, DocumentStatus::Failed);
    assert_eq!(document.retry_count, 3);
    assert_eq!(
        document.last_error.as_deref(),
        Some("ThrottlingException: Rate exceeded (4)")
    );

    let after = harness
        .extract_worker
        .handle(&harness.job_for(&id))
        .await
        .unwrap();
    assert_eq!(
        after,
        ExtractOutcome::Skipped {
            status: DocumentStatus::Failed
        }
    );
    assert_eq!(harness.analysis.started().len(), 4);
}

#[tokio::test]
async fn test_failed_analysis_can_be_retried() {
    let harness = TestHarness::new();
    let (id, job_id) = started_document(&harness).await;

    let outcome = harness
        .parse_worker
        .handle(&completion_body(
            &job_id,
            "FAILED",
            &id,
            Some("Request has invalid image"),
        ))
        .await
        .unwrap();
    assert_eq!(outcome, ParseOutcome::MarkedFailed);

    let document = harness.document(&id);
    assert_eq!(document.status, DocumentStatus::Failed);
    assert_eq!(document.last_error.as_deref(), Some("Request has invalid image"));

    let retried = harness.ingestion.ingest(&id, OWNER).unwrap();
    assert!(matches!(retried, IngestOutcome::Enqueued { .. }));
    let document = harness.document(&id);
    assert_eq!(document.status, DocumentStatus::Uploaded);
    assert_eq!(document.retry_count, 1);
    assert!(document.last_error.is_none());
}

#[tokio::test]
async fn test_duplicate_and_stale_notifications() {
    let harness = TestHarness::new();
    let (id, job_id) = started_document(&harness).await;
    harness
        .analysis
        .set_result(&job_id, complete_policy(95.0).build());

    let stale = harness
        .parse_worker
        .handle(&completion_body("job-old", "SUCCEEDED", &id, None))
        .await
        .unwrap();
    assert_eq!(
        stale,
        ParseOutcome::Dropped {
            reason: "job id mismatch"
        }
    );
    assert_eq!(harness.document(&id).status, DocumentStatus::Processing);

    let body = completion_body(&job_id, "SUCCEEDED", &id, None);
    let first = harness.parse_worker.handle(&body).await.unwrap();
    assert!(matches!(first, ParseOutcome::Completed { .. }));
    let second = harness.parse_worker.handle(&body).await.unwrap();
    assert_eq!(second, ParseOutcome::Duplicate);
}

#[tokio::test]
async fn test_completion_before_job_id_is_recorded() {
    let harness = TestHarness::new();
    let id = harness.upload_and_ingest("poliza.pdf");

    // The extraction worker has claimed the document but not yet written
    // the job id when the completion arrives.
    let claim = StatusChange::to(DocumentStatus::Processing, Utc::now()).processing_started();
    let outcome = document_repo::transition(
        &harness.db,
        &harness.key(&id),
        &[DocumentStatus::Uploaded],
        &claim,
    )
    .unwrap();
    assert_eq!(outcome, WriteOutcome::Applied);
    assert!(harness.document(&id).analysis_job_id.is_none());

    harness
        .analysis
        .set_result("job-early", complete_policy(95.0).build());
    let outcome = harness
        .parse_worker
        .handle(&completion_body("job-early", "SUCCEEDED", &id, None))
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        ParseOutcome::Completed {
            status: DocumentStatus::Extracted,
            ..
        }
    ));

    let document = harness.document(&id);
    assert_eq!(document.analysis_job_id.as_deref(), Some("job-early"));
    let archive = format!("documents/default/{}/{}/analysis/result.json", OWNER, id);
    assert_eq!(document.analysis_result_key.as_deref(), Some(archive.as_str()));
    assert!(harness.object_exists(&archive));
}

#[tokio::test]
async fn test_early_failure_notification_records_job() {
    let harness = TestHarness::new();
    let id = harness.upload_and_ingest("poliza.pdf");
    let claim = StatusChange::to(DocumentStatus::Processing, Utc::now()).processing_started();
    document_repo::transition(
        &harness.db,
        &harness.key(&id),
        &[DocumentStatus::Uploaded],
        &claim,
    )
    .unwrap();

    let outcome = harness
        .parse_worker
        .handle(&completion_body("job-early", "FAILED", &id, None))
        .await
        .unwrap();
    assert_eq!(outcome, ParseOutcome::MarkedFailed);

    let document = harness.document(&id);
    assert_eq!(document.status, DocumentStatus::Failed);
    assert_eq!(document.analysis_job_id.as_deref(), Some("job-early"));
    assert_eq!(document.last_error.as_deref(), Some("analysis failed"));
}

#[tokio::test]
async fn test_result_pages_are_all_read() {
    let harness = TestHarness::new();
    let (id, job_id) = started_document(&harness).await;

    let mut blocks = complete_policy(95.0).build();
    let tail = blocks.split_off(blocks.len() / 2);
    harness.analysis.set_pages(&job_id, vec![blocks, tail]);

    harness
        .parse_worker
        .handle(&completion_body(&job_id, "SUCCEEDED", &id, None))
        .await
        .unwrap();

    assert_eq!(
        harness.analysis.page_requests(),
        vec![
            (job_id.clone(), None),
            (job_id.clone(), Some("t1".to_string())),
        ]
    );
    assert_eq!(harness.document(&id).status, DocumentStatus::Extracted);
}

#[tokio::test]
async fn test_model_extractor_flags_unknown_policy_type() {
    let reply = r#"{
        "fields": {
            "policyNumber": "GNP-7788123",
            "insuredName": "María Pérez López",
            "policyType": "mascotas",
            "startDate": "2024-02-01",
            "endDate": "2025-02-01"
        },
        "confidence": {
            "policyNumber": 0.97,
            "insuredName": 0.95,
            "policyType": 0.9,
            "startDate": 0.93,
            "endDate": 0.93
        }
    }"#;
    let client = Arc::new(StaticCompletionClient::new(reply));
    let extractor = ModelExtractor::new(client.clone(), vec![FieldName::PolicyNumber]);
    let harness = TestHarness::with_extractor(Arc::new(extractor));

    let (id, job_id) = started_document(&harness).await;
    harness
        .analysis
        .set_result(&job_id, BlocksBuilder::new().line("Póliza de mascotas", 95.0).build());

    let outcome = harness
        .parse_worker
        .handle(&completion_body(&job_id, "SUCCEEDED", &id, None))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        ParseOutcome::Completed {
            status: DocumentStatus::NeedsReview,
            needs_review: vec![FieldName::PolicyType],
        }
    );
    assert_eq!(*client.calls.lock().unwrap(), 1);
    assert_eq!(
        harness.document(&id).fields.policy_type.as_deref(),
        Some("mascotas")
    );
}

#[tokio::test]
async fn test_review_then_verify() {
    let harness = TestHarness::new();
    let (id, job_id) = started_document(&harness).await;
    harness
        .analysis
        .set_result(&job_id, policy_without_end_date(95.0).build());
    harness
        .parse_worker
        .handle(&completion_body(&job_id, "SUCCEEDED", &id, None))
        .await
        .unwrap();

    let corrections = PolicyFields {
        end_date: Some("31/01/2025".to_string()),
        ..Default::default()
    };
    let view = harness.documents.verify(OWNER, &id, &corrections).unwrap();
    let document = view.document;
    assert_eq!(document.status, DocumentStatus::Verified);
    assert_eq!(document.fields.end_date.as_deref(), Some("2025-01-31"));
    assert_eq!(document.field_confidence[&FieldName::EndDate], 1.0);
    assert!(document.needs_review_fields.is_empty());
    assert_eq!(document.verified_by_user_id.as_deref(), Some(OWNER));

    let err = harness
        .documents
        .verify(OWNER, &id, &corrections)
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Conflict {
            status: DocumentStatus::Verified
        }
    ));
}

#[tokio::test]
async fn test_renewals_due_and_delete() {
    let harness = TestHarness::new();
    let (id, job_id) = started_document(&harness).await;
    harness
        .analysis
        .set_result(&job_id, complete_policy(95.0).build());
    harness
        .parse_worker
        .handle(&completion_body(&job_id, "SUCCEEDED", &id, None))
        .await
        .unwrap();

    let due = harness
        .documents
        .renewals_due("default", date(2025, 1, 15), 30)
        .unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].document.document_id, id);
    assert_eq!(due[0].days_remaining, 17);

    let later = harness
        .documents
        .renewals_due("default", date(2025, 3, 1), 30)
        .unwrap();
    assert!(later.is_empty());

    let document = harness.document(&id);
    let source = document.source_object_key.clone();
    let archive = document.analysis_result_key.clone().unwrap();
    assert!(harness.object_exists(&source));
    assert!(harness.object_exists(&archive));

    harness.documents.delete(OWNER, &id).unwrap();
    assert!(!harness.object_exists(&source));
    assert!(!harness.object_exists(&archive));
    assert!(matches!(
        harness.documents.get(OWNER, &id),
        Err(PipelineError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_list_is_scoped_to_owner() {
    let harness = TestHarness::new();
    let first = harness.upload_and_ingest("a.pdf");
    let second = harness.upload_and_ingest("b.pdf");

    let page = harness.documents.list(OWNER, 10, 0).unwrap();
    assert_eq!(page.total, 2);
    let ids: Vec<_> = page
        .items
        .iter()
        .map(|v| v.document.document_id.clone())
        .collect();
    assert!(ids.contains(&first));
    assert!(ids.contains(&second));

    let other = harness.documents.list("someone-else", 10, 0).unwrap();
    assert_eq!(other.total, 0);
    assert!(other.items.is_empty());
}

#[test]
fn test_consumer_pool_retries_transient_start() {
    let harness = TestHarness::new();
    harness.analysis.push_start(Err(AnalysisError::new(
        "ProvisionedThroughputExceededException",
        "slow down",
    )));
    let id = harness.upload_and_ingest("poliza.pdf");

    let worker = Arc::new(ExtractionWorker::new(
        harness.settings.clone(),
        harness.db.clone(),
        harness.analysis.clone(),
    ));
    let pool = ConsumerPool::start(harness.extract_queue.clone(), worker, 1, 5);

    let first = pool
        .recv_report_timeout(Duration::from_secs(5))
        .expect("no report for first delivery");
    assert_eq!(first.disposition, Disposition::Redelivered);
    assert_eq!(first.receive_count, 1);

    let second = pool
        .recv_report_timeout(Duration::from_secs(5))
        .expect("no report for redelivery");
    assert_eq!(second.disposition, Disposition::Acknowledged);
    assert_eq!(second.receive_count, 2);
    pool.wait();

    let document = harness.document(&id);
    assert_eq!(document.status, DocumentStatus::Processing);
    assert_eq!(document.analysis_job_id.as_deref(), Some("job-2"));
    assert_eq!(document.retry_count, 1);
    assert!(harness.extract_queue.dead_letters().is_empty());
}
