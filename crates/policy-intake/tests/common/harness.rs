//! Test harness wiring every pipeline stage over temporary storage.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use policy_intake::analysis::{
    AnalysisError, AnalysisService, Block, ResultPage, StartAnalysisRequest,
};
use policy_intake::config::Config;
use policy_intake::db::{document_repo, Database};
use policy_intake::document::{Document, DocumentKey};
use policy_intake::extract::{CompletionClient, CompletionError, FieldExtractor, PatternExtractor};
use policy_intake::pipeline::{
    DocumentService, ExtractOutcome, ExtractionWorker, IngestOutcome, IngestionTrigger,
    ParseWorker, PipelineError, PipelineSettings, UploadHandler, UploadRequest,
};
use policy_intake::storage::{FileStore, ObjectStore, StorageError, UploadUrl, UploadUrlIssuer};
use policy_intake::worker::{ChannelQueue, ExtractionJob};

pub const OWNER: &str = "user-1";

/// Analysis service whose start results and result pages are scripted.
#[derive(Default)]
pub struct ScriptedAnalysisService {
    starts: Mutex<VecDeque<Result<String, AnalysisError>>>,
    pages: Mutex<HashMap<String, Vec<Vec<Block>>>>,
    started: Mutex<Vec<StartAnalysisRequest>>,
    page_requests: Mutex<Vec<(String, Option<String>)>>,
}

impl ScriptedAnalysisService {
    /// Queues the result of the next `start` call. Unscripted starts
    /// succeed with `job-N`.
    pub fn push_start(&self, result: Result<String, AnalysisError>) {
        self.starts.lock().unwrap().push_back(result);
    }

    /// Sets the result of `job_id`, split into pages.
    pub fn set_pages(&self, job_id: &str, pages: Vec<Vec<Block>>) {
        self.pages
            .lock()
            .unwrap()
            .insert(job_id.to_string(), pages);
    }

    pub fn set_result(&self, job_id: &str, blocks: Vec<Block>) {
        self.set_pages(job_id, vec![blocks]);
    }

    pub fn started(&self) -> Vec<StartAnalysisRequest> {
        self.started.lock().unwrap().clone()
    }

    pub fn page_requests(&self) -> Vec<(String, Option<String>)> {
        self.page_requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl AnalysisService for ScriptedAnalysisService {
    async fn start(&self, request: &StartAnalysisRequest) -> Result<String, AnalysisError> {
        let mut started = self.started.lock().unwrap();
        started.push(request.clone());
        let n = started.len();
        self.starts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(format!("job-{}", n)))
    }

    async fn fetch_page(
        &self,
        job_id: &str,
        next_token: Option<&str>,
    ) -> Result<ResultPage, AnalysisError> {
        self.page_requests
            .lock()
            .unwrap()
            .push((job_id.to_string(), next_token.map(str::to_string)));

        let pages = self.pages.lock().unwrap();
        let pages = pages
            .get(job_id)
            .ok_or_else(|| AnalysisError::new("InvalidJobIdException", "unknown job"))?;
        let index = match next_token {
            None => 0,
            Some(token) => token
                .strip_prefix('t')
                .and_then(|n| n.parse::<usize>().ok())
                .ok_or_else(|| AnalysisError::new("InvalidParameterException", "bad token"))?,
        };
        let blocks = pages.get(index).cloned().unwrap_or_default();
        let next_token = (index + 1 < pages.len()).then(|| format!("t{}", index + 1));
        Ok(ResultPage { blocks, next_token })
    }
}

pub struct FakeUrlIssuer;

impl UploadUrlIssuer for FakeUrlIssuer {
    fn issue(
        &self,
        key: &str,
        _content_type: &str,
        _size_bytes: u64,
        expires_in: Duration,
    ) -> Result<UploadUrl, StorageError> {
        Ok(UploadUrl {
            url: format!("https://uploads.test/{}?sig=abc", key),
            expires_in,
        })
    }
}

/// Completion client that always answers with the same reply.
pub struct StaticCompletionClient {
    pub reply: String,
    pub calls: Mutex<usize>,
}

impl StaticCompletionClient {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            calls: Mutex::new(0),
        }
    }
}

#[async_trait]
impl CompletionClient for StaticCompletionClient {
    async fn complete(
        &self,
        _system_prompt: &str,
        _user_text: &str,
    ) -> Result<String, CompletionError> {
        *self.calls.lock().unwrap() += 1;
        Ok(self.reply.clone())
    }
}

/// A pipeline over an in-memory database and a temporary object root.
pub struct TestHarness {
    pub temp_dir: TempDir,
    pub db: Database,
    pub store: Arc<FileStore>,
    pub settings: Arc<PipelineSettings>,
    pub analysis: Arc<ScriptedAnalysisService>,
    pub extract_queue: Arc<ChannelQueue>,
    pub uploads: UploadHandler,
    pub ingestion: IngestionTrigger,
    pub extract_worker: ExtractionWorker,
    pub parse_worker: ParseWorker,
    pub documents: DocumentService,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self::build(config, Arc::new(PatternExtractor::new()))
    }

    pub fn with_extractor(extractor: Arc<dyn FieldExtractor>) -> Self {
        Self::build(Config::default(), extractor)
    }

    fn build(config: Config, extractor: Arc<dyn FieldExtractor>) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db = Database::open_in_memory().expect("Failed to open database");
        let store = Arc::new(FileStore::new(temp_dir.path().join("objects")));
        let settings = Arc::new(PipelineSettings::from_config(&config));
        let analysis = Arc::new(ScriptedAnalysisService::default());
        let extract_queue = Arc::new(ChannelQueue::new("extract-jobs"));

        let uploads = UploadHandler::new(settings.clone(), db.clone(), Arc::new(FakeUrlIssuer));
        let ingestion = IngestionTrigger::new(settings.clone(), db.clone(), extract_queue.clone());
        let extract_worker = ExtractionWorker::new(settings.clone(), db.clone(), analysis.clone());
        let parse_worker = ParseWorker::new(
            settings.clone(),
            db.clone(),
            analysis.clone(),
            store.clone(),
            extractor,
        );
        let documents = DocumentService::new(settings.clone(), db.clone(), store.clone());

        Self {
            temp_dir,
            db,
            store,
            settings,
            analysis,
            extract_queue,
            uploads,
            ingestion,
            extract_worker,
            parse_worker,
            documents,
        }
    }

    /// Requests an upload URL, stores the file bytes and fires the
    /// object-created trigger. Returns the document id.
    pub fn upload_and_ingest(&self, file_name: &str) -> String {
        let ticket = self
            .uploads
            .handle(&UploadRequest {
                owner_id: OWNER.to_string(),
                content_type: "application/pdf".to_string(),
                size_bytes: 2048,
                file_name: Some(file_name.to_string()),
            })
            .expect("upload request rejected");
        self.store
            .put(&ticket.object_key, b"%PDF-1.7 test")
            .expect("Failed to store original");

        let outcome = self
            .ingestion
            .ingest(&ticket.document_id, OWNER)
            .expect("ingestion failed");
        assert!(matches!(outcome, IngestOutcome::Enqueued { .. }));
        ticket.document_id
    }

    /// Drains the extraction queue through the worker, one delivery each.
    pub async fn run_extract_queue(&self) -> Vec<Result<ExtractOutcome, PipelineError>> {
        let receiver = self.extract_queue.receiver();
        let mut outcomes = Vec::new();
        while let Ok(delivery) = receiver.try_recv() {
            let job: ExtractionJob =
                serde_json::from_str(&delivery.body).expect("Invalid job body");
            outcomes.push(self.extract_worker.handle(&job).await);
        }
        outcomes
    }

    pub fn job_for(&self, document_id: &str) -> ExtractionJob {
        ExtractionJob::for_document(&self.document(document_id))
    }

    pub fn key(&self, document_id: &str) -> DocumentKey {
        DocumentKey::new(&self.settings.tenant_id, document_id)
    }

    pub fn document(&self, document_id: &str) -> Document {
        document_repo::find(&self.db, &self.key(document_id))
            .expect("Failed to read document")
            .expect("document not found")
    }

    pub fn object_exists(&self, key: &str) -> bool {
        self.store.get(key).is_ok()
    }
}
