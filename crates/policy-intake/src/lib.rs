pub mod analysis;
pub mod config;
pub mod db;
pub mod document;
pub mod error;
pub mod extract;
pub mod logging;
pub mod pipeline;
pub mod renewal;
pub mod sanitize;
pub mod secrets;
pub mod storage;
pub mod text;
pub mod worker;

pub use analysis::{AnalysisError, AnalysisService};
pub use config::{load_config, Config};
pub use db::{Database, DatabaseError, WriteOutcome};
pub use document::{Document, DocumentKey, DocumentStatus, FieldName, PolicyFields, PolicyType};
pub use error::{ConfigError, IntakeError, Result};
pub use extract::{build_extractor, Extraction, FieldExtractor};
pub use pipeline::{
    DocumentService, ExtractionWorker, IngestionTrigger, ParseWorker, PipelineError,
    PipelineSettings, UploadHandler,
};
pub use renewal::{renewal_date, RenewalStatus};
pub use secrets::{resolve_secret, SecretError};
pub use storage::{FileStore, ObjectStore, StorageError};
pub use worker::{ChannelQueue, ConsumerPool, WorkQueue};
