pub mod documents;
pub mod error;
pub mod extract_worker;
pub mod ingest;
pub mod parse_worker;
pub mod settings;
pub mod upload;

pub use documents::{DocumentPage, DocumentService, DocumentView, RenewalDue};
pub use error::{ErrorBody, PipelineError};
pub use extract_worker::{analysis_result_key, ExtractOutcome, ExtractionWorker};
pub use ingest::{IngestOutcome, IngestionTrigger};
pub use parse_worker::{needs_review_fields, ParseOutcome, ParseWorker, EXTRACTION_VERSION};
pub use settings::PipelineSettings;
pub use upload::{UploadHandler, UploadRequest, UploadTicket};
