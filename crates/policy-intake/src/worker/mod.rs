pub mod job;
pub mod pool;
pub mod queue;

pub use job::{
    document_reference_tag, parse_document_reference, AnalysisCompletion, CompletionStatus,
    ExtractionJob,
};
pub use pool::{ConsumerPool, DeliveryReport, Disposition, MessageHandler};
pub use queue::{ChannelQueue, Delivery, QueueError, WorkQueue};

pub use crossbeam_channel;
