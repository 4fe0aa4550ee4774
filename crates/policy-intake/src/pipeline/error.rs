use serde::Serialize;
use thiserror::Error;

use crate::db::DatabaseError;
use crate::document::DocumentStatus;
use crate::extract::ExtractError;
use crate::storage::StorageError;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("{0}")]
    Validation(String),

    #[error("Document {0} belongs to another user")]
    Forbidden(String),

    #[error("Document {0} not found")]
    NotFound(String),

    #[error("Document is {status}; operation not allowed")]
    Conflict { status: DocumentStatus },

    #[error("{dependency} unavailable: {message}")]
    TransientDependency {
        dependency: &'static str,
        message: String,
    },

    #[error("Invalid queue message: {0}")]
    InvalidMessage(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractError),
}

impl PipelineError {
    /// Stable machine-readable code for response bodies.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::Validation(_) => "VALIDATION_ERROR",
            PipelineError::Forbidden(_) => "FORBIDDEN",
            PipelineError::NotFound(_) => "NOT_FOUND",
            PipelineError::Conflict { .. } => "CONFLICT",
            PipelineError::TransientDependency { .. } => "DEPENDENCY_UNAVAILABLE",
            PipelineError::InvalidMessage(_) => "INVALID_MESSAGE",
            PipelineError::Database(_)
            | PipelineError::Storage(_)
            | PipelineError::Extraction(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether a queue consumer should let the message be redelivered.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::TransientDependency { .. }
                | PipelineError::Database(_)
                | PipelineError::Storage(_)
                | PipelineError::Extraction(_)
        )
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code(),
            message: self.to_string(),
        }
    }
}

/// Structured error returned by synchronous handlers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}
