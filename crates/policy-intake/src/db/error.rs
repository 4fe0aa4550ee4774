//! Document store error types.

use std::path::PathBuf;
use thiserror::Error;

use crate::document::DocumentStatus;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Migration failed at version {version}: {reason}")]
    Migration { version: u32, reason: String },

    #[error("Failed to encode column '{column}': {source}")]
    Encode {
        column: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// A status write that is not an edge of the lifecycle graph.
    #[error("Illegal status transition {from} -> {to}")]
    IllegalTransition {
        from: DocumentStatus,
        to: DocumentStatus,
    },

    #[error("Document '{0}' not found")]
    NotFound(String),

    #[error("Database lock poisoned")]
    LockPoisoned,
}
