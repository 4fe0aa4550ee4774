//! Object storage for original documents and archived analysis results.

pub mod filesystem;

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub use filesystem::FileStore;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Invalid object key '{0}'")]
    InvalidKey(String),

    #[error("Object '{0}' not found")]
    NotFound(String),

    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write object '{key}': {source}")]
    Write {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read object '{key}': {source}")]
    Read {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to delete object '{key}': {source}")]
    Delete {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Upload URL issuance failed: {0}")]
    UrlIssuance(String),
}

/// Read/write access to objects addressed by opaque `/`-separated keys.
pub trait ObjectStore: Send + Sync {
    /// Writes an object, replacing any existing one atomically.
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError>;

    fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Removes an object. Returns `false` when it did not exist.
    fn delete(&self, key: &str) -> Result<bool, StorageError>;
}

/// A time-limited credential allowing a client to write one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadUrl {
    pub url: String,
    pub expires_in: Duration,
}

/// Issues pre-authorized upload URLs. Provided by the hosting environment.
pub trait UploadUrlIssuer: Send + Sync {
    fn issue(
        &self,
        key: &str,
        content_type: &str,
        size_bytes: u64,
        expires_in: Duration,
    ) -> Result<UploadUrl, StorageError>;
}

/// Rejects keys that could escape the storage root or are not canonical.
pub fn validate_key(key: &str) -> Result<(), StorageError> {
    let valid = !key.is_empty()
        && !key.starts_with('/')
        && !key.contains('\\')
        && key
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..");
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}
