use thiserror::Error;

/// Error codes for inputs the analysis service will never accept.
const PERMANENT_CODES: [&str; 4] = [
    "InvalidParameterException",
    "InvalidS3ObjectException",
    "UnsupportedDocumentException",
    "BadDocumentException",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Malformed or unsupported input; retrying cannot help.
    Permanent,
    /// Throttling or service-side failure.
    Transient,
}

/// A failed call to the analysis service, as `code: message`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct AnalysisError {
    pub code: String,
    pub message: String,
}

impl AnalysisError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn class(&self) -> FailureClass {
        if PERMANENT_CODES.contains(&self.code.as_str()) {
            FailureClass::Permanent
        } else {
            FailureClass::Transient
        }
    }

    pub fn is_permanent(&self) -> bool {
        self.class() == FailureClass::Permanent
    }
}
