use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Processing lifecycle of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    Created,
    Uploaded,
    Processing,
    Extracted,
    NeedsReview,
    Verified,
    Failed,
}

impl DocumentStatus {
    pub const ALL: [DocumentStatus; 7] = [
        DocumentStatus::Created,
        DocumentStatus::Uploaded,
        DocumentStatus::Processing,
        DocumentStatus::Extracted,
        DocumentStatus::NeedsReview,
        DocumentStatus::Verified,
        DocumentStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Created => "CREATED",
            DocumentStatus::Uploaded => "UPLOADED",
            DocumentStatus::Processing => "PROCESSING",
            DocumentStatus::Extracted => "EXTRACTED",
            DocumentStatus::NeedsReview => "NEEDS_REVIEW",
            DocumentStatus::Verified => "VERIFIED",
            DocumentStatus::Failed => "FAILED",
        }
    }

    /// Statuses a worker must never re-process. A redelivered message that
    /// finds one of these is acknowledged without side effects.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DocumentStatus::Extracted | DocumentStatus::NeedsReview | DocumentStatus::Verified
        )
    }

    /// Whether a status write from `self` to `next` is an edge of the
    /// lifecycle graph.
    ///
    /// `UPLOADED → UPLOADED` and `PROCESSING → UPLOADED` are the transient
    /// retry bookkeeping of the extraction worker; `PROCESSING → PROCESSING`
    /// is the job-id recording write. `FAILED → UPLOADED` is the explicit
    /// retry path.
    pub fn can_transition_to(&self, next: DocumentStatus) -> bool {
        use DocumentStatus::*;
        matches!(
            (self, next),
            (Created, Uploaded)
                | (Failed, Uploaded)
                | (Uploaded, Uploaded)
                | (Uploaded, Processing)
                | (Uploaded, Failed)
                | (Processing, Processing)
                | (Processing, Uploaded)
                | (Processing, Failed)
                | (Processing, Extracted)
                | (Processing, NeedsReview)
                | (NeedsReview, Verified)
        )
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DocumentStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown document status '{}'", s))
    }
}
