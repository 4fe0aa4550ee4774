//! Asynchronous document analysis service.
//!
//! A job is started against a stored object; its completion is pushed to a
//! notification target and the result is fetched afterwards, page by page.

pub mod blocks;
pub mod error;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use blocks::{Block, BlockArchive, BlockType, EntityType, Relationship, RelationshipType};
pub use error::{AnalysisError, FailureClass};

/// Upper bound on result pages fetched for one job.
const MAX_RESULT_PAGES: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisFeature {
    Forms,
    Tables,
}

impl AnalysisFeature {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisFeature::Forms => "FORMS",
            AnalysisFeature::Tables => "TABLES",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartAnalysisRequest {
    pub source_object_key: String,
    pub features: Vec<AnalysisFeature>,
    /// Where the completion notification is routed.
    pub notification_target: String,
    /// Echoed back in the completion notification.
    pub job_tag: String,
}

/// One page of a job's result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultPage {
    pub blocks: Vec<Block>,
    pub next_token: Option<String>,
}

#[async_trait]
pub trait AnalysisService: Send + Sync {
    /// Starts a job and returns its id.
    async fn start(&self, request: &StartAnalysisRequest) -> Result<String, AnalysisError>;

    async fn fetch_page(
        &self,
        job_id: &str,
        next_token: Option<&str>,
    ) -> Result<ResultPage, AnalysisError>;
}

/// Fetches every page of a finished job, in order.
pub async fn fetch_all_blocks(
    service: &dyn AnalysisService,
    job_id: &str,
) -> Result<Vec<Block>, AnalysisError> {
    let mut blocks = Vec::new();
    let mut next_token: Option<String> = None;

    for _ in 0..MAX_RESULT_PAGES {
        let page = service.fetch_page(job_id, next_token.as_deref()).await?;
        blocks.extend(page.blocks);

        match page.next_token {
            Some(token) if !token.is_empty() => {
                if next_token.as_deref() == Some(token.as_str()) {
                    return Err(AnalysisError::new(
                        "PaginationLoop",
                        format!("job {} returned the same page token twice", job_id),
                    ));
                }
                next_token = Some(token);
            }
            _ => return Ok(blocks),
        }
    }

    Err(AnalysisError::new(
        "PaginationLimit",
        format!("job {} exceeded {} result pages", job_id, MAX_RESULT_PAGES),
    ))
}
