//! Field extraction from analysis output.
//!
//! Two interchangeable strategies implement [`FieldExtractor`]: a
//! label/pattern matcher and a language-model extractor. Which one runs is a
//! configuration choice made once at startup.

pub mod llm;
pub mod model;
pub mod pattern;
pub mod structures;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{Config, ExtractorStrategy};
use crate::document::{FieldConfidence, FieldName, PolicyFields};

pub use llm::{CompletionClient, CompletionError, HttpCompletionClient};
pub use model::ModelExtractor;
pub use pattern::PatternExtractor;
pub use structures::{KeyValuePair, RecognizedDocument, TextLine};

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Completion failed: {0}")]
    Completion(#[from] CompletionError),

    #[error("Malformed model response ({reason}): {snippet}")]
    MalformedResponse { reason: String, snippet: String },
}

/// Fields found in one document, with their confidences and any fields the
/// extractor itself wants reviewed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub fields: PolicyFields,
    pub confidence: FieldConfidence,
    pub flagged: Vec<FieldName>,
}

impl Extraction {
    /// Adds a field to the flagged list once.
    pub fn flag(&mut self, name: FieldName) {
        if !self.flagged.contains(&name) {
            self.flagged.push(name);
        }
    }
}

#[async_trait]
pub trait FieldExtractor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn extract(&self, document: &RecognizedDocument) -> Result<Extraction, ExtractError>;
}

/// Builds the extractor selected by configuration.
pub fn build_extractor(config: &Config) -> Result<Arc<dyn FieldExtractor>, ExtractError> {
    match config.extraction.strategy {
        ExtractorStrategy::Pattern => Ok(Arc::new(PatternExtractor::new())),
        ExtractorStrategy::Model => {
            let client = HttpCompletionClient::from_config(&config.model)?;
            Ok(Arc::new(ModelExtractor::new(
                Arc::new(client),
                config.extraction.required_fields.clone(),
            )))
        }
    }
}
