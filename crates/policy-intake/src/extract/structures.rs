//! Structured view over raw analysis blocks: key/value pairs and text lines,
//! with confidences scaled to `[0, 1]`.

use std::collections::HashMap;

use crate::analysis::{Block, BlockType, EntityType, RelationshipType};

#[derive(Debug, Clone, PartialEq)]
pub struct KeyValuePair {
    pub key: String,
    pub value: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextLine {
    pub text: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecognizedDocument {
    /// Form key/value pairs in document order.
    pub pairs: Vec<KeyValuePair>,
    pub lines: Vec<TextLine>,
}

fn scaled(confidence: Option<f64>) -> f64 {
    confidence.map(|c| c / 100.0).unwrap_or(0.0)
}

/// Joins the WORD children of a block and averages their confidence.
fn child_text(block: &Block, index: &HashMap<&str, &Block>) -> (String, f64) {
    let words: Vec<&Block> = block
        .related(RelationshipType::Child)
        .filter_map(|id| index.get(id).copied())
        .filter(|b| b.block_type == BlockType::Word)
        .collect();

    if words.is_empty() {
        return (String::new(), 0.0);
    }

    let text = words
        .iter()
        .filter_map(|w| w.text.as_deref())
        .collect::<Vec<_>>()
        .join(" ");
    let mean = words.iter().map(|w| scaled(w.confidence)).sum::<f64>() / words.len() as f64;
    (text, mean)
}

impl RecognizedDocument {
    pub fn from_blocks(blocks: &[Block]) -> Self {
        let index: HashMap<&str, &Block> = blocks.iter().map(|b| (b.id.as_str(), b)).collect();

        let mut pairs = Vec::new();
        let mut lines = Vec::new();

        for block in blocks {
            match block.block_type {
                BlockType::KeyValueSet if block.has_entity(EntityType::Key) => {
                    let (key, _) = child_text(block, &index);
                    let value_block = block
                        .related(RelationshipType::Value)
                        .find_map(|id| index.get(id).copied());
                    let (value, confidence) = match value_block {
                        Some(v) => child_text(v, &index),
                        None => (String::new(), 0.0),
                    };
                    pairs.push(KeyValuePair {
                        key: key.trim().to_string(),
                        value: value.trim().to_string(),
                        confidence,
                    });
                }
                BlockType::Line => {
                    if let Some(text) = block.text.as_deref() {
                        lines.push(TextLine {
                            text: text.to_string(),
                            confidence: scaled(block.confidence),
                        });
                    }
                }
                _ => {}
            }
        }

        Self { pairs, lines }
    }

    /// Lines joined with newlines; the input handed to a language model.
    pub fn full_text(&self) -> String {
        self.lines
            .iter()
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty() && self.lines.is_empty()
    }
}
