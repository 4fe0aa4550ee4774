//! Builders for analysis blocks and notification bodies.

#![allow(dead_code)]

use policy_intake::analysis::{Block, BlockType, EntityType, Relationship, RelationshipType};

/// Builds a recognition result the way the analysis service returns it:
/// KEY and VALUE sets pointing at WORD children, plus LINE blocks.
pub struct BlocksBuilder {
    blocks: Vec<Block>,
    next_id: usize,
}

impl BlocksBuilder {
    pub fn new() -> Self {
        Self {
            blocks: Vec::new(),
            next_id: 0,
        }
    }

    fn id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }

    fn block(id: String, kind: BlockType, text: Option<&str>, confidence: f64) -> Block {
        Block {
            id,
            block_type: kind,
            text: text.map(str::to_string),
            confidence: Some(confidence),
            entity_types: vec![],
            relationships: vec![],
            page: Some(1),
        }
    }

    fn words(&mut self, text: &str, confidence: f64) -> Vec<String> {
        let mut ids = Vec::new();
        for word in text.split_whitespace() {
            let id = self.id("word");
            self.blocks
                .push(Self::block(id.clone(), BlockType::Word, Some(word), confidence));
            ids.push(id);
        }
        ids
    }

    /// Adds a form field. `confidence` is on the 0-100 scale.
    pub fn key_value(mut self, key: &str, value: &str, confidence: f64) -> Self {
        let key_id = self.id("key");
        let value_id = self.id("value");
        let key_words = self.words(key, confidence);
        let value_words = self.words(value, confidence);

        let mut key_block = Self::block(key_id, BlockType::KeyValueSet, None, confidence);
        key_block.entity_types = vec![EntityType::Key];
        key_block.relationships = vec![
            Relationship {
                kind: RelationshipType::Value,
                ids: vec![value_id.clone()],
            },
            Relationship {
                kind: RelationshipType::Child,
                ids: key_words,
            },
        ];

        let mut value_block = Self::block(value_id, BlockType::KeyValueSet, None, confidence);
        value_block.entity_types = vec![EntityType::Value];
        if !value_words.is_empty() {
            value_block.relationships = vec![Relationship {
                kind: RelationshipType::Child,
                ids: value_words,
            }];
        }

        self.blocks.push(key_block);
        self.blocks.push(value_block);
        self
    }

    /// Adds a line of page text. `confidence` is on the 0-100 scale.
    pub fn line(mut self, text: &str, confidence: f64) -> Self {
        let id = self.id("line");
        self.blocks
            .push(Self::block(id, BlockType::Line, Some(text), confidence));
        self
    }

    pub fn build(self) -> Vec<Block> {
        self.blocks
    }
}

/// A motor policy carrying every required field at the given confidence.
pub fn complete_policy(confidence: f64) -> BlocksBuilder {
    BlocksBuilder::new()
        .key_value("Número de póliza", "GNP-7788123", confidence)
        .key_value("Nombre del asegurado", "María Pérez López", confidence)
        .key_value("Tipo de seguro", "Automóviles", confidence)
        .key_value("Inicio de vigencia", "01/02/2024", confidence)
        .key_value("Fin de vigencia", "01/02/2025", confidence)
        .key_value("Prima total", "$12,480.00", confidence)
        .line("GNP Seguros", confidence)
}

/// The same policy without its end date.
pub fn policy_without_end_date(confidence: f64) -> BlocksBuilder {
    BlocksBuilder::new()
        .key_value("Número de póliza", "GNP-7788123", confidence)
        .key_value("Nombre del asegurado", "María Pérez López", confidence)
        .key_value("Inicio de vigencia", "01/02/2024", confidence)
}

/// A completion notification wrapped in a topic envelope.
pub fn completion_body(job_id: &str, status: &str, job_tag: &str, message: Option<&str>) -> String {
    let inner = serde_json::json!({
        "JobId": job_id,
        "Status": status,
        "StatusMessage": message,
        "JobTag": job_tag,
    });
    serde_json::json!({
        "Type": "Notification",
        "Message": inner.to_string(),
    })
    .to_string()
}
