//! Raw recognition output, as returned page by page by the analysis service.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockType {
    Page,
    Line,
    Word,
    KeyValueSet,
    Table,
    Cell,
    SelectionElement,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Key,
    Value,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipType {
    Child,
    Value,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Relationship {
    #[serde(rename = "Type")]
    pub kind: RelationshipType,
    #[serde(default)]
    pub ids: Vec<String>,
}

/// One recognized element. Confidence is on the service's 0-100 scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Block {
    pub id: String,
    pub block_type: BlockType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entity_types: Vec<EntityType>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relationships: Vec<Relationship>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
}

impl Block {
    pub fn has_entity(&self, entity: EntityType) -> bool {
        self.entity_types.contains(&entity)
    }

    /// Ids referenced through relationships of the given kind.
    pub fn related(&self, kind: RelationshipType) -> impl Iterator<Item = &str> {
        self.relationships
            .iter()
            .filter(move |r| r.kind == kind)
            .flat_map(|r| r.ids.iter().map(String::as_str))
    }
}

/// Archived form of a complete analysis result.
#[derive(Debug, Serialize)]
pub struct BlockArchive<'a> {
    pub blocks: &'a [Block],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_service_block() {
        let raw = r#"{
            "Id": "k1",
            "BlockType": "KEY_VALUE_SET",
            "Confidence": 93.5,
            "EntityTypes": ["KEY"],
            "Relationships": [
                {"Type": "CHILD", "Ids": ["w1", "w2"]},
                {"Type": "VALUE", "Ids": ["v1"]}
            ],
            "Geometry": {"BoundingBox": {}},
            "Page": 1
        }"#;
        let block: Block = serde_json::from_str(raw).unwrap();
        assert_eq!(block.block_type, BlockType::KeyValueSet);
        assert!(block.has_entity(EntityType::Key));
        assert_eq!(
            block.related(RelationshipType::Child).collect::<Vec<_>>(),
            vec!["w1", "w2"]
        );
        assert_eq!(
            block.related(RelationshipType::Value).collect::<Vec<_>>(),
            vec!["v1"]
        );
    }

    #[test]
    fn test_unknown_variants_are_tolerated() {
        let raw = r#"{"Id": "q", "BlockType": "QUERY_RESULT",
            "Relationships": [{"Type": "ANSWER", "Ids": ["a"]}]}"#;
        let block: Block = serde_json::from_str(raw).unwrap();
        assert_eq!(block.block_type, BlockType::Other);
        assert_eq!(block.relationships[0].kind, RelationshipType::Other);
    }

    #[test]
    fn test_archive_shape() {
        let blocks = vec![Block {
            id: "l1".to_string(),
            block_type: BlockType::Line,
            text: Some("Póliza".to_string()),
            confidence: Some(99.0),
            entity_types: vec![],
            relationships: vec![],
            page: None,
        }];
        let json = serde_json::to_value(BlockArchive { blocks: &blocks }).unwrap();
        assert_eq!(json["blocks"][0]["BlockType"], "LINE");
        assert_eq!(json["blocks"][0]["Text"], "Póliza");
    }
}
