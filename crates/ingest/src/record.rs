use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// A typed metadata value as stored on an indexed passage.
///
/// Attributes used in range filters must be `Integer`; everything else
/// is carried as `Text`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Integer(i64),
    Text(String),
}

impl MetadataValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MetadataValue::Integer(n) => Some(*n),
            MetadataValue::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::Text(s) => Some(s.as_str()),
            MetadataValue::Integer(_) => None,
        }
    }
}

impl std::fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataValue::Integer(n) => write!(f, "{}", n),
            MetadataValue::Text(s) => write!(f, "{}", s),
        }
    }
}

/// A raw document as handed over by the extraction pipeline: passage text
/// plus untyped string metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawDocument {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// An indexed passage with normalized, typed metadata.
///
/// Metadata is a `BTreeMap` so that normalizing the same raw document twice
/// serializes to identical bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    pub text: String,
    pub metadata: BTreeMap<String, MetadataValue>,
}

impl DocumentRecord {
    pub fn get(&self, attribute: &str) -> Option<&MetadataValue> {
        self.metadata.get(attribute)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_value_serializes_untagged() {
        let year = serde_json::to_string(&MetadataValue::Integer(2014)).unwrap();
        assert_eq!(year, "2014");

        let status = serde_json::to_string(&MetadataValue::Text("ACTIVE".into())).unwrap();
        assert_eq!(status, "\"ACTIVE\"");
    }

    #[test]
    fn raw_document_parses_without_metadata() {
        let raw: RawDocument =
            serde_json::from_str(r#"{"id": "ruling-70-0", "text": "some passage"}"#).unwrap();
        assert_eq!(raw.id, "ruling-70-0");
        assert!(raw.metadata.is_empty());
    }
}
