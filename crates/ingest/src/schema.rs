use serde::{Deserialize, Serialize};

/// Semantic type of a filterable attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeType {
    /// Range-comparable number. The only type that accepts lt/lte/gt/gte.
    Integer,
    /// Free-form text, equality only.
    Text,
    /// Closed set of labels, uppercased at ingestion, equality only.
    Keyword,
}

impl AttributeType {
    pub fn supports_comparison(&self) -> bool {
        matches!(self, AttributeType::Integer)
    }
}

/// Declaration of one filterable attribute. The description is rendered
/// into the constraint-extraction prompt, so it is written for the model,
/// not for humans browsing the code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: AttributeType,
    pub description: String,
}

impl AttributeSpec {
    pub fn new(name: &str, ty: AttributeType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            ty,
            description: description.to_string(),
        }
    }
}

/// Static per-process declaration of the filterable attributes plus the
/// corpus description used to steer constraint extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeSchema {
    pub attributes: Vec<AttributeSpec>,
    pub corpus_description: String,
}

impl AttributeSchema {
    pub fn new(attributes: Vec<AttributeSpec>, corpus_description: &str) -> Self {
        Self {
            attributes,
            corpus_description: corpus_description.to_string(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&AttributeSpec> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Attributes absent from the schema are opaque passthrough text and
    /// never filter-eligible.
    pub fn is_filterable(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Schema for the legal-ruling corpus: court summary passages split into
    /// sections, each carrying the ruling's number, lifecycle status and the
    /// year derived from its status date.
    pub fn legal_rulings() -> Self {
        let attributes = vec![
            AttributeSpec::new(
                "ruling_number",
                AttributeType::Text,
                "Ruling number as plain text without any prefix (e.g. '70'). \
                 Always filter on it when the user asks about a ruling by number.",
            ),
            AttributeSpec::new(
                "status",
                AttributeType::Keyword,
                "Current lifecycle status of the ruling: 'ACTIVE', 'REVOKED' or 'AMENDED'.",
            ),
            AttributeSpec::new(
                "status_date",
                AttributeType::Text,
                "Date of the latest status change as raw text in 'DD/MM/YY' form \
                 (e.g. '07/04/14'). Not comparable; use 'year' for date ranges.",
            ),
            AttributeSpec::new(
                "year",
                AttributeType::Integer,
                "Four-digit year of the latest status change (e.g. 2014). \
                 Comparison operators (lt, lte, gt, gte) and eq are allowed. \
                 'before YYYY' means lt YYYY; 'after YYYY' means gt YYYY.",
            ),
            AttributeSpec::new(
                "source_file",
                AttributeType::Text,
                "Name of the originating PDF file (e.g. 'ruling_70.pdf').",
            ),
            AttributeSpec::new(
                "section",
                AttributeType::Keyword,
                "Which part of the ruling the passage comes from: 'MAIN_CONTENT', \
                 'NORMATIVE_REFERENCES' or 'PRECEDENTS'.",
            ),
            AttributeSpec::new(
                "chunk_index",
                AttributeType::Integer,
                "Position of the passage within its ruling, starting at 0.",
            ),
        ];

        Self::new(
            attributes,
            "Collection of passages from court of accounts rulings, each with \
             metadata such as ruling number, lifecycle status, status date and \
             which section of the ruling the passage belongs to.",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_finds_declared_attributes() {
        let schema = AttributeSchema::legal_rulings();
        assert_eq!(schema.get("year").unwrap().ty, AttributeType::Integer);
        assert_eq!(schema.get("status").unwrap().ty, AttributeType::Keyword);
        assert!(schema.get("page_count").is_none());
        assert!(!schema.is_filterable("page_count"));
    }

    #[test]
    fn only_integers_support_comparison() {
        let schema = AttributeSchema::legal_rulings();
        for attr in &schema.attributes {
            let comparable = attr.ty.supports_comparison();
            assert_eq!(comparable, attr.ty == AttributeType::Integer, "{}", attr.name);
        }
    }
}
