use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use index::QueryConstraint;
use ingest::AttributeSchema;

use crate::llm::{OllamaClient, strip_code_fences};
use crate::prompt::build_constraint_prompt;

/// Natural-language constraint extraction, consumed as an opaque
/// capability. May legitimately return an empty list.
#[async_trait]
pub trait ConstraintExtractor: Send + Sync {
    async fn extract(
        &self,
        question: &str,
        schema: &AttributeSchema,
    ) -> Result<Vec<QueryConstraint>>;
}

/// Model-backed extractor. Validation of what it returns is the planner's
/// job, not this client's.
pub struct LlmConstraintExtractor {
    llm: OllamaClient,
}

impl LlmConstraintExtractor {
    pub fn new(llm: OllamaClient) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl ConstraintExtractor for LlmConstraintExtractor {
    async fn extract(
        &self,
        question: &str,
        schema: &AttributeSchema,
    ) -> Result<Vec<QueryConstraint>> {
        let prompt = build_constraint_prompt(question, schema);
        let json = self
            .llm
            .generate_json(&prompt, 1)
            .await
            .context("constraint extraction call failed")?;
        parse_constraints(&json)
    }
}

#[derive(Deserialize)]
struct ConstraintList {
    constraints: Vec<QueryConstraint>,
}

/// Accepts both the documented `{"constraints": [...]}` shape and a bare
/// array, which smaller models produce regularly.
pub fn parse_constraints(json: &str) -> Result<Vec<QueryConstraint>> {
    let cleaned = strip_code_fences(json);

    if let Ok(list) = serde_json::from_str::<ConstraintList>(&cleaned) {
        return Ok(list.constraints);
    }

    serde_json::from_str::<Vec<QueryConstraint>>(&cleaned)
        .context("extractor returned neither a constraint object nor an array")
}

#[cfg(test)]
mod tests {
    use super::*;
    use index::ComparisonOp;

    #[test]
    fn wrapped_constraint_lists_parse() {
        let parsed = parse_constraints(
            r#"{"constraints": [{"attribute": "year", "op": "gte", "value": 2010}]}"#,
        )
        .unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].attribute, "year");
        assert_eq!(parsed[0].op, ComparisonOp::Gte);
    }

    #[test]
    fn bare_arrays_parse_too() {
        let parsed = parse_constraints(
            r#"[{"attribute": "status", "op": "eq", "value": "ACTIVE"}]"#,
        )
        .unwrap();
        assert_eq!(parsed[0].attribute, "status");
    }

    #[test]
    fn fenced_output_parses() {
        let parsed = parse_constraints("```json\n{\"constraints\": []}\n```").unwrap();
        assert!(parsed.is_empty());
    }

    #[test]
    fn prose_is_an_error() {
        assert!(parse_constraints("I could not find any constraints.").is_err());
    }
}
