use ingest::AttributeSchema;
use index::ScoredPassage;

/// Prompt asking the model to turn a question into attribute constraints.
/// The attribute descriptions come straight from the schema so the model
/// and the translator agree on what is filterable.
pub fn build_constraint_prompt(question: &str, schema: &AttributeSchema) -> String {
    let mut attributes = String::new();
    for attr in &schema.attributes {
        attributes.push_str(&format!(
            "- {} ({:?}): {}\n",
            attr.name, attr.ty, attr.description
        ));
    }

    format!(
        r#"You translate a user question about a document collection into metadata constraints.

COLLECTION:
{corpus}

FILTERABLE ATTRIBUTES:
{attributes}
RULES:
- Only use attributes from the list above.
- "op" is one of: eq, lt, lte, gt, gte.
- Comparison operators (lt, lte, gt, gte) are only valid on integer attributes.
- Only emit a constraint when the question clearly implies it; otherwise leave the list empty.
- Output ONLY the JSON object, no markdown, no explanations.

SCHEMA:
{{"constraints": [{{"attribute": "...", "op": "eq", "value": "..."}}]}}

QUESTION:
{question}

JSON OUTPUT:"#,
        corpus = schema.corpus_description,
        attributes = attributes,
        question = question,
    )
}

/// Renders retrieved passages the way the answer prompt expects them:
/// a metadata header per passage, then the literal text.
pub fn format_passages(passages: &[ScoredPassage]) -> String {
    let parts: Vec<String> = passages
        .iter()
        .map(|p| {
            let md = &p.record.metadata;
            let field = |name: &str| {
                md.get(name)
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "unknown".to_string())
            };
            format!(
                "[{} | Ruling {} | {}]\nstatus: {}\nstatus_date: {}\n\n{}",
                field("source_file"),
                field("ruling_number"),
                field("section"),
                field("status"),
                field("status_date"),
                p.record.text,
            )
        })
        .collect();
    parts.join("\n\n---\n\n")
}

/// Answer prompt for the normal case: retrieved passages as context.
pub fn build_answer_prompt(question: &str, context: &str) -> String {
    format!(
        r#"You are a specialist legal assistant answering questions about court rulings.

Your primary directive is FIDELITY TO THE TEXT. Answer using the exact, literal
passages provided in the context. Do not summarize or paraphrase the operative
text of a ruling.

Structure the answer like this:
1. Open with one sentence that directly answers the question.
2. For each relevant ruling, add a section titled "According to Ruling No. [number]:".
3. Under each title, quote the literal passage from the context as a block quote.
4. Close by listing sources as (Status: ..., Ruling: ..., Status date: ...).

Constraints:
- Base the entire answer exclusively on the context below.
- No opinions, interpretations or outside information of any kind.

CONTEXT:
{context}

QUESTION:
{question}

ANSWER:"#,
        context = context,
        question = question,
    )
}

/// Answer prompt for the empty-retrieval branch: the model is told there is
/// no context and must say so instead of improvising.
pub fn build_no_context_prompt(question: &str) -> String {
    format!(
        r#"You are a specialist legal assistant answering questions about court rulings.

The document search returned NO passages matching this question and its filters.

State clearly that no matching rulings were found in the indexed collection, and
suggest the user rephrase the question or relax date or status restrictions.
Do NOT answer the legal question itself; there is no source material to quote.

QUESTION:
{question}

ANSWER:"#,
        question = question,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingest::{DocumentRecord, MetadataValue};
    use std::collections::BTreeMap;

    #[test]
    fn constraint_prompt_lists_every_attribute() {
        let schema = AttributeSchema::legal_rulings();
        let prompt = build_constraint_prompt("rulings before 2010", &schema);
        for attr in &schema.attributes {
            assert!(prompt.contains(&attr.name), "missing {}", attr.name);
        }
        assert!(prompt.contains("rulings before 2010"));
    }

    #[test]
    fn passages_render_with_their_metadata_header() {
        let mut metadata = BTreeMap::new();
        metadata.insert("source_file".to_string(), MetadataValue::Text("ruling_70.pdf".into()));
        metadata.insert("ruling_number".to_string(), MetadataValue::Text("70".into()));
        metadata.insert("section".to_string(), MetadataValue::Text("MAIN_CONTENT".into()));
        metadata.insert("status".to_string(), MetadataValue::Text("ACTIVE".into()));
        metadata.insert("status_date".to_string(), MetadataValue::Text("07/04/14".into()));

        let passages = vec![ScoredPassage {
            record: DocumentRecord {
                id: "ruling_70.pdf-0".to_string(),
                text: "The council may not hire without a public tender.".to_string(),
                metadata,
            },
            score: 0.9,
        }];

        let rendered = format_passages(&passages);
        assert!(rendered.contains("[ruling_70.pdf | Ruling 70 | MAIN_CONTENT]"));
        assert!(rendered.contains("status: ACTIVE"));
        assert!(rendered.contains("public tender"));
    }

    #[test]
    fn missing_metadata_renders_as_unknown() {
        let passages = vec![ScoredPassage {
            record: DocumentRecord {
                id: "x".to_string(),
                text: "text".to_string(),
                metadata: BTreeMap::new(),
            },
            score: 0.1,
        }];
        assert!(format_passages(&passages).contains("unknown"));
    }
}
