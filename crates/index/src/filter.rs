use serde::{Deserialize, Serialize};

use ingest::{AttributeSchema, AttributeType};

/// Operator of a query constraint. Comparison operators are only legal on
/// integer attributes; the translator enforces that.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComparisonOp {
    Eq,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl ComparisonOp {
    pub fn is_comparison(&self) -> bool {
        !matches!(self, ComparisonOp::Eq)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ComparisonOp::Eq => "eq",
            ComparisonOp::Lt => "lt",
            ComparisonOp::Lte => "lte",
            ComparisonOp::Gt => "gt",
            ComparisonOp::Gte => "gte",
        }
    }
}

/// One attribute constraint as produced by the constraint extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryConstraint {
    pub attribute: String,
    pub op: ComparisonOp,
    pub value: serde_json::Value,
}

/// A constraint the translator refused. Never degraded silently to "no
/// filter"; the caller decides what to do with the rejection.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TranslationError {
    #[error("unknown attribute '{attribute}'")]
    UnknownAttribute { attribute: String },
    #[error("operator '{op}' is not supported on attribute '{attribute}'")]
    UnsupportedOperator { attribute: String, op: &'static str },
    #[error("attribute '{attribute}' expects {expected}, got {got}")]
    InvalidValue {
        attribute: String,
        expected: &'static str,
        got: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchValue {
    pub value: serde_json::Value,
}

/// One bound of an integer range, in the index's native range shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RangeSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lt: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lte: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gt: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gte: Option<i64>,
}

/// Exact-match or range condition on one payload field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldCondition {
    pub key: String,
    #[serde(rename = "match", skip_serializing_if = "Option::is_none")]
    pub match_value: Option<MatchValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<RangeSpec>,
}

impl FieldCondition {
    fn matches(key: &str, value: serde_json::Value) -> Self {
        Self {
            key: key.to_string(),
            match_value: Some(MatchValue { value }),
            range: None,
        }
    }

    fn range(key: &str, op: ComparisonOp, bound: i64) -> Self {
        let mut range = RangeSpec::default();
        match op {
            ComparisonOp::Lt => range.lt = Some(bound),
            ComparisonOp::Lte => range.lte = Some(bound),
            ComparisonOp::Gt => range.gt = Some(bound),
            ComparisonOp::Gte => range.gte = Some(bound),
            ComparisonOp::Eq => unreachable!("eq is a match condition"),
        }
        Self {
            key: key.to_string(),
            match_value: None,
            range: Some(range),
        }
    }
}

/// Conjunction of field conditions in the shape the vector index consumes.
/// All conditions must hold; OR/NOT composition is deliberately unsupported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredFilter {
    pub must: Vec<FieldCondition>,
}

impl StructuredFilter {
    /// Human-readable rendering for traces and responses.
    pub fn render(&self) -> String {
        if self.must.is_empty() {
            return "no filter applied".to_string();
        }
        self.must
            .iter()
            .map(|c| {
                if let Some(m) = &c.match_value {
                    format!("{} = {}", c.key, m.value)
                } else if let Some(r) = &c.range {
                    let (symbol, bound) = match r {
                        RangeSpec { lt: Some(b), .. } => ("<", b),
                        RangeSpec { lte: Some(b), .. } => ("<=", b),
                        RangeSpec { gt: Some(b), .. } => (">", b),
                        RangeSpec { gte: Some(b), .. } => (">=", b),
                        _ => ("?", &0),
                    };
                    format!("{} {} {}", c.key, symbol, bound)
                } else {
                    c.key.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(" AND ")
    }
}

/// Validates constraints against the attribute schema and lowers them into
/// a `StructuredFilter`.
pub struct FilterTranslator;

impl FilterTranslator {
    /// An empty constraint list is a pure semantic search (`Ok(None)`).
    /// A non-empty list either translates completely or fails.
    pub fn translate(
        constraints: &[QueryConstraint],
        schema: &AttributeSchema,
    ) -> Result<Option<StructuredFilter>, TranslationError> {
        if constraints.is_empty() {
            return Ok(None);
        }

        let mut must = Vec::with_capacity(constraints.len());
        for constraint in constraints {
            must.push(Self::translate_one(constraint, schema)?);
        }

        Ok(Some(StructuredFilter { must }))
    }

    fn translate_one(
        constraint: &QueryConstraint,
        schema: &AttributeSchema,
    ) -> Result<FieldCondition, TranslationError> {
        let spec = schema.get(&constraint.attribute).ok_or_else(|| {
            TranslationError::UnknownAttribute {
                attribute: constraint.attribute.clone(),
            }
        })?;

        if constraint.op.is_comparison() {
            if !spec.ty.supports_comparison() {
                return Err(TranslationError::UnsupportedOperator {
                    attribute: constraint.attribute.clone(),
                    op: constraint.op.as_str(),
                });
            }
            let bound = integer_value(&constraint.value).ok_or_else(|| {
                TranslationError::InvalidValue {
                    attribute: constraint.attribute.clone(),
                    expected: "an integer",
                    got: constraint.value.to_string(),
                }
            })?;
            return Ok(FieldCondition::range(&constraint.attribute, constraint.op, bound));
        }

        let value = match spec.ty {
            AttributeType::Integer => {
                let n = integer_value(&constraint.value).ok_or_else(|| {
                    TranslationError::InvalidValue {
                        attribute: constraint.attribute.clone(),
                        expected: "an integer",
                        got: constraint.value.to_string(),
                    }
                })?;
                serde_json::json!(n)
            }
            // Payload keywords are uppercased at ingestion, so match the
            // same way.
            AttributeType::Keyword => {
                serde_json::json!(text_value(&constraint.value).trim().to_uppercase())
            }
            AttributeType::Text => serde_json::json!(text_value(&constraint.value).trim()),
        };

        Ok(FieldCondition::matches(&constraint.attribute, value))
    }
}

/// Extractors frequently return numbers as strings ("2010") and vice versa
/// (70 for a ruling number); accept both spellings of each type.
fn integer_value(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn text_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
