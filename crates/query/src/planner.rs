use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use index::{FilterTranslator, QueryConstraint, StructuredFilter};
use ingest::AttributeSchema;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::extractor::ConstraintExtractor;

/// What the planner hands to the retrieval step: the semantic query text,
/// the constraints that survived validation and the result limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalRequest {
    pub semantic_text: String,
    pub constraints: Vec<QueryConstraint>,
    pub top_k: usize,
}

/// A planned query. `dropped` lists constraints rejected by the translator
/// and stripped by the fallback pass; the orchestrator flags them in the
/// trace.
#[derive(Debug, Clone)]
pub struct PlannedQuery {
    pub request: RetrievalRequest,
    pub filter: Option<StructuredFilter>,
    pub dropped: Vec<QueryConstraint>,
}

/// Turns a free-form question into a retrieval request: semantic text plus
/// validated attribute filters.
pub struct QueryPlanner {
    extractor: Arc<dyn ConstraintExtractor>,
    schema: Arc<AttributeSchema>,
    config: EngineConfig,
}

impl QueryPlanner {
    pub fn new(
        extractor: Arc<dyn ConstraintExtractor>,
        schema: Arc<AttributeSchema>,
        config: EngineConfig,
    ) -> Self {
        Self {
            extractor,
            schema,
            config,
        }
    }

    pub fn schema(&self) -> &AttributeSchema {
        &self.schema
    }

    /// Extract constraints and translate them. When the extractor proposes
    /// something the translator rejects, retry once with only the
    /// individually-valid constraints: a degraded retrieval beats none.
    pub async fn plan(&self, question: &str) -> Result<PlannedQuery, EngineError> {
        let constraints = self
            .extractor
            .extract(question, &self.schema)
            .await
            .map_err(|e| EngineError::Planning {
                reason: e.to_string(),
            })?;

        let (kept, dropped, filter) = match FilterTranslator::translate(&constraints, &self.schema)
        {
            Ok(filter) => (constraints, Vec::new(), filter),
            Err(rejection) => {
                warn!(error = %rejection, "stripping invalid constraints");
                let (kept, dropped): (Vec<_>, Vec<_>) =
                    constraints.into_iter().partition(|c| {
                        FilterTranslator::translate(std::slice::from_ref(c), &self.schema).is_ok()
                    });
                // Every kept constraint translates on its own, so the
                // conjunction of them does too.
                let filter = FilterTranslator::translate(&kept, &self.schema).map_err(|e| {
                    EngineError::Planning {
                        reason: format!("constraint stripping failed: {}", e),
                    }
                })?;
                (kept, dropped, filter)
            }
        };

        Ok(PlannedQuery {
            request: RetrievalRequest {
                semantic_text: question.to_string(),
                constraints: kept,
                top_k: self.config.top_k,
            },
            filter,
            dropped,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use index::ComparisonOp;
    use serde_json::json;

    struct StaticExtractor(Vec<QueryConstraint>);

    #[async_trait]
    impl ConstraintExtractor for StaticExtractor {
        async fn extract(
            &self,
            _question: &str,
            _schema: &AttributeSchema,
        ) -> Result<Vec<QueryConstraint>> {
            Ok(self.0.clone())
        }
    }

    struct DeadExtractor;

    #[async_trait]
    impl ConstraintExtractor for DeadExtractor {
        async fn extract(
            &self,
            _question: &str,
            _schema: &AttributeSchema,
        ) -> Result<Vec<QueryConstraint>> {
            anyhow::bail!("extractor unavailable")
        }
    }

    fn constraint(attribute: &str, op: ComparisonOp, value: serde_json::Value) -> QueryConstraint {
        QueryConstraint {
            attribute: attribute.to_string(),
            op,
            value,
        }
    }

    fn planner(extractor: impl ConstraintExtractor + 'static) -> QueryPlanner {
        QueryPlanner::new(
            Arc::new(extractor),
            Arc::new(AttributeSchema::legal_rulings()),
            EngineConfig::default(),
        )
    }

    #[tokio::test]
    async fn valid_constraints_pass_through() {
        let planner = planner(StaticExtractor(vec![
            constraint("year", ComparisonOp::Gte, json!(2010)),
            constraint("status", ComparisonOp::Eq, json!("ACTIVE")),
        ]));

        let planned = planner.plan("active rulings since 2010").await.unwrap();
        assert_eq!(planned.request.constraints.len(), 2);
        assert_eq!(planned.request.top_k, EngineConfig::default().top_k);
        assert!(planned.dropped.is_empty());
        assert_eq!(planned.filter.unwrap().must.len(), 2);
    }

    #[tokio::test]
    async fn invalid_constraints_are_stripped_not_fatal() {
        let planner = planner(StaticExtractor(vec![
            constraint("year", ComparisonOp::Gte, json!(2010)),
            // Comparison on a text attribute: rejected by the translator.
            constraint("status_date", ComparisonOp::Lt, json!("07/04/14")),
        ]));

        let planned = planner.plan("rulings since 2010").await.unwrap();
        assert_eq!(planned.request.constraints.len(), 1);
        assert_eq!(planned.request.constraints[0].attribute, "year");
        assert_eq!(planned.dropped.len(), 1);
        assert_eq!(planned.dropped[0].attribute, "status_date");
        assert_eq!(planned.filter.unwrap().must.len(), 1);
    }

    #[tokio::test]
    async fn all_constraints_invalid_degrades_to_pure_semantic_search() {
        let planner = planner(StaticExtractor(vec![constraint(
            "rapporteur",
            ComparisonOp::Eq,
            json!("Silva"),
        )]));

        let planned = planner.plan("rulings by Silva").await.unwrap();
        assert!(planned.request.constraints.is_empty());
        assert_eq!(planned.dropped.len(), 1);
        assert!(planned.filter.is_none());
    }

    #[tokio::test]
    async fn no_constraints_means_no_filter() {
        let planner = planner(StaticExtractor(Vec::new()));
        let planned = planner.plan("what is a public tender").await.unwrap();
        assert!(planned.filter.is_none());
        assert!(planned.dropped.is_empty());
    }

    #[tokio::test]
    async fn a_dead_extractor_is_a_planning_error() {
        let planner = planner(DeadExtractor);
        let err = planner.plan("anything").await.unwrap_err();
        assert!(matches!(err, EngineError::Planning { .. }));
    }
}
