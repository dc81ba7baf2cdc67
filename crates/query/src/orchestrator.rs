use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use index::{ScoredPassage, StructuredFilter, VectorSearch};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::generator::AnswerGenerator;
use crate::planner::{QueryPlanner, RetrievalRequest};
use crate::prompt::format_passages;
use crate::retry::RetryPolicy;
use crate::trace::{SpanOutcome, TraceEvent, TraceSink, Tracer};

/// States of one query run. `Done` and `Failed` are terminal; a run never
/// transitions out of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Planning,
    Retrieving,
    EmptyResult,
    HasResults,
    Generating,
    Done,
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Failed)
    }
}

/// Everything recorded about one user question: the planned request, the
/// retrieved passages, the answer or the failure, and the trace.
#[derive(Debug)]
pub struct OrchestrationRun {
    pub run_id: Uuid,
    pub question: String,
    pub state: RunState,
    pub request: Option<RetrievalRequest>,
    pub filter: Option<StructuredFilter>,
    pub passages: Vec<ScoredPassage>,
    pub answer: Option<String>,
    pub error: Option<EngineError>,
    pub events: Vec<TraceEvent>,
}

/// Sequences plan -> retrieve -> (branch) -> generate for one question at a
/// time. Concurrent runs are independent; the orchestrator itself holds
/// only shared read-only state.
pub struct Orchestrator {
    planner: QueryPlanner,
    retriever: Arc<dyn VectorSearch>,
    generator: Arc<dyn AnswerGenerator>,
    sink: Arc<dyn TraceSink>,
    config: EngineConfig,
}

impl Orchestrator {
    pub fn new(
        planner: QueryPlanner,
        retriever: Arc<dyn VectorSearch>,
        generator: Arc<dyn AnswerGenerator>,
        sink: Arc<dyn TraceSink>,
        config: EngineConfig,
    ) -> Self {
        Self {
            planner,
            retriever,
            generator,
            sink,
            config,
        }
    }

    /// Run one question to a terminal state. Failures land in the returned
    /// run as a structured error; this never returns `Err`.
    pub async fn run_query(&self, question: &str) -> OrchestrationRun {
        let run_id = Uuid::new_v4();
        let tracer = Tracer::new(run_id, Arc::clone(&self.sink));

        let mut run = OrchestrationRun {
            run_id,
            question: question.to_string(),
            state: RunState::Planning,
            request: None,
            filter: None,
            passages: Vec::new(),
            answer: None,
            error: None,
            events: Vec::new(),
        };

        let root = tracer.begin_span("run", &[]);
        match self.drive(question, &tracer, &mut run).await {
            Ok(()) => {
                run.state = RunState::Done;
                root.finish(SpanOutcome::Ok, None);
                info!(run_id = %run_id, "run finished");
            }
            Err(e) => {
                warn!(run_id = %run_id, step = e.step(), error = %e, "run failed");
                run.state = RunState::Failed;
                run.error = Some(e);
                root.finish(SpanOutcome::Error, None);
            }
        }
        run.events = tracer.take_events();
        run
    }

    async fn drive(
        &self,
        question: &str,
        tracer: &Tracer,
        run: &mut OrchestrationRun,
    ) -> Result<(), EngineError> {
        // PLANNING
        let mut span = tracer.begin_span("plan", &[]);
        let timeout = self.config.step_timeout();
        let planned = match tokio::time::timeout(timeout, self.planner.plan(question)).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Planning {
                reason: format!("planning timed out after {}s", self.config.step_timeout_secs),
            }),
        };
        let planned = match planned {
            Ok(planned) => planned,
            Err(e) => {
                span.finish(SpanOutcome::Error, None);
                return Err(e);
            }
        };

        span.set_attr("constraints", planned.request.constraints.len().to_string());
        if !planned.dropped.is_empty() {
            // The degraded-filter fallback must be visible in the trace.
            let dropped: Vec<String> = planned
                .dropped
                .iter()
                .map(|c| format!("{} {}", c.attribute, c.op.as_str()))
                .collect();
            span.set_attr("constraints_dropped", dropped.join(", "));
        }
        if let Some(filter) = &planned.filter {
            span.set_attr("filter", filter.render());
        }
        span.finish(SpanOutcome::Ok, None);

        run.request = Some(planned.request.clone());
        run.filter = planned.filter.clone();

        // RETRIEVING: one retry with the request unchanged, then fail.
        run.state = RunState::Retrieving;
        let policy = RetryPolicy::new(self.config.retrieval_retries, self.config.retry_backoff_ms);
        let request = &planned.request;
        let filter = planned.filter.as_ref();

        let passages = policy
            .retry("retrieve", |attempt| async move {
                let mut span =
                    tracer.begin_span("retrieve", &[("attempt", (attempt + 1).to_string())]);
                let result = tokio::time::timeout(
                    timeout,
                    self.retriever
                        .search(&request.semantic_text, filter, request.top_k),
                )
                .await
                .unwrap_or_else(|_| {
                    Err(anyhow::anyhow!(
                        "retrieval timed out after {}s",
                        self.config.step_timeout_secs
                    ))
                });

                match result {
                    Ok(passages) => {
                        span.set_attr("passages", passages.len().to_string());
                        span.finish(SpanOutcome::Ok, None);
                        Ok(passages)
                    }
                    Err(e) => {
                        span.finish(SpanOutcome::Error, None);
                        Err(e)
                    }
                }
            })
            .await
            .map_err(|e| EngineError::Retrieval {
                reason: e.to_string(),
                attempts: self.config.retrieval_retries + 1,
            })?;

        // Branch on the result set. Both branch states do no work of their
        // own but still show up in the trace.
        if passages.is_empty() {
            run.state = RunState::EmptyResult;
            tracer
                .begin_span("empty_result", &[])
                .finish(SpanOutcome::Ok, None);
        } else {
            run.state = RunState::HasResults;
            tracer
                .begin_span("has_results", &[("passages", passages.len().to_string())])
                .finish(SpanOutcome::Ok, None);
        }
        run.passages = passages;

        // GENERATING: no automatic retry; resubmit as a new run instead.
        run.state = RunState::Generating;
        let context = if run.passages.is_empty() {
            None
        } else {
            Some(format_passages(&run.passages))
        };

        let mut span = tracer.begin_span(
            "generate",
            &[("with_context", context.is_some().to_string())],
        );
        let answer = match tokio::time::timeout(
            timeout,
            self.generator.generate(question, context.as_deref()),
        )
        .await
        .unwrap_or_else(|_| {
            Err(anyhow::anyhow!(
                "generation timed out after {}s",
                self.config.step_timeout_secs
            ))
        }) {
            Ok(answer) => answer,
            Err(e) => {
                span.finish(SpanOutcome::Error, None);
                return Err(EngineError::Generation {
                    reason: e.to_string(),
                });
            }
        };

        span.set_attr("answer_chars", answer.text.len().to_string());
        span.finish(SpanOutcome::Ok, answer.tokens);
        run.answer = Some(answer.text);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::ConstraintExtractor;
    use crate::generator::GeneratedAnswer;
    use crate::trace::SpanPhase;
    use anyhow::Result;
    use async_trait::async_trait;
    use index::{ComparisonOp, QueryConstraint};
    use ingest::{AttributeSchema, DocumentRecord};
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const NOT_FOUND_ANSWER: &str = "No matching rulings were found in the indexed collection.";

    struct NullSink;
    impl TraceSink for NullSink {
        fn record(&self, _event: &TraceEvent) {}
    }

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

    struct StubRetriever {
        passages: Vec<ScoredPassage>,
        failures_left: AtomicUsize,
        calls: AtomicUsize,
    }

    impl StubRetriever {
        fn new(passages: Vec<ScoredPassage>, failures: usize) -> Self {
            Self {
                passages,
                failures_left: AtomicUsize::new(failures),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl VectorSearch for StubRetriever {
        async fn search(
            &self,
            _semantic_text: &str,
            _filter: Option<&StructuredFilter>,
            _top_k: usize,
        ) -> Result<Vec<ScoredPassage>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                anyhow::bail!("index unavailable");
            }
            Ok(self.passages.clone())
        }
    }

    struct StubGenerator {
        fail: bool,
        calls: AtomicUsize,
        contexts: Mutex<Vec<bool>>,
    }

    impl StubGenerator {
        fn new(fail: bool) -> Self {
            Self {
                fail,
                calls: AtomicUsize::new(0),
                contexts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl AnswerGenerator for StubGenerator {
        async fn generate(&self, _question: &str, context: Option<&str>) -> Result<GeneratedAnswer> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.contexts.lock().unwrap().push(context.is_some());
            if self.fail {
                anyhow::bail!("model overloaded");
            }
            Ok(GeneratedAnswer {
                text: match context {
                    Some(_) => "According to Ruling No. 70: no hiring without a tender.".to_string(),
                    None => NOT_FOUND_ANSWER.to_string(),
                },
                tokens: None,
            })
        }
    }

    fn passage() -> ScoredPassage {
        ScoredPassage {
            record: DocumentRecord {
                id: "ruling_70.pdf-0".to_string(),
                text: "The council may not hire without a public tender.".to_string(),
                metadata: BTreeMap::new(),
            },
            score: 0.9,
        }
    }

    fn config() -> EngineConfig {
        EngineConfig {
            retry_backoff_ms: 1,
            ..EngineConfig::default()
        }
    }

    fn orchestrator(
        extractor: impl ConstraintExtractor + 'static,
        retriever: Arc<StubRetriever>,
        generator: Arc<StubGenerator>,
    ) -> Orchestrator {
        let config = config();
        let planner = QueryPlanner::new(
            Arc::new(extractor),
            Arc::new(AttributeSchema::legal_rulings()),
            config.clone(),
        );
        Orchestrator::new(planner, retriever, generator, Arc::new(NullSink), config)
    }

    fn assert_spans_paired(events: &[TraceEvent]) {
        let starts = events.iter().filter(|e| e.phase == SpanPhase::Start).count();
        let ends = events.iter().filter(|e| e.phase == SpanPhase::End).count();
        assert_eq!(starts, ends, "unbalanced spans: {:#?}", events);
    }

    fn count_starts(events: &[TraceEvent], step: &str) -> usize {
        events
            .iter()
            .filter(|e| e.step == step && e.phase == SpanPhase::Start)
            .count()
    }

    #[tokio::test]
    async fn a_run_with_results_reaches_done() {
        let retriever = Arc::new(StubRetriever::new(vec![passage()], 0));
        let generator = Arc::new(StubGenerator::new(false));
        let orchestrator = orchestrator(
            StaticExtractor(vec![QueryConstraint {
                attribute: "year".to_string(),
                op: ComparisonOp::Gte,
                value: json!(2010),
            }]),
            Arc::clone(&retriever),
            Arc::clone(&generator),
        );

        let run = orchestrator.run_query("active rulings since 2010").await;
        assert_eq!(run.state, RunState::Done);
        assert!(run.answer.unwrap().contains("Ruling No. 70"));
        assert!(run.error.is_none());
        assert_eq!(run.passages.len(), 1);
        assert_eq!(run.filter.unwrap().must.len(), 1);
        assert_spans_paired(&run.events);
        assert_eq!(count_starts(&run.events, "has_results"), 1);
        assert_eq!(count_starts(&run.events, "empty_result"), 0);
    }

    #[tokio::test]
    async fn empty_retrieval_still_reaches_done_with_a_not_found_answer() {
        let retriever = Arc::new(StubRetriever::new(Vec::new(), 0));
        let generator = Arc::new(StubGenerator::new(false));
        let orchestrator = orchestrator(
            StaticExtractor(Vec::new()),
            Arc::clone(&retriever),
            Arc::clone(&generator),
        );

        let run = orchestrator.run_query("rulings about asteroid mining").await;
        assert_eq!(run.state, RunState::Done);
        assert_eq!(run.answer.unwrap(), NOT_FOUND_ANSWER);
        // The generator saw the explicit no-context marker.
        assert_eq!(*generator.contexts.lock().unwrap(), vec![false]);
        assert_eq!(count_starts(&run.events, "empty_result"), 1);
        assert_spans_paired(&run.events);
    }

    #[tokio::test]
    async fn one_retrieval_failure_is_retried_and_traced() {
        let retriever = Arc::new(StubRetriever::new(vec![passage()], 1));
        let generator = Arc::new(StubGenerator::new(false));
        let orchestrator = orchestrator(
            StaticExtractor(Vec::new()),
            Arc::clone(&retriever),
            Arc::clone(&generator),
        );

        let run = orchestrator.run_query("public tender rules").await;
        assert_eq!(run.state, RunState::Done);
        assert_eq!(retriever.calls.load(Ordering::SeqCst), 2);
        // Exactly two retrieval attempts in the trace.
        assert_eq!(count_starts(&run.events, "retrieve"), 2);
        assert_spans_paired(&run.events);
    }

    #[tokio::test]
    async fn persistent_retrieval_failure_fails_the_run() {
        let retriever = Arc::new(StubRetriever::new(vec![passage()], 2));
        let generator = Arc::new(StubGenerator::new(false));
        let orchestrator = orchestrator(
            StaticExtractor(Vec::new()),
            Arc::clone(&retriever),
            Arc::clone(&generator),
        );

        let run = orchestrator.run_query("public tender rules").await;
        assert_eq!(run.state, RunState::Failed);
        match run.error {
            Some(EngineError::Retrieval { attempts, .. }) => assert_eq!(attempts, 2),
            other => panic!("expected a retrieval error, got {:?}", other),
        }
        assert!(run.answer.is_none());
        // The generator was never reached.
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
        assert_spans_paired(&run.events);
    }

    #[tokio::test]
    async fn generation_failure_is_fatal_and_not_retried() {
        let retriever = Arc::new(StubRetriever::new(vec![passage()], 0));
        let generator = Arc::new(StubGenerator::new(true));
        let orchestrator = orchestrator(
            StaticExtractor(Vec::new()),
            Arc::clone(&retriever),
            Arc::clone(&generator),
        );

        let run = orchestrator.run_query("public tender rules").await;
        assert_eq!(run.state, RunState::Failed);
        assert!(matches!(run.error, Some(EngineError::Generation { .. })));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
        assert_spans_paired(&run.events);
    }

    #[tokio::test]
    async fn a_dead_extractor_fails_the_run_in_planning() {
        let retriever = Arc::new(StubRetriever::new(vec![passage()], 0));
        let generator = Arc::new(StubGenerator::new(false));
        let orchestrator =
            orchestrator(DeadExtractor, Arc::clone(&retriever), Arc::clone(&generator));

        let run = orchestrator.run_query("anything").await;
        assert_eq!(run.state, RunState::Failed);
        assert!(matches!(run.error, Some(EngineError::Planning { .. })));
        assert_eq!(retriever.calls.load(Ordering::SeqCst), 0);
        assert_eq!(count_starts(&run.events, "retrieve"), 0);
        assert_spans_paired(&run.events);
    }

    #[tokio::test]
    async fn dropped_constraints_are_flagged_in_the_trace() {
        let retriever = Arc::new(StubRetriever::new(vec![passage()], 0));
        let generator = Arc::new(StubGenerator::new(false));
        let orchestrator = orchestrator(
            StaticExtractor(vec![QueryConstraint {
                // Comparison on a text attribute: stripped by the planner.
                attribute: "status_date".to_string(),
                op: ComparisonOp::Lt,
                value: json!("07/04/14"),
            }]),
            Arc::clone(&retriever),
            Arc::clone(&generator),
        );

        let run = orchestrator.run_query("rulings before 2014").await;
        assert_eq!(run.state, RunState::Done);
        let plan_end = run
            .events
            .iter()
            .find(|e| e.step == "plan" && e.phase == SpanPhase::End)
            .unwrap();
        assert!(plan_end.attributes["constraints_dropped"].contains("status_date lt"));
    }
}
