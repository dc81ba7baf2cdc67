pub mod config;
pub mod error;
pub mod extractor;
pub mod generator;
pub mod llm;
pub mod orchestrator;
pub mod planner;
pub mod prompt;
pub mod retry;
pub mod trace;

pub use config::EngineConfig;
pub use error::EngineError;
pub use extractor::{ConstraintExtractor, LlmConstraintExtractor};
pub use generator::{AnswerGenerator, GeneratedAnswer, LlmAnswerGenerator};
pub use llm::OllamaClient;
pub use orchestrator::{OrchestrationRun, Orchestrator, RunState};
pub use planner::{PlannedQuery, QueryPlanner, RetrievalRequest};
pub use trace::{ChannelSink, LogSink, SpanOutcome, TokenMetrics, TraceEvent, TraceSink, Tracer};
