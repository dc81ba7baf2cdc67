use anyhow::Context;
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;
use uuid::Uuid;

use ingest::{AttributeSchema, CenturyPivot, MetadataNormalizer};
use query::{
    EngineError, LlmAnswerGenerator, LlmConstraintExtractor, LogSink, OllamaClient,
    Orchestrator, QueryPlanner, RunState,
};

mod cache;
mod config;
mod metrics;

use cache::ResponseCache;
use config::AppConfig;
use metrics::Metrics;

#[derive(Clone)]
struct AppState {
    indexer: Arc<index::Indexer>,
    orchestrator: Arc<Orchestrator>,
    cache: Arc<ResponseCache>,
    metrics: Arc<Metrics>,
    config: AppConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = AppConfig::from_env();
    config.engine.validate().context("invalid engine config")?;

    let schema = AttributeSchema::legal_rulings();

    // Ingestion side.
    let embeddings =
        index::EmbeddingClient::new(config.ollama_url.clone(), config.embedding_model.clone());
    let qdrant = Arc::new(index::QdrantIndex::new(
        config.qdrant_url.clone(),
        config.collection.clone(),
        embeddings,
    ));
    let normalizer = MetadataNormalizer::new(
        schema.clone(),
        CenturyPivot {
            max_in_2000s: config.pivot_max_in_2000s,
        },
    );
    let indexer = Arc::new(index::Indexer::new(normalizer, Arc::clone(&qdrant)));
    indexer
        .init()
        .await
        .context("failed to initialize the vector index")?;

    // Query side.
    let llm = OllamaClient::new(config.ollama_url.clone(), config.llm_model.clone());
    let planner = QueryPlanner::new(
        Arc::new(LlmConstraintExtractor::new(llm.clone())),
        Arc::new(schema),
        config.engine.clone(),
    );
    let orchestrator = Arc::new(Orchestrator::new(
        planner,
        qdrant,
        Arc::new(LlmAnswerGenerator::new(llm)),
        Arc::new(LogSink),
        config.engine.clone(),
    ));

    let state = AppState {
        indexer,
        orchestrator,
        cache: Arc::new(ResponseCache::new(config.cache.max_entries)),
        metrics: Metrics::new(),
        config: config.clone(),
    };

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/ingest", post(ingest_documents))
        .route("/ask", post(ask_question))
        .route("/metrics", get(get_metrics))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!(addr = %config.bind_addr, "server listening");
    axum::serve(listener, app).await.context("server exited")?;
    Ok(())
}

#[derive(Serialize)]
struct HealthResponse {
    qdrant: String,
    ollama: String,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        qdrant: probe(&state.config.qdrant_url).await,
        ollama: probe(&state.config.ollama_url).await,
    })
}

async fn probe(url: &str) -> String {
    match reqwest::get(url).await {
        Ok(resp) if resp.status().is_success() => "ok".to_string(),
        Ok(resp) => format!("error: status {}", resp.status()),
        Err(e) => format!("error: {}", e),
    }
}

#[derive(Deserialize)]
struct IngestRequest {
    path: String,
}

async fn ingest_documents(
    State(state): State<AppState>,
    Json(req): Json<IngestRequest>,
) -> Result<Json<index::IngestSummary>, StatusCode> {
    let path = PathBuf::from(&req.path);
    if !path.exists() {
        return Err(StatusCode::NOT_FOUND);
    }

    let started = Instant::now();
    let summary = state.indexer.ingest_path(&path).await.map_err(|e| {
        error!(error = %e, "ingestion failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    state
        .metrics
        .record_ingest(started.elapsed(), summary.documents_indexed);
    Ok(Json(summary))
}

#[derive(Deserialize)]
struct AskRequest {
    question: String,
}

#[derive(Serialize)]
struct AskResponse {
    run_id: Uuid,
    state: RunState,
    #[serde(skip_serializing_if = "Option::is_none")]
    answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorBody>,
    filter: String,
    sources: Vec<SourceInfo>,
    cached: bool,
}

#[derive(Serialize)]
struct ErrorBody {
    step: &'static str,
    message: String,
}

impl From<&EngineError> for ErrorBody {
    fn from(error: &EngineError) -> Self {
        Self {
            step: error.step(),
            message: error.to_string(),
        }
    }
}

/// Per-source metadata returned alongside the answer, mirroring what the
/// answer itself cites.
#[derive(Serialize)]
struct SourceInfo {
    doc_id: String,
    score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    ruling_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    year: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    section: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_file: Option<String>,
}

async fn ask_question(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let question = req.question.trim();
    if question.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    if state.config.cache.enabled {
        if let Some(hit) = state.cache.get(question) {
            let mut cached: serde_json::Value = serde_json::from_str(&hit).map_err(|e| {
                error!(error = %e, "corrupt cache entry");
                StatusCode::INTERNAL_SERVER_ERROR
            })?;
            cached["cached"] = serde_json::Value::Bool(true);
            return Ok(Json(cached));
        }
    }

    let started = Instant::now();
    let run = state.orchestrator.run_query(question).await;
    state
        .metrics
        .record_query(started.elapsed(), run.state == RunState::Done);

    let response = AskResponse {
        run_id: run.run_id,
        state: run.state,
        answer: run.answer,
        error: run.error.as_ref().map(ErrorBody::from),
        filter: run
            .filter
            .as_ref()
            .map(|f| f.render())
            .unwrap_or_else(|| "no filter applied".to_string()),
        sources: run.passages.iter().map(source_info).collect(),
        cached: false,
    };

    let body = serde_json::to_value(&response).map_err(|e| {
        error!(error = %e, "failed to serialize response");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    if state.config.cache.enabled && response.state == RunState::Done {
        state.cache.set(question, body.to_string());
    }

    Ok(Json(body))
}

fn source_info(passage: &index::ScoredPassage) -> SourceInfo {
    let md = &passage.record.metadata;
    let text = |name: &str| md.get(name).and_then(|v| v.as_str()).map(str::to_string);
    SourceInfo {
        doc_id: passage.record.id.clone(),
        score: passage.score,
        ruling_number: text("ruling_number"),
        status: text("status"),
        status_date: text("status_date"),
        year: md.get("year").and_then(|v| v.as_i64()),
        section: text("section"),
        source_file: text("source_file"),
    }
}

async fn get_metrics(State(state): State<AppState>) -> Json<metrics::MetricsSnapshot> {
    Json(state.metrics.snapshot())
}
