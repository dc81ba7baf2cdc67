pub mod embeddings;
pub mod filter;
pub mod qdrant_index;

pub use embeddings::EmbeddingClient;
pub use filter::{
    ComparisonOp, FieldCondition, FilterTranslator, QueryConstraint, StructuredFilter,
    TranslationError,
};
pub use qdrant_index::{QdrantIndex, ScoredPassage, VectorSearch, point_id};

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use ingest::{MetadataNormalizer, NormalizedDocument, RawDocument, RawDocumentLoader};

/// Outcome of a batch ingestion. Per-record failures skip the record and
/// keep the batch going.
#[derive(Debug, Default, Serialize)]
pub struct IngestSummary {
    pub documents_indexed: usize,
    pub documents_skipped: usize,
    pub fields_dropped: usize,
}

/// Ingestion entry point: normalize raw metadata, embed the passage and
/// upsert it into the vector index.
pub struct Indexer {
    normalizer: MetadataNormalizer,
    index: Arc<QdrantIndex>,
}

impl Indexer {
    pub fn new(normalizer: MetadataNormalizer, index: Arc<QdrantIndex>) -> Self {
        Self { normalizer, index }
    }

    pub async fn init(&self) -> Result<()> {
        self.index.init_collection().await
    }

    /// Normalize and index one raw document. The returned document carries
    /// any fields dropped during normalization.
    pub async fn normalize_and_index(&self, raw: &RawDocument) -> Result<NormalizedDocument> {
        let normalized = self
            .normalizer
            .normalize(raw)
            .with_context(|| format!("failed to normalize document '{}'", raw.id))?;

        self.index
            .upsert(&normalized.record)
            .await
            .with_context(|| format!("failed to index document '{}'", raw.id))?;

        Ok(normalized)
    }

    /// Ingest a raw-document JSON file, or every such file in a directory.
    pub async fn ingest_path(&self, path: &Path) -> Result<IngestSummary> {
        let documents = if path.is_file() {
            vec![RawDocumentLoader::read_file(path).await?]
        } else if path.is_dir() {
            RawDocumentLoader::read_directory(path).await?
        } else {
            anyhow::bail!("no such file or directory: {:?}", path);
        };

        let mut summary = IngestSummary::default();
        for raw in &documents {
            match self.normalize_and_index(raw).await {
                Ok(normalized) => {
                    summary.documents_indexed += 1;
                    summary.fields_dropped += normalized.dropped.len();
                }
                Err(e) => {
                    warn!(doc_id = %raw.id, error = %e, "skipping document");
                    summary.documents_skipped += 1;
                }
            }
        }

        info!(
            indexed = summary.documents_indexed,
            skipped = summary.documents_skipped,
            "ingestion finished"
        );
        Ok(summary)
    }
}
