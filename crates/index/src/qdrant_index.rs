use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use tracing::info;

use ingest::{DocumentRecord, MetadataValue};

use crate::embeddings::EmbeddingClient;
use crate::filter::StructuredFilter;

/// One retrieved passage with its relevance score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredPassage {
    pub record: DocumentRecord,
    pub score: f32,
}

/// The vector index capability as the engine consumes it: semantic search
/// plus an optional conjunctive attribute filter.
#[async_trait]
pub trait VectorSearch: Send + Sync {
    async fn search(
        &self,
        semantic_text: &str,
        filter: Option<&StructuredFilter>,
        top_k: usize,
    ) -> Result<Vec<ScoredPassage>>;
}

/// Qdrant-backed index over the REST API.
pub struct QdrantIndex {
    base_url: String,
    collection: String,
    client: reqwest::Client,
    embeddings: EmbeddingClient,
}

#[derive(Serialize)]
struct CreateCollection {
    vectors: VectorParams,
}

#[derive(Serialize)]
struct VectorParams {
    size: usize,
    distance: String,
}

#[derive(Serialize)]
struct UpsertPoints {
    points: Vec<Point>,
}

#[derive(Serialize)]
struct Point {
    id: u64,
    vector: Vec<f32>,
    payload: HashMap<String, serde_json::Value>,
}

#[derive(Deserialize)]
struct CollectionList {
    result: CollectionListResult,
}

#[derive(Deserialize)]
struct CollectionListResult {
    collections: Vec<CollectionName>,
}

#[derive(Deserialize)]
struct CollectionName {
    name: String,
}

impl QdrantIndex {
    pub fn new(base_url: String, collection: String, embeddings: EmbeddingClient) -> Self {
        Self {
            base_url,
            collection,
            client: reqwest::Client::new(),
            embeddings,
        }
    }

    /// Create the collection if it does not exist yet, with the dimension
    /// probed from the embedding model and cosine distance.
    pub async fn init_collection(&self) -> Result<()> {
        let url = format!("{}/collections", self.base_url);
        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            anyhow::bail!("failed to list collections: {}", response.status());
        }

        let list: CollectionList = response.json().await?;
        if list.result.collections.iter().any(|c| c.name == self.collection) {
            info!(collection = %self.collection, "collection already exists");
            return Ok(());
        }

        let dimension = self.embeddings.probe_dimension().await?;
        info!(collection = %self.collection, dimension, "creating collection");

        let url = format!("{}/collections/{}", self.base_url, self.collection);
        let request = CreateCollection {
            vectors: VectorParams {
                size: dimension,
                distance: "Cosine".to_string(),
            },
        };

        let response = self.client.put(&url).json(&request).send().await?;
        if !response.status().is_success() {
            let error_text = response.text().await?;
            anyhow::bail!("failed to create collection: {}", error_text);
        }

        Ok(())
    }

    /// Embed a normalized record and upsert it. Re-ingesting the same
    /// document overwrites the same point.
    pub async fn upsert(&self, record: &DocumentRecord) -> Result<()> {
        let embedding = self
            .embeddings
            .embed(&record.text)
            .await
            .context("failed to embed passage text")?;

        let mut payload = HashMap::new();
        payload.insert("doc_id".to_string(), serde_json::json!(record.id));
        payload.insert("text".to_string(), serde_json::json!(record.text));
        for (name, value) in &record.metadata {
            payload.insert(name.clone(), serde_json::json!(value));
        }

        let point = Point {
            id: point_id(&record.id),
            vector: embedding,
            payload,
        };

        let url = format!("{}/collections/{}/points", self.base_url, self.collection);
        let response = self
            .client
            .put(&url)
            .json(&UpsertPoints { points: vec![point] })
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            anyhow::bail!("failed to upsert point: {}", error_text);
        }

        Ok(())
    }

    async fn search_points(
        &self,
        vector: Vec<f32>,
        filter: Option<&StructuredFilter>,
        top_k: usize,
    ) -> Result<Vec<ScoredPassage>> {
        let url = format!(
            "{}/collections/{}/points/search",
            self.base_url, self.collection
        );

        let mut body = serde_json::json!({
            "vector": vector,
            "limit": top_k,
            "with_payload": true,
        });
        if let Some(filter) = filter {
            body["filter"] = serde_json::to_value(filter)?;
        }

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("failed to send search request")?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("vector search failed: {}", error_text);
        }

        let result: serde_json::Value = response
            .json()
            .await
            .context("failed to parse search response")?;

        let points = result["result"]
            .as_array()
            .context("malformed search response")?;

        Ok(points.iter().filter_map(parse_point).collect())
    }
}

#[async_trait]
impl VectorSearch for QdrantIndex {
    async fn search(
        &self,
        semantic_text: &str,
        filter: Option<&StructuredFilter>,
        top_k: usize,
    ) -> Result<Vec<ScoredPassage>> {
        let vector = self
            .embeddings
            .embed(semantic_text)
            .await
            .context("failed to embed query")?;
        self.search_points(vector, filter, top_k).await
    }
}

/// Stable point id: first 8 bytes of sha256(document id). Identical raw
/// documents always land on the same point.
pub fn point_id(doc_id: &str) -> u64 {
    let digest = Sha256::digest(doc_id.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

fn parse_point(point: &serde_json::Value) -> Option<ScoredPassage> {
    let score = point["score"].as_f64()? as f32;
    let payload = point["payload"].as_object()?;

    let id = payload.get("doc_id")?.as_str()?.to_string();
    let text = payload.get("text")?.as_str()?.to_string();

    let mut metadata = BTreeMap::new();
    for (name, value) in payload {
        if name == "doc_id" || name == "text" {
            continue;
        }
        let value = if let Some(n) = value.as_i64() {
            MetadataValue::Integer(n)
        } else if let Some(s) = value.as_str() {
            MetadataValue::Text(s.to_string())
        } else {
            continue;
        };
        metadata.insert(name.clone(), value);
    }

    Some(ScoredPassage {
        record: DocumentRecord { id, text, metadata },
        score,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_ids_are_stable() {
        assert_eq!(point_id("ruling_70.pdf-0"), point_id("ruling_70.pdf-0"));
        assert_ne!(point_id("ruling_70.pdf-0"), point_id("ruling_70.pdf-1"));
    }

    #[test]
    fn search_hits_parse_back_into_records() {
        let hit = serde_json::json!({
            "score": 0.87,
            "payload": {
                "doc_id": "ruling_70.pdf-0",
                "text": "The council may not hire without a public tender.",
                "ruling_number": "70",
                "status": "ACTIVE",
                "year": 2014,
                "chunk_index": 0
            }
        });

        let passage = parse_point(&hit).unwrap();
        assert!((passage.score - 0.87).abs() < 1e-6);
        assert_eq!(passage.record.id, "ruling_70.pdf-0");
        assert_eq!(passage.record.get("year").unwrap().as_i64(), Some(2014));
        assert_eq!(passage.record.get("status").unwrap().as_str(), Some("ACTIVE"));
    }

    #[test]
    fn hits_without_payload_are_skipped() {
        let hit = serde_json::json!({"score": 0.5});
        assert!(parse_point(&hit).is_none());
    }
}
