use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Client for the embedding endpoint (Ollama-compatible REST API).
#[derive(Clone)]
pub struct EmbeddingClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct EmbeddingRequest {
    model: String,
    prompt: String,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

impl EmbeddingClient {
    pub fn new(base_url: String, model: String) -> Self {
        Self {
            base_url,
            model,
            client: reqwest::Client::new(),
        }
    }

    /// Embed one passage or query text.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.base_url);

        let request = EmbeddingRequest {
            model: self.model.clone(),
            prompt: text.to_string(),
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("failed to send embedding request")?;

        if !response.status().is_success() {
            anyhow::bail!("embedding request failed: {}", response.status());
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .context("failed to parse embedding response")?;

        if parsed.embedding.is_empty() {
            anyhow::bail!("embedding model returned an empty vector");
        }

        Ok(parsed.embedding)
    }

    /// The model does not advertise its dimension; probe it once with a
    /// throwaway embedding when creating the collection.
    pub async fn probe_dimension(&self) -> Result<usize> {
        Ok(self.embed("dimension probe").await?.len())
    }
}
