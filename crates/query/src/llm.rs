use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::trace::TokenMetrics;

/// Chat/completion client (Ollama-compatible REST API), shared by the
/// constraint extractor and the answer generator.
#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<String>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
    prompt_eval_count: Option<u64>,
    eval_count: Option<u64>,
}

/// Completion text plus whatever token accounting the model reported.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub tokens: Option<TokenMetrics>,
}

impl OllamaClient {
    pub fn new(base_url: String, model: String) -> Self {
        Self {
            base_url,
            model,
            client: reqwest::Client::new(),
        }
    }

    pub async fn generate(&self, prompt: &str) -> Result<Completion> {
        self.generate_inner(prompt, None).await
    }

    /// Generate with JSON output forced, retrying once with a repair prompt
    /// when the model returns something unparseable.
    pub async fn generate_json(&self, prompt: &str, max_retries: usize) -> Result<String> {
        let mut candidate = self
            .generate_inner(prompt, Some("json".to_string()))
            .await?
            .text;

        for attempt in 0..=max_retries {
            let cleaned = strip_code_fences(&candidate);
            if serde_json::from_str::<serde_json::Value>(&cleaned).is_ok() {
                return Ok(cleaned);
            }
            if attempt == max_retries {
                break;
            }

            let repair = format!(
                "The following JSON is invalid:\n{}\n\nFix it. Output only the raw JSON, \
                 no markdown, no explanations.",
                candidate
            );
            candidate = self
                .generate_inner(&repair, Some("json".to_string()))
                .await?
                .text;
        }

        anyhow::bail!("model did not produce valid JSON after {} repairs", max_retries)
    }

    async fn generate_inner(&self, prompt: &str, format: Option<String>) -> Result<Completion> {
        let url = format!("{}/api/generate", self.base_url);

        let request = GenerateRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            stream: false,
            format,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("failed to send generation request")?;

        if !response.status().is_success() {
            anyhow::bail!("generation request failed: {}", response.status());
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .context("failed to parse generation response")?;

        let tokens = if parsed.prompt_eval_count.is_some() || parsed.eval_count.is_some() {
            Some(TokenMetrics {
                input_tokens: parsed.prompt_eval_count,
                output_tokens: parsed.eval_count,
            })
        } else {
            None
        };

        Ok(Completion {
            text: parsed.response,
            tokens,
        })
    }
}

/// Models wrap JSON in markdown fences often enough that stripping them
/// beats re-prompting.
pub fn strip_code_fences(text: &str) -> String {
    let re = Regex::new(r"```[\w-]*").expect("static regex");
    re.replace_all(text, "").trim().to_string()
}
