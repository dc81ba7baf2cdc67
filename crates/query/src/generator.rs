use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::llm::OllamaClient;
use crate::prompt::{build_answer_prompt, build_no_context_prompt};
use crate::trace::TokenMetrics;

/// A generated answer plus whatever token accounting the capability
/// reported.
#[derive(Debug, Clone)]
pub struct GeneratedAnswer {
    pub text: String,
    pub tokens: Option<TokenMetrics>,
}

/// Answer generation, consumed as an opaque capability. `context` is
/// `None` on the empty-retrieval branch; the implementation must then
/// produce a defined "nothing found" answer instead of improvising.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate(&self, question: &str, context: Option<&str>) -> Result<GeneratedAnswer>;
}

pub struct LlmAnswerGenerator {
    llm: OllamaClient,
}

impl LlmAnswerGenerator {
    pub fn new(llm: OllamaClient) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl AnswerGenerator for LlmAnswerGenerator {
    async fn generate(&self, question: &str, context: Option<&str>) -> Result<GeneratedAnswer> {
        let prompt = match context {
            Some(context) => build_answer_prompt(question, context),
            None => build_no_context_prompt(question),
        };

        let completion = self
            .llm
            .generate(&prompt)
            .await
            .context("answer generation call failed")?;

        // An empty answer is indistinguishable from "no relevant documents"
        // downstream, so treat it as a generation failure here.
        if completion.text.trim().is_empty() {
            anyhow::bail!("generation capability returned an empty answer");
        }

        Ok(GeneratedAnswer {
            text: completion.text,
            tokens: completion.tokens,
        })
    }
}
