use serde::{Deserialize, Serialize};

use query::EngineConfig;

/// Process configuration, resolved once at startup and passed explicitly
/// to each component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub bind_addr: String,
    pub qdrant_url: String,
    pub ollama_url: String,
    pub llm_model: String,
    pub embedding_model: String,
    pub collection: String,
    /// Century pivot for two-digit years in status dates.
    pub pivot_max_in_2000s: u8,
    pub engine: EngineConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
            qdrant_url: "http://localhost:6333".to_string(),
            ollama_url: "http://localhost:11434".to_string(),
            llm_model: "llama3".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            collection: "ruling_passages".to_string(),
            pivot_max_in_2000s: 68,
            engine: EngineConfig::default(),
            cache: CacheConfig {
                enabled: true,
                max_entries: 10000,
            },
        }
    }
}

impl AppConfig {
    /// Defaults overridable through the environment, matching the variable
    /// names the deployment already uses.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: env_or("BIND_ADDR", defaults.bind_addr),
            qdrant_url: env_or("QDRANT_URL", defaults.qdrant_url),
            ollama_url: env_or("OLLAMA_URL", defaults.ollama_url),
            llm_model: env_or("MODEL_NAME", defaults.llm_model),
            embedding_model: env_or("EMBEDDINGS_NAME", defaults.embedding_model),
            collection: env_or("COLLECTION_NAME", defaults.collection),
            ..defaults
        }
    }
}

fn env_or(name: &str, default: String) -> String {
    std::env::var(name).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_produce_a_valid_engine_config() {
        let config = AppConfig::default();
        assert!(config.engine.validate().is_ok());
        assert_eq!(config.pivot_max_in_2000s, 68);
    }
}
