use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Engine-level knobs, passed explicitly to the components that need them.
/// There is no process-wide mutable configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of passages requested from the vector index. Never zero.
    pub top_k: usize,
    /// Timeout applied around each external call (planning, retrieval,
    /// generation). A timed-out step counts as a failed step.
    pub step_timeout_secs: u64,
    /// Extra retrieval attempts after the first failure.
    pub retrieval_retries: usize,
    /// Backoff before a retrieval retry.
    pub retry_backoff_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            step_timeout_secs: 60,
            retrieval_retries: 1,
            retry_backoff_ms: 500,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            anyhow::bail!("top_k must be at least 1");
        }
        if self.step_timeout_secs == 0 {
            anyhow::bail!("step_timeout_secs must be at least 1");
        }
        Ok(())
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_top_k_is_rejected() {
        let config = EngineConfig {
            top_k: 0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
