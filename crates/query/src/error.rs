/// Run-fatal failures, one variant per orchestration step. A failed run
/// always carries one of these; it never surfaces as an empty answer.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("planning failed: {reason}")]
    Planning { reason: String },

    #[error("retrieval failed after {attempts} attempt(s): {reason}")]
    Retrieval { reason: String, attempts: usize },

    #[error("generation failed: {reason}")]
    Generation { reason: String },
}

impl EngineError {
    /// Name of the step the failure originated in, as used in trace events.
    pub fn step(&self) -> &'static str {
        match self {
            EngineError::Planning { .. } => "plan",
            EngineError::Retrieval { .. } => "retrieve",
            EngineError::Generation { .. } => "generate",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_name_their_step_and_cause() {
        let err = EngineError::Retrieval {
            reason: "connection refused".to_string(),
            attempts: 2,
        };
        assert_eq!(err.step(), "retrieve");
        assert!(err.to_string().contains("connection refused"));
        assert!(err.to_string().contains("2 attempt"));
    }
}
