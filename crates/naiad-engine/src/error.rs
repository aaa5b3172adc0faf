//! Engine error taxonomy
//!
//! TigerStyle: one enum at the public surface, structured causes below it.
//!
//! Recovery policy: validation and provider errors abort the call that
//! raised them; the sleep engine additionally swallows per-cluster LLM and
//! embedding failures so one bad cluster never sinks a cycle. Graph errors
//! always bubble.

use naiad_graph::GraphError;
use naiad_providers::{EmbeddingError, LlmError};
use thiserror::Error;

/// Errors from public engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Caller supplied invalid input; fatal for the call.
    #[error("validation failed: {reason}")]
    Validation { reason: String },

    /// Graph backend failure, propagated unchanged.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// Structured LLM call failed or returned a rejected payload.
    #[error(transparent)]
    Llm(#[from] LlmError),

    /// Embedding call failed.
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
}

impl EngineError {
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// Whether retrying the same call can reasonably succeed.
    pub fn is_retriable(&self) -> bool {
        match self {
            EngineError::Validation { .. } => false,
            EngineError::Graph(e) => e.is_retriable(),
            EngineError::Llm(e) => e.is_retriable(),
            EngineError::Embedding(e) => e.is_retriable(),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_not_retriable() {
        assert!(!EngineError::validation("missing start").is_retriable());
    }

    #[test]
    fn test_graph_error_retriability_passes_through() {
        let err: EngineError = GraphError::ConnectionFailed {
            reason: "refused".to_string(),
        }
        .into();
        assert!(err.is_retriable());

        let err: EngineError = GraphError::NotFound {
            resource: "entity",
            id: "x".to_string(),
        }
        .into();
        assert!(!err.is_retriable());
    }
}
