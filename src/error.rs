//! Error types for the agent runtime

use std::time::Duration;
use thiserror::Error;

/// Main error type for runtime operations
///
/// The variants mirror how failures surface to callers: validation failures
/// are never retried, dependency failures may be retried by the supervisor,
/// and internal errors are logged but must not terminate the process.
#[derive(Error, Debug)]
pub enum AgentError {
    /// Malformed input to a public operation
    #[error("validation error: {0}")]
    Validation(String),

    /// Agent or job ID is unknown
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation is illegal for the current state
    #[error("invalid state: {0}")]
    State(String),

    /// An external dependency failed
    #[error("dependency '{component}' failed: {message}")]
    Dependency { component: String, message: String },

    /// A bounded wait expired
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Invariant violation or unexpected failure inside a component
    #[error("internal error: {0}")]
    Internal(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AgentError {
    /// Builds a dependency error naming the failing component
    pub fn dependency(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Dependency {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Stable machine-readable tag used in the HTTP error envelope
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::NotFound(_) => "not_found",
            Self::State(_) => "state_error",
            Self::Dependency { .. } => "dependency_error",
            Self::Timeout(_) => "timeout_error",
            Self::Internal(_) | Self::Io(_) | Self::Serialization(_) => "internal_error",
        }
    }
}

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tags_are_stable() {
        assert_eq!(AgentError::Validation("x".into()).kind(), "validation_error");
        assert_eq!(AgentError::NotFound("x".into()).kind(), "not_found");
        assert_eq!(AgentError::State("x".into()).kind(), "state_error");
        assert_eq!(
            AgentError::dependency("llm_backend", "unreachable").kind(),
            "dependency_error"
        );
        assert_eq!(
            AgentError::Timeout(Duration::from_secs(1)).kind(),
            "timeout_error"
        );
        assert_eq!(AgentError::Internal("x".into()).kind(), "internal_error");
    }

    #[test]
    fn dependency_error_names_the_component() {
        let err = AgentError::dependency("embedding_provider", "connection refused");
        assert!(err.to_string().contains("embedding_provider"));
    }
}
