//! Error types for the contentloom domain.
//!
//! Configuration problems are fatal before any task runs; agent failures are
//! fatal to the run. Missing template files and rendering problems are not
//! errors at all and never show up here.

use thiserror::Error;

/// The top-level error type for all contentloom operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Missing required variables: {}", .0.join(", "))]
    MissingVariables(Vec<String>),

    #[error("Failed to parse template {path}: {reason}")]
    TemplateParse { path: String, reason: String },

    #[error("No workflow template registered for type '{0}'")]
    WorkflowNotFound(String),

    // --- Execution errors ---
    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("Task execution failed for {task}: {reason}")]
    TaskFailed { task: String, reason: String },

    #[error("Run cancelled while executing task '{task}'")]
    Cancelled { task: String },

    #[error("Invalid workflow transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    // --- IO / serialization ---
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Whether this error belongs to the configuration class, i.e. it was
    /// raised before any task started.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Config { .. }
                | Self::MissingVariables(_)
                | Self::TemplateParse { .. }
                | Self::WorkflowNotFound(_)
        )
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the agent collaborators.
#[derive(Debug, Clone, Error)]
pub enum AgentError {
    #[error("Agent not found: {0}")]
    NotFound(String),

    #[error("Agent '{agent}' failed: {reason}")]
    ExecutionFailed { agent: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_variables_lists_names() {
        let err = Error::MissingVariables(vec!["topic".into(), "tone".into()]);
        assert_eq!(err.to_string(), "Missing required variables: topic, tone");
        assert!(err.is_configuration());
    }

    #[test]
    fn agent_errors_are_not_configuration() {
        let err: Error = AgentError::NotFound("writer".into()).into();
        assert!(!err.is_configuration());
        assert!(err.to_string().contains("writer"));
    }
}
