//! Unified error types for sluice

use thiserror::Error;

/// Unified error type for all sluice operations
#[derive(Error, Debug)]
pub enum SluiceError {
    // Gate errors
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    // External collaborators
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Generation failed: {0}")]
    Generation(String),

    // Lifecycle errors
    #[error("Proposed change #{id} is already {status}")]
    StateConflict { id: i64, status: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("No relevant files: {0}")]
    NoRelevantFiles(String),

    // Infrastructure
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(String),
}

impl SluiceError {
    /// Stable machine-readable reason string, used in error payloads.
    pub fn reason(&self) -> &'static str {
        match self {
            SluiceError::Validation(_) => "validation_error",
            SluiceError::NotFound(_) => "not_found",
            SluiceError::UpstreamUnavailable(_) => "upstream_unavailable",
            SluiceError::Generation(_) => "generation_failure",
            SluiceError::StateConflict { .. } | SluiceError::Conflict(_) => "state_conflict",
            SluiceError::NoRelevantFiles(_) => "no_relevant_files",
            SluiceError::Storage(_) => "storage_error",
            SluiceError::Config(_) => "config_error",
            SluiceError::Io(_) => "io_error",
            SluiceError::Serialization(_) => "serialization_error",
            SluiceError::Other(_) => "internal_error",
        }
    }

    /// True for errors that signal a lifecycle conflict rather than a fault
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            SluiceError::StateConflict { .. } | SluiceError::Conflict(_)
        )
    }
}

/// Result type alias using SluiceError
pub type Result<T> = std::result::Result<T, SluiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_conflict_message_names_status() {
        let err = SluiceError::StateConflict {
            id: 7,
            status: "accepted".to_string(),
        };
        assert_eq!(err.to_string(), "Proposed change #7 is already accepted");
        assert_eq!(err.reason(), "state_conflict");
        assert!(err.is_conflict());
    }

    #[test]
    fn test_reasons_are_stable() {
        assert_eq!(
            SluiceError::Validation("x".into()).reason(),
            "validation_error"
        );
        assert_eq!(SluiceError::NotFound("x".into()).reason(), "not_found");
        assert_eq!(
            SluiceError::UpstreamUnavailable("x".into()).reason(),
            "upstream_unavailable"
        );
        assert_eq!(
            SluiceError::Generation("x".into()).reason(),
            "generation_failure"
        );
        assert!(!SluiceError::Other("x".into()).is_conflict());
    }
}
