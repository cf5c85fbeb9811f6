//! Error types for revgen
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

use crate::domain::{PolicyKind, ReviewerId};

/// All error types that can occur in the generator library
#[derive(Debug, Error)]
pub enum GeneratorError {
    /// Reviewer is not in the registry at dispatch time
    #[error("Reviewer not found: {0}")]
    ReviewerNotFound(ReviewerId),

    /// A generate request lacks the parameter its policy needs
    #[error("Missing '{parameter}' for {policy} review generation")]
    MissingParameter {
        policy: PolicyKind,
        parameter: &'static str,
    },

    /// Unrecognized policy type or otherwise unsupported operation
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Cron expression could not be parsed
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },

    /// Reviewer record failed validation
    #[error("Invalid reviewer: {0}")]
    InvalidReviewer(String),

    /// Storage/persistence error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Job scheduling backend error
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for GeneratorError {
    fn from(err: rusqlite::Error) -> Self {
        GeneratorError::Storage(err.to_string())
    }
}

impl GeneratorError {
    /// True for errors caused by bad caller arguments rather than infrastructure
    pub fn is_argument_error(&self) -> bool {
        matches!(
            self,
            GeneratorError::ReviewerNotFound(_)
                | GeneratorError::MissingParameter { .. }
                | GeneratorError::InvalidCron { .. }
                | GeneratorError::InvalidReviewer(_)
        )
    }
}

/// Result type alias for generator operations
pub type Result<T> = std::result::Result<T, GeneratorError>;
