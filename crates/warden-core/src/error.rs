//! Error types for GroupWarden.

use thiserror::Error;

/// Core error type shared by every crate in the workspace.
#[derive(Error, Debug)]
pub enum WardenError {
    /// Malformed input (bad `HH:MM`, missing identifier). Raised before any mutation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unknown group, member or membership.
    #[error("{0} not found: {1}")]
    NotFound(&'static str, String),

    /// Messaging platform call failed.
    #[error("External call failed: {0}")]
    External(String),

    /// Scheduler, config or membership persistence failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WardenError {
    /// Whether retrying the same operation later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, WardenError::External(_) | WardenError::Storage(_))
    }
}

/// Result type alias for GroupWarden operations.
pub type Result<T> = std::result::Result<T, WardenError>;
