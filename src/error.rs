//! Error types for the pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Pipeline errors
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed or unreadable input for a single item; never aborts a batch
    #[error("Invalid input for '{item}': {message}")]
    Input { item: String, message: String },

    /// Transient failure of an external collaborator (network, quota, timeout)
    #[error("External service '{service}' failed: {message}")]
    ExternalService { service: String, message: String },

    /// Stage invoked with a missing or conflicting precondition; nothing was run
    #[error("State conflict: {0}")]
    StateConflict(String),

    /// Cooperative cancellation; committed partial output remains valid
    #[error("Task cancelled")]
    Cancelled,

    /// Durable store error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Task lookup failure
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request error
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Create a per-item input error
    pub fn input(item: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Input {
            item: item.into(),
            message: message.into(),
        }
    }

    /// Create an external service error
    pub fn external(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalService {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Create a state conflict error
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::StateConflict(message.into())
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// True for failures worth retrying with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ExternalService { .. } | Self::Http(_))
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Storage(err.to_string())
    }
}
