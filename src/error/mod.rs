//! Error types for Eventide.

use thiserror::Error;

/// Primary error type for all Eventide operations.
#[derive(Error, Debug)]
pub enum EventideError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("A turn is already in flight for session {0}")]
    TurnInFlight(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Persistence error: {0}")]
    Persistence(String),
}

/// Broad error category, for callers that layer their own retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Network,
    Timeout,
    Server,
    Api,
    Stream,
    Session,
    Configuration,
    Serialization,
    Usage,
    Unknown,
}

impl EventideError {
    /// Create an API error from a status code and message.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Network(_) => ErrorCategory::Network,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Api { status, .. } => match status {
                500..=599 => ErrorCategory::Server,
                _ => ErrorCategory::Api,
            },
            Self::Stream(_) => ErrorCategory::Stream,
            Self::SessionNotFound(_) => ErrorCategory::Session,
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Serialization(_) => ErrorCategory::Serialization,
            Self::TurnInFlight(_) | Self::InvalidArgument(_) | Self::InvalidState(_) => {
                ErrorCategory::Usage
            }
            Self::Io(_) | Self::Persistence(_) => ErrorCategory::Unknown,
        }
    }

    /// Whether a caller-side retry could plausibly succeed.
    ///
    /// The core never acts on this; it only informs retry policies built on top.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Network | ErrorCategory::Timeout | ErrorCategory::Server | ErrorCategory::Stream
        )
    }
}

/// Map a non-success HTTP status and body to an error.
pub fn status_to_error(status: u16, body: &str) -> EventideError {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("detail").and_then(|d| d.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.to_string());
    EventideError::api(status, message)
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, EventideError>;
