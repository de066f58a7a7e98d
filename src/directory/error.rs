//! Error types for the directory query side.

use thiserror::Error;

/// Result type alias using `DirectoryError`.
pub type DirectoryResult<T> = Result<T, DirectoryError>;

/// Errors that can occur while querying the identity directory.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// Token acquisition failed.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Microsoft Graph returned an error payload.
    #[error("Graph API error: {code} - {message}")]
    GraphApi { code: String, message: String },

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Transient failures kept happening after all retries.
    #[error("Maximum retries ({attempts}) exceeded: last status {status}")]
    MaxRetriesExceeded { attempts: u32, status: u16 },
}

impl DirectoryError {
    /// Whether a later run is likely to succeed without intervention.
    pub fn is_transient(&self) -> bool {
        match self {
            DirectoryError::Http(e) => e.is_timeout() || e.is_connect(),
            DirectoryError::MaxRetriesExceeded { .. } => true,
            _ => false,
        }
    }
}
