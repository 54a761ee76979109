//! Error types for tailgrid-ai

use thiserror::Error;

/// Result type alias using tailgrid-ai Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when talking to the inference endpoint
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Endpoint returned a non-success status
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Server-sent events error
    #[error("SSE error: {0}")]
    Sse(String),

    /// Missing or unusable API token
    #[error("Invalid or missing API token")]
    InvalidApiKey,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Response body did not have the expected shape
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl Error {
    /// Create an API error from a status code and message
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }
}
