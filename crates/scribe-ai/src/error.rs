//! Error types for scribe-ai

use thiserror::Error;

/// Result type alias using scribe-ai Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when talking to an LLM vendor
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed (connection refused, socket reset, body read failure)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Vendor answered with a non-success status
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Vendor reported an error inside the stream
    #[error("Provider error: {0}")]
    Provider(String),

    /// Invalid or missing API key
    #[error("Invalid or missing API key for {0}")]
    InvalidApiKey(&'static str),

    /// Model string could not be resolved to a provider
    #[error("Invalid model '{0}': expected <provider>/<model-id>")]
    InvalidModel(String),

    /// Provider identifier is not in the adapter table
    #[error("Provider not supported: {0}")]
    UnsupportedProvider(String),

    /// Transport failed for a reason that is not an HTTP client error
    #[error("Transport error: {0}")]
    Transport(String),

    /// Stream was cancelled by the caller
    #[error("Request cancelled")]
    Cancelled,
}

impl Error {
    /// Create an API error from status and message
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Check if opening the stream again could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(e) => e.is_connect() || e.is_timeout(),
            Error::Api { status, message } => {
                *status == 429
                    || *status == 529
                    || (500..600).contains(status)
                    || message.to_lowercase().contains("overloaded")
            }
            Error::Transport(_) => true,
            _ => false,
        }
    }
}
