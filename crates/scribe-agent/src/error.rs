//! Error types for scribe-agent

use thiserror::Error;

/// Result type alias using scribe-agent Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during orchestration
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the provider layer
    #[error(transparent)]
    Ai(#[from] scribe_ai::Error),

    /// A round was requested while another Turn is still in progress
    #[error("Inference already running")]
    AlreadyRunning,

    /// No Turn with this id in the conversation
    #[error("Turn not found: {0}")]
    TurnNotFound(String),

    /// History could not be loaded or saved
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// A generic orchestration error
    #[error("{0}")]
    Other(String),
}
