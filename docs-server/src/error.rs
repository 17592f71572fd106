//! Error types for the documentation service.

use thiserror::Error;

/// Result type alias for service operations.
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Errors that can occur in the documentation service.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Document scanning, parsing or cache error.
    #[error("document error: {0}")]
    Document(#[from] docserve_documents::DocumentError),

    /// Circuit breaker or degradation error.
    #[error("resilience error: {0}")]
    Resilience(#[from] docserve_resilience::ResilienceError),

    /// Directory watcher error.
    #[error("watcher error: {0}")]
    Watcher(#[from] docserve_directory_watcher::WatcherError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The service has not been started (or was shut down).
    #[error("service not started")]
    NotStarted,
}
