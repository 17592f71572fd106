//! Error types for the resilience layer.

use std::time::Duration;

use thiserror::Error;

use crate::degradation::DegradationLevel;

/// Result type alias for resilience operations.
pub type Result<T> = std::result::Result<T, ResilienceError>;

/// Errors surfaced by circuit breakers and the degradation manager.
#[derive(Error, Debug)]
pub enum ResilienceError {
    /// A circuit breaker rejected the call without running it.
    #[error("circuit breaker '{name}' is open; retry after {retry_after:?}")]
    CircuitOpen { name: String, retry_after: Duration },

    /// The component is running in degraded mode.
    #[error("component '{component}' is degraded ({level})")]
    Degraded {
        component: String,
        level: DegradationLevel,
    },

    /// No degradation rule is registered for the component.
    #[error("unknown component: {0}")]
    UnknownComponent(String),

    /// A manager could not be initialized.
    #[error("initialization failed: {0}")]
    InitializationFailed(String),
}
