//! # Resilience
//!
//! Failure isolation for the docserve core. Two independent mechanisms wrap
//! every risky call site (document parsing, file monitoring, cache refresh and
//! resource lookup):
//!
//! - **Circuit breakers**: per-operation closed/open/half-open guards that stop
//!   calling a failing operation for a cooldown period.
//! - **Graceful degradation**: per-component sliding-window error tracking that
//!   derives a discrete health level and lets callers branch between normal and
//!   degraded logic.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Resilience                               │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  CircuitBreakerManager ──► CircuitBreaker ──► BreakerError      │
//! │                                                                 │
//! │  DegradationManager ──► ComponentState ──► DegradationTransition│
//! │          │                                        │             │
//! │          ▼                                        ▼             │
//! │  DegradationRule                       DegradationObserver      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Both registries are plain values: the owning service constructs them and
//! hands out references. Nothing here is a process-wide singleton.

pub mod circuit_breaker;
pub mod degradation;
pub mod error;

pub use circuit_breaker::{
    BreakerCounts, BreakerError, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerManager,
    CircuitState,
};
pub use degradation::{
    ComponentStatus, DegradationLevel, DegradationManager, DegradationObserver, DegradationRule,
    DegradationTransition, LoggingObserver, components,
};
pub use error::{ResilienceError, Result};
