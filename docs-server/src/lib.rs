//! # Docserve
//!
//! A documentation service that keeps guidelines, design patterns and
//! architecture decision records parsed and cached in memory, refreshes them
//! as files change, and keeps serving while parts of the pipeline fail.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      DocumentService                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  DirectoryWatcher ──► RefreshCoordinator ──► DocumentCache      │
//! │                              ▲                    ▲             │
//! │                              │                    │             │
//! │                       DocumentScanner ────────────┘             │
//! │                                                                 │
//! │  CircuitBreakerManager        DegradationManager ──► observer   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod service;

pub use config::{BreakerSettings, DegradationRuleConfig, ServiceConfig};
pub use error::{Result, ServiceError};
pub use service::{DocumentService, HealthReport, Lookup};
