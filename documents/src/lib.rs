//! # Documents
//!
//! Document model, markdown parsing, concurrent directory scanning and the
//! in-memory document cache.
//!
//! ## Features
//!
//! - **Parsing**: markdown files become [`Document`]s with a title, a heading
//!   tree and a SHA-256 checksum. Empty, binary and non-text files are rejected.
//! - **Scanning**: directories are walked once and parsed on a bounded worker
//!   pool. Per-file failures are reported, not fatal.
//! - **Caching**: documents keyed by path, plus one [`DocumentIndex`] per
//!   category. Batches of changes apply atomically.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Documents                               │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  DocumentScanner ──► parse_markdown_file ──► Document           │
//! │       │                                          │              │
//! │       ▼                                          ▼              │
//! │  worker pool ─────────────────────────────► DocumentCache       │
//! │                                             ├─ documents        │
//! │                                             └─ indices          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod cache;
pub mod config;
pub mod document;
pub mod error;
pub mod parser;
pub mod scanner;

pub use cache::{BatchReport, CacheMutation, CacheStats, DocumentCache};
pub use config::{CacheConfig, ScannerConfig};
pub use document::{Document, DocumentCategory, DocumentIndex, DocumentMetadata, Section};
pub use error::{DocumentError, ErrorKind, Result};
pub use parser::{checksum, parse_markdown_file};
pub use scanner::{DocumentScanner, worker_count};
