//! # Directory Watcher
//!
//! This crate keeps the docserve document cache in sync with the filesystem.
//! It watches the documentation directories and feeds changes through a
//! debounced refresh pipeline.
//!
//! ## Features
//!
//! - **Real-time Watching**: recursive `notify` watches on every enabled
//!   directory
//! - **Exclusion Patterns**: filter out VCS, editor and temporary files
//! - **Debouncing**: bursts of changes collapse into one batch per quiet period
//! - **Atomic Refresh**: each batch is reparsed first, then committed to the
//!   cache in one step
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Directory Watcher                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  DirectoryConfig ──► DirectoryWatcher ──► FileEvent             │
//! │                                              │                  │
//! │                                              ▼ EventSender      │
//! │  DebounceTimer ◄──── RefreshCoordinator ◄── bounded channel     │
//! │                              │                                  │
//! │                              ▼                                  │
//! │              DocumentScanner + DocumentCache::apply_batch       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod debounce;
pub mod error;
pub mod event;
pub mod refresh;
pub mod watcher;

pub use config::DirectoryConfig;
pub use debounce::DebounceTimer;
pub use error::{Result, WatcherError};
pub use event::{EventBatch, FileEvent, FileEventKind};
pub use refresh::{
    EventSender, FlushTrigger, RefreshConfig, RefreshCoordinator, RefreshHandle, RefreshReport,
};
pub use watcher::{DirectoryWatcher, ErrorHook, WatcherStats};
