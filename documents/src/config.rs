//! Configuration for scanning and caching.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the document scanner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// File extensions treated as documents (case-insensitive, no dot).
    pub extensions: Vec<String>,

    /// Glob patterns of paths to skip.
    pub exclude_patterns: Vec<String>,

    /// Whether to follow symbolic links while walking.
    pub follow_symlinks: bool,
}

impl ScannerConfig {
    /// Add a document extension.
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extensions.push(extension.into());
        self
    }

    /// Add an exclude pattern.
    pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
        self.exclude_patterns.push(pattern.into());
        self
    }

    /// Whether `path` has one of the document extensions.
    pub fn has_document_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                self.extensions
                    .iter()
                    .any(|allowed| allowed.eq_ignore_ascii_case(ext))
            })
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            extensions: vec!["md".to_string(), "markdown".to_string()],
            exclude_patterns: vec![
                "**/.git/**".to_string(),
                "**/node_modules/**".to_string(),
                "**/target/**".to_string(),
                "**/*~".to_string(),
                "**/.#*".to_string(),
            ],
            follow_symlinks: false,
        }
    }
}

/// Configuration for the document cache.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of cached documents (None = unbounded).
    pub max_entries: Option<usize>,

    /// Evict documents older than this many milliseconds (None = never).
    pub ttl_ms: Option<u64>,

    /// How often the maintenance task looks for expired entries.
    pub cleanup_interval_ms: Option<u64>,
}

impl CacheConfig {
    /// Set the capacity.
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = Some(max_entries);
        self
    }

    /// Enable expiry.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_ms = Some(ttl.as_millis() as u64);
        self
    }

    /// Expiry age, if enabled.
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_ms.map(Duration::from_millis)
    }

    /// Set the maintenance interval.
    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval_ms = Some(interval.as_millis() as u64);
        self
    }

    /// Maintenance interval; defaults to a minute.
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms.unwrap_or(60_000).max(1))
    }
}
