//! Error types for document scanning and caching.

use std::io;
use std::path::Path;

use thiserror::Error;

/// Result type alias for document operations.
pub type Result<T> = std::result::Result<T, DocumentError>;

/// Broad class of a [`DocumentError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The filesystem failed or a path is missing.
    Filesystem,
    /// A file's content could not be parsed.
    Parsing,
    /// The cache refused or could not serve a request.
    Cache,
    /// The caller passed invalid input.
    Input,
}

/// Errors that can occur while scanning, parsing or caching documents.
#[derive(Error, Debug)]
pub enum DocumentError {
    /// Path does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Permission denied.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Filesystem temporarily unavailable.
    #[error("filesystem unavailable: {0}")]
    Unavailable(String),

    /// File has no content.
    #[error("empty content: {0}")]
    EmptyContent(String),

    /// File content is not markdown or text.
    #[error("malformed document {path}: {reason}")]
    Malformed { path: String, reason: String },

    /// File is not valid UTF-8.
    #[error("invalid encoding: {0}")]
    Encoding(String),

    /// No cached document for the path.
    #[error("cache miss: {0}")]
    CacheMiss(String),

    /// Cache is at capacity.
    #[error("cache exhausted: capacity of {capacity} entries reached")]
    CacheExhausted { capacity: usize },

    /// Cached state is inconsistent.
    #[error("cache corruption: {0}")]
    CacheCorruption(String),

    /// A concurrent operation could not complete.
    #[error("concurrent access: {0}")]
    ConcurrentAccess(String),

    /// Invalid caller input.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl DocumentError {
    /// Classify an IO error for `path`.
    pub fn from_io(path: &Path, err: io::Error) -> Self {
        let path = path.display().to_string();
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound(path),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(path),
            io::ErrorKind::InvalidData => Self::Encoding(path),
            _ => Self::Unavailable(format!("{path}: {err}")),
        }
    }

    /// Broad class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) | Self::PermissionDenied(_) | Self::Unavailable(_) | Self::Io(_) => {
                ErrorKind::Filesystem
            }
            Self::EmptyContent(_) | Self::Malformed { .. } | Self::Encoding(_) => {
                ErrorKind::Parsing
            }
            Self::CacheMiss(_)
            | Self::CacheExhausted { .. }
            | Self::CacheCorruption(_)
            | Self::ConcurrentAccess(_) => ErrorKind::Cache,
            Self::InvalidInput(_) => ErrorKind::Input,
        }
    }

    /// Whether the error came from the filesystem rather than the content.
    pub fn is_filesystem(&self) -> bool {
        self.kind() == ErrorKind::Filesystem
    }
}
