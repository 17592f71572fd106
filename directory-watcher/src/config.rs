//! Configuration types for directory watching.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Configuration for a watched directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Path to the directory.
    pub path: PathBuf,

    /// Whether watching is enabled.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Patterns to exclude (glob patterns).
    #[serde(default = "DirectoryConfig::default_excludes")]
    pub exclude_patterns: Vec<String>,

    /// Extensions of files worth reporting (case-insensitive, no dot).
    #[serde(default = "DirectoryConfig::default_extensions")]
    pub extensions: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

impl DirectoryConfig {
    /// Create a new directory config.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            enabled: true,
            exclude_patterns: Self::default_excludes(),
            extensions: Self::default_extensions(),
        }
    }

    /// Add an exclude pattern.
    pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
        self.exclude_patterns.push(pattern.into());
        self
    }

    /// Replace the reported extensions.
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    /// Disable the directory.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Get default exclude patterns.
    fn default_excludes() -> Vec<String> {
        vec![
            // Version control
            "**/.git/**".to_string(),
            "**/.svn/**".to_string(),
            "**/.hg/**".to_string(),
            // Dependencies and build output
            "**/node_modules/**".to_string(),
            "**/target/**".to_string(),
            // Editor droppings
            "**/*.swp".to_string(),
            "**/*~".to_string(),
            "**/.#*".to_string(),
            "**/.DS_Store".to_string(),
            // Temporary files
            "**/*.tmp".to_string(),
        ]
    }

    fn default_extensions() -> Vec<String> {
        vec!["md".to_string(), "markdown".to_string()]
    }

    /// Check if a path should be excluded.
    pub fn should_exclude(&self, path: &Path) -> bool {
        let path_str = path.to_string_lossy();

        self.exclude_patterns.iter().any(|pattern| {
            glob::Pattern::new(pattern).is_ok_and(|glob| glob.matches(&path_str))
        })
    }

    /// Whether this directory covers `path`.
    pub fn covers(&self, path: &Path) -> bool {
        self.enabled && path.starts_with(&self.path)
    }

    /// Whether an event for `path` is worth reporting.
    ///
    /// Directories are always reported so that a directory delete can
    /// invalidate everything beneath it.
    pub fn is_relevant(&self, path: &Path, is_directory: bool) -> bool {
        if !self.covers(path) || self.should_exclude(path) {
            return false;
        }
        if is_directory {
            return true;
        }
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                self.extensions
                    .iter()
                    .any(|allowed| allowed.eq_ignore_ascii_case(ext))
            })
    }
}
