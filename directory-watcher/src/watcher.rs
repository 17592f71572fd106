//! Directory watcher implementation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, error, info, warn};

use crate::config::DirectoryConfig;
use crate::error::{Result, WatcherError};
use crate::event::{FileEvent, FileEventKind};
use crate::refresh::EventSender;

/// Callback for errors reported by the watcher backend.
///
/// Runs on the backend's thread, so it must not block.
pub type ErrorHook = Arc<dyn Fn(&WatcherError) + Send + Sync>;

/// Directory watcher that forwards file system changes to an [`EventSender`].
pub struct DirectoryWatcher {
    /// Watched directories.
    configs: HashMap<PathBuf, DirectoryConfig>,

    /// Internal notify watcher.
    watcher: Option<RecommendedWatcher>,

    /// Directories currently registered with the backend.
    watched: Vec<PathBuf>,

    /// Called for every backend error.
    error_hook: Option<ErrorHook>,
}

impl DirectoryWatcher {
    /// Create a new directory watcher.
    pub fn new() -> Self {
        Self {
            configs: HashMap::new(),
            watcher: None,
            watched: Vec::new(),
            error_hook: None,
        }
    }

    /// Install a hook for backend errors.
    pub fn with_error_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&WatcherError) + Send + Sync + 'static,
    {
        self.error_hook = Some(Arc::new(hook));
        self
    }

    /// Add a directory to watch.
    pub fn add(&mut self, config: DirectoryConfig) -> Result<()> {
        let path = config.path.clone();

        if !path.exists() {
            return Err(WatcherError::DirectoryNotFound(path.display().to_string()));
        }
        if !path.is_dir() {
            return Err(WatcherError::Config(format!(
                "Path is not a directory: {}",
                path.display()
            )));
        }
        if self.configs.contains_key(&path) {
            return Err(WatcherError::Config(format!(
                "Already watching: {}",
                path.display()
            )));
        }

        info!("Adding directory to watch: {}", path.display());
        self.configs.insert(path, config);
        Ok(())
    }

    /// Remove a directory from watching.
    pub fn remove(&mut self, path: &Path) -> Result<()> {
        if self.configs.remove(path).is_none() {
            return Err(WatcherError::DirectoryNotFound(path.display().to_string()));
        }
        if let Some(watcher) = self.watcher.as_mut() {
            if let Err(e) = watcher.unwatch(path) {
                debug!("Failed to unwatch {}: {e}", path.display());
            }
        }
        self.watched.retain(|watched| watched != path);

        info!("Removed directory from watch: {}", path.display());
        Ok(())
    }

    /// Start watching every enabled directory recursively.
    ///
    /// Relevant events are pushed through `sender`. A directory that cannot
    /// be watched is reported to the error hook and skipped.
    pub fn start(&mut self, sender: EventSender) -> Result<()> {
        if self.watcher.is_some() {
            return Ok(());
        }

        let configs: Arc<Vec<DirectoryConfig>> = Arc::new(
            self.configs
                .values()
                .filter(|config| config.enabled)
                .cloned()
                .collect(),
        );
        let hook = self.error_hook.clone();

        let mut watcher = notify::recommended_watcher({
            let configs = configs.clone();
            let hook = hook.clone();
            move |res: notify::Result<notify::Event>| match res {
                Ok(event) => {
                    for file_event in FileEvent::from_notify(&event) {
                        if is_relevant(&configs, &file_event) {
                            sender.notify(file_event);
                        }
                    }
                }
                Err(e) => {
                    error!("Watch error: {e}");
                    report(hook.as_ref(), &WatcherError::Notify(e));
                }
            }
        })?;

        for config in configs.iter() {
            match watcher.watch(&config.path, RecursiveMode::Recursive) {
                Ok(()) => {
                    debug!("Started watching: {}", config.path.display());
                    self.watched.push(config.path.clone());
                }
                Err(e) => {
                    warn!("Failed to watch {}: {e}", config.path.display());
                    report(hook.as_ref(), &WatcherError::Notify(e));
                }
            }
        }

        self.watcher = Some(watcher);
        info!("Directory watcher started ({} directories)", self.watched.len());
        Ok(())
    }

    /// Stop watching all directories.
    pub fn stop(&mut self) {
        if let Some(mut watcher) = self.watcher.take() {
            for path in self.watched.drain(..) {
                if let Err(e) = watcher.unwatch(&path) {
                    debug!("Failed to unwatch {}: {e}", path.display());
                }
            }
            info!("Directory watcher stopped");
        }
    }

    /// Check if the watcher is running.
    pub fn is_running(&self) -> bool {
        self.watcher.is_some()
    }

    /// Get configured directories.
    pub fn directories(&self) -> Vec<DirectoryConfig> {
        self.configs.values().cloned().collect()
    }

    /// Get statistics about watched directories.
    pub fn stats(&self) -> WatcherStats {
        WatcherStats {
            total_directories: self.configs.len(),
            enabled_directories: self.configs.values().filter(|c| c.enabled).count(),
            active_watches: self.watched.len(),
        }
    }
}

impl Default for DirectoryWatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DirectoryWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Statistics about the directory watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherStats {
    /// Total configured directories.
    pub total_directories: usize,

    /// Number of enabled directories.
    pub enabled_directories: usize,

    /// Directories currently registered with the backend.
    pub active_watches: usize,
}

fn is_relevant(configs: &[DirectoryConfig], event: &FileEvent) -> bool {
    // A deleted path can no longer be inspected; without an extension it may
    // have been a directory.
    let maybe_directory = event.is_directory
        || (event.kind == FileEventKind::Delete && event.path.extension().is_none());
    configs
        .iter()
        .any(|config| config.is_relevant(&event.path, maybe_directory))
}

fn report(hook: Option<&ErrorHook>, err: &WatcherError) {
    if let Some(hook) = hook {
        hook(err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_watcher_creation() {
        let watcher = DirectoryWatcher::new();
        assert!(!watcher.is_running());
        assert_eq!(watcher.stats().total_directories, 0);
    }

    #[test]
    fn test_add_directory() {
        let temp_dir = TempDir::new().unwrap();
        let mut watcher = DirectoryWatcher::new();

        watcher.add(DirectoryConfig::new(temp_dir.path())).unwrap();
        assert_eq!(watcher.directories().len(), 1);

        let err = watcher
            .add(DirectoryConfig::new(temp_dir.path()))
            .unwrap_err();
        assert!(matches!(err, WatcherError::Config(_)));

        watcher.remove(temp_dir.path()).unwrap();
        assert!(watcher.directories().is_empty());
    }

    #[test]
    fn test_add_nonexistent_directory() {
        let mut watcher = DirectoryWatcher::new();
        let result = watcher.add(DirectoryConfig::new("/nonexistent/path/12345"));
        assert!(matches!(result, Err(WatcherError::DirectoryNotFound(_))));
    }

    #[test]
    fn test_relevance_filter() {
        let configs = vec![DirectoryConfig::new("/docs")];

        assert!(is_relevant(&configs, &FileEvent::modified("/docs/a.md")));
        assert!(!is_relevant(&configs, &FileEvent::modified("/docs/a.txt")));
        assert!(!is_relevant(&configs, &FileEvent::modified("/docs/.git/a.md")));
        assert!(is_relevant(&configs, &FileEvent::deleted("/docs/adr")));
        assert!(!is_relevant(&configs, &FileEvent::created("/docs/adr")));
        assert!(is_relevant(
            &configs,
            &FileEvent::created("/docs/adr").directory()
        ));
    }

    #[tokio::test]
    async fn test_file_changes_reach_sender() {
        let temp_dir = TempDir::new().unwrap();
        let (sender, mut rx) = EventSender::channel(100);
        let mut watcher = DirectoryWatcher::new();
        watcher.add(DirectoryConfig::new(temp_dir.path())).unwrap();
        watcher.start(sender).unwrap();
        assert!(watcher.is_running());
        assert_eq!(watcher.stats().active_watches, 1);

        let path = temp_dir.path().join("note.md");
        std::fs::write(&path, "# Note\n").unwrap();
        std::fs::write(temp_dir.path().join("ignored.txt"), "x").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let event = rx.recv().await.unwrap();
                if event.path == path {
                    return event;
                }
            }
        })
        .await
        .unwrap();
        assert!(matches!(
            event.kind,
            FileEventKind::Create | FileEventKind::Modify
        ));

        watcher.stop();
        assert!(!watcher.is_running());
    }
}
