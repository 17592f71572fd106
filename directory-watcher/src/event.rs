//! File events from directory watching.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// A file system event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEvent {
    /// The kind of event.
    pub kind: FileEventKind,

    /// Path to the affected file or directory.
    pub path: PathBuf,

    /// Whether the path is a directory.
    pub is_directory: bool,

    /// Content checksum, when the producer already knows it.
    pub checksum: Option<String>,

    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
}

impl FileEvent {
    /// Create a new file event.
    pub fn new(kind: FileEventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            is_directory: false,
            checksum: None,
            timestamp: Utc::now(),
        }
    }

    /// A create event.
    pub fn created(path: impl Into<PathBuf>) -> Self {
        Self::new(FileEventKind::Create, path)
    }

    /// A modify event.
    pub fn modified(path: impl Into<PathBuf>) -> Self {
        Self::new(FileEventKind::Modify, path)
    }

    /// A delete event.
    pub fn deleted(path: impl Into<PathBuf>) -> Self {
        Self::new(FileEventKind::Delete, path)
    }

    /// Mark the event as concerning a directory.
    pub fn directory(mut self) -> Self {
        self.is_directory = true;
        self
    }

    /// Attach the new content checksum.
    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }

    /// Map a raw `notify` event.
    ///
    /// Renames become a delete of the old path and a create of the new one.
    /// Access and other events map to nothing.
    pub fn from_notify(event: &notify::Event) -> Vec<Self> {
        use notify::EventKind;

        match event.kind {
            EventKind::Create(kind) => event
                .paths
                .iter()
                .map(|path| {
                    Self::created(path).directory_if(kind == CreateKind::Folder || path.is_dir())
                })
                .collect(),
            EventKind::Modify(ModifyKind::Name(mode)) => match (mode, event.paths.as_slice()) {
                (RenameMode::To, paths) => paths.iter().map(|path| Self::created_at(path)).collect(),
                (RenameMode::From, paths) => paths.iter().map(Self::deleted).collect(),
                (RenameMode::Both, [from, to]) => {
                    vec![Self::deleted(from), Self::created_at(to)]
                }
                // The backend could not tell which side of the rename this is.
                (_, paths) => paths
                    .iter()
                    .map(|path| {
                        if path.exists() {
                            Self::created_at(path)
                        } else {
                            Self::deleted(path)
                        }
                    })
                    .collect(),
            },
            EventKind::Modify(_) => event
                .paths
                .iter()
                .map(|path| Self::modified(path).directory_if(path.is_dir()))
                .collect(),
            EventKind::Remove(kind) => event
                .paths
                .iter()
                .map(|path| Self::deleted(path).directory_if(kind == RemoveKind::Folder))
                .collect(),
            EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
        }
    }

    fn created_at(path: &Path) -> Self {
        Self::created(path).directory_if(path.is_dir())
    }

    fn directory_if(self, is_directory: bool) -> Self {
        if is_directory { self.directory() } else { self }
    }
}

/// Kind of file event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileEventKind {
    /// File was created.
    Create,

    /// File was modified.
    Modify,

    /// File was deleted.
    Delete,
}

/// Pending events awaiting a flush; the latest event per path wins.
#[derive(Debug, Default)]
pub struct EventBatch {
    events: BTreeMap<PathBuf, FileEvent>,
    first_at: Option<Instant>,
}

impl EventBatch {
    /// Create a new empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an event, replacing any earlier event for the same path.
    pub fn push(&mut self, event: FileEvent) {
        self.first_at.get_or_insert_with(Instant::now);
        self.events.insert(event.path.clone(), event);
    }

    /// Check if the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Get the number of distinct paths.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Pending event for a path.
    pub fn get(&self, path: &Path) -> Option<&FileEvent> {
        self.events.get(path)
    }

    /// Time since the first event of the batch arrived.
    pub fn age(&self) -> Option<Duration> {
        self.first_at.map(|first| first.elapsed())
    }

    /// Drain the batch, ordered by path.
    pub fn take(&mut self) -> Vec<FileEvent> {
        self.first_at = None;
        std::mem::take(&mut self.events).into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn raw(kind: notify::EventKind, paths: &[&str]) -> notify::Event {
        paths
            .iter()
            .fold(notify::Event::new(kind), |event, path| {
                event.add_path(PathBuf::from(path))
            })
    }

    fn kinds(events: &[FileEvent]) -> Vec<(FileEventKind, &Path)> {
        events.iter().map(|e| (e.kind, e.path.as_path())).collect()
    }

    #[test]
    fn test_notify_mapping() {
        use notify::EventKind;
        use notify::event::{AccessKind, DataChange};

        let created = FileEvent::from_notify(&raw(
            EventKind::Create(CreateKind::File),
            &["/docs/a.md"],
        ));
        assert_eq!(
            kinds(&created),
            vec![(FileEventKind::Create, Path::new("/docs/a.md"))]
        );

        let modified = FileEvent::from_notify(&raw(
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            &["/docs/a.md"],
        ));
        assert_eq!(modified[0].kind, FileEventKind::Modify);

        let removed = FileEvent::from_notify(&raw(
            EventKind::Remove(RemoveKind::Folder),
            &["/docs/old"],
        ));
        assert_eq!(removed[0].kind, FileEventKind::Delete);
        assert!(removed[0].is_directory);

        let accessed = FileEvent::from_notify(&raw(
            EventKind::Access(AccessKind::Read),
            &["/docs/a.md"],
        ));
        assert!(accessed.is_empty());
    }

    #[test]
    fn test_rename_mapping() {
        use notify::EventKind;

        let from = FileEvent::from_notify(&raw(
            EventKind::Modify(ModifyKind::Name(RenameMode::From)),
            &["/docs/old.md"],
        ));
        assert_eq!(
            kinds(&from),
            vec![(FileEventKind::Delete, Path::new("/docs/old.md"))]
        );

        let to = FileEvent::from_notify(&raw(
            EventKind::Modify(ModifyKind::Name(RenameMode::To)),
            &["/docs/new.md"],
        ));
        assert_eq!(
            kinds(&to),
            vec![(FileEventKind::Create, Path::new("/docs/new.md"))]
        );

        let both = FileEvent::from_notify(&raw(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/docs/old.md", "/docs/new.md"],
        ));
        assert_eq!(
            kinds(&both),
            vec![
                (FileEventKind::Delete, Path::new("/docs/old.md")),
                (FileEventKind::Create, Path::new("/docs/new.md")),
            ]
        );
    }

    #[test]
    fn test_event_batch_last_write_wins() {
        let mut batch = EventBatch::new();
        assert_eq!(batch.age(), None);

        batch.push(FileEvent::modified("/test/b.md"));
        batch.push(FileEvent::created("/test/a.md"));
        batch.push(FileEvent::deleted("/test/b.md"));
        assert_eq!(batch.len(), 2);
        assert!(batch.age().is_some());
        assert_eq!(
            batch.get(Path::new("/test/b.md")).map(|e| e.kind),
            Some(FileEventKind::Delete)
        );

        let events = batch.take();
        assert_eq!(
            kinds(&events),
            vec![
                (FileEventKind::Create, Path::new("/test/a.md")),
                (FileEventKind::Delete, Path::new("/test/b.md")),
            ]
        );
        assert!(batch.is_empty());
        assert_eq!(batch.age(), None);
    }
}
