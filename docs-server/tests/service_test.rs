//! End-to-end tests for the documentation service.

use std::path::{Path, PathBuf};

use docserve_directory_watcher::FileEvent;
use docserve_documents::DocumentCategory;
use docserve_resilience::{DegradationLevel, components};
use docserve_server::{DocumentService, Lookup, ServiceConfig, ServiceError};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

struct Docs {
    _dir: TempDir,
    root: PathBuf,
}

impl Docs {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("docs");
        let docs = Self { _dir: dir, root };
        docs.write("guidelines/naming.md", "# Naming\n\nUse descriptive names.\n");
        docs.write("patterns/retry.md", "# Retry\n\n## When\n\nTransient faults.\n");
        docs.write("adr/0001-use-rust.md", "# Use Rust\n\n## Status\n\nAccepted\n");
        docs.write("adr/0002-use-tokio.md", "# Use Tokio\n");
        docs
    }

    fn path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    fn write(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.path(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, content).unwrap();
        path
    }

    fn config(&self) -> ServiceConfig {
        ServiceConfig::new()
            .with_docs_dir(self.path("guidelines"))
            .with_docs_dir(self.path("patterns"))
            .with_docs_dir(self.path("adr"))
            .with_watch(false)
    }
}

async fn started(docs: &Docs) -> DocumentService {
    let service = DocumentService::new(docs.config()).await.unwrap();
    service.start().await.unwrap();
    service
}

fn titles(documents: &[std::sync::Arc<docserve_documents::Document>]) -> Vec<String> {
    documents
        .iter()
        .map(|document| document.metadata.title.clone())
        .collect()
}

async fn lookup_title(service: &DocumentService, path: &Path) -> Option<String> {
    service
        .get_document(path)
        .await
        .unwrap()
        .document()
        .map(|document| document.metadata.title.clone())
}

#[tokio::test]
async fn test_initial_scan_indexes_every_category() {
    let docs = Docs::new();
    let service = started(&docs).await;

    assert_eq!(service.all_documents().await.unwrap().len(), 4);
    assert_eq!(
        titles(
            &service
                .documents_by_category(DocumentCategory::Adr)
                .await
                .unwrap()
        ),
        vec!["Use Rust".to_string(), "Use Tokio".to_string()]
    );

    for category in [
        DocumentCategory::Guideline,
        DocumentCategory::Pattern,
        DocumentCategory::Adr,
    ] {
        let index = service.index(category).await.unwrap().unwrap();
        assert!(index.errors.is_empty(), "{category}: {:?}", index.errors);
        assert_eq!(index.count, index.documents.len());
    }
    assert!(
        service
            .index(DocumentCategory::Unknown)
            .await
            .unwrap()
            .is_none()
    );

    let document = service
        .get_document(&docs.path("patterns/retry.md"))
        .await
        .unwrap();
    let Lookup::Found(document) = document else {
        panic!("expected a normal lookup");
    };
    assert_eq!(document.sections.len(), 1);
    assert_eq!(document.sections[0].children[0].title, "When");

    service.shutdown().await;
}

#[tokio::test]
async fn test_modified_file_is_reparsed() {
    let docs = Docs::new();
    let service = started(&docs).await;
    let path = docs.path("adr/0001-use-rust.md");
    let before = service
        .get_document(&path)
        .await
        .unwrap()
        .document()
        .unwrap()
        .checksum()
        .to_string();

    docs.write("adr/0001-use-rust.md", "# Use Rust Everywhere\n");
    assert!(service.event_sender().await.unwrap().notify(FileEvent::modified(&path)));
    let report = service.flush().await.unwrap();
    assert_eq!(report.upserted, 1);
    assert_eq!(report.parse_failures, 0);

    let lookup = service.get_document(&path).await.unwrap();
    let document = lookup.document().unwrap();
    assert_eq!(document.metadata.title, "Use Rust Everywhere");
    assert!(document.checksum() != before);

    let index = service.index(DocumentCategory::Adr).await.unwrap().unwrap();
    assert!(
        index
            .documents
            .iter()
            .any(|metadata| metadata.title == "Use Rust Everywhere")
    );

    service.shutdown().await;
}

#[tokio::test]
async fn test_created_and_deleted_files() {
    let docs = Docs::new();
    let service = started(&docs).await;
    let sender = service.event_sender().await.unwrap();

    let created = docs.write("patterns/circuit-breaker.md", "# Circuit Breaker\n");
    let deleted = docs.path("adr/0002-use-tokio.md");
    std::fs::remove_file(&deleted).unwrap();
    sender.notify(FileEvent::created(&created));
    sender.notify(FileEvent::deleted(&deleted));

    let report = service.flush().await.unwrap();
    assert_eq!(report.events, 2);
    assert_eq!(report.upserted, 1);
    assert_eq!(report.removed, 1);

    assert_eq!(
        lookup_title(&service, &created).await,
        Some("Circuit Breaker".to_string())
    );
    assert_eq!(lookup_title(&service, &deleted).await, None);

    let adr = service.index(DocumentCategory::Adr).await.unwrap().unwrap();
    assert_eq!(adr.count, 1);
    let patterns = service
        .index(DocumentCategory::Pattern)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(patterns.count, 2);

    service.shutdown().await;
}

#[tokio::test]
async fn test_invalid_files_are_reported_not_cached() {
    let docs = Docs::new();
    let empty = docs.write("guidelines/empty.md", "");
    docs.write("guidelines/notes.txt", "not a document");
    let service = started(&docs).await;

    assert!(matches!(
        service.get_document(&empty).await.unwrap(),
        Lookup::Missing
    ));
    let index = service
        .index(DocumentCategory::Guideline)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(index.count, 1);
    assert_eq!(index.errors.len(), 1);
    assert!(index.errors[0].contains("empty.md"));

    // The initial scan itself succeeded.
    assert_eq!(
        service.degradation().level(components::CACHE_REFRESH).await,
        DegradationLevel::None
    );

    service.shutdown().await;
}

#[tokio::test]
async fn test_health_report() {
    let docs = Docs::new();
    let service = started(&docs).await;

    let health = service.health().await;
    assert!(health.running);
    assert!(health.started_at.is_some());
    assert_eq!(health.overall, DegradationLevel::None);
    assert_eq!(health.cache.entries, 4);
    assert_eq!(health.dropped_events, 0);
    assert_eq!(health.components.len(), 4);
    assert!(health.breakers.contains_key(components::DOCUMENT_PARSING));
    assert!(health.breakers.contains_key(components::RESOURCE_LOOKUP));

    let json = serde_json::to_value(&health).unwrap();
    assert_eq!(json["running"], serde_json::json!(true));

    service.shutdown().await;
    let health = service.health().await;
    assert!(!health.running);
    assert_eq!(health.cache.entries, 0);
}

#[tokio::test]
async fn test_missing_directory_does_not_block_start() {
    let docs = Docs::new();
    let config = docs.config().with_docs_dir(docs.path("adr-archive"));
    let service = DocumentService::new(config).await.unwrap();
    service.start().await.unwrap();

    assert_eq!(service.all_documents().await.unwrap().len(), 4);
    let adr = service.index(DocumentCategory::Adr).await.unwrap().unwrap();
    assert_eq!(adr.errors.len(), 1);

    service.shutdown().await;
    assert!(matches!(
        service.start().await,
        Err(ServiceError::Config(_))
    ));
}
