//! Concurrent document scanning.
//!
//! A scan walks a directory once, then fans the matching files out to a small
//! pool of worker tasks that parse each file and store it in the cache.
//! Per-file failures are collected into the resulting index instead of
//! aborting the scan.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use docserve_resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerManager};
use docserve_resilience::components;
use tokio::fs;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::cache::DocumentCache;
use crate::config::ScannerConfig;
use crate::document::{Document, DocumentCategory, DocumentIndex, DocumentMetadata, file_error};
use crate::error::{DocumentError, Result};
use crate::parser::parse_markdown_file;

/// Number of parse workers for `file_count` files.
///
/// Small sets (up to 10 files) use at most 2 workers and medium sets (up to
/// 100) at most 4. Larger sets use the available parallelism, capped at 8.
/// Never more workers than files, never fewer than one.
pub fn worker_count(file_count: usize, parallelism: usize) -> usize {
    let cap = if file_count <= 10 {
        2
    } else if file_count <= 100 {
        4
    } else {
        parallelism.clamp(1, 8)
    };
    cap.min(file_count.max(1))
}

fn available_parallelism() -> usize {
    std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}

/// Documents and errors found in one directory.
#[derive(Debug, Default)]
struct ScanOutcome {
    documents: Vec<DocumentMetadata>,
    errors: Vec<(DocumentCategory, String)>,
}

/// Scans directories and populates the document cache.
#[derive(Clone)]
pub struct DocumentScanner {
    cache: Arc<DocumentCache>,
    config: Arc<ScannerConfig>,
    exclude: Arc<Vec<glob::Pattern>>,
    parse_breaker: Option<Arc<CircuitBreaker>>,
}

impl DocumentScanner {
    /// Create a scanner that stores parsed documents in `cache`.
    pub fn new(cache: Arc<DocumentCache>, config: ScannerConfig) -> Self {
        let exclude = config
            .exclude_patterns
            .iter()
            .filter_map(|pattern| match glob::Pattern::new(pattern) {
                Ok(pattern) => Some(pattern),
                Err(err) => {
                    warn!("Ignoring invalid exclude pattern {pattern}: {err}");
                    None
                }
            })
            .collect();

        Self {
            cache,
            config: Arc::new(config),
            exclude: Arc::new(exclude),
            parse_breaker: None,
        }
    }

    /// Route every file parse through the `document-parsing` breaker.
    pub async fn with_circuit_breaker(
        mut self,
        breakers: &CircuitBreakerManager,
        config: CircuitBreakerConfig,
    ) -> Self {
        self.parse_breaker = Some(
            breakers
                .get_or_create(components::DOCUMENT_PARSING, config)
                .await,
        );
        self
    }

    /// Scanner configuration.
    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// The cache this scanner populates.
    pub fn cache(&self) -> &Arc<DocumentCache> {
        &self.cache
    }

    /// Whether `path` names a document this scanner would index.
    pub fn is_document_path(&self, path: &Path) -> bool {
        self.config.has_document_extension(path) && !self.is_excluded(path)
    }

    fn is_excluded(&self, path: &Path) -> bool {
        self.exclude.iter().any(|pattern| pattern.matches_path(path))
    }

    /// Parse one file.
    ///
    /// With a breaker configured, filesystem failures count against it while
    /// content errors (empty, binary, malformed) do not. An open breaker
    /// surfaces as [`DocumentError::Unavailable`].
    pub async fn parse_file(&self, path: &Path) -> Result<Document> {
        let Some(breaker) = &self.parse_breaker else {
            return parse_markdown_file(path).await;
        };

        let outcome = breaker
            .execute(|| async {
                match parse_markdown_file(path).await {
                    Err(err) if err.is_filesystem() => Err(err),
                    other => Ok(other),
                }
            })
            .await;

        match outcome {
            Ok(parsed) => parsed,
            Err(err) => match err.as_circuit_open() {
                Some(open) => Err(DocumentError::Unavailable(format!(
                    "{}: {open}",
                    path.display()
                ))),
                None => match err.into_inner() {
                    Some(inner) => Err(inner),
                    None => Err(DocumentError::Unavailable(path.display().to_string())),
                },
            },
        }
    }

    /// Scan one directory, caching every document that parses.
    ///
    /// A missing or empty path is fatal. Per-file failures are reported in
    /// the returned index's `errors` and the file is left out.
    ///
    /// The index is labelled with the category of `dir` itself and lists
    /// every document found under it. Members keep the category of their
    /// own path, so scanning a mixed root such as `docs/` gives an
    /// `Unknown` index whose members are guidelines, patterns and ADRs.
    /// Use [`build_index`](Self::build_index) to split a root by category.
    pub async fn scan_directory(&self, dir: &Path) -> Result<DocumentIndex> {
        let category = DocumentCategory::from_path(dir);
        let outcome = self.scan(dir).await?;
        let errors = outcome.errors.into_iter().map(|(_, error)| error).collect();
        Ok(DocumentIndex::from_documents(
            category,
            outcome.documents,
            errors,
        ))
    }

    /// Scan every directory concurrently and merge the results by category.
    ///
    /// Directory-level failures are aggregated like per-file ones; only an
    /// empty directory list is fatal. Each merged index is also stored in
    /// the cache.
    pub async fn build_index(
        &self,
        dirs: &[PathBuf],
    ) -> Result<HashMap<DocumentCategory, DocumentIndex>> {
        if dirs.is_empty() {
            return Err(DocumentError::InvalidInput(
                "no directories to index".to_string(),
            ));
        }

        let start = Instant::now();
        let mut tasks = JoinSet::new();
        for dir in dirs {
            let scanner = self.clone();
            let dir = dir.clone();
            tasks.spawn(async move {
                let result = scanner.scan(&dir).await;
                (dir, result)
            });
        }

        let mut documents: HashMap<DocumentCategory, Vec<DocumentMetadata>> = HashMap::new();
        let mut errors: HashMap<DocumentCategory, Vec<String>> = HashMap::new();

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(outcome))) => {
                    for metadata in outcome.documents {
                        documents.entry(metadata.category).or_default().push(metadata);
                    }
                    for (category, error) in outcome.errors {
                        errors.entry(category).or_default().push(error);
                    }
                }
                Ok((dir, Err(err))) => {
                    warn!("Failed to scan {}: {err}", dir.display());
                    errors
                        .entry(DocumentCategory::from_path(&dir))
                        .or_default()
                        .push(file_error(&dir, &err));
                }
                Err(err) => {
                    warn!("Scan task failed: {err}");
                    errors
                        .entry(DocumentCategory::Unknown)
                        .or_default()
                        .push(format!("scan task failed: {err}"));
                }
            }
        }

        let mut indices = HashMap::new();
        for category in DocumentCategory::ALL {
            let members = documents.remove(&category).unwrap_or_default();
            let category_errors = errors.remove(&category).unwrap_or_default();
            if members.is_empty() && category_errors.is_empty() {
                continue;
            }
            let index = DocumentIndex::from_documents(category, members, category_errors);
            self.cache.set_index(category, index.clone()).await;
            indices.insert(category, index);
        }

        let document_count: usize = indices.values().map(|index| index.count).sum();
        let error_count: usize = indices.values().map(|index| index.errors.len()).sum();
        info!(
            target: "telemetry",
            directories = dirs.len(),
            documents = document_count,
            errors = error_count,
            duration_ms = start.elapsed().as_millis() as u64,
            "document index built"
        );

        Ok(indices)
    }

    async fn scan(&self, dir: &Path) -> Result<ScanOutcome> {
        if dir.as_os_str().is_empty() {
            return Err(DocumentError::NotFound("empty directory path".to_string()));
        }
        let metadata = fs::metadata(dir)
            .await
            .map_err(|err| DocumentError::from_io(dir, err))?;
        if !metadata.is_dir() {
            return Err(DocumentError::InvalidInput(format!(
                "not a directory: {}",
                dir.display()
            )));
        }

        let start = Instant::now();
        let dir_category = DocumentCategory::from_path(dir);
        let (files, walk_errors) = self.collect_files(dir).await?;
        let file_count = files.len();

        let mut outcome = self.parse_all(files).await;
        outcome
            .errors
            .extend(walk_errors.into_iter().map(|error| (dir_category, error)));

        info!(
            target: "telemetry",
            directory = %dir.display(),
            files = file_count,
            documents = outcome.documents.len(),
            errors = outcome.errors.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "directory scan complete"
        );
        Ok(outcome)
    }

    /// Walk `dir` once, collecting document files and walk errors.
    async fn collect_files(&self, dir: &Path) -> Result<(Vec<PathBuf>, Vec<String>)> {
        let scanner = self.clone();
        let root = dir.to_path_buf();

        tokio::task::spawn_blocking(move || {
            let mut files = Vec::new();
            let mut errors = Vec::new();

            let walker = WalkDir::new(&root).follow_links(scanner.config.follow_symlinks);
            for entry in walker {
                match entry {
                    Ok(entry) => {
                        if entry.file_type().is_file() && scanner.is_document_path(entry.path()) {
                            files.push(entry.into_path());
                        }
                    }
                    Err(err) => {
                        let path = err.path().unwrap_or(&root).to_path_buf();
                        errors.push(file_error(&path, &err));
                    }
                }
            }

            files.sort();
            (files, errors)
        })
        .await
        .map_err(|err| DocumentError::Unavailable(format!("directory walk failed: {err}")))
    }

    /// Parse and cache `files` on a bounded pool of workers.
    async fn parse_all(&self, files: Vec<PathBuf>) -> ScanOutcome {
        let mut outcome = ScanOutcome::default();
        if files.is_empty() {
            return outcome;
        }

        let workers = worker_count(files.len(), available_parallelism());
        debug!("Parsing {} files with {workers} workers", files.len());

        let (job_tx, job_rx) = async_channel::bounded(files.len());
        for path in files {
            // Capacity equals the job count, so this never waits.
            if job_tx.send(path).await.is_err() {
                break;
            }
        }
        job_tx.close();

        let mut pool = JoinSet::new();
        for _ in 0..workers {
            let scanner = self.clone();
            let jobs = job_rx.clone();
            pool.spawn(async move {
                let mut results = Vec::new();
                while let Ok(path) = jobs.recv().await {
                    let result = scanner.parse_and_store(&path).await;
                    results.push((path, result));
                }
                results
            });
        }

        while let Some(joined) = pool.join_next().await {
            let results = match joined {
                Ok(results) => results,
                Err(err) => {
                    warn!("Parse worker failed: {err}");
                    outcome
                        .errors
                        .push((DocumentCategory::Unknown, format!("parse worker failed: {err}")));
                    continue;
                }
            };
            for (path, result) in results {
                match result {
                    Ok(metadata) => outcome.documents.push(metadata),
                    Err(err) => {
                        debug!("Skipping {}: {err}", path.display());
                        outcome
                            .errors
                            .push((DocumentCategory::from_path(&path), file_error(&path, &err)));
                    }
                }
            }
        }

        outcome
    }

    async fn parse_and_store(&self, path: &Path) -> Result<DocumentMetadata> {
        let document = self.parse_file(path).await?;
        let metadata = document.metadata.clone();
        self.cache.set(path.to_path_buf(), document).await?;
        Ok(metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tempfile::TempDir;

    fn scanner() -> DocumentScanner {
        DocumentScanner::new(Arc::new(DocumentCache::default()), ScannerConfig::default())
    }

    fn write(root: &Path, relative: &str, content: &[u8]) -> PathBuf {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_worker_count_tiers() {
        assert_eq!(worker_count(0, 16), 1);
        assert_eq!(worker_count(1, 16), 1);
        assert_eq!(worker_count(10, 16), 2);
        assert_eq!(worker_count(11, 16), 4);
        assert_eq!(worker_count(100, 16), 4);
        assert_eq!(worker_count(101, 16), 8);
        assert_eq!(worker_count(500, 6), 6);
        assert_eq!(worker_count(500, 0), 1);
    }

    #[tokio::test]
    async fn test_scan_missing_directory_is_fatal() {
        let err = scanner()
            .scan_directory(Path::new("/definitely/not/here"))
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentError::NotFound(_)));

        let err = scanner().scan_directory(Path::new("")).await.unwrap_err();
        assert!(matches!(err, DocumentError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_scan_directory_tolerates_bad_files() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("guidelines");
        write(&root, "good.md", b"# Good\n\nBody.\n");
        write(&root, "nested/also-good.md", b"# Nested\n");
        let empty = write(&root, "empty.md", b"");
        let binary = write(&root, "binary.md", b"\x00\x01\x02\x03");
        write(&root, "ignored.txt", b"# Not a document extension\n");

        let scanner = scanner();
        let index = scanner.scan_directory(&root).await.unwrap();

        assert_eq!(index.category, DocumentCategory::Guideline);
        assert_eq!(index.count, 2);
        assert_eq!(index.documents.len(), index.count);
        assert!(!index.contains(&empty));
        assert!(!index.contains(&binary));
        assert_eq!(index.errors.len(), 2);
        assert!(index.errors.iter().any(|e| e.contains("empty.md")));
        assert!(index.errors.iter().any(|e| e.contains("binary.md")));

        assert_eq!(scanner.cache().len().await, 2);
        assert!(scanner.cache().get(&root.join("good.md")).await.is_ok());
    }

    #[tokio::test]
    async fn test_scan_mixed_root_keeps_member_categories() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("docs");
        write(&root, "guidelines/naming.md", b"# Naming\n");
        write(&root, "adr/0001-record.md", b"# Record decisions\n");

        let index = scanner().scan_directory(&root).await.unwrap();

        assert_eq!(index.category, DocumentCategory::from_path(&root));
        assert_eq!(index.count, 2);
        let categories: Vec<DocumentCategory> =
            index.documents.iter().map(|m| m.category).collect();
        assert_eq!(
            categories,
            vec![DocumentCategory::Adr, DocumentCategory::Guideline]
        );
    }

    #[tokio::test]
    async fn test_build_index_by_category() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "guidelines/naming.md", b"# Naming\n");
        write(dir.path(), "patterns/retry.md", b"# Retry\n");
        write(dir.path(), "adr/0001-record.md", b"# Record decisions\n");

        let scanner = scanner();
        let indices = scanner
            .build_index(&[dir.path().to_path_buf()])
            .await
            .unwrap();

        assert_eq!(indices.len(), 3);
        for category in [
            DocumentCategory::Guideline,
            DocumentCategory::Pattern,
            DocumentCategory::Adr,
        ] {
            let index = &indices[&category];
            assert_eq!(index.count, 1, "category {category}");
            assert!(index.errors.is_empty());
            assert_eq!(
                scanner.cache().get_index(category).await.as_ref(),
                Some(index)
            );
        }
        assert_eq!(indices[&DocumentCategory::Adr].documents[0].title, "Record decisions");
    }

    #[tokio::test]
    async fn test_build_index_aggregates_directory_errors() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "patterns/a.md", b"# A\n");

        let indices = scanner()
            .build_index(&[
                dir.path().join("patterns"),
                dir.path().join("adr-missing"),
            ])
            .await
            .unwrap();

        assert_eq!(indices[&DocumentCategory::Pattern].count, 1);
        let adr = &indices[&DocumentCategory::Adr];
        assert_eq!(adr.count, 0);
        assert_eq!(adr.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_build_index_rejects_empty_list() {
        let err = scanner().build_index(&[]).await.unwrap_err();
        assert!(matches!(err, DocumentError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_many_files_use_worker_pool() {
        let dir = TempDir::new().unwrap();
        for i in 0..40 {
            write(
                dir.path(),
                &format!("patterns/p{i:02}.md"),
                format!("# Pattern {i}\n").as_bytes(),
            );
        }

        let scanner = scanner();
        let index = scanner
            .scan_directory(&dir.path().join("patterns"))
            .await
            .unwrap();
        assert_eq!(index.count, 40);
        assert_eq!(index.documents[0].title, "Pattern 0");
        assert_eq!(scanner.cache().len().await, 40);
    }

    #[tokio::test]
    async fn test_breaker_ignores_content_errors() {
        let dir = TempDir::new().unwrap();
        let empty = write(dir.path(), "empty.md", b"");
        let breakers = CircuitBreakerManager::new();
        let scanner = scanner()
            .with_circuit_breaker(
                &breakers,
                CircuitBreakerConfig::default()
                    .with_max_failures(1)
                    .with_reset_timeout(Duration::from_secs(60)),
            )
            .await;

        for _ in 0..3 {
            let err = scanner.parse_file(&empty).await.unwrap_err();
            assert!(matches!(err, DocumentError::EmptyContent(_)));
        }

        let missing = dir.path().join("missing.md");
        assert!(matches!(
            scanner.parse_file(&missing).await.unwrap_err(),
            DocumentError::NotFound(_)
        ));
        assert!(matches!(
            scanner.parse_file(&empty).await.unwrap_err(),
            DocumentError::Unavailable(_)
        ));
    }
}
