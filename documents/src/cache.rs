//! Concurrency-safe document cache.
//!
//! The cache owns every parsed [`Document`], keyed by path, plus the derived
//! per-category [`DocumentIndex`] views. Each logical map sits behind its own
//! `RwLock`; when both are needed they are always taken documents-first.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::CacheConfig;
use crate::document::{Document, DocumentCategory, DocumentIndex, DocumentMetadata};
use crate::error::{DocumentError, Result};

#[derive(Debug)]
struct CacheEntry {
    document: Arc<Document>,
    inserted_at: Instant,
}

/// A single change applied by [`DocumentCache::apply_batch`].
#[derive(Debug, Clone)]
pub enum CacheMutation {
    /// Insert or replace a document.
    Upsert(Document),

    /// Remove a path. `category` names the index to recompute.
    Remove {
        path: PathBuf,
        category: DocumentCategory,
    },
}

impl CacheMutation {
    /// Path affected by the mutation.
    pub fn path(&self) -> &Path {
        match self {
            Self::Upsert(document) => document.path(),
            Self::Remove { path, .. } => path,
        }
    }
}

/// Outcome of [`DocumentCache::apply_batch`].
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Documents inserted or replaced.
    pub upserted: usize,

    /// Documents removed.
    pub removed: usize,

    /// Categories whose index was recomputed.
    pub categories: Vec<DocumentCategory>,

    /// Mutations that could not be applied.
    pub failures: Vec<(PathBuf, DocumentError)>,
}

/// Cache counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Successful lookups.
    pub hits: u64,

    /// Failed lookups.
    pub misses: u64,

    /// Inserts and replacements.
    pub writes: u64,

    /// Removals.
    pub invalidations: u64,

    /// Documents currently cached.
    pub entries: usize,

    /// `hits / (hits + misses)`, or 0 before any lookup.
    pub hit_rate: f64,
}

/// In-memory store of parsed documents and their category indices.
pub struct DocumentCache {
    documents: RwLock<HashMap<PathBuf, CacheEntry>>,
    indices: RwLock<HashMap<DocumentCategory, DocumentIndex>>,
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    invalidations: AtomicU64,
    shutdown: CancellationToken,
    maintenance: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl DocumentCache {
    /// Create an empty cache.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
            indices: RwLock::new(HashMap::new()),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
            maintenance: std::sync::Mutex::new(None),
        }
    }

    /// Cache configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up a document, updating the hit/miss counters.
    pub async fn get(&self, path: &Path) -> Result<Arc<Document>> {
        let documents = self.documents.read().await;
        match documents.get(path).filter(|entry| !self.is_expired(entry)) {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(entry.document.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Err(DocumentError::CacheMiss(path.display().to_string()))
            }
        }
    }

    /// Whether a document is cached, without touching the counters.
    pub async fn contains(&self, path: &Path) -> bool {
        self.documents.read().await.contains_key(path)
    }

    /// Checksum of the cached document at `path`.
    pub async fn checksum(&self, path: &Path) -> Option<String> {
        self.documents
            .read()
            .await
            .get(path)
            .map(|entry| entry.document.metadata.checksum.clone())
    }

    /// Insert or replace a document.
    pub async fn set(&self, path: PathBuf, document: Document) -> Result<()> {
        let mut documents = self.documents.write().await;
        self.insert_locked(&mut documents, path, document)
    }

    /// Remove a document. Returns whether it was cached.
    pub async fn invalidate(&self, path: &Path) -> bool {
        let removed = self.documents.write().await.remove(path).is_some();
        if removed {
            self.invalidations.fetch_add(1, Ordering::Relaxed);
            debug!("Invalidated cache entry: {}", path.display());
        }
        removed
    }

    /// Snapshot of every document in a category, ordered by path.
    pub async fn get_by_category(&self, category: DocumentCategory) -> Vec<Arc<Document>> {
        let documents = self.documents.read().await;
        let mut matching: Vec<Arc<Document>> = documents
            .values()
            .filter(|entry| entry.document.category() == category)
            .map(|entry| entry.document.clone())
            .collect();
        matching.sort_by(|a, b| a.path().cmp(b.path()));
        matching
    }

    /// Snapshot of every cached document, ordered by path.
    pub async fn get_all_documents(&self) -> Vec<Arc<Document>> {
        let documents = self.documents.read().await;
        let mut all: Vec<Arc<Document>> = documents
            .values()
            .map(|entry| entry.document.clone())
            .collect();
        all.sort_by(|a, b| a.path().cmp(b.path()));
        all
    }

    /// Cached paths under a directory.
    pub async fn paths_under(&self, dir: &Path) -> Vec<PathBuf> {
        self.documents
            .read()
            .await
            .keys()
            .filter(|path| path.starts_with(dir))
            .cloned()
            .collect()
    }

    /// Replace the cached index for a category.
    pub async fn set_index(&self, category: DocumentCategory, index: DocumentIndex) {
        self.indices.write().await.insert(category, index);
    }

    /// Cached index for a category.
    pub async fn get_index(&self, category: DocumentCategory) -> Option<DocumentIndex> {
        self.indices.read().await.get(&category).cloned()
    }

    /// Snapshot of every cached index.
    pub async fn indices(&self) -> HashMap<DocumentCategory, DocumentIndex> {
        self.indices.read().await.clone()
    }

    /// Recompute a category's index from current cache membership.
    pub async fn rebuild_index(&self, category: DocumentCategory) -> DocumentIndex {
        let documents = self.documents.read().await;
        let mut indices = self.indices.write().await;
        let errors = indices
            .get(&category)
            .map(|index| index.errors.clone())
            .unwrap_or_default();
        let index = index_from_entries(&documents, category, errors);
        indices.insert(category, index.clone());
        index
    }

    /// Apply a batch of mutations atomically with respect to readers.
    ///
    /// Both maps stay write-locked for the whole batch and every touched
    /// category's index is recomputed before the locks are released.
    /// Individual mutations may fail (capacity); the rest still apply.
    pub async fn apply_batch(&self, mutations: Vec<CacheMutation>) -> BatchReport {
        let mut report = BatchReport::default();
        if mutations.is_empty() {
            return report;
        }

        let mut documents = self.documents.write().await;
        let mut indices = self.indices.write().await;

        let mut touched: BTreeSet<DocumentCategory> = BTreeSet::new();
        let mut touched_paths: Vec<PathBuf> = Vec::with_capacity(mutations.len());

        for mutation in mutations {
            touched_paths.push(mutation.path().to_path_buf());
            match mutation {
                CacheMutation::Upsert(document) => {
                    let path = document.path().to_path_buf();
                    let category = document.category();
                    // A replaced document may have lived under another category.
                    if let Some(previous) = documents.get(&path) {
                        touched.insert(previous.document.category());
                    }
                    match self.insert_locked(&mut documents, path.clone(), document) {
                        Ok(()) => {
                            touched.insert(category);
                            report.upserted += 1;
                        }
                        Err(err) => report.failures.push((path, err)),
                    }
                }
                CacheMutation::Remove { path, category } => {
                    touched.insert(category);
                    if documents.remove(&path).is_some() {
                        self.invalidations.fetch_add(1, Ordering::Relaxed);
                        report.removed += 1;
                    }
                }
            }
        }

        for category in &touched {
            let errors = indices
                .get(category)
                .map(|index| {
                    index
                        .errors
                        .iter()
                        .filter(|error| !mentions_any(error, &touched_paths))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            indices.insert(*category, index_from_entries(&documents, *category, errors));
        }
        report.categories = touched.into_iter().collect();

        debug!(
            "Applied cache batch: {} upserted, {} removed, {} failed",
            report.upserted,
            report.removed,
            report.failures.len()
        );
        report
    }

    fn stats_with(&self, entries: usize) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        CacheStats {
            hits,
            misses,
            writes: self.writes.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            entries,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
        }
    }

    /// Current counters and entry count.
    pub async fn stats(&self) -> CacheStats {
        let entries = self.documents.read().await.len();
        self.stats_with(entries)
    }

    /// Number of cached documents.
    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    /// Whether the cache holds no documents.
    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }

    /// Drop every document and index.
    pub async fn clear(&self) {
        let mut documents = self.documents.write().await;
        let mut indices = self.indices.write().await;
        documents.clear();
        indices.clear();
        info!("Cleared document cache");
    }

    /// Start the expiry task if a TTL is configured.
    ///
    /// The task holds only a weak reference and stops on [`close`](Self::close).
    pub fn start_maintenance(self: &Arc<Self>) {
        let Some(ttl) = self.config.ttl() else {
            return;
        };
        let mut slot = self
            .maintenance
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if slot.is_some() || self.shutdown.is_cancelled() {
            return;
        }

        let cache: Weak<Self> = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();
        let period = self.config.cleanup_interval();
        debug!("Starting cache maintenance (ttl {ttl:?}, every {period:?})");

        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(cache) = cache.upgrade() else {
                            break;
                        };
                        cache.evict_expired().await;
                    }
                }
            }
            debug!("Cache maintenance stopped");
        }));
    }

    /// Stop background maintenance. Safe to call more than once.
    pub fn close(&self) {
        self.shutdown.cancel();
        let handle = self
            .maintenance
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    /// Remove expired documents and recompute the affected indices.
    pub async fn evict_expired(&self) -> usize {
        let expired: Vec<(PathBuf, DocumentCategory)> = {
            let documents = self.documents.read().await;
            documents
                .iter()
                .filter(|(_, entry)| self.is_expired(entry))
                .map(|(path, entry)| (path.clone(), entry.document.category()))
                .collect()
        };
        if expired.is_empty() {
            return 0;
        }

        let count = expired.len();
        let mutations = expired
            .into_iter()
            .map(|(path, category)| CacheMutation::Remove { path, category })
            .collect();
        self.apply_batch(mutations).await;
        info!("Evicted {count} expired documents");
        count
    }

    fn is_expired(&self, entry: &CacheEntry) -> bool {
        self.config
            .ttl()
            .is_some_and(|ttl| entry.inserted_at.elapsed() >= ttl)
    }

    fn insert_locked(
        &self,
        documents: &mut HashMap<PathBuf, CacheEntry>,
        path: PathBuf,
        document: Document,
    ) -> Result<()> {
        if let Some(capacity) = self.config.max_entries {
            if documents.len() >= capacity && !documents.contains_key(&path) {
                return Err(DocumentError::CacheExhausted { capacity });
            }
        }

        documents.insert(
            path,
            CacheEntry {
                document: Arc::new(document),
                inserted_at: Instant::now(),
            },
        );
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl Default for DocumentCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl Drop for DocumentCache {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn index_from_entries(
    documents: &HashMap<PathBuf, CacheEntry>,
    category: DocumentCategory,
    errors: Vec<String>,
) -> DocumentIndex {
    let members: Vec<DocumentMetadata> = documents
        .values()
        .filter(|entry| entry.document.category() == category)
        .map(|entry| entry.document.metadata.clone())
        .collect();
    DocumentIndex::from_documents(category, members, errors)
}

fn mentions_any(error: &str, paths: &[PathBuf]) -> bool {
    paths
        .iter()
        .any(|path| error.starts_with(&format!("{}: ", path.display())))
}
