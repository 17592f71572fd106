//! Documentation service.
//!
//! Owns the cache, the resilience registries, the scanner, the refresh
//! coordinator and the filesystem watcher, and exposes the read API.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use docserve_directory_watcher::{
    DirectoryConfig, DirectoryWatcher, EventSender, RefreshCoordinator, RefreshHandle,
    RefreshReport, WatcherError,
};
use docserve_documents::{
    CacheStats, Document, DocumentCache, DocumentCategory, DocumentError, DocumentIndex,
    DocumentScanner,
};
use docserve_resilience::{
    BreakerError, CircuitBreaker, CircuitBreakerManager, CircuitState, ComponentStatus,
    DegradationLevel, DegradationManager, LoggingObserver, ResilienceError, components,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ServiceConfig;
use crate::error::{Result, ServiceError};

/// Outcome of [`DocumentService::get_document`].
#[derive(Debug, Clone)]
pub enum Lookup {
    /// Served through the normal path.
    Found(Arc<Document>),

    /// The path is not cached.
    Missing,

    /// Served straight from the cache while resource lookup is degraded.
    Degraded {
        level: DegradationLevel,
        document: Option<Arc<Document>>,
    },
}

impl Lookup {
    /// The document, if one was found on either path.
    pub fn document(&self) -> Option<&Arc<Document>> {
        match self {
            Self::Found(document) => Some(document),
            Self::Missing => None,
            Self::Degraded { document, .. } => document.as_ref(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }
}

/// Health snapshot of the whole service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// Worst level across all components.
    pub overall: DegradationLevel,

    /// Per-component status.
    pub components: HashMap<String, ComponentStatus>,

    /// State of every circuit breaker.
    pub breakers: HashMap<String, CircuitState>,

    /// Cache counters.
    pub cache: CacheStats,

    /// File events dropped because the refresh queue was full.
    pub dropped_events: u64,

    /// Whether the service is running.
    pub running: bool,

    /// When the service was started.
    pub started_at: Option<DateTime<Utc>>,
}

/// Everything that only exists while the service runs.
struct Running {
    refresh: RefreshHandle,
    watcher: Option<DirectoryWatcher>,
    dispatcher: Option<JoinHandle<()>>,
    started_at: DateTime<Utc>,
}

/// The documentation service.
pub struct DocumentService {
    config: ServiceConfig,
    cache: Arc<DocumentCache>,
    breakers: Arc<CircuitBreakerManager>,
    degradation: Arc<DegradationManager>,
    scanner: DocumentScanner,
    lookup_breaker: Arc<CircuitBreaker>,
    cancel: CancellationToken,
    running: Mutex<Option<Running>>,
    live: AtomicBool,
}

impl DocumentService {
    /// Build the service. Nothing runs until [`start`](Self::start).
    pub async fn new(config: ServiceConfig) -> Result<Self> {
        config.validate()?;

        let cache = Arc::new(DocumentCache::new(config.cache.clone()));
        let breakers = Arc::new(CircuitBreakerManager::new());
        let degradation = Arc::new(DegradationManager::new());
        for rule in config.degradation_rules() {
            degradation.register_component(rule).await;
        }

        let scanner = DocumentScanner::new(cache.clone(), config.scanner.clone())
            .with_circuit_breaker(
                &breakers,
                config.breaker.breaker_config(components::DOCUMENT_PARSING),
            )
            .await;
        let lookup_breaker = breakers
            .get_or_create(
                components::RESOURCE_LOOKUP,
                config.breaker.breaker_config(components::RESOURCE_LOOKUP),
            )
            .await;

        Ok(Self {
            config,
            cache,
            breakers,
            degradation,
            scanner,
            lookup_breaker,
            cancel: CancellationToken::new(),
            running: Mutex::new(None),
            live: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<DocumentCache> {
        &self.cache
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerManager> {
        &self.breakers
    }

    pub fn degradation(&self) -> &Arc<DegradationManager> {
        &self.degradation
    }

    /// Index the documentation and start keeping it current.
    ///
    /// Builds the index, spawns the refresh coordinator, starts the watcher
    /// (when enabled) and spawns the degradation dispatcher. Starting a
    /// running service does nothing; a shut down service cannot be restarted.
    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            warn!("Document service already running");
            return Ok(());
        }
        if self.cancel.is_cancelled() {
            return Err(ServiceError::Config(
                "document service was shut down and cannot be restarted".to_string(),
            ));
        }

        info!(
            "Starting document service for {} directories",
            self.config.docs_dirs.len()
        );

        let indices = self.initial_scan().await?;
        let errors: usize = indices.values().map(|index| index.errors.len()).sum();
        if errors > 0 {
            warn!("Initial scan reported {errors} errors");
        }

        let refresh = RefreshCoordinator::new(
            self.scanner.clone(),
            self.degradation.clone(),
            self.config.refresh.clone(),
        )
        .spawn(self.cancel.child_token());

        let watcher = if self.config.watch {
            Some(self.start_watcher(refresh.sender())?)
        } else {
            None
        };

        let dispatcher = match self.degradation.spawn_dispatcher(LoggingObserver) {
            Ok(handle) => Some(handle),
            Err(e) => {
                debug!("{e}");
                None
            }
        };

        self.cache.start_maintenance();

        *running = Some(Running {
            refresh,
            watcher,
            dispatcher,
            started_at: Utc::now(),
        });
        self.live.store(true, Ordering::Release);
        info!("Document service started");
        Ok(())
    }

    async fn initial_scan(&self) -> Result<HashMap<DocumentCategory, DocumentIndex>> {
        let dirs = &self.config.docs_dirs;
        let result = self
            .degradation
            .execute_with_degradation(
                components::CACHE_REFRESH,
                || self.scanner.build_index(dirs),
                |level| async move {
                    let cached = self.cache.indices().await;
                    if cached.is_empty() {
                        warn!("Cache refresh is {level} and nothing is cached; scanning anyway");
                        self.scanner.build_index(dirs).await
                    } else {
                        warn!("Cache refresh is {level}; serving {} cached indices", cached.len());
                        Ok(cached)
                    }
                },
            )
            .await;

        match result {
            Ok(indices) => {
                self.record_success(components::CACHE_REFRESH).await;
                Ok(indices)
            }
            Err(err) => {
                self.record_error(components::CACHE_REFRESH, &err).await;
                Err(err.into())
            }
        }
    }

    fn start_watcher(&self, sender: EventSender) -> Result<DirectoryWatcher> {
        let degradation = self.degradation.clone();
        let runtime = tokio::runtime::Handle::current();
        let mut watcher = DirectoryWatcher::new().with_error_hook(move |err: &WatcherError| {
            let degradation = degradation.clone();
            let message = err.to_string();
            runtime.spawn(async move {
                if let Err(e) = degradation
                    .record_error(components::FILE_MONITORING, &message)
                    .await
                {
                    debug!("{e}");
                }
            });
        });

        for dir in &self.config.docs_dirs {
            let mut config = DirectoryConfig::new(dir)
                .with_extensions(self.config.scanner.extensions.iter().cloned());
            for pattern in &self.config.scanner.exclude_patterns {
                if !config.exclude_patterns.contains(pattern) {
                    config = config.exclude(pattern.clone());
                }
            }
            if let Err(e) = watcher.add(config) {
                warn!("Not watching {}: {e}", dir.display());
            }
        }

        watcher.start(sender)?;
        Ok(watcher)
    }

    /// Look up a document by path.
    ///
    /// Normally the lookup runs through the `resource-lookup` circuit
    /// breaker; a miss is an ordinary [`Lookup::Missing`]. While the
    /// component is degraded the cache is read directly and the result is
    /// marked [`Lookup::Degraded`].
    pub async fn get_document(&self, path: &Path) -> Result<Lookup> {
        self.ensure_running()?;

        self.degradation
            .execute_with_degradation(
                components::RESOURCE_LOOKUP,
                || self.lookup(path),
                |level| async move {
                    debug!("Degraded lookup of {} ({level})", path.display());
                    let document = self.cache.get(path).await.ok();
                    Ok(Lookup::Degraded { level, document })
                },
            )
            .await
    }

    async fn lookup(&self, path: &Path) -> Result<Lookup> {
        let outcome = self
            .lookup_breaker
            .execute(|| async {
                match self.cache.get(path).await {
                    Ok(document) => Ok(Some(document)),
                    Err(DocumentError::CacheMiss(_)) => Ok(None),
                    Err(err) => Err(err),
                }
            })
            .await;

        match outcome {
            Ok(document) => {
                self.record_success(components::RESOURCE_LOOKUP).await;
                Ok(document.map_or(Lookup::Missing, Lookup::Found))
            }
            Err(err) => {
                self.record_error(components::RESOURCE_LOOKUP, &err).await;
                Err(match err {
                    BreakerError::Open { name, retry_after } => {
                        ResilienceError::CircuitOpen { name, retry_after }.into()
                    }
                    BreakerError::Inner(inner) => inner.into(),
                })
            }
        }
    }

    /// Cached documents of one category, ordered by path.
    pub async fn documents_by_category(
        &self,
        category: DocumentCategory,
    ) -> Result<Vec<Arc<Document>>> {
        self.ensure_running()?;
        Ok(self.cache.get_by_category(category).await)
    }

    /// Every cached document, ordered by path.
    pub async fn all_documents(&self) -> Result<Vec<Arc<Document>>> {
        self.ensure_running()?;
        Ok(self.cache.get_all_documents().await)
    }

    /// Index of one category.
    pub async fn index(&self, category: DocumentCategory) -> Result<Option<DocumentIndex>> {
        self.ensure_running()?;
        Ok(self.cache.get_index(category).await)
    }

    /// Sender for feeding file events into the refresh pipeline by hand.
    pub async fn event_sender(&self) -> Result<EventSender> {
        let running = self.running.lock().await;
        running
            .as_ref()
            .map(|running| running.refresh.sender())
            .ok_or(ServiceError::NotStarted)
    }

    /// Apply every pending file event now.
    pub async fn flush(&self) -> Result<RefreshReport> {
        let trigger = self
            .running
            .lock()
            .await
            .as_ref()
            .map(|running| running.refresh.flush_trigger())
            .ok_or(ServiceError::NotStarted)?;
        Ok(trigger.flush().await?)
    }

    /// Health snapshot.
    pub async fn health(&self) -> HealthReport {
        let (dropped_events, started_at) = match self.running.lock().await.as_ref() {
            Some(running) => (running.refresh.sender().dropped(), Some(running.started_at)),
            None => (0, None),
        };
        HealthReport {
            overall: self.degradation.overall_health().await,
            components: self.degradation.all_statuses().await,
            breakers: self.breakers.states().await,
            cache: self.cache.stats().await,
            dropped_events,
            running: started_at.is_some(),
            started_at,
        }
    }

    /// Stop watching, stop the refresh pipeline and drop the cache.
    pub async fn shutdown(&self) {
        let Some(mut running) = self.running.lock().await.take() else {
            debug!("Document service not running");
            return;
        };

        info!("Shutting down document service");
        self.live.store(false, Ordering::Release);
        if let Some(watcher) = running.watcher.as_mut() {
            watcher.stop();
        }
        running.refresh.shutdown().await;
        if let Some(dispatcher) = running.dispatcher.take() {
            dispatcher.abort();
        }
        self.cancel.cancel();

        self.cache.close();
        self.cache.clear().await;
        info!("Document service stopped");
    }

    fn ensure_running(&self) -> Result<()> {
        if self.live.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(ServiceError::NotStarted)
        }
    }

    async fn record_error(&self, component: &str, err: &(dyn std::fmt::Display + Sync)) {
        if let Err(e) = self.degradation.record_error(component, err).await {
            debug!("{e}");
        }
    }

    async fn record_success(&self, component: &str) {
        if let Err(e) = self.degradation.record_success(component).await {
            debug!("{e}");
        }
    }
}
