//! Debounced cache refresh.
//!
//! File events flow through a bounded channel into a single coordinator task.
//! The task collects them into an [`EventBatch`] (latest event per path) and
//! applies the batch once the debounce timer fires, an explicit flush is
//! requested, or the safety tick finds a batch that has waited too long.
//!
//! Applying a batch reparses every created or modified document first and
//! then commits all changes with one
//! [`DocumentCache::apply_batch`](docserve_documents::DocumentCache::apply_batch), so
//! readers never observe a half-applied batch.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use docserve_documents::{CacheMutation, DocumentCategory, DocumentError, DocumentScanner};
use docserve_resilience::{DegradationManager, components};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::debounce::DebounceTimer;
use crate::error::{Result, WatcherError};
use crate::event::{EventBatch, FileEvent, FileEventKind};

/// Configuration for the refresh coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Quiet period after the last event before a batch is applied.
    pub debounce_ms: u64,

    /// Interval of the safety tick that flushes stalled batches.
    pub safety_interval_ms: u64,

    /// Capacity of the event channel.
    pub channel_capacity: usize,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            safety_interval_ms: 5_000,
            channel_capacity: 100,
        }
    }
}

impl RefreshConfig {
    /// Set the debounce delay.
    pub fn with_debounce(mut self, delay: Duration) -> Self {
        self.debounce_ms = delay.as_millis() as u64;
        self
    }

    /// Set the safety tick interval.
    pub fn with_safety_interval(mut self, interval: Duration) -> Self {
        self.safety_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the event channel capacity.
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn safety_interval(&self) -> Duration {
        Duration::from_millis(self.safety_interval_ms.max(1))
    }
}

/// Non-blocking producer side of the refresh channel.
#[derive(Clone, Debug)]
pub struct EventSender {
    tx: mpsc::Sender<FileEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventSender {
    /// Create a sender and the matching receiver.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<FileEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let sender = Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (sender, rx)
    }

    /// Queue an event without waiting.
    ///
    /// When the channel is full the event being sent (the newest) is dropped,
    /// counted and logged. Returns whether the event was queued.
    pub fn notify(&self, event: FileEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    "Refresh queue full, dropping event for {} ({dropped} dropped so far)",
                    event.path.display()
                );
                false
            }
            Err(TrySendError::Closed(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "Refresh coordinator stopped, dropping event for {}",
                    event.path.display()
                );
                false
            }
        }
    }

    /// Number of events dropped so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Whether the coordinator has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Outcome of applying one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshReport {
    /// Events in the batch, after per-path deduplication.
    pub events: usize,

    /// Documents inserted or replaced.
    pub upserted: usize,

    /// Documents removed.
    pub removed: usize,

    /// Events ignored (irrelevant paths, unchanged content).
    pub skipped: usize,

    /// Files that failed to reparse.
    pub parse_failures: usize,

    /// Mutations the cache rejected.
    pub cache_failures: usize,
}

/// Keeps the document cache in sync with filesystem events.
pub struct RefreshCoordinator {
    scanner: DocumentScanner,
    degradation: Arc<DegradationManager>,
    config: RefreshConfig,
}

impl RefreshCoordinator {
    pub fn new(
        scanner: DocumentScanner,
        degradation: Arc<DegradationManager>,
        config: RefreshConfig,
    ) -> Self {
        Self {
            scanner,
            degradation,
            config,
        }
    }

    /// Spawn the coordinator task.
    ///
    /// The task stops when `cancel` fires, when [`RefreshHandle::shutdown`]
    /// is called, or when the handle is dropped.
    pub fn spawn(self, cancel: CancellationToken) -> RefreshHandle {
        let (sender, events) = EventSender::channel(self.config.channel_capacity);
        let (flush_tx, flushes) = mpsc::channel(8);
        let (shutdown_tx, shutdown) = oneshot::channel();

        let task = tokio::spawn(self.run(events, flushes, shutdown, cancel));

        RefreshHandle {
            sender,
            flush: FlushTrigger { flush_tx },
            shutdown_tx,
            task,
        }
    }

    async fn run(
        self,
        mut events: mpsc::Receiver<FileEvent>,
        mut flushes: mpsc::Receiver<oneshot::Sender<RefreshReport>>,
        mut shutdown: oneshot::Receiver<()>,
        cancel: CancellationToken,
    ) {
        let debounce = self.config.debounce();
        let period = self.config.safety_interval();
        let mut timer = DebounceTimer::new(debounce);
        let mut pending = EventBatch::new();
        let mut safety = tokio::time::interval_at(Instant::now() + period, period);
        safety.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Refresh coordinator started (debounce {debounce:?})");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = &mut shutdown => break,
                event = events.recv() => match event {
                    Some(event) => {
                        pending.push(event);
                        timer.reset();
                    }
                    None => break,
                },
                () = timer.fired(), if timer.is_armed() => {
                    timer.disarm();
                    self.flush(&mut pending).await;
                }
                _ = safety.tick() => {
                    if pending.age().is_some_and(|age| age >= debounce) {
                        debug!("Safety tick flushing {} pending events", pending.len());
                        timer.disarm();
                        self.flush(&mut pending).await;
                    }
                }
                Some(reply) = flushes.recv() => {
                    while let Ok(event) = events.try_recv() {
                        pending.push(event);
                    }
                    timer.disarm();
                    let report = self.flush(&mut pending).await;
                    let _ = reply.send(report);
                }
            }
        }

        timer.disarm();
        if !pending.is_empty() {
            info!("Discarding {} pending refresh events", pending.len());
        }
        info!("Refresh coordinator stopped");
    }

    async fn flush(&self, pending: &mut EventBatch) -> RefreshReport {
        let events = pending.take();
        self.apply(events).await
    }

    /// Apply a batch of events to the cache.
    pub async fn apply(&self, events: Vec<FileEvent>) -> RefreshReport {
        let mut report = RefreshReport {
            events: events.len(),
            ..RefreshReport::default()
        };
        if events.is_empty() {
            return report;
        }

        let start = Instant::now();
        let cache = self.scanner.cache();
        let mut mutations = Vec::with_capacity(events.len());

        for event in &events {
            match event.kind {
                FileEventKind::Delete => {
                    if event.is_directory
                        || !self.scanner.config().has_document_extension(&event.path)
                    {
                        let under = cache.paths_under(&event.path).await;
                        if under.is_empty() {
                            report.skipped += 1;
                        }
                        mutations.extend(under.into_iter().map(removal));
                    } else {
                        mutations.push(removal(event.path.clone()));
                    }
                }
                FileEventKind::Create | FileEventKind::Modify => {
                    if event.is_directory || !self.scanner.is_document_path(&event.path) {
                        report.skipped += 1;
                        continue;
                    }
                    if self.is_unchanged(event).await {
                        debug!("Skipping unchanged {}", event.path.display());
                        report.skipped += 1;
                        continue;
                    }
                    match self.scanner.parse_file(&event.path).await {
                        Ok(document) => {
                            self.record_success(components::DOCUMENT_PARSING).await;
                            mutations.push(CacheMutation::Upsert(document));
                        }
                        Err(DocumentError::NotFound(_)) => {
                            mutations.push(removal(event.path.clone()));
                        }
                        Err(err) => {
                            warn!("Failed to reparse {}: {err}", event.path.display());
                            report.parse_failures += 1;
                            self.record_error(components::DOCUMENT_PARSING, &err).await;
                        }
                    }
                }
            }
        }

        let batch = cache.apply_batch(mutations).await;
        report.upserted = batch.upserted;
        report.removed = batch.removed;
        report.cache_failures = batch.failures.len();

        for (path, err) in &batch.failures {
            warn!("Failed to refresh {}: {err}", path.display());
            self.record_error(components::CACHE_REFRESH, err).await;
        }
        if batch.failures.is_empty() {
            self.record_success(components::CACHE_REFRESH).await;
        }
        // Events only arrive while file monitoring is delivering them.
        self.record_success(components::FILE_MONITORING).await;

        info!(
            target: "telemetry",
            events = report.events,
            upserted = report.upserted,
            removed = report.removed,
            skipped = report.skipped,
            parse_failures = report.parse_failures,
            cache_failures = report.cache_failures,
            categories = ?batch.categories,
            duration_ms = start.elapsed().as_millis() as u64,
            "refresh batch applied"
        );
        report
    }

    async fn is_unchanged(&self, event: &FileEvent) -> bool {
        let Some(checksum) = &event.checksum else {
            return false;
        };
        self.scanner.cache().checksum(&event.path).await.as_deref() == Some(checksum.as_str())
    }

    async fn record_error(&self, component: &str, err: &(dyn fmt::Display + Sync)) {
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

// The category of a removed document is inferred from its path.
fn removal(path: PathBuf) -> CacheMutation {
    let category = DocumentCategory::from_path(&path);
    CacheMutation::Remove { path, category }
}

/// Handle to a running [`RefreshCoordinator`].
pub struct RefreshHandle {
    sender: EventSender,
    flush: FlushTrigger,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl RefreshHandle {
    /// A sender for file events.
    pub fn sender(&self) -> EventSender {
        self.sender.clone()
    }

    /// Apply everything queued so far and wait for the result.
    pub async fn flush(&self) -> Result<RefreshReport> {
        self.flush.flush().await
    }

    /// A clonable trigger for explicit flushes.
    pub fn flush_trigger(&self) -> FlushTrigger {
        self.flush.clone()
    }

    /// Whether the coordinator task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the coordinator, discarding any pending batch.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(err) = self.task.await {
            warn!("Refresh coordinator task failed: {err}");
        }
    }
}

/// Requests explicit flushes from a running coordinator.
///
/// Holding a trigger does not keep the coordinator alive.
#[derive(Debug, Clone)]
pub struct FlushTrigger {
    flush_tx: mpsc::Sender<oneshot::Sender<RefreshReport>>,
}

impl FlushTrigger {
    /// Apply everything queued so far and wait for the result.
    pub async fn flush(&self) -> Result<RefreshReport> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.flush_tx
            .send(reply_tx)
            .await
            .map_err(|_| WatcherError::ChannelClosed)?;
        reply_rx.await.map_err(|_| WatcherError::ChannelClosed)
    }
}
