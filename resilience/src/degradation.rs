//! Graceful degradation tracking.
//!
//! Each registered component keeps a sliding window of recent error
//! timestamps. When the window fills up to the rule's threshold the component
//! drops to the rule's degradation level, and callers using
//! [`DegradationManager::execute_with_degradation`] switch to their degraded
//! code path until the component recovers.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{ResilienceError, Result};

/// Well-known component ids used by the docserve core.
pub mod components {
    /// Markdown parsing of individual files.
    pub const DOCUMENT_PARSING: &str = "document-parsing";

    /// Application of refresh batches to the cache.
    pub const CACHE_REFRESH: &str = "cache-refresh";

    /// The filesystem watcher.
    pub const FILE_MONITORING: &str = "file-monitoring";

    /// Document lookups from cache readers.
    pub const RESOURCE_LOOKUP: &str = "resource-lookup";
}

const TRANSITION_CHANNEL_CAPACITY: usize = 64;

/// Discrete health tier of a component, ordered from healthy to worst.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum DegradationLevel {
    /// Fully healthy.
    #[default]
    None,

    /// Minor degradation.
    Minor,

    /// Major degradation.
    Major,

    /// Critical degradation.
    Critical,
}

impl fmt::Display for DegradationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Minor => "minor",
            Self::Major => "major",
            Self::Critical => "critical",
        };
        f.write_str(name)
    }
}

/// Predicate deciding whether a degraded component may recover.
pub type RecoveryCondition = Arc<dyn Fn() -> bool + Send + Sync>;

/// Degradation rule for one component.
#[derive(Clone)]
pub struct DegradationRule {
    /// Component id.
    pub component: String,

    /// Errors within `time_window` that trigger degradation.
    pub error_threshold: usize,

    /// Length of the sliding error window.
    pub time_window: Duration,

    /// Level entered when the threshold is reached.
    pub level: DegradationLevel,

    /// Recovery predicate; recovery is always allowed when unset.
    pub recovery_condition: Option<RecoveryCondition>,
}

impl DegradationRule {
    /// Create a rule with no recovery condition.
    pub fn new(
        component: impl Into<String>,
        error_threshold: usize,
        time_window: Duration,
        level: DegradationLevel,
    ) -> Self {
        Self {
            component: component.into(),
            error_threshold: error_threshold.max(1),
            time_window,
            level,
            recovery_condition: None,
        }
    }

    /// Attach a recovery condition.
    pub fn with_recovery_condition<F>(mut self, condition: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.recovery_condition = Some(Arc::new(condition));
        self
    }

    /// Rules for the well-known [`components`].
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new(
                components::DOCUMENT_PARSING,
                5,
                Duration::from_secs(60),
                DegradationLevel::Minor,
            ),
            Self::new(
                components::CACHE_REFRESH,
                3,
                Duration::from_secs(60),
                DegradationLevel::Major,
            ),
            Self::new(
                components::FILE_MONITORING,
                3,
                Duration::from_secs(300),
                DegradationLevel::Major,
            ),
            Self::new(
                components::RESOURCE_LOOKUP,
                10,
                Duration::from_secs(60),
                DegradationLevel::Minor,
            ),
        ]
    }

    fn can_recover(&self) -> bool {
        self.recovery_condition
            .as_ref()
            .is_none_or(|condition| condition())
    }
}

impl fmt::Debug for DegradationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DegradationRule")
            .field("component", &self.component)
            .field("error_threshold", &self.error_threshold)
            .field("time_window", &self.time_window)
            .field("level", &self.level)
            .field("recovery_condition", &self.recovery_condition.is_some())
            .finish()
    }
}

/// Snapshot of a component's health.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentStatus {
    /// Component id.
    pub component: String,

    /// Current level.
    pub level: DegradationLevel,

    /// Whether the component is at [`DegradationLevel::None`].
    pub is_healthy: bool,

    /// Errors currently inside the window.
    pub recent_errors: usize,

    /// Message of the most recent error.
    pub last_error: Option<String>,

    /// When the level last changed.
    pub last_change: Option<DateTime<Utc>>,
}

/// A level change of one component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DegradationTransition {
    /// Component id.
    pub component: String,

    /// Previous level.
    pub from: DegradationLevel,

    /// New level.
    pub to: DegradationLevel,

    /// When the change happened.
    pub at: DateTime<Utc>,
}

/// Receives level changes from the dispatch task, in order.
pub trait DegradationObserver: Send + Sync {
    /// Called once per transition.
    fn on_transition(&self, transition: &DegradationTransition);
}

impl<F> DegradationObserver for F
where
    F: Fn(&DegradationTransition) + Send + Sync,
{
    fn on_transition(&self, transition: &DegradationTransition) {
        self(transition)
    }
}

/// Observer that reports transitions as telemetry events.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl DegradationObserver for LoggingObserver {
    fn on_transition(&self, transition: &DegradationTransition) {
        if transition.to > transition.from {
            warn!(
                target: "telemetry",
                component = %transition.component,
                from = %transition.from,
                to = %transition.to,
                "component degraded"
            );
        } else {
            info!(
                target: "telemetry",
                component = %transition.component,
                from = %transition.from,
                to = %transition.to,
                "component recovered"
            );
        }
    }
}

#[derive(Debug)]
struct ComponentState {
    rule: DegradationRule,
    level: DegradationLevel,
    errors: VecDeque<Instant>,
    last_error: Option<String>,
    last_change: Option<DateTime<Utc>>,
}

impl ComponentState {
    fn new(rule: DegradationRule) -> Self {
        Self {
            rule,
            level: DegradationLevel::None,
            errors: VecDeque::new(),
            last_error: None,
            last_change: None,
        }
    }

    /// Drop window entries older than the rule's time window.
    fn prune(&mut self, now: Instant) {
        let window = self.rule.time_window;
        while let Some(oldest) = self.errors.front() {
            if now.duration_since(*oldest) > window {
                self.errors.pop_front();
            } else {
                break;
            }
        }
    }

    fn set_level(&mut self, to: DegradationLevel) -> Option<DegradationTransition> {
        let from = self.level;
        if from == to {
            return None;
        }
        let at = Utc::now();
        self.level = to;
        self.last_change = Some(at);
        Some(DegradationTransition {
            component: self.rule.component.clone(),
            from,
            to,
            at,
        })
    }

    fn status(&self) -> ComponentStatus {
        ComponentStatus {
            component: self.rule.component.clone(),
            level: self.level,
            is_healthy: self.level == DegradationLevel::None,
            recent_errors: self.errors.len(),
            last_error: self.last_error.clone(),
            last_change: self.last_change,
        }
    }
}

/// Per-component health tracker.
///
/// Components are sharded: each one sits behind its own lock, so unrelated
/// components never contend.
pub struct DegradationManager {
    components: RwLock<HashMap<String, Arc<Mutex<ComponentState>>>>,
    transition_tx: mpsc::Sender<DegradationTransition>,
    transition_rx: std::sync::Mutex<Option<mpsc::Receiver<DegradationTransition>>>,
}

impl DegradationManager {
    /// Create a manager with no registered components.
    pub fn new() -> Self {
        let (transition_tx, transition_rx) = mpsc::channel(TRANSITION_CHANNEL_CAPACITY);
        Self {
            components: RwLock::new(HashMap::new()),
            transition_tx,
            transition_rx: std::sync::Mutex::new(Some(transition_rx)),
        }
    }

    /// Register (or replace) the rule for a component.
    pub async fn register_component(&self, rule: DegradationRule) {
        let component = rule.component.clone();
        debug!(
            "Registering degradation rule for {component}: {} errors in {:?} -> {}",
            rule.error_threshold, rule.time_window, rule.level
        );
        self.components
            .write()
            .await
            .insert(component, Arc::new(Mutex::new(ComponentState::new(rule))));
    }

    /// Take the transition receiver. Returns `None` once taken.
    pub fn take_transitions(&self) -> Option<mpsc::Receiver<DegradationTransition>> {
        self.transition_rx
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
    }

    /// Spawn the dispatch task that feeds transitions to `observer` in order.
    pub fn spawn_dispatcher<O>(&self, observer: O) -> Result<JoinHandle<()>>
    where
        O: DegradationObserver + 'static,
    {
        let mut rx = self.take_transitions().ok_or_else(|| {
            ResilienceError::InitializationFailed(
                "degradation dispatcher already started".to_string(),
            )
        })?;

        Ok(tokio::spawn(async move {
            while let Some(transition) = rx.recv().await {
                observer.on_transition(&transition);
            }
            debug!("Degradation dispatcher stopped");
        }))
    }

    /// Record an error against a component.
    ///
    /// Returns the component's level after recording.
    pub async fn record_error(
        &self,
        component: &str,
        error: &(dyn fmt::Display + Sync),
    ) -> Result<DegradationLevel> {
        let state = self.component(component).await?;

        let (level, transition) = {
            let mut state = state.lock().await;
            let now = Instant::now();
            state.errors.push_back(now);
            state.prune(now);
            state.last_error = Some(error.to_string());

            let transition = if state.errors.len() >= state.rule.error_threshold
                && state.level < state.rule.level
            {
                let to = state.rule.level;
                state.set_level(to)
            } else {
                None
            };
            (state.level, transition)
        };

        debug!("Recorded error for {component}: {error}");
        if let Some(transition) = transition {
            self.publish(transition);
        }
        Ok(level)
    }

    /// Record a success against a component.
    ///
    /// A degraded component recovers only if its recovery condition holds.
    pub async fn record_success(&self, component: &str) -> Result<DegradationLevel> {
        let state = self.component(component).await?;

        let (level, transition) = {
            let mut state = state.lock().await;
            let transition =
                if state.level != DegradationLevel::None && state.rule.can_recover() {
                    state.errors.clear();
                    state.set_level(DegradationLevel::None)
                } else {
                    None
                };
            (state.level, transition)
        };

        if let Some(transition) = transition {
            self.publish(transition);
        }
        Ok(level)
    }

    /// Run `normal` while the component is healthy, otherwise `degraded`.
    ///
    /// Unregistered components are treated as healthy.
    pub async fn execute_with_degradation<T, N, NFut, D, DFut>(
        &self,
        component: &str,
        normal: N,
        degraded: D,
    ) -> T
    where
        N: FnOnce() -> NFut,
        NFut: Future<Output = T>,
        D: FnOnce(DegradationLevel) -> DFut,
        DFut: Future<Output = T>,
    {
        match self.level(component).await {
            DegradationLevel::None => normal().await,
            level => {
                debug!("Running degraded path for {component} ({level})");
                degraded(level).await
            }
        }
    }

    /// Current level of a component; `None` when it is not registered.
    pub async fn level(&self, component: &str) -> DegradationLevel {
        match self.component(component).await {
            Ok(state) => state.lock().await.level,
            Err(_) => DegradationLevel::None,
        }
    }

    /// Status snapshot of a component.
    pub async fn status(&self, component: &str) -> Result<ComponentStatus> {
        let state = self.component(component).await?;
        let mut state = state.lock().await;
        state.prune(Instant::now());
        Ok(state.status())
    }

    /// Status snapshots of every component.
    pub async fn all_statuses(&self) -> HashMap<String, ComponentStatus> {
        let states: Vec<Arc<Mutex<ComponentState>>> =
            self.components.read().await.values().cloned().collect();

        let now = Instant::now();
        let mut statuses = HashMap::with_capacity(states.len());
        for state in states {
            let mut state = state.lock().await;
            state.prune(now);
            statuses.insert(state.rule.component.clone(), state.status());
        }
        statuses
    }

    /// Worst level across all components.
    pub async fn overall_health(&self) -> DegradationLevel {
        let states: Vec<Arc<Mutex<ComponentState>>> =
            self.components.read().await.values().cloned().collect();

        let mut worst = DegradationLevel::None;
        for state in states {
            worst = worst.max(state.lock().await.level);
        }
        worst
    }

    /// Reset a component to healthy regardless of its recovery condition.
    pub async fn force_recovery(&self, component: &str) -> Result<()> {
        let state = self.component(component).await?;
        let transition = {
            let mut state = state.lock().await;
            state.errors.clear();
            state.set_level(DegradationLevel::None)
        };

        info!("Forced recovery of {component}");
        if let Some(transition) = transition {
            self.publish(transition);
        }
        Ok(())
    }

    async fn component(&self, component: &str) -> Result<Arc<Mutex<ComponentState>>> {
        self.components
            .read()
            .await
            .get(component)
            .cloned()
            .ok_or_else(|| ResilienceError::UnknownComponent(component.to_string()))
    }

    fn publish(&self, transition: DegradationTransition) {
        debug!(
            "Component {} transitioned {} -> {}",
            transition.component, transition.from, transition.to
        );
        if let Err(err) = self.transition_tx.try_send(transition) {
            warn!("Dropped degradation transition: {err}");
        }
    }
}

impl Default for DegradationManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn rule(threshold: usize, window: Duration, level: DegradationLevel) -> DegradationRule {
        DegradationRule::new("cache-refresh", threshold, window, level)
    }

    #[test]
    fn test_default_rules_cover_known_components() {
        let rules = DegradationRule::defaults();
        let summary: Vec<(&str, usize, u64, DegradationLevel)> = rules
            .iter()
            .map(|r| {
                (
                    r.component.as_str(),
                    r.error_threshold,
                    r.time_window.as_secs(),
                    r.level,
                )
            })
            .collect();
        assert_eq!(
            summary,
            vec![
                ("document-parsing", 5, 60, DegradationLevel::Minor),
                ("cache-refresh", 3, 60, DegradationLevel::Major),
                ("file-monitoring", 3, 300, DegradationLevel::Major),
                ("resource-lookup", 10, 60, DegradationLevel::Minor),
            ]
        );
    }

    #[tokio::test]
    async fn test_threshold_reached_degrades() {
        let manager = DegradationManager::new();
        manager
            .register_component(rule(2, Duration::from_secs(60), DegradationLevel::Major))
            .await;

        manager.record_error("cache-refresh", &"first").await.unwrap();
        assert_eq!(manager.level("cache-refresh").await, DegradationLevel::None);

        manager.record_error("cache-refresh", &"second").await.unwrap();
        let status = manager.status("cache-refresh").await.unwrap();
        assert_eq!(status.level, DegradationLevel::Major);
        assert!(!status.is_healthy);
        assert_eq!(status.last_error.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_record_error_from_spawned_task() {
        let manager = Arc::new(DegradationManager::new());
        manager
            .register_component(rule(1, Duration::from_secs(60), DegradationLevel::Major))
            .await;

        let worker = manager.clone();
        let level = tokio::spawn(async move {
            let err = std::io::Error::other("disk gone");
            worker.record_error("cache-refresh", &err).await
        })
        .await
        .unwrap()
        .unwrap();
        assert_eq!(level, DegradationLevel::Major);
    }

    #[tokio::test]
    async fn test_transition_published_exactly_once() {
        let manager = DegradationManager::new();
        let mut rx = manager.take_transitions().unwrap();
        manager
            .register_component(rule(2, Duration::from_secs(60), DegradationLevel::Minor))
            .await;

        for _ in 0..5 {
            manager.record_error("cache-refresh", &"boom").await.unwrap();
        }

        let transition = rx.try_recv().unwrap();
        assert_eq!(transition.component, "cache-refresh");
        assert_eq!(transition.from, DegradationLevel::None);
        assert_eq!(transition.to, DegradationLevel::Minor);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_errors_outside_window_are_pruned() {
        let manager = DegradationManager::new();
        manager
            .register_component(rule(3, Duration::from_millis(50), DegradationLevel::Major))
            .await;

        manager.record_error("cache-refresh", &"old").await.unwrap();
        manager.record_error("cache-refresh", &"old").await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        manager.record_error("cache-refresh", &"new").await.unwrap();

        let status = manager.status("cache-refresh").await.unwrap();
        assert_eq!(status.level, DegradationLevel::None);
        assert_eq!(status.recent_errors, 1);
    }

    #[tokio::test]
    async fn test_success_with_false_condition_keeps_level() {
        let manager = DegradationManager::new();
        manager
            .register_component(
                rule(1, Duration::from_secs(60), DegradationLevel::Major)
                    .with_recovery_condition(|| false),
            )
            .await;
        manager.record_error("cache-refresh", &"boom").await.unwrap();

        let level = manager.record_success("cache-refresh").await.unwrap();
        assert_eq!(level, DegradationLevel::Major);
        assert_eq!(manager.status("cache-refresh").await.unwrap().recent_errors, 1);
    }

    #[tokio::test]
    async fn test_success_with_true_condition_recovers_and_clears_window() {
        let healthy = Arc::new(AtomicBool::new(false));
        let probe = healthy.clone();
        let manager = DegradationManager::new();
        manager
            .register_component(
                rule(1, Duration::from_secs(60), DegradationLevel::Critical)
                    .with_recovery_condition(move || probe.load(Ordering::SeqCst)),
            )
            .await;
        manager.record_error("cache-refresh", &"boom").await.unwrap();
        assert_eq!(
            manager.record_success("cache-refresh").await.unwrap(),
            DegradationLevel::Critical
        );

        healthy.store(true, Ordering::SeqCst);
        assert_eq!(
            manager.record_success("cache-refresh").await.unwrap(),
            DegradationLevel::None
        );
        let status = manager.status("cache-refresh").await.unwrap();
        assert!(status.is_healthy);
        assert_eq!(status.recent_errors, 0);
    }

    #[tokio::test]
    async fn test_execute_with_degradation_branches() {
        let manager = DegradationManager::new();
        manager
            .register_component(rule(1, Duration::from_secs(60), DegradationLevel::Minor))
            .await;

        let normal = manager
            .execute_with_degradation(
                "cache-refresh",
                || async { "normal".to_string() },
                |level| async move { format!("degraded:{level}") },
            )
            .await;
        assert_eq!(normal, "normal");

        manager.record_error("cache-refresh", &"boom").await.unwrap();

        let normal_called = AtomicBool::new(false);
        let outcome = manager
            .execute_with_degradation(
                "cache-refresh",
                || async {
                    normal_called.store(true, Ordering::SeqCst);
                    "normal".to_string()
                },
                |level| async move { format!("degraded:{level}") },
            )
            .await;
        assert_eq!(outcome, "degraded:minor");
        assert!(!normal_called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_overall_health_is_worst_level() {
        let manager = DegradationManager::new();
        manager
            .register_component(DegradationRule::new(
                components::DOCUMENT_PARSING,
                1,
                Duration::from_secs(60),
                DegradationLevel::Minor,
            ))
            .await;
        manager
            .register_component(DegradationRule::new(
                components::CACHE_REFRESH,
                1,
                Duration::from_secs(60),
                DegradationLevel::Major,
            ))
            .await;
        assert_eq!(manager.overall_health().await, DegradationLevel::None);

        manager
            .record_error(components::DOCUMENT_PARSING, &"bad file")
            .await
            .unwrap();
        assert_eq!(manager.overall_health().await, DegradationLevel::Minor);

        manager
            .record_error(components::CACHE_REFRESH, &"load failed")
            .await
            .unwrap();
        assert_eq!(manager.overall_health().await, DegradationLevel::Major);
    }

    #[tokio::test]
    async fn test_force_recovery_ignores_condition() {
        let manager = DegradationManager::new();
        manager
            .register_component(
                rule(1, Duration::from_secs(60), DegradationLevel::Major)
                    .with_recovery_condition(|| false),
            )
            .await;
        manager.record_error("cache-refresh", &"boom").await.unwrap();

        manager.force_recovery("cache-refresh").await.unwrap();
        assert_eq!(manager.level("cache-refresh").await, DegradationLevel::None);
    }

    #[tokio::test]
    async fn test_unknown_component() {
        let manager = DegradationManager::new();
        let err = manager.record_error("missing", &"boom").await.unwrap_err();
        assert!(matches!(err, ResilienceError::UnknownComponent(name) if name == "missing"));

        let outcome = manager
            .execute_with_degradation("missing", || async { 1 }, |_| async { 2 })
            .await;
        assert_eq!(outcome, 1);
    }

    #[tokio::test]
    async fn test_dispatcher_delivers_in_order() {
        let manager = DegradationManager::new();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let dispatcher = manager
            .spawn_dispatcher(move |t: &DegradationTransition| {
                sink.lock().unwrap().push((t.from, t.to));
            })
            .unwrap();
        assert!(manager.spawn_dispatcher(LoggingObserver).is_err());

        manager
            .register_component(rule(1, Duration::from_secs(60), DegradationLevel::Major))
            .await;
        manager.record_error("cache-refresh", &"boom").await.unwrap();
        manager.record_success("cache-refresh").await.unwrap();

        drop(manager);
        dispatcher.await.unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (DegradationLevel::None, DegradationLevel::Major),
                (DegradationLevel::Major, DegradationLevel::None),
            ]
        );
    }
}
