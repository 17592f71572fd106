//! Circuit breakers for risky operations.
//!
//! A breaker guards one named operation. While the operation keeps failing
//! the breaker opens and rejects calls immediately; once the reset timeout
//! has elapsed it lets a probing call through (half-open) and closes again
//! after enough successes.
//!
//! ```text
//! Closed ──(failures >= max_failures)──► Open
//! Open ──(reset_timeout elapsed)──► HalfOpen
//! HalfOpen ──(successes >= success_threshold)──► Closed
//! HalfOpen ──(any failure)──► Open
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::ResilienceError;

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls pass through.
    Closed,

    /// Calls are rejected until the reset timeout elapses.
    Open,

    /// Probing calls are allowed to test recovery.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half-open",
        };
        f.write_str(name)
    }
}

/// Callback invoked with `(name, from, to)` after a state change.
///
/// Runs after the breaker's lock has been released, so it may call back
/// into the breaker.
pub type StateChangeCallback = Arc<dyn Fn(&str, CircuitState, CircuitState) + Send + Sync>;

/// Configuration for a single circuit breaker.
#[derive(Clone)]
pub struct CircuitBreakerConfig {
    /// Name of the guarded operation.
    pub name: String,

    /// Consecutive failures that open a closed breaker.
    pub max_failures: u32,

    /// How long an open breaker rejects calls.
    pub reset_timeout: Duration,

    /// Successes needed in half-open state before closing.
    pub success_threshold: u32,

    /// Optional state-change observer.
    pub on_state_change: Option<StateChangeCallback>,
}

impl CircuitBreakerConfig {
    /// Create a config with default thresholds.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_failures: 5,
            reset_timeout: Duration::from_secs(30),
            success_threshold: 1,
            on_state_change: None,
        }
    }

    /// Set the failure threshold.
    pub fn with_max_failures(mut self, max_failures: u32) -> Self {
        self.max_failures = max_failures.max(1);
        self
    }

    /// Set the open-state cooldown.
    pub fn with_reset_timeout(mut self, reset_timeout: Duration) -> Self {
        self.reset_timeout = reset_timeout;
        self
    }

    /// Set the half-open success threshold.
    pub fn with_success_threshold(mut self, success_threshold: u32) -> Self {
        self.success_threshold = success_threshold.max(1);
        self
    }

    /// Register a state-change callback.
    pub fn on_state_change<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, CircuitState, CircuitState) + Send + Sync + 'static,
    {
        self.on_state_change = Some(Arc::new(callback));
        self
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::new("default")
    }
}

impl fmt::Debug for CircuitBreakerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerConfig")
            .field("name", &self.name)
            .field("max_failures", &self.max_failures)
            .field("reset_timeout", &self.reset_timeout)
            .field("success_threshold", &self.success_threshold)
            .field("on_state_change", &self.on_state_change.is_some())
            .finish()
    }
}

/// Error returned by [`CircuitBreaker::execute`].
#[derive(Debug)]
pub enum BreakerError<E> {
    /// The breaker is open; the operation was not invoked.
    Open { name: String, retry_after: Duration },

    /// The operation ran and failed.
    Inner(E),
}

impl<E> BreakerError<E> {
    /// Whether the call was rejected by an open breaker.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }

    /// The operation's own error, if it ran.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(err) => Some(err),
            Self::Open { .. } => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for BreakerError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open { name, retry_after } => {
                write!(f, "circuit breaker '{name}' is open; retry after {retry_after:?}")
            }
            Self::Inner(err) => err.fmt(f),
        }
    }
}

impl<E> std::error::Error for BreakerError<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(err) => Some(err),
            Self::Open { .. } => None,
        }
    }
}

impl<E> BreakerError<E> {
    /// The rejection as a [`ResilienceError`], if the breaker was open.
    pub fn as_circuit_open(&self) -> Option<ResilienceError> {
        match self {
            Self::Open { name, retry_after } => Some(ResilienceError::CircuitOpen {
                name: name.clone(),
                retry_after: *retry_after,
            }),
            Self::Inner(_) => None,
        }
    }
}

/// Snapshot of a breaker's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerCounts {
    /// Current state.
    pub state: CircuitState,

    /// Consecutive failures while closed.
    pub failures: u32,

    /// Successes while half-open.
    pub successes: u32,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failures: u32,
    successes: u32,
    last_failure: Option<Instant>,
}

impl BreakerInner {
    fn transition(&mut self, to: CircuitState) -> Option<(CircuitState, CircuitState)> {
        let from = self.state;
        if from == to {
            return None;
        }
        self.state = to;
        match to {
            CircuitState::Closed => {
                self.failures = 0;
                self.successes = 0;
            }
            CircuitState::HalfOpen => self.successes = 0,
            CircuitState::Open => {}
        }
        Some((from, to))
    }
}

/// Failure-isolation guard for one named operation.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a closed breaker.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failures: 0,
                successes: 0,
                last_failure: None,
            }),
        }
    }

    /// Name of the guarded operation.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// The breaker's configuration.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state.
    pub async fn state(&self) -> CircuitState {
        self.inner.lock().await.state
    }

    /// Current state and counters.
    pub async fn counts(&self) -> BreakerCounts {
        let inner = self.inner.lock().await;
        BreakerCounts {
            state: inner.state,
            failures: inner.failures,
            successes: inner.successes,
        }
    }

    /// Run `op` through the breaker.
    ///
    /// Returns [`BreakerError::Open`] without invoking `op` while the breaker
    /// is open and its reset timeout has not elapsed.
    pub async fn execute<F, Fut, T, E>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.before_call().await.map_err(|retry_after| {
            warn!(
                target: "telemetry",
                breaker = %self.config.name,
                retry_after_ms = retry_after.as_millis() as u64,
                "circuit breaker rejected call"
            );
            BreakerError::Open {
                name: self.config.name.clone(),
                retry_after,
            }
        })?;

        match op().await {
            Ok(value) => {
                self.record_success().await;
                Ok(value)
            }
            Err(err) => {
                self.record_failure().await;
                Err(BreakerError::Inner(err))
            }
        }
    }

    /// Force the breaker back to closed.
    pub async fn reset(&self) {
        let change = {
            let mut inner = self.inner.lock().await;
            inner.last_failure = None;
            let change = inner.transition(CircuitState::Closed);
            inner.failures = 0;
            inner.successes = 0;
            change
        };
        self.notify(change);
    }

    /// Admit or reject a call. `Err` carries the remaining cooldown.
    async fn before_call(&self) -> Result<(), Duration> {
        let change = {
            let mut inner = self.inner.lock().await;
            if inner.state != CircuitState::Open {
                return Ok(());
            }
            let elapsed = inner
                .last_failure
                .map_or(self.config.reset_timeout, |at| at.elapsed());
            if elapsed < self.config.reset_timeout {
                return Err(self.config.reset_timeout - elapsed);
            }
            inner.transition(CircuitState::HalfOpen)
        };
        self.notify(change);
        Ok(())
    }

    async fn record_success(&self) {
        let change = {
            let mut inner = self.inner.lock().await;
            match inner.state {
                CircuitState::Closed => {
                    inner.failures = 0;
                    None
                }
                CircuitState::HalfOpen => {
                    inner.successes += 1;
                    if inner.successes >= self.config.success_threshold {
                        inner.transition(CircuitState::Closed)
                    } else {
                        None
                    }
                }
                CircuitState::Open => None,
            }
        };
        self.notify(change);
    }

    async fn record_failure(&self) {
        let change = {
            let mut inner = self.inner.lock().await;
            inner.last_failure = Some(Instant::now());
            match inner.state {
                CircuitState::Closed => {
                    inner.failures += 1;
                    if inner.failures >= self.config.max_failures {
                        inner.transition(CircuitState::Open)
                    } else {
                        None
                    }
                }
                CircuitState::HalfOpen => inner.transition(CircuitState::Open),
                CircuitState::Open => None,
            }
        };
        self.notify(change);
    }

    /// Report a state change. Called with the lock released.
    fn notify(&self, change: Option<(CircuitState, CircuitState)>) {
        let Some((from, to)) = change else {
            return;
        };
        match to {
            CircuitState::Open => warn!("Circuit breaker '{}' opened (was {from})", self.config.name),
            _ => info!("Circuit breaker '{}': {from} -> {to}", self.config.name),
        }
        if let Some(callback) = &self.config.on_state_change {
            callback(&self.config.name, from, to);
        }
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Registry of circuit breakers keyed by operation name.
#[derive(Default)]
pub struct CircuitBreakerManager {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerManager {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the breaker for `name`, creating it from `config` on first use.
    ///
    /// The first config registered for a name wins; later configs are ignored.
    pub async fn get_or_create(
        &self,
        name: &str,
        config: CircuitBreakerConfig,
    ) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().await.get(name) {
            return breaker.clone();
        }

        let mut breakers = self.breakers.write().await;
        breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!("Creating circuit breaker: {name}");
                Arc::new(CircuitBreaker::new(CircuitBreakerConfig {
                    name: name.to_string(),
                    ..config
                }))
            })
            .clone()
    }

    /// Get an existing breaker.
    pub async fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.read().await.get(name).cloned()
    }

    /// Current state of every registered breaker.
    pub async fn states(&self) -> HashMap<String, CircuitState> {
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.read().await.values().cloned().collect();

        let mut states = HashMap::with_capacity(breakers.len());
        for breaker in breakers {
            states.insert(breaker.name().to_string(), breaker.state().await);
        }
        states
    }

    /// Force every breaker back to closed.
    pub async fn reset_all(&self) {
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.read().await.values().cloned().collect();
        for breaker in breakers {
            breaker.reset().await;
        }
        info!("Reset all circuit breakers");
    }
}
