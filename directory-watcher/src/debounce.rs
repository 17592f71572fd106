//! Single-deadline debounce timer.
//!
//! The refresh coordinator owns exactly one timer. Every incoming event
//! pushes the deadline out by the debounce delay; when the deadline passes
//! without further events, the pending batch is flushed.

use std::time::Duration;

use tokio::time::{Instant, sleep_until};

/// A resettable deadline.
#[derive(Debug)]
pub struct DebounceTimer {
    delay: Duration,
    deadline: Option<Instant>,
}

impl DebounceTimer {
    /// Create a disarmed timer.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    /// Debounce delay.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Start the timer unless it is already running.
    pub fn arm(&mut self) {
        if self.deadline.is_none() {
            self.reset();
        }
    }

    /// Restart the timer from now.
    pub fn reset(&mut self) {
        self.deadline = Some(Instant::now() + self.delay);
    }

    /// Stop the timer.
    pub fn disarm(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Resolve when the deadline passes. Never resolves while disarmed.
    pub async fn fired(&self) {
        match self.deadline {
            Some(deadline) => sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::time::{advance, timeout};

    const DELAY: Duration = Duration::from_millis(500);

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_delay() {
        let mut timer = DebounceTimer::new(DELAY);
        timer.arm();

        let start = Instant::now();
        timer.fired().await;
        assert_eq!(start.elapsed(), DELAY);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_pushes_deadline_out() {
        let mut timer = DebounceTimer::new(DELAY);
        let start = Instant::now();
        timer.reset();

        advance(Duration::from_millis(300)).await;
        timer.reset();
        timer.fired().await;

        assert_eq!(start.elapsed(), Duration::from_millis(800));
    }

    #[tokio::test(start_paused = true)]
    async fn test_arm_keeps_existing_deadline() {
        let mut timer = DebounceTimer::new(DELAY);
        timer.arm();
        let first = timer.deadline();

        advance(Duration::from_millis(100)).await;
        timer.arm();
        assert_eq!(timer.deadline(), first);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disarmed_never_fires() {
        let mut timer = DebounceTimer::new(DELAY);
        timer.arm();
        timer.disarm();
        assert!(!timer.is_armed());

        let result = timeout(Duration::from_secs(10), timer.fired()).await;
        assert!(result.is_err());
    }
}
