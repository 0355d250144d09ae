//! Mock metrics source for testing

use crate::source::MetricsSource;
use async_trait::async_trait;
use dashboard_core::{ActivityLog, AggregationError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::time::{Duration, sleep};

/// Scriptable source that counts how often it is fetched
#[derive(Debug, Default)]
pub struct MockSource {
    /// Served when the script is exhausted
    fallback: ActivityLog,

    /// Results handed out in order, one per fetch
    script: Mutex<VecDeque<Result<ActivityLog, AggregationError>>>,

    /// Simulated backend latency
    delay: Duration,

    /// Number of fetches started
    fetches: AtomicUsize,
}

impl MockSource {
    /// Create a mock that always serves `log`
    #[must_use]
    pub fn new(log: ActivityLog) -> Self {
        Self {
            fallback: log,
            ..Self::default()
        }
    }

    /// Set simulated latency for every fetch
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Queue a successful fetch
    #[must_use]
    pub fn then_ok(self, log: ActivityLog) -> Self {
        self.script.lock().push_back(Ok(log));
        self
    }

    /// Queue a failed fetch
    #[must_use]
    pub fn then_fail(self, message: impl Into<String>) -> Self {
        self.script
            .lock()
            .push_back(Err(AggregationError::new(message)));
        self
    }

    /// Queue a failed fetch on a shared mock
    pub fn push_failure(&self, message: impl Into<String>) {
        self.script
            .lock()
            .push_back(Err(AggregationError::new(message)));
    }

    /// Number of fetches started so far
    #[must_use]
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetricsSource for MockSource {
    async fn fetch(&self) -> Result<ActivityLog, AggregationError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }

        let scripted = self.script.lock().pop_front();
        scripted.unwrap_or_else(|| Ok(self.fallback.clone()))
    }

    fn describe(&self) -> String {
        "mock source".to_string()
    }
}

#[cfg(test)]
#[allow(
    clippy::missing_panics_doc,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_follows_script_then_fallback() {
        let mock = MockSource::default()
            .then_fail("Network unreachable")
            .then_ok(ActivityLog::default());

        assert_eq!(
            mock.fetch().await.unwrap_err().message(),
            "Network unreachable"
        );
        assert!(mock.fetch().await.is_ok());
        assert!(mock.fetch().await.is_ok());
        assert_eq!(mock.fetch_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_delay() {
        let mock = MockSource::default().with_delay(Duration::from_millis(500));
        let started = tokio::time::Instant::now();

        mock.fetch().await.unwrap();

        assert!(started.elapsed() >= Duration::from_millis(500));
    }
}
