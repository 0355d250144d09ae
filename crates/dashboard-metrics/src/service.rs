//! Periodic refresh service
//!
//! Drives [`MetricsStore::refresh`] on a fixed interval until shutdown and
//! keeps simple counters about completed and failed cycles.

use crate::{MetricsError, Result, store::MetricsStore};
use chrono::{DateTime, Utc};
use dashboard_core::config::RefreshConfig;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::{
    sync::broadcast,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tracing::{debug, info, instrument, warn};

/// Task handles type alias
type TaskHandles = Arc<RwLock<Vec<JoinHandle<()>>>>;

/// Service metrics
#[derive(Debug, Clone, Default)]
pub struct ServiceMetrics {
    /// Refresh cycles that produced a snapshot
    pub refreshes_completed: u64,

    /// Refresh cycles that failed
    pub refreshes_failed: u64,

    /// Completion time of the last cycle, successful or not
    pub last_refresh_at: Option<DateTime<Utc>>,

    /// Service uptime in seconds
    pub uptime_seconds: u64,

    /// Current service status
    pub status: ServiceStatus,
}

/// Service status
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ServiceStatus {
    /// Service is stopped
    #[default]
    Stopped,

    /// Service is starting up
    Starting,

    /// Service is running normally
    Running,

    /// Service is shutting down
    Stopping,

    /// The last refresh failed; the store still serves its previous snapshot
    Degraded {
        /// Reason for degraded status
        reason: String,
    },
}

/// Polls the metrics source through the store on a fixed interval
#[derive(Debug)]
pub struct RefreshService {
    /// Store being refreshed
    store: MetricsStore,

    /// Refresh configuration
    config: RefreshConfig,

    /// Service metrics
    metrics: Arc<RwLock<ServiceMetrics>>,

    /// Running task handles
    task_handles: TaskHandles,

    /// Shutdown sender (for broadcasting shutdown)
    shutdown_tx: broadcast::Sender<()>,

    /// Service status
    status: Arc<RwLock<ServiceStatus>>,

    /// Service start time
    start_time: Arc<RwLock<Option<Instant>>>,
}

impl RefreshService {
    /// Create a stopped service for `store`
    #[must_use]
    pub fn new(store: MetricsStore, config: RefreshConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            store,
            config,
            metrics: Arc::new(RwLock::new(ServiceMetrics::default())),
            task_handles: Arc::new(RwLock::new(Vec::new())),
            shutdown_tx,
            status: Arc::new(RwLock::new(ServiceStatus::Stopped)),
            start_time: Arc::new(RwLock::new(None)),
        }
    }

    /// Store driven by this service
    #[must_use]
    pub const fn store(&self) -> &MetricsStore {
        &self.store
    }

    /// Start polling
    ///
    /// The first refresh happens immediately when `refresh_on_start` is set,
    /// otherwise after one interval. Must be called within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::ServiceAlreadyRunning`] if the service is not
    /// stopped, or a configuration error if the interval is zero.
    #[instrument(skip(self))]
    pub fn start(&self) -> Result<()> {
        let mut status = self.status.write();
        if *status != ServiceStatus::Stopped {
            return Err(MetricsError::ServiceAlreadyRunning);
        }
        if self.config.interval().is_zero() {
            return Err(MetricsError::configuration(
                "Refresh interval must be greater than zero",
            ));
        }
        *status = ServiceStatus::Starting;
        drop(status);

        *self.start_time.write() = Some(Instant::now());

        let handle = self.spawn_poller();
        self.task_handles.write().push(handle);

        *self.status.write() = ServiceStatus::Running;

        info!(
            interval_seconds = self.config.interval_seconds,
            refresh_on_start = self.config.refresh_on_start,
            "Refresh service started"
        );

        Ok(())
    }

    /// Stop polling and wait for the poller to exit
    ///
    /// A refresh already in flight is not cancelled; it completes on its own
    /// task. Stopping a stopped service is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Shutdown`] if the poller does not exit within
    /// the configured shutdown timeout.
    #[instrument(skip(self))]
    pub async fn stop(&self) -> Result<()> {
        let mut status = self.status.write();
        if *status == ServiceStatus::Stopped {
            return Ok(());
        }
        *status = ServiceStatus::Stopping;
        drop(status);

        info!("Stopping refresh service");

        let _ = self.shutdown_tx.send(());

        let handles: Vec<_> = self.task_handles.write().drain(..).collect();
        let timeout_duration = self.config.shutdown_timeout();
        let shutdown_result = tokio::time::timeout(timeout_duration, async {
            for handle in handles {
                let _ = handle.await;
            }
        })
        .await;

        *self.status.write() = ServiceStatus::Stopped;
        *self.start_time.write() = None;

        if shutdown_result.is_err() {
            warn!("Refresh service shutdown timed out");
            return Err(MetricsError::shutdown(format!(
                "Poller did not exit within {}s",
                timeout_duration.as_secs()
            )));
        }

        info!("Refresh service stopped");
        Ok(())
    }

    /// Get service status
    #[must_use]
    pub fn status(&self) -> ServiceStatus {
        self.status.read().clone()
    }

    /// Get service metrics
    #[must_use]
    pub fn metrics(&self) -> ServiceMetrics {
        let mut metrics = self.metrics.read().clone();

        let start_time = *self.start_time.read();
        if let Some(start_time) = start_time {
            metrics.uptime_seconds = start_time.elapsed().as_secs();
        }

        metrics.status = self.status();
        metrics
    }

    /// Spawn the polling task
    fn spawn_poller(&self) -> JoinHandle<()> {
        let store = self.store.clone();
        let metrics = Arc::clone(&self.metrics);
        let status = Arc::clone(&self.status);
        let period = self.config.interval();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let first_tick = if self.config.refresh_on_start {
            Instant::now()
        } else {
            Instant::now() + period
        };

        tokio::spawn(async move {
            let mut ticker = interval_at(first_tick, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        Self::refresh_once(&store, &metrics, &status).await;
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Refresh poller shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// Run one refresh cycle and record its outcome
    async fn refresh_once(
        store: &MetricsStore,
        metrics: &RwLock<ServiceMetrics>,
        status: &RwLock<ServiceStatus>,
    ) {
        let outcome = store.refresh().await;

        {
            let mut m = metrics.write();
            m.last_refresh_at = Some(Utc::now());
            if outcome.is_ok() {
                m.refreshes_completed += 1;
            } else {
                m.refreshes_failed += 1;
            }
        }

        let mut status = status.write();
        match outcome {
            Ok(_) => {
                if matches!(*status, ServiceStatus::Degraded { .. }) {
                    info!("Refresh recovered");
                    *status = ServiceStatus::Running;
                }
            }
            Err(err) => {
                if matches!(*status, ServiceStatus::Running | ServiceStatus::Degraded { .. }) {
                    *status = ServiceStatus::Degraded {
                        reason: err.message().to_string(),
                    };
                }
            }
        }
    }
}

impl Drop for RefreshService {
    fn drop(&mut self) {
        if !matches!(*self.status.read(), ServiceStatus::Stopped) {
            warn!("Refresh service dropped while running, signalling poller to stop");
            let _ = self.shutdown_tx.send(());
        }
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
    use crate::{aggregate::Aggregator, mock::MockSource};
    use dashboard_core::ActivityLog;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn config(interval_seconds: u64, refresh_on_start: bool) -> RefreshConfig {
        RefreshConfig {
            interval_seconds,
            refresh_on_start,
            shutdown_timeout_seconds: 5,
        }
    }

    fn service_with(mock: Arc<MockSource>, config: RefreshConfig) -> RefreshService {
        let store = MetricsStore::new(mock, Aggregator::default(), Duration::from_secs(5));
        RefreshService::new(store, config)
    }

    #[test]
    fn test_service_status_default() {
        assert_eq!(ServiceStatus::default(), ServiceStatus::Stopped);
        assert_eq!(ServiceMetrics::default().refreshes_completed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_on_interval() {
        let mock = Arc::new(MockSource::new(ActivityLog::default()));
        let service = service_with(mock.clone(), config(30, true));

        service.start().unwrap();
        assert_eq!(service.status(), ServiceStatus::Running);

        // Ticks at 0s, 30s and 60s
        tokio::time::sleep(Duration::from_secs(61)).await;

        assert_eq!(mock.fetch_count(), 3);
        let metrics = service.metrics();
        assert_eq!(metrics.refreshes_completed, 3);
        assert_eq!(metrics.refreshes_failed, 0);
        assert!(metrics.last_refresh_at.is_some());

        service.stop().await.unwrap();
        assert_eq!(service.status(), ServiceStatus::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_on_start_disabled_waits_one_interval() {
        let mock = Arc::new(MockSource::new(ActivityLog::default()));
        let service = service_with(mock.clone(), config(30, false));

        service.start().unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(mock.fetch_count(), 0);

        tokio::time::sleep(Duration::from_secs(21)).await;
        assert_eq!(mock.fetch_count(), 1);

        service.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_degrades_and_success_recovers() {
        let mock = Arc::new(MockSource::new(ActivityLog::default()).then_fail("Network unreachable"));
        let service = service_with(mock, config(30, true));

        service.start().unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(
            service.status(),
            ServiceStatus::Degraded {
                reason: "Network unreachable".to_string()
            }
        );
        assert_eq!(service.metrics().refreshes_failed, 1);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(service.status(), ServiceStatus::Running);
        assert_eq!(service.metrics().refreshes_completed, 1);

        service.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_fails() {
        let service = service_with(Arc::new(MockSource::default()), config(30, false));

        service.start().unwrap();
        assert!(matches!(
            service.start(),
            Err(MetricsError::ServiceAlreadyRunning)
        ));

        service.stop().await.unwrap();
        // Stopping again is a no-op
        service.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_polling_after_stop() {
        let mock = Arc::new(MockSource::default());
        let service = service_with(mock.clone(), config(30, true));

        service.start().unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        service.stop().await.unwrap();

        let fetched = mock.fetch_count();
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(mock.fetch_count(), fetched);
    }

    #[tokio::test]
    async fn test_zero_interval_is_rejected() {
        let service = service_with(Arc::new(MockSource::default()), config(0, true));

        assert!(matches!(
            service.start(),
            Err(MetricsError::Configuration { .. })
        ));
        assert_eq!(service.status(), ServiceStatus::Stopped);
    }
}
