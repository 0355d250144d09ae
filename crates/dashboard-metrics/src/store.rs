//! Metrics store
//!
//! Holds the latest [`Snapshot`] together with the loading flag, the last
//! aggregation error and the last-updated time. Every state transition
//! replaces the whole [`StoreState`] under a write lock, then delivers the
//! new state to subscribers after the lock is released.
//!
//! Refreshes are coalesced: while one aggregation is in flight, further
//! [`MetricsStore::refresh`] calls join it instead of starting another fetch.

use crate::{aggregate::Aggregator, growth::GrowthCalculator, source::MetricsSource};
use chrono::{DateTime, Utc};
use dashboard_core::{ActivityLog, AggregationError, DashboardStats, GrowthMetrics};
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use serde::Serialize;
use std::cell::Cell;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::{Instant, timeout};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Outcome of one refresh cycle
pub type RefreshOutcome = Result<Arc<Snapshot>, AggregationError>;

type SharedRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

/// An aggregated snapshot and the history it was computed from
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Monotonic snapshot identity, bumped on every successful aggregation
    pub revision: u64,

    /// Aggregated statistics
    pub stats: DashboardStats,

    /// Raw records the statistics were aggregated from
    #[serde(skip)]
    pub history: Arc<ActivityLog>,

    /// When the aggregation completed
    pub aggregated_at: DateTime<Utc>,
}

/// Everything a consumer can observe about the store
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreState {
    /// Latest good snapshot, kept across failed refreshes
    pub data: Option<Arc<Snapshot>>,

    /// No snapshot exists yet and one is being produced
    pub loading: bool,

    /// A refresh cycle is in flight
    pub refreshing: bool,

    /// Message of the last failed refresh, cleared on success
    pub error: Option<String>,

    /// Completion time of the last successful aggregation
    pub last_updated: Option<DateTime<Utc>>,

    /// Growth metrics derived from `data`
    pub growth: Option<GrowthMetrics>,
}

impl StoreState {
    /// State of a freshly created store
    #[must_use]
    pub const fn initial() -> Self {
        Self {
            data: None,
            loading: true,
            refreshing: false,
            error: None,
            last_updated: None,
            growth: None,
        }
    }

    /// Statistics of the current snapshot, if any
    #[must_use]
    pub fn stats(&self) -> Option<&DashboardStats> {
        self.data.as_deref().map(|snapshot| &snapshot.stats)
    }
}

impl Default for StoreState {
    fn default() -> Self {
        Self::initial()
    }
}

/// Identifier of a registered subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

type Callback = Box<dyn Fn(&StoreState) + Send + Sync>;

struct Subscriber {
    // Re-entrant so a callback may unsubscribe itself
    active: ReentrantMutex<Cell<bool>>,
    callback: Callback,
}

impl Subscriber {
    fn deliver(&self, state: &StoreState) {
        let active = self.active.lock();
        if active.get() {
            (self.callback)(state);
        }
    }

    fn deactivate(&self) {
        self.active.lock().set(false);
    }
}

struct StoreInner {
    source: Arc<dyn MetricsSource>,
    aggregator: Aggregator,
    growth: GrowthCalculator,
    fetch_timeout: Duration,
    state: RwLock<StoreState>,
    subscribers: DashMap<SubscriptionId, Arc<Subscriber>>,
    // Serializes transition + delivery so subscribers see states in order
    transitions: ReentrantMutex<()>,
    in_flight: Mutex<Option<SharedRefresh>>,
    // Id of the last cycle started and the highest cycle settled
    cycles: AtomicU64,
    settled: AtomicU64,
    revision: AtomicU64,
    closed: AtomicBool,
}

/// Clears the in-flight slot when a cycle ends, including by unwinding
struct CycleGuard<'a> {
    inner: &'a StoreInner,
    cycle: u64,
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.inner.settled.fetch_max(self.cycle, Ordering::SeqCst);
        self.inner.in_flight.lock().take();
    }
}

impl std::fmt::Debug for StoreInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreInner")
            .field("source", &self.source)
            .field("state", &*self.state.read())
            .field("subscribers", &self.subscribers.len())
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// Process-wide owner of the dashboard snapshot
///
/// Cheap to clone; clones share the same state.
#[derive(Debug, Clone)]
pub struct MetricsStore {
    inner: Arc<StoreInner>,
}

/// Registration handle returned by [`MetricsStore::subscribe`]
///
/// Dropping the handle unsubscribes. Once the drop (or
/// [`MetricsStore::unsubscribe`]) returns, the callback is never invoked again.
#[must_use = "dropping a Subscription unsubscribes immediately"]
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    store: Weak<StoreInner>,
}

impl Subscription {
    /// Identifier of this registration
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.store.upgrade() {
            inner.remove_subscriber(self.id);
        }
    }
}

/// Joinable handle to a refresh cycle
///
/// The cycle runs to completion whether or not the handle is awaited.
#[must_use = "the refresh runs regardless; await the handle to observe its outcome"]
pub struct RefreshHandle {
    shared: SharedRefresh,
    joined: bool,
}

impl RefreshHandle {
    /// Whether this call joined a cycle that was already in flight
    #[must_use]
    pub const fn joined(&self) -> bool {
        self.joined
    }
}

impl std::fmt::Debug for RefreshHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshHandle")
            .field("joined", &self.joined)
            .finish_non_exhaustive()
    }
}

impl Future for RefreshHandle {
    type Output = RefreshOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.shared).poll(cx)
    }
}

impl MetricsStore {
    /// Create a store pulling from `source`
    #[must_use]
    pub fn new(source: Arc<dyn MetricsSource>, aggregator: Aggregator, fetch_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                source,
                aggregator,
                growth: GrowthCalculator::new(),
                fetch_timeout,
                state: RwLock::new(StoreState::initial()),
                subscribers: DashMap::new(),
                transitions: ReentrantMutex::new(()),
                in_flight: Mutex::new(None),
                cycles: AtomicU64::new(0),
                settled: AtomicU64::new(0),
                revision: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Create a store from application configuration
    #[must_use]
    pub fn from_config(source: Arc<dyn MetricsSource>, config: &dashboard_core::Config) -> Self {
        Self::new(
            source,
            Aggregator::new(config.aggregation.online_window()),
            config.source.fetch_timeout(),
        )
    }

    /// Current state; always a complete, consistent copy
    #[must_use]
    pub fn snapshot(&self) -> StoreState {
        self.inner.state.read().clone()
    }

    /// Growth metrics of the current snapshot, served from the memo
    #[must_use]
    pub fn growth_metrics(&self) -> Option<GrowthMetrics> {
        let data = self.inner.state.read().data.clone();
        data.map(|snapshot| self.inner.growth.calculate(&snapshot))
    }

    /// Register a callback invoked after every state transition
    ///
    /// Callbacks run synchronously on the task that performed the transition
    /// and must not block.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&StoreState) + Send + Sync + 'static,
    {
        let id = SubscriptionId(Uuid::new_v4());

        if self.is_closed() {
            debug!("Subscribe on closed store ignored");
        } else {
            self.inner.subscribers.insert(
                id,
                Arc::new(Subscriber {
                    active: ReentrantMutex::new(Cell::new(true)),
                    callback: Box::new(callback),
                }),
            );
            debug!(subscribers = self.inner.subscribers.len(), "Subscriber registered");
        }

        Subscription {
            id,
            store: Arc::downgrade(&self.inner),
        }
    }

    /// Remove a subscriber; returns whether it was registered
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.remove_subscriber(id)
    }

    /// Number of registered subscribers
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    /// Start a refresh cycle, or join the one already in flight
    ///
    /// Never blocks: the cycle is driven on a spawned task and the returned
    /// handle may be awaited or dropped. Must be called within a Tokio
    /// runtime.
    pub fn refresh(&self) -> RefreshHandle {
        if self.is_closed() {
            return RefreshHandle {
                shared: futures::future::ready(Err(AggregationError::closed()))
                    .boxed()
                    .shared(),
                joined: false,
            };
        }

        let mut in_flight = self.inner.in_flight.lock();
        if let Some(existing) = in_flight.as_ref() {
            debug!("Joining in-flight refresh");
            return RefreshHandle {
                shared: existing.clone(),
                joined: true,
            };
        }

        let id = self.inner.cycles.fetch_add(1, Ordering::SeqCst) + 1;
        let inner = Arc::clone(&self.inner);
        let cycle = async move { inner.run_cycle(id).await }.boxed().shared();
        *in_flight = Some(cycle.clone());
        drop(in_flight);

        self.inner.begin_refresh(id);
        tokio::spawn(cycle.clone());

        RefreshHandle {
            shared: cycle,
            joined: false,
        }
    }

    /// Tear the store down
    ///
    /// Releases every subscriber and clears the loading and refreshing flags.
    /// A refresh still in flight completes but its result no longer mutates
    /// state.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let ids: Vec<SubscriptionId> = self.inner.subscribers.iter().map(|e| *e.key()).collect();
        for id in ids {
            self.inner.remove_subscriber(id);
        }

        // No subscribers remain, so this only settles the final state
        self.inner.transition(|state| {
            state.loading = false;
            state.refreshing = false;
        });

        info!("Metrics store closed");
    }

    /// Whether [`close`](Self::close) has been called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

impl StoreInner {
    fn remove_subscriber(&self, id: SubscriptionId) -> bool {
        match self.subscribers.remove(&id) {
            Some((_, subscriber)) => {
                // Waits for an in-progress delivery on another thread
                subscriber.deactivate();
                debug!(subscribers = self.subscribers.len(), "Subscriber removed");
                true
            }
            None => false,
        }
    }

    /// Replace the state wholesale and deliver it to subscribers
    fn transition<F>(&self, mutate: F)
    where
        F: FnOnce(&mut StoreState),
    {
        let _ordered = self.transitions.lock();

        let state = {
            let mut guard = self.state.write();
            let mut next = guard.clone();
            mutate(&mut next);
            *guard = next.clone();
            next
        };

        let subscribers: Vec<Arc<Subscriber>> = self
            .subscribers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        for subscriber in subscribers {
            subscriber.deliver(&state);
        }
    }

    /// Raise the in-progress flags for `cycle` unless it already settled
    fn begin_refresh(&self, cycle: u64) {
        let _ordered = self.transitions.lock();
        if self.settled.load(Ordering::SeqCst) >= cycle || self.closed.load(Ordering::SeqCst) {
            debug!(cycle, "Refresh settled before it was announced");
            return;
        }

        self.transition(|state| {
            state.refreshing = true;
            state.loading = state.data.is_none();
        });
    }

    #[instrument(skip(self), fields(source = %self.source.describe()))]
    async fn run_cycle(self: Arc<Self>, cycle: u64) -> RefreshOutcome {
        let _guard = CycleGuard { inner: &self, cycle };
        let started = Instant::now();

        let outcome = AssertUnwindSafe(self.produce_snapshot())
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(AggregationError::new("Metrics refresh panicked")));

        self.settle(cycle, &outcome, started);
        outcome
    }

    async fn produce_snapshot(&self) -> RefreshOutcome {
        let log = match timeout(self.fetch_timeout, self.source.fetch()).await {
            Ok(result) => result?,
            Err(_) => return Err(AggregationError::timeout(self.fetch_timeout.as_millis())),
        };

        let completed_at = Utc::now();
        let stats = self.aggregator.aggregate(&log, completed_at)?;

        Ok(Arc::new(Snapshot {
            revision: self.revision.fetch_add(1, Ordering::SeqCst) + 1,
            stats,
            history: Arc::new(log),
            aggregated_at: completed_at,
        }))
    }

    /// Apply the outcome of `cycle` and mark it settled in one ordered step
    fn settle(&self, cycle: u64, outcome: &RefreshOutcome, started: Instant) {
        let _ordered = self.transitions.lock();
        self.settled.fetch_max(cycle, Ordering::SeqCst);

        if self.closed.load(Ordering::SeqCst) {
            debug!("Store closed during refresh, discarding result");
            return;
        }

        match outcome {
            Ok(snapshot) => {
                let growth = self.growth.calculate(snapshot);
                self.transition(|state| {
                    state.data = Some(Arc::clone(snapshot));
                    state.loading = false;
                    state.refreshing = false;
                    state.error = None;
                    state.last_updated = Some(snapshot.aggregated_at);
                    state.growth = Some(growth);
                });
                info!(
                    revision = snapshot.revision,
                    elapsed_ms = started.elapsed().as_millis(),
                    "Dashboard snapshot refreshed"
                );
            }
            Err(err) => {
                self.transition(|state| {
                    state.loading = false;
                    state.refreshing = false;
                    state.error = Some(err.message().to_string());
                });
                warn!(
                    error = %err,
                    elapsed_ms = started.elapsed().as_millis(),
                    "Dashboard refresh failed"
                );
            }
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
    use crate::mock::MockSource;
    use crate::source::{JsonFileSource, StaticSource};
    use crate::view::DashboardView;
    use chrono::TimeZone;
    use dashboard_core::types::UserRecord;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;

    fn store_with(source: Arc<dyn MetricsSource>) -> MetricsStore {
        MetricsStore::new(source, Aggregator::default(), Duration::from_secs(5))
    }

    fn log_with_users(n: usize) -> ActivityLog {
        let registered = Utc.with_ymd_and_hms(2024, 1, 5, 8, 0, 0).unwrap();
        ActivityLog {
            users: std::iter::repeat_with(|| UserRecord::registered(registered))
                .take(n)
                .collect(),
            ..ActivityLog::default()
        }
    }

    #[test]
    fn test_initial_state() {
        let store = store_with(Arc::new(StaticSource::default()));
        let state = store.snapshot();

        assert!(state.loading);
        assert!(!state.refreshing);
        assert!(state.data.is_none());
        assert!(state.error.is_none());
        assert!(state.last_updated.is_none());
        assert!(store.growth_metrics().is_none());
    }

    #[tokio::test]
    async fn test_successful_refresh_replaces_snapshot() {
        let store = store_with(Arc::new(StaticSource::new(log_with_users(3))));

        let snapshot = store.refresh().await.unwrap();
        let state = store.snapshot();

        assert!(!state.loading);
        assert!(!state.refreshing);
        assert!(state.error.is_none());
        assert_eq!(snapshot.revision, 1);
        assert_eq!(state.stats().map(|s| s.total_users), Some(3));
        assert_eq!(state.last_updated, Some(snapshot.aggregated_at));
        assert!(state.growth.is_some());
    }

    #[tokio::test]
    async fn test_failure_without_prior_snapshot_keeps_data_empty() {
        let mock = Arc::new(MockSource::default().then_fail("Network unreachable"));
        let store = store_with(mock);

        let err = store.refresh().await.unwrap_err();
        let state = store.snapshot();

        assert_eq!(err.message(), "Network unreachable");
        assert!(!state.loading);
        assert_eq!(state.error.as_deref(), Some("Network unreachable"));
        assert!(state.data.is_none());
    }

    #[tokio::test]
    async fn test_failure_retains_stale_snapshot_and_success_clears_error() {
        let mock = Arc::new(
            MockSource::new(log_with_users(5))
                .then_ok(log_with_users(2))
                .then_fail("Network unreachable"),
        );
        let store = store_with(mock);

        store.refresh().await.unwrap();
        store.refresh().await.unwrap_err();

        let state = store.snapshot();
        assert_eq!(state.error.as_deref(), Some("Network unreachable"));
        assert_eq!(state.stats().map(|s| s.total_users), Some(2));
        assert!(!state.loading);

        store.refresh().await.unwrap();
        let state = store.snapshot();
        assert!(state.error.is_none());
        assert_eq!(state.stats().map(|s| s.total_users), Some(5));
        assert_eq!(state.data.map(|s| s.revision), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_refreshes_share_one_fetch() {
        let mock = Arc::new(MockSource::new(log_with_users(1)).with_delay(Duration::from_millis(200)));
        let store = store_with(mock.clone());

        let first = store.refresh();
        let second = store.refresh();
        assert!(!first.joined());
        assert!(second.joined());

        let (a, b) = tokio::join!(first, second);
        let (a, b) = (a.unwrap(), b.unwrap());

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(mock.fetch_count(), 1);

        // A refresh after completion starts a new cycle
        store.refresh().await.unwrap();
        assert_eq!(mock.fetch_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_runs_without_being_awaited() {
        let mock = Arc::new(MockSource::new(log_with_users(4)).with_delay(Duration::from_millis(50)));
        let store = store_with(mock.clone());

        drop(store.refresh());
        assert!(store.snapshot().refreshing);

        tokio::time::sleep(Duration::from_millis(100)).await;

        let state = store.snapshot();
        assert!(!state.refreshing);
        assert_eq!(state.stats().map(|s| s.total_users), Some(4));
        assert_eq!(mock.fetch_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_timeout_is_an_aggregation_error() {
        let mock = Arc::new(MockSource::default().with_delay(Duration::from_secs(60)));
        let store = MetricsStore::new(mock, Aggregator::default(), Duration::from_secs(1));

        let err = store.refresh().await.unwrap_err();

        assert_eq!(err.message(), "Metrics fetch timed out after 1000ms");
        assert_eq!(store.snapshot().error.as_deref(), Some(err.message()));
    }

    #[tokio::test]
    async fn test_loading_only_raised_before_first_snapshot() {
        let store = store_with(Arc::new(StaticSource::new(log_with_users(1))));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        let _subscription = store.subscribe(move |state| {
            sink.lock().push((state.loading, state.refreshing, state.data.is_some()));
        });

        store.refresh().await.unwrap();
        store.refresh().await.unwrap();

        assert_eq!(
            *seen.lock(),
            vec![
                (true, true, false),
                (false, false, true),
                (false, true, true),
                (false, false, true),
            ]
        );
    }

    #[tokio::test]
    async fn test_subscriber_notified_and_unsubscribe_stops_delivery() {
        let store = store_with(Arc::new(StaticSource::new(log_with_users(1))));
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        let subscription = store.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(store.subscriber_count(), 1);

        store.refresh().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        assert!(store.unsubscribe(subscription.id()));
        assert!(!store.unsubscribe(subscription.id()));
        store.refresh().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_dropping_subscription_unsubscribes() {
        let store = store_with(Arc::new(StaticSource::default()));
        let subscription = store.subscribe(|_| {});
        assert_eq!(store.subscriber_count(), 1);

        drop(subscription);
        assert_eq!(store.subscriber_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_discards_late_result() {
        let mock = Arc::new(MockSource::new(log_with_users(9)).with_delay(Duration::from_millis(100)));
        let store = store_with(mock);
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        let _subscription = store.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let pending = store.refresh();
        let after_begin = calls.load(Ordering::SeqCst);
        store.close();

        // The cycle still completes for whoever awaits it
        assert!(pending.await.is_ok());

        let state = store.snapshot();
        assert!(state.data.is_none());
        assert!(!state.refreshing);
        assert!(!state.loading);
        assert_eq!(calls.load(Ordering::SeqCst), after_begin);
        assert_eq!(store.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_close_while_refreshing_clears_pending_flags() {
        let mock = Arc::new(MockSource::new(log_with_users(2)).with_delay(Duration::from_millis(50)));
        let store = store_with(mock);

        let pending = store.refresh();
        assert!(store.snapshot().refreshing);
        store.close();

        let state = store.snapshot();
        assert!(!state.refreshing);
        assert!(!state.loading);

        pending.await.unwrap();
        assert!(!store.snapshot().refreshing);
    }

    #[tokio::test]
    async fn test_begin_for_settled_cycle_is_ignored() {
        let store = store_with(Arc::new(MockSource::default().then_fail("Network unreachable")));
        store.refresh().await.unwrap_err();

        // A begin arriving after its own cycle settled must not resurrect the flags
        store.inner.begin_refresh(1);

        let state = store.snapshot();
        assert!(!state.refreshing);
        assert!(!state.loading);
        assert_eq!(
            DashboardView::resolve(&state),
            DashboardView::Error {
                message: "Network unreachable".to_string()
            }
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_refreshes_settle_all_flags() {
        for _ in 0..50 {
            let store = store_with(Arc::new(JsonFileSource::new("/nonexistent/activity-log.json")));

            let joiner = store.clone();
            let concurrent = tokio::spawn(async move { joiner.refresh().await });
            let first = store.refresh().await;
            let second = concurrent.await.unwrap();

            assert!(first.is_err());
            assert!(second.is_err());

            let state = store.snapshot();
            assert!(!state.refreshing);
            assert!(!state.loading);
            assert!(matches!(DashboardView::resolve(&state), DashboardView::Error { .. }));
        }
    }

    #[derive(Debug, Default)]
    struct PanickingSource {
        fetches: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl MetricsSource for PanickingSource {
        async fn fetch(&self) -> Result<ActivityLog, AggregationError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            panic!("backend client bug");
        }

        fn describe(&self) -> String {
            "panicking source".to_string()
        }
    }

    #[tokio::test]
    async fn test_panicking_cycle_fails_and_store_keeps_refreshing() {
        let source = Arc::new(PanickingSource::default());
        let store = store_with(source.clone());

        let err = store.refresh().await.unwrap_err();
        assert_eq!(err.message(), "Metrics refresh panicked");

        let state = store.snapshot();
        assert!(!state.refreshing);
        assert!(!state.loading);
        assert_eq!(state.error.as_deref(), Some("Metrics refresh panicked"));

        store.refresh().await.unwrap_err();
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unrepresentable_online_window_fails_without_jamming() {
        let mock = Arc::new(MockSource::new(log_with_users(2)));
        let store = MetricsStore::new(
            mock.clone(),
            Aggregator::new(chrono::Duration::MAX),
            Duration::from_secs(5),
        );

        store.refresh().await.unwrap_err();
        store.refresh().await.unwrap_err();

        assert_eq!(mock.fetch_count(), 2);
        let state = store.snapshot();
        assert!(!state.refreshing);
        assert!(state.error.is_some());
    }

    #[tokio::test]
    async fn test_refresh_after_close_fails_without_fetching() {
        let mock = Arc::new(MockSource::default());
        let store = store_with(mock.clone());
        store.close();

        let err = store.refresh().await.unwrap_err();

        assert_eq!(err, AggregationError::closed());
        assert_eq!(mock.fetch_count(), 0);
        assert!(store.snapshot().error.is_none());
    }

    #[tokio::test]
    async fn test_callback_may_unsubscribe_itself() {
        let store = store_with(Arc::new(StaticSource::default()));
        let calls = Arc::new(AtomicUsize::new(0));
        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));

        let handle = store.clone();
        let counter = Arc::clone(&calls);
        let own_id = Arc::clone(&slot);
        let subscription = store.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            if let Some(id) = *own_id.lock() {
                handle.unsubscribe(id);
            }
        });
        *slot.lock() = Some(subscription.id());

        store.refresh().await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_growth_metrics_served_from_memo() {
        let store = store_with(Arc::new(StaticSource::new(log_with_users(3))));
        store.refresh().await.unwrap();

        let state_growth = store.snapshot().growth;
        assert_eq!(store.growth_metrics(), state_growth);
        assert_eq!(store.growth_metrics(), state_growth);
        assert_eq!(store.inner.growth.computations(), 1);
    }

    #[tokio::test]
    async fn test_state_serializes_without_history() {
        let store = store_with(Arc::new(StaticSource::new(log_with_users(2))));
        store.refresh().await.unwrap();

        let json = serde_json::to_value(store.snapshot()).unwrap();

        assert_eq!(json["data"]["stats"]["totalUsers"], 2);
        assert!(json["data"].get("history").is_none());
        assert_eq!(json["loading"], false);
    }
}
