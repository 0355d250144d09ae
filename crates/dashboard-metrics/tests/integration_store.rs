//! Integration tests for the metrics store, growth metrics and view
#![forbid(unsafe_code)]
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::missing_panics_doc,
    missing_docs
)]

mod common;

use common::*;
use dashboard_core::{ActivityLog, Config, utils::round_to};
use dashboard_metrics::{
    Aggregator, DashboardView, JsonFileSource, MetricsStore, RefreshService, StaticSource,
    mock::MockSource, render_text,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::tempdir;
use tokio_test::{assert_pending, assert_ready, task};

fn store_with(source: Arc<dyn dashboard_metrics::MetricsSource>) -> MetricsStore {
    MetricsStore::new(source, Aggregator::default(), Duration::from_secs(5))
}

#[tokio::test]
async fn test_growth_scenario_from_activity_log_file() {
    init_test_logging();

    let dir = tempdir().unwrap();
    let path = write_activity_log(dir.path(), &ActivityLogFixtures::growth_scenario()).unwrap();

    let mut config = Config::default();
    config.source.activity_log = path;
    let store = dashboard_metrics::init_store(&config);

    store.refresh().await.unwrap();

    let state = store.snapshot();
    assert_eq!(state.stats().map(|s| s.total_users), Some(1000));

    let growth = store.growth_metrics().unwrap();
    assert_eq!(round_to(growth.user_growth_rate, 1), 11.1);
    assert_eq!(growth.new_users_this_month, 100);

    let text = render_text(&DashboardView::resolve(&state));
    assert!(text.contains("+11.1%"));
    assert!(text.contains("1,000"));
    assert!(text.contains("+100 this month"));
}

#[tokio::test]
async fn test_missing_activity_log_shows_error_view() {
    init_test_logging();

    let store = store_with(Arc::new(JsonFileSource::new("/nonexistent/activity-log.json")));
    assert_eq!(DashboardView::resolve(&store.snapshot()), DashboardView::Loading);

    let err = store.refresh().await.unwrap_err();

    let view = DashboardView::resolve(&store.snapshot());
    assert_eq!(
        view,
        DashboardView::Error {
            message: err.message().to_string()
        }
    );
}

#[tokio::test]
async fn test_stale_data_suppressed_while_error_is_set() {
    init_test_logging();

    let mock = Arc::new(MockSource::new(ActivityLogFixtures::populated()));
    let store = store_with(mock.clone());

    store.refresh().await.unwrap();
    assert!(matches!(
        DashboardView::resolve(&store.snapshot()),
        DashboardView::Populated(_)
    ));

    mock.push_failure("Network unreachable");
    store.refresh().await.unwrap_err();

    let state = store.snapshot();
    assert!(state.data.is_some());
    assert_eq!(
        DashboardView::resolve(&state),
        DashboardView::Error {
            message: "Network unreachable".to_string()
        }
    );

    store.refresh().await.unwrap();
    assert!(matches!(
        DashboardView::resolve(&store.snapshot()),
        DashboardView::Populated(_)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_refreshes_fetch_once() {
    init_test_logging();

    let mock = Arc::new(
        MockSource::new(ActivityLogFixtures::populated()).with_delay(Duration::from_millis(250)),
    );
    let store = store_with(mock.clone());

    let mut first = task::spawn(store.refresh());
    let mut second = task::spawn(store.refresh());
    assert_pending!(first.poll());
    assert_pending!(second.poll());

    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(first.is_woken());
    let a = assert_ready!(first.poll()).unwrap();
    let b = assert_ready!(second.poll()).unwrap();

    assert_eq!(a.revision, b.revision);
    assert_eq!(mock.fetch_count(), 1);
}

#[tokio::test]
async fn test_no_callback_after_unsubscribe_or_close() {
    init_test_logging();

    let source = Arc::new(StaticSource::new(ActivityLogFixtures::populated()));
    let store = store_with(source);

    let kept_calls = Arc::new(AtomicUsize::new(0));
    let dropped_calls = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&kept_calls);
    let _kept = store.subscribe(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let counter = Arc::clone(&dropped_calls);
    let dropped = store.subscribe(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    store.refresh().await.unwrap();
    assert_eq!(kept_calls.load(Ordering::SeqCst), 2);
    assert_eq!(dropped_calls.load(Ordering::SeqCst), 2);

    drop(dropped);
    store.refresh().await.unwrap();
    assert_eq!(kept_calls.load(Ordering::SeqCst), 4);
    assert_eq!(dropped_calls.load(Ordering::SeqCst), 2);

    store.close();
    store.refresh().await.unwrap_err();
    assert_eq!(kept_calls.load(Ordering::SeqCst), 4);
    assert_eq!(store.subscriber_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_service_pushes_new_snapshots_to_subscribers() {
    init_test_logging();

    let source = Arc::new(StaticSource::new(ActivityLog::default()));
    let store = store_with(source.clone());

    let views = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&views);
    let _subscription = store.subscribe(move |state| {
        if !state.refreshing {
            sink.lock().push(state.stats().map(|s| s.total_users));
        }
    });

    let mut refresh = Config::default().refresh;
    refresh.interval_seconds = 10;
    let service = RefreshService::new(store.clone(), refresh);
    service.start().unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;
    source.replace(ActivityLogFixtures::populated());
    tokio::time::sleep(Duration::from_secs(10)).await;

    service.stop().await.unwrap();
    store.close();

    assert_eq!(*views.lock(), vec![Some(0), Some(3)]);
    assert_eq!(service.metrics().refreshes_completed, 2);
}
