//! Benchmarks for aggregation, growth derivation and view rendering

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::missing_panics_doc,
    missing_docs
)]

use chrono::{Duration, TimeZone, Utc};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use dashboard_core::{
    ActivityLog,
    types::{HealthProbe, MessageRecord, ProjectRecord, RatingRecord, UserRecord, VisitRecord},
};
use dashboard_metrics::{
    Aggregator, DashboardView, MetricsStore, StaticSource, compute_growth, render_text,
};
use std::hint::black_box;
use std::sync::Arc;

/// Build a log with `n` users and proportional other records
fn activity_log(n: usize) -> ActivityLog {
    let base = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
    let at = |i: usize| base + Duration::minutes(i64::try_from(i).unwrap_or(i64::MAX) * 7);

    ActivityLog {
        users: (0..n)
            .map(|i| UserRecord::registered(at(i)).seen_at(at(i + 30)))
            .collect(),
        projects: (0..n / 4)
            .map(|i| {
                if i % 3 == 0 {
                    ProjectRecord::completed(at(i), at(i + 100))
                } else {
                    ProjectRecord::in_progress(at(i), (i % 100) as f64)
                }
            })
            .collect(),
        visits: (0..n * 5).map(|i| VisitRecord { visited_at: at(i) }).collect(),
        ratings: (0..n / 2)
            .map(|i| RatingRecord {
                score: (i % 6) as f64,
                rated_at: at(i),
            })
            .collect(),
        messages: (0..n * 2).map(|i| MessageRecord { sent_at: at(i) }).collect(),
        health_probes: (0..n / 10)
            .map(|i| HealthProbe {
                probed_at: at(i),
                healthy: i % 17 != 0,
            })
            .collect(),
        ..ActivityLog::default()
    }
}

/// Benchmark aggregation across log sizes
fn bench_aggregate(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregate");
    let now = Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap();
    let aggregator = Aggregator::default();

    for size in [100, 1_000, 10_000] {
        let log = activity_log(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("users", size), &log, |b, log| {
            b.iter(|| aggregator.aggregate(black_box(log), now));
        });
    }

    group.finish();
}

/// Benchmark growth derivation
fn bench_growth(c: &mut Criterion) {
    let mut group = c.benchmark_group("growth");
    let now = Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap();

    for size in [1_000, 10_000] {
        let log = activity_log(size);
        let stats = Aggregator::default().aggregate(&log, now).unwrap();
        group.bench_with_input(BenchmarkId::new("compute", size), &log, |b, log| {
            b.iter(|| compute_growth(black_box(&stats), black_box(log), now));
        });
    }

    group.finish();
}

/// Benchmark a full refresh cycle plus rendering
fn bench_refresh_and_render(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let store = runtime.block_on(async {
        MetricsStore::new(
            Arc::new(StaticSource::new(activity_log(1_000))),
            Aggregator::default(),
            std::time::Duration::from_secs(5),
        )
    });

    c.bench_function("refresh_cycle", |b| {
        b.to_async(&runtime).iter(|| async { store.refresh().await.unwrap() });
    });

    runtime.block_on(async { store.refresh().await }).unwrap();
    let state = store.snapshot();
    c.bench_function("render_text", |b| {
        b.iter(|| render_text(&DashboardView::resolve(black_box(&state))));
    });
}

criterion_group!(benches, bench_aggregate, bench_growth, bench_refresh_and_render);
criterion_main!(benches);
