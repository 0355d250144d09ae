//! Growth calculator
//!
//! Derives month-over-month and ratio metrics from a snapshot and its
//! activity history. [`compute_growth`] is pure; [`GrowthCalculator`] adds a
//! one-entry memo keyed by snapshot revision so repeated reads of the same
//! snapshot do not rescan the history. A revision fixes the evaluation time,
//! so it also fixes the month.

use crate::store::Snapshot;
use chrono::{DateTime, Utc};
use dashboard_core::{
    ActivityLog, DashboardStats, GrowthMetrics,
    utils::{clamp_percentage, in_window, mean, percentage, start_of_month},
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

/// Derive growth metrics for the calendar month containing `now`
///
/// The user growth rate compares `stats.total_users` with the number of users
/// registered before the month started and is `0` when there were none.
/// Monthly counts cover `[start of month, now)`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn compute_growth(
    stats: &DashboardStats,
    history: &ActivityLog,
    now: DateTime<Utc>,
) -> GrowthMetrics {
    let month_start = start_of_month(now);

    let users_at_period_start = history
        .users
        .iter()
        .filter(|u| u.registered_at < month_start)
        .count() as u64;

    let user_growth_rate = if users_at_period_start == 0 {
        0.0
    } else {
        (stats.total_users as f64 - users_at_period_start as f64) / users_at_period_start as f64
            * 100.0
    };

    let new_users_this_month = history
        .users
        .iter()
        .filter(|u| in_window(u.registered_at, month_start, now))
        .count() as u64;

    let projects_completed_this_month = history
        .projects
        .iter()
        .filter_map(|p| p.completed_at)
        .filter(|done| in_window(*done, month_start, now))
        .count() as u64;

    let average_progress = mean(history.projects.iter().map(|p| {
        if p.is_completed() {
            100.0
        } else {
            clamp_percentage(p.progress)
        }
    }))
    .map_or(0.0, clamp_percentage);

    let completed = history.projects.iter().filter(|p| p.is_completed()).count() as u64;

    GrowthMetrics {
        user_growth_rate,
        projects_completed_this_month,
        new_users_this_month,
        average_progress,
        completion_rate: percentage(completed, history.projects.len() as u64),
    }
}

#[derive(Debug)]
struct Memo {
    revision: u64,
    metrics: GrowthMetrics,
}

/// Memoizing wrapper around [`compute_growth`]
#[derive(Debug, Default)]
pub struct GrowthCalculator {
    last: Mutex<Option<Memo>>,
    computations: AtomicU64,
}

impl GrowthCalculator {
    /// Create a calculator with an empty memo
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Growth metrics for `snapshot`, evaluated at its aggregation time
    pub fn calculate(&self, snapshot: &Snapshot) -> GrowthMetrics {
        let mut last = self.last.lock();

        if let Some(memo) = last.as_ref()
            && memo.revision == snapshot.revision
        {
            trace!(revision = snapshot.revision, "Growth metrics memo hit");
            return memo.metrics;
        }

        let metrics = compute_growth(&snapshot.stats, &snapshot.history, snapshot.aggregated_at);
        self.computations.fetch_add(1, Ordering::Relaxed);
        *last = Some(Memo {
            revision: snapshot.revision,
            metrics,
        });

        metrics
    }

    /// Number of times the metrics were actually computed
    #[must_use]
    pub fn computations(&self) -> u64 {
        self.computations.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
#[allow(
    clippy::missing_panics_doc,
    clippy::float_cmp,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use dashboard_core::{
        types::{ProjectRecord, UserRecord},
        utils::round_to,
    };
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap()
    }

    fn last_month() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 10, 8, 0, 0).unwrap()
    }

    fn this_month() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 3, 8, 0, 0).unwrap()
    }

    fn users(before: usize, during: usize) -> Vec<UserRecord> {
        std::iter::repeat_with(|| UserRecord::registered(last_month()))
            .take(before)
            .chain(std::iter::repeat_with(|| UserRecord::registered(this_month())).take(during))
            .collect()
    }

    fn stats_with_users(total_users: u64) -> DashboardStats {
        DashboardStats {
            total_users,
            ..DashboardStats::default()
        }
    }

    #[test]
    fn test_user_growth_rate_from_month_start() {
        let history = ActivityLog {
            users: users(900, 100),
            ..ActivityLog::default()
        };

        let growth = compute_growth(&stats_with_users(1000), &history, now());

        assert_eq!(round_to(growth.user_growth_rate, 1), 11.1);
        assert_eq!(growth.new_users_this_month, 100);
    }

    #[test]
    fn test_user_growth_rate_zero_baseline() {
        let history = ActivityLog {
            users: users(0, 25),
            ..ActivityLog::default()
        };

        let growth = compute_growth(&stats_with_users(25), &history, now());

        assert_eq!(growth.user_growth_rate, 0.0);
        assert!(growth.user_growth_rate.is_finite());
        assert_eq!(growth.new_users_this_month, 25);
    }

    #[test]
    fn test_negative_growth_when_users_left() {
        let history = ActivityLog {
            users: users(200, 0),
            ..ActivityLog::default()
        };

        let growth = compute_growth(&stats_with_users(150), &history, now());
        assert_eq!(growth.user_growth_rate, -25.0);
    }

    #[test]
    fn test_monthly_window_excludes_future_events() {
        let later = now() + chrono::Duration::days(2);
        let history = ActivityLog {
            users: vec![UserRecord::registered(later)],
            projects: vec![ProjectRecord::completed(last_month(), later)],
            ..ActivityLog::default()
        };

        let growth = compute_growth(&stats_with_users(1), &history, now());

        assert_eq!(growth.new_users_this_month, 0);
        assert_eq!(growth.projects_completed_this_month, 0);
    }

    #[test]
    fn test_project_ratios() {
        let history = ActivityLog {
            projects: vec![
                ProjectRecord::completed(last_month(), this_month()),
                ProjectRecord::completed(last_month(), last_month()),
                ProjectRecord::in_progress(last_month(), 50.0),
                ProjectRecord::in_progress(this_month(), 130.0),
            ],
            ..ActivityLog::default()
        };

        let growth = compute_growth(&DashboardStats::default(), &history, now());

        assert_eq!(growth.projects_completed_this_month, 1);
        assert_eq!(growth.completion_rate, 50.0);
        // 100 + 100 + 50 + clamped 100
        assert_eq!(growth.average_progress, 87.5);
    }

    #[test]
    fn test_empty_history_is_all_zero() {
        let growth = compute_growth(&DashboardStats::default(), &ActivityLog::default(), now());
        assert_eq!(growth, GrowthMetrics::default());
    }

    #[test]
    fn test_compute_growth_is_idempotent() {
        let history = ActivityLog {
            users: users(40, 8),
            projects: vec![ProjectRecord::in_progress(this_month(), 30.0)],
            ..ActivityLog::default()
        };
        let stats = stats_with_users(48);

        assert_eq!(
            compute_growth(&stats, &history, now()),
            compute_growth(&stats, &history, now())
        );
    }

    #[test]
    fn test_calculator_memoizes_by_revision() {
        let calculator = GrowthCalculator::new();
        let snapshot = Snapshot {
            revision: 1,
            stats: stats_with_users(1000),
            history: Arc::new(ActivityLog {
                users: users(900, 100),
                ..ActivityLog::default()
            }),
            aggregated_at: now(),
        };

        let first = calculator.calculate(&snapshot);
        let second = calculator.calculate(&snapshot);
        assert_eq!(first, second);
        assert_eq!(calculator.computations(), 1);

        let next = Snapshot {
            revision: 2,
            ..snapshot
        };
        calculator.calculate(&next);
        assert_eq!(calculator.computations(), 2);
    }
}
