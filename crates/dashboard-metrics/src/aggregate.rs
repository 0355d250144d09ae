//! Aggregation of raw activity records into a [`DashboardStats`] snapshot

use chrono::{DateTime, Utc};
use dashboard_core::{
    ActivityLog, AggregationError, DashboardStats,
    utils::{clamp_finite, clamp_percentage, in_window, mean, percentage, start_of_month},
};
use tracing::{debug, warn};

/// Maximum course rating
pub const MAX_RATING: f64 = 5.0;

/// Turns an [`ActivityLog`] into dashboard statistics
#[derive(Debug, Clone, Copy)]
pub struct Aggregator {
    online_window: chrono::Duration,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new(chrono::Duration::minutes(5))
    }
}

fn count(n: usize) -> u64 {
    u64::try_from(n).unwrap_or(u64::MAX)
}

impl Aggregator {
    /// Create an aggregator counting users seen within `online_window` as online
    #[must_use]
    pub const fn new(online_window: chrono::Duration) -> Self {
        Self { online_window }
    }

    /// Compute a snapshot of `log` as of `now`
    ///
    /// Out-of-range ratings and percentages are clamped with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`AggregationError`] if the log contains non-finite ratings or
    /// progress values.
    pub fn aggregate(
        &self,
        log: &ActivityLog,
        now: DateTime<Utc>,
    ) -> Result<DashboardStats, AggregationError> {
        Self::reject_non_finite(log)?;

        let month_start = start_of_month(now);

        let out_of_range = log
            .ratings
            .iter()
            .filter(|r| !(0.0..=MAX_RATING).contains(&r.score))
            .count();
        if out_of_range > 0 {
            warn!(count = out_of_range, "Clamping out-of-range ratings");
        }

        let completed = count(log.projects.iter().filter(|p| p.is_completed()).count());
        let total_projects = count(log.projects.len());

        let healthy = count(log.health_probes.iter().filter(|p| p.healthy).count());
        let online_since = now.checked_sub_signed(self.online_window).ok_or_else(|| {
            AggregationError::malformed(format!(
                "online window of {}s reaches past the supported time range",
                self.online_window.num_seconds()
            ))
        })?;

        let stats = DashboardStats {
            total_pages: count(log.pages.len()),
            total_users: count(log.users.len()),
            active_projects: total_projects - completed,
            monthly_visitors: count(
                log.visits
                    .iter()
                    .filter(|v| in_window(v.visited_at, month_start, now))
                    .count(),
            ),
            system_uptime: percentage(healthy, count(log.health_probes.len())),
            average_rating: clamp_finite(
                mean(
                    log.ratings
                        .iter()
                        .map(|r| clamp_finite(r.score, 0.0, MAX_RATING)),
                )
                .unwrap_or(0.0),
                0.0,
                MAX_RATING,
            ),
            completion_rate: clamp_percentage(percentage(completed, total_projects)),
            online_users: count(
                log.users
                    .iter()
                    .filter_map(|u| u.last_seen_at)
                    .filter(|seen| online_since <= *seen && *seen <= now)
                    .count(),
            ),
            messages_exchanged: count(log.messages.len()),
        };

        stats
            .check_ranges()
            .map_err(|e| AggregationError::malformed(e.to_string()))?;

        debug!(
            total_users = stats.total_users,
            total_pages = stats.total_pages,
            active_projects = stats.active_projects,
            online_users = stats.online_users,
            "Aggregated dashboard snapshot"
        );

        Ok(stats)
    }

    fn reject_non_finite(log: &ActivityLog) -> Result<(), AggregationError> {
        if let Some(rating) = log.ratings.iter().find(|r| !r.score.is_finite()) {
            return Err(AggregationError::malformed(format!(
                "rating at {} is not a finite number",
                rating.rated_at
            )));
        }
        if let Some(project) = log.projects.iter().find(|p| !p.progress.is_finite()) {
            return Err(AggregationError::malformed(format!(
                "project {} has non-finite progress",
                project.id
            )));
        }
        Ok(())
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
    use dashboard_core::types::{
        HealthProbe, MessageRecord, PageRecord, ProjectRecord, RatingRecord, UserRecord,
        VisitRecord,
    };
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use uuid::Uuid;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap()
    }

    fn last_month() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 20, 9, 0, 0).unwrap()
    }

    fn this_month() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 9, 0, 0).unwrap()
    }

    fn populated_log() -> ActivityLog {
        let now = now();
        ActivityLog {
            users: vec![
                UserRecord::registered(last_month()).seen_at(now - chrono::Duration::minutes(2)),
                UserRecord::registered(last_month()).seen_at(now - chrono::Duration::hours(3)),
                UserRecord::registered(this_month()),
            ],
            projects: vec![
                ProjectRecord::in_progress(last_month(), 40.0),
                ProjectRecord::completed(last_month(), this_month()),
                ProjectRecord::completed(last_month(), last_month()),
                ProjectRecord::in_progress(this_month(), 10.0),
            ],
            pages: vec![
                PageRecord {
                    id: Uuid::new_v4(),
                    published_at: last_month(),
                },
                PageRecord {
                    id: Uuid::new_v4(),
                    published_at: this_month(),
                },
            ],
            visits: vec![
                VisitRecord {
                    visited_at: last_month(),
                },
                VisitRecord {
                    visited_at: this_month(),
                },
                VisitRecord {
                    visited_at: now - chrono::Duration::minutes(1),
                },
            ],
            ratings: vec![
                RatingRecord {
                    score: 4.0,
                    rated_at: this_month(),
                },
                RatingRecord {
                    score: 5.0,
                    rated_at: this_month(),
                },
            ],
            messages: vec![
                MessageRecord { sent_at: this_month() };
                7
            ],
            health_probes: vec![
                HealthProbe {
                    probed_at: this_month(),
                    healthy: true,
                },
                HealthProbe {
                    probed_at: this_month(),
                    healthy: true,
                },
                HealthProbe {
                    probed_at: this_month(),
                    healthy: true,
                },
                HealthProbe {
                    probed_at: this_month(),
                    healthy: false,
                },
            ],
        }
    }

    #[test]
    fn test_aggregate_populated_log() {
        let stats = Aggregator::default()
            .aggregate(&populated_log(), now())
            .unwrap();

        assert_eq!(
            stats,
            DashboardStats {
                total_pages: 2,
                total_users: 3,
                active_projects: 2,
                monthly_visitors: 2,
                system_uptime: 75.0,
                average_rating: 4.5,
                completion_rate: 50.0,
                online_users: 1,
                messages_exchanged: 7,
            }
        );
    }

    #[test]
    fn test_aggregate_empty_log_is_all_zero() {
        let stats = Aggregator::default()
            .aggregate(&ActivityLog::default(), now())
            .unwrap();

        assert_eq!(stats, DashboardStats::default());
    }

    #[test]
    fn test_online_window_is_configurable() {
        let stats = Aggregator::new(chrono::Duration::hours(4))
            .aggregate(&populated_log(), now())
            .unwrap();

        assert_eq!(stats.online_users, 2);
    }

    #[test]
    fn test_unrepresentable_online_window_is_an_error() {
        let err = Aggregator::new(chrono::Duration::MAX)
            .aggregate(&populated_log(), now())
            .unwrap_err();

        assert!(err.message().starts_with("Malformed metrics data"));
        assert!(err.message().contains("online window"));
    }

    #[test]
    fn test_out_of_range_ratings_are_clamped() {
        let log = ActivityLog {
            ratings: vec![
                RatingRecord {
                    score: 9.0,
                    rated_at: this_month(),
                },
                RatingRecord {
                    score: -3.0,
                    rated_at: this_month(),
                },
            ],
            ..ActivityLog::default()
        };

        let stats = Aggregator::default().aggregate(&log, now()).unwrap();
        assert_eq!(stats.average_rating, 2.5);
    }

    #[test]
    fn test_non_finite_rating_is_rejected() {
        let log = ActivityLog {
            ratings: vec![RatingRecord {
                score: f64::NAN,
                rated_at: this_month(),
            }],
            ..ActivityLog::default()
        };

        let err = Aggregator::default().aggregate(&log, now()).unwrap_err();
        assert!(err.message().starts_with("Malformed metrics data"));
    }

    #[test]
    fn test_non_finite_progress_is_rejected() {
        let log = ActivityLog {
            projects: vec![ProjectRecord::in_progress(this_month(), f64::INFINITY)],
            ..ActivityLog::default()
        };

        assert!(Aggregator::default().aggregate(&log, now()).is_err());
    }

    proptest! {
        #[test]
        fn prop_snapshot_ranges_hold(
            scores in proptest::collection::vec(-10.0_f64..10.0, 0..20),
            probes in proptest::collection::vec(any::<bool>(), 0..20),
            completions in proptest::collection::vec(any::<bool>(), 0..20),
        ) {
            let log = ActivityLog {
                ratings: scores
                    .into_iter()
                    .map(|score| RatingRecord { score, rated_at: this_month() })
                    .collect(),
                health_probes: probes
                    .into_iter()
                    .map(|healthy| HealthProbe { probed_at: this_month(), healthy })
                    .collect(),
                projects: completions
                    .into_iter()
                    .map(|done| if done {
                        ProjectRecord::completed(last_month(), this_month())
                    } else {
                        ProjectRecord::in_progress(last_month(), 50.0)
                    })
                    .collect(),
                ..ActivityLog::default()
            };

            let stats = Aggregator::default().aggregate(&log, now()).unwrap();
            prop_assert!((0.0..=100.0).contains(&stats.system_uptime));
            prop_assert!((0.0..=100.0).contains(&stats.completion_rate));
            prop_assert!((0.0..=MAX_RATING).contains(&stats.average_rating));
        }
    }
}
