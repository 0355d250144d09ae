//! Common test utilities and fixtures for integration tests

#![allow(dead_code)]
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::missing_panics_doc,
    missing_docs
)]

use chrono::{DateTime, Duration, Utc};
use dashboard_core::{
    ActivityLog,
    types::{HealthProbe, MessageRecord, ProjectRecord, RatingRecord, UserRecord, VisitRecord},
    utils::start_of_month,
};
use std::path::{Path, PathBuf};
use std::sync::Once;

static INIT_LOGGER: Once = Once::new();

/// Initialize test logging (call once per test process)
pub fn init_test_logging() {
    INIT_LOGGER.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("debug")
            .with_test_writer()
            .try_init();
    });
}

/// Sample activity logs relative to the current month
pub struct ActivityLogFixtures;

impl ActivityLogFixtures {
    fn before_month() -> DateTime<Utc> {
        start_of_month(Utc::now()) - Duration::days(3)
    }

    fn in_month() -> DateTime<Utc> {
        start_of_month(Utc::now())
    }

    /// 900 users registered before this month and 100 during it
    pub fn growth_scenario() -> ActivityLog {
        let users = std::iter::repeat_with(|| UserRecord::registered(Self::before_month()))
            .take(900)
            .chain(std::iter::repeat_with(|| UserRecord::registered(Self::in_month())).take(100))
            .collect();

        ActivityLog {
            users,
            ..ActivityLog::default()
        }
    }

    /// A small but fully populated log
    pub fn populated() -> ActivityLog {
        let now = Utc::now();
        ActivityLog {
            users: vec![
                UserRecord::registered(Self::before_month()).seen_at(now - Duration::minutes(1)),
                UserRecord::registered(Self::before_month()),
                UserRecord::registered(Self::in_month()),
            ],
            projects: vec![
                ProjectRecord::completed(Self::before_month(), Self::in_month()),
                ProjectRecord::in_progress(Self::before_month(), 60.0),
            ],
            visits: vec![VisitRecord {
                visited_at: Self::in_month(),
            }],
            ratings: vec![RatingRecord {
                score: 4.0,
                rated_at: Self::in_month(),
            }],
            messages: vec![
                MessageRecord {
                    sent_at: Self::in_month(),
                };
                3
            ],
            health_probes: vec![HealthProbe {
                probed_at: Self::in_month(),
                healthy: true,
            }],
            ..ActivityLog::default()
        }
    }
}

/// Write an activity log document into `dir`
pub fn write_activity_log(dir: &Path, log: &ActivityLog) -> std::io::Result<PathBuf> {
    let path = dir.join("activity-log.json");
    std::fs::write(&path, serde_json::to_vec_pretty(log)?)?;
    Ok(path)
}
