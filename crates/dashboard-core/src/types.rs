//! Core data types for the dashboard metrics
//!
//! `DashboardStats` and `GrowthMetrics` form the data contract between the
//! aggregation backend and every consumer. `ActivityLog` carries the raw
//! records a snapshot is aggregated from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Aggregate platform metrics at one point in time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    /// Published pages
    pub total_pages: u64,

    /// Registered users
    pub total_users: u64,

    /// Projects not yet completed
    pub active_projects: u64,

    /// Visits since the start of the calendar month
    pub monthly_visitors: u64,

    /// Share of healthy probes, in percent
    #[validate(range(min = 0.0, max = 100.0))]
    pub system_uptime: f64,

    /// Mean course rating on a 0-5 scale
    #[validate(range(min = 0.0, max = 5.0))]
    pub average_rating: f64,

    /// Share of completed projects, in percent
    #[validate(range(min = 0.0, max = 100.0))]
    pub completion_rate: f64,

    /// Users seen within the online window
    pub online_users: u64,

    /// Messages exchanged on the platform
    pub messages_exchanged: u64,
}

impl DashboardStats {
    /// Check the range invariants of the snapshot
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Validation`] if a percentage or the rating is
    /// out of range.
    pub fn check_ranges(&self) -> crate::Result<()> {
        self.validate().map_err(|e| crate::Error::Validation {
            field: "dashboard_stats".to_string(),
            message: e.to_string(),
        })
    }
}

/// Period-over-period metrics derived from a snapshot and its history
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrowthMetrics {
    /// Signed user growth since the start of the month, in percent
    pub user_growth_rate: f64,

    /// Projects completed since the start of the month
    pub projects_completed_this_month: u64,

    /// Users registered since the start of the month
    pub new_users_this_month: u64,

    /// Mean project progress, in percent
    pub average_progress: f64,

    /// Share of completed projects, in percent
    pub completion_rate: f64,
}

/// A registered user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    /// User identifier
    pub id: Uuid,
    /// Registration time
    pub registered_at: DateTime<Utc>,
    /// Last activity, if the user was ever seen
    #[serde(default)]
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl UserRecord {
    /// User registered at `at` and never seen since
    #[must_use]
    pub fn registered(at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            registered_at: at,
            last_seen_at: None,
        }
    }

    /// Set the last activity time
    #[must_use]
    pub const fn seen_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_seen_at = Some(at);
        self
    }
}

/// A learner project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRecord {
    /// Project identifier
    pub id: Uuid,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Progress in percent
    #[serde(default)]
    pub progress: f64,
    /// Completion time, if completed
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ProjectRecord {
    /// Project in progress
    #[must_use]
    pub fn in_progress(created_at: DateTime<Utc>, progress: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at,
            progress,
            completed_at: None,
        }
    }

    /// Project completed at `completed_at`
    #[must_use]
    pub fn completed(created_at: DateTime<Utc>, completed_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at,
            progress: 100.0,
            completed_at: Some(completed_at),
        }
    }

    /// Whether the project has been completed
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }
}

/// A published content page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRecord {
    /// Page identifier
    pub id: Uuid,
    /// Publication time
    pub published_at: DateTime<Utc>,
}

/// A single site visit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitRecord {
    /// Visit time
    pub visited_at: DateTime<Utc>,
}

/// A course rating
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingRecord {
    /// Score on a 0-5 scale
    pub score: f64,
    /// Rating time
    pub rated_at: DateTime<Utc>,
}

/// A message sent between users
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    /// Send time
    pub sent_at: DateTime<Utc>,
}

/// Result of one availability probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthProbe {
    /// Probe time
    pub probed_at: DateTime<Utc>,
    /// Whether the platform answered
    pub healthy: bool,
}

/// Raw records a snapshot is aggregated from
///
/// Also serves as the history the growth metrics are derived from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityLog {
    /// Registered users
    #[serde(default)]
    pub users: Vec<UserRecord>,
    /// Learner projects
    #[serde(default)]
    pub projects: Vec<ProjectRecord>,
    /// Published pages
    #[serde(default)]
    pub pages: Vec<PageRecord>,
    /// Site visits
    #[serde(default)]
    pub visits: Vec<VisitRecord>,
    /// Course ratings
    #[serde(default)]
    pub ratings: Vec<RatingRecord>,
    /// Messages
    #[serde(default)]
    pub messages: Vec<MessageRecord>,
    /// Availability probes
    #[serde(default)]
    pub health_probes: Vec<HealthProbe>,
}

impl ActivityLog {
    /// Whether the log holds no records at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
            && self.projects.is_empty()
            && self.pages.is_empty()
            && self.visits.is_empty()
            && self.ratings.is_empty()
            && self.messages.is_empty()
            && self.health_probes.is_empty()
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
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn sample_stats() -> DashboardStats {
        DashboardStats {
            total_pages: 42,
            total_users: 1_250,
            active_projects: 17,
            monthly_visitors: 8_400,
            system_uptime: 99.9,
            average_rating: 4.6,
            completion_rate: 72.5,
            online_users: 31,
            messages_exchanged: 512,
        }
    }

    #[test]
    fn test_stats_serialize_camel_case() {
        let json = serde_json::to_value(sample_stats()).unwrap();

        assert_eq!(json["totalPages"], 42);
        assert_eq!(json["monthlyVisitors"], 8_400);
        assert_eq!(json["systemUptime"], 99.9);
        assert!(json.get("total_pages").is_none());
    }

    #[test]
    fn test_stats_check_ranges_accepts_valid_snapshot() {
        assert!(sample_stats().check_ranges().is_ok());
        assert!(DashboardStats::default().check_ranges().is_ok());
    }

    #[test]
    fn test_stats_check_ranges_rejects_out_of_range() {
        let mut stats = sample_stats();
        stats.system_uptime = 100.5;
        assert!(matches!(
            stats.check_ranges(),
            Err(crate::Error::Validation { .. })
        ));

        let mut stats = sample_stats();
        stats.average_rating = 5.2;
        assert!(stats.check_ranges().is_err());

        let mut stats = sample_stats();
        stats.completion_rate = -1.0;
        assert!(stats.check_ranges().is_err());
    }

    #[test]
    fn test_activity_log_defaults_missing_sections() {
        let log: ActivityLog = serde_json::from_str(
            r#"{"users":[{"id":"7f1c4c3e-2f4e-4a55-9c7b-1e0c5b2a9d10","registeredAt":"2024-03-02T10:00:00Z"}]}"#,
        )
        .unwrap();

        assert_eq!(log.users.len(), 1);
        assert!(log.users[0].last_seen_at.is_none());
        assert!(log.projects.is_empty());
        assert!(log.health_probes.is_empty());
        assert!(!log.is_empty());
        assert!(ActivityLog::default().is_empty());
    }

    #[test]
    fn test_project_record_constructors() {
        let created = Utc.with_ymd_and_hms(2024, 2, 1, 9, 0, 0).unwrap();
        let done = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();

        let open = ProjectRecord::in_progress(created, 40.0);
        assert!(!open.is_completed());
        assert_eq!(open.progress, 40.0);

        let closed = ProjectRecord::completed(created, done);
        assert!(closed.is_completed());
        assert_eq!(closed.progress, 100.0);
        assert_eq!(closed.completed_at, Some(done));
    }

    #[test]
    fn test_user_record_seen_at() {
        let registered = Utc.with_ymd_and_hms(2024, 1, 10, 8, 0, 0).unwrap();
        let seen = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();

        let user = UserRecord::registered(registered).seen_at(seen);
        assert_eq!(user.registered_at, registered);
        assert_eq!(user.last_seen_at, Some(seen));
    }

    #[test]
    fn test_growth_metrics_default_is_zeroed() {
        let growth = GrowthMetrics::default();
        assert_eq!(growth.user_growth_rate, 0.0);
        assert_eq!(growth.new_users_this_month, 0);
        assert_eq!(growth.projects_completed_this_month, 0);
    }
}
