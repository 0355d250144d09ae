//! Presentation of the store state
//!
//! [`DashboardView::resolve`] picks exactly one presentation state from a
//! [`StoreState`]; [`render_text`] turns any of them into a terminal dashboard.

use crate::{aggregate::MAX_RATING, store::StoreState};
use chrono::{DateTime, Utc};
use dashboard_core::{
    DashboardStats, GrowthMetrics,
    utils::{clamp_percentage, format_signed_percent, group_thousands},
};
use serde::Serialize;
use std::fmt::Write;

/// Width of the progress bars drawn by [`render_text`]
const BAR_WIDTH: usize = 20;

/// The single state a dashboard is presented in
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum DashboardView {
    /// Waiting for the first snapshot
    Loading,

    /// The last refresh failed
    Error {
        /// Failure message, shown verbatim
        message: String,
    },

    /// Nothing has been aggregated yet
    Empty,

    /// A snapshot is available
    Populated(Box<PopulatedDashboard>),
}

/// Headline number with a short caption
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatCard {
    /// Card title
    pub label: String,
    /// Formatted value
    pub value: String,
    /// Secondary line under the value
    pub caption: String,
}

/// Percentage-style metric drawn as a bar
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressBar {
    /// Bar title
    pub label: String,
    /// Formatted value shown next to the bar
    pub display: String,
    /// Fill in `[0, 100]`
    pub fill_percent: f64,
}

/// Volatile counter in the real-time panel
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RealtimeMetric {
    /// Metric name
    pub label: String,
    /// Formatted value
    pub value: String,
}

/// Line in the recent-activity feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityItem {
    /// Human-readable summary
    pub message: String,
}

/// Everything the populated dashboard shows
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PopulatedDashboard {
    /// Headline cards
    pub cards: Vec<StatCard>,
    /// Performance bars
    pub performance: Vec<ProgressBar>,
    /// Real-time panel
    pub realtime: Vec<RealtimeMetric>,
    /// Recent-activity feed
    pub activity: Vec<ActivityItem>,
    /// Completion time of the snapshot
    pub last_updated: Option<DateTime<Utc>>,
}

impl DashboardView {
    /// Resolve the presentation state
    ///
    /// Loading wins over an error, an error wins over missing or stale data.
    #[must_use]
    pub fn resolve(state: &StoreState) -> Self {
        if state.loading {
            return Self::Loading;
        }
        if let Some(message) = &state.error {
            return Self::Error {
                message: message.clone(),
            };
        }
        match &state.data {
            None => Self::Empty,
            Some(snapshot) => Self::Populated(Box::new(PopulatedDashboard::build(
                &snapshot.stats,
                &state.growth.unwrap_or_default(),
                state.last_updated,
            ))),
        }
    }
}

impl PopulatedDashboard {
    /// Lay out the populated dashboard for a snapshot
    #[must_use]
    pub fn build(
        stats: &DashboardStats,
        growth: &GrowthMetrics,
        last_updated: Option<DateTime<Utc>>,
    ) -> Self {
        let cards = vec![
            StatCard {
                label: "Total Pages".to_string(),
                value: group_thousands(stats.total_pages),
                caption: "Published pages".to_string(),
            },
            StatCard {
                label: "Total Users".to_string(),
                value: group_thousands(stats.total_users),
                caption: format!("+{} this month", group_thousands(growth.new_users_this_month)),
            },
            StatCard {
                label: "Active Projects".to_string(),
                value: group_thousands(stats.active_projects),
                caption: format!(
                    "{} completed this month",
                    group_thousands(growth.projects_completed_this_month)
                ),
            },
            StatCard {
                label: "Monthly Visitors".to_string(),
                value: group_thousands(stats.monthly_visitors),
                caption: "Since the start of the month".to_string(),
            },
        ];

        let performance = vec![
            ProgressBar {
                label: "System Uptime".to_string(),
                display: format!("{:.1}%", stats.system_uptime),
                fill_percent: clamp_percentage(stats.system_uptime),
            },
            ProgressBar {
                label: "Average Rating".to_string(),
                display: format!("{:.1}/{MAX_RATING:.0}", stats.average_rating),
                fill_percent: clamp_percentage(stats.average_rating / MAX_RATING * 100.0),
            },
            ProgressBar {
                label: "Completion Rate".to_string(),
                display: format!("{:.1}%", stats.completion_rate),
                fill_percent: clamp_percentage(stats.completion_rate),
            },
        ];

        let realtime = vec![
            RealtimeMetric {
                label: "Online Users".to_string(),
                value: group_thousands(stats.online_users),
            },
            RealtimeMetric {
                label: "Messages Exchanged".to_string(),
                value: group_thousands(stats.messages_exchanged),
            },
            RealtimeMetric {
                label: "User Growth".to_string(),
                value: format_signed_percent(growth.user_growth_rate),
            },
        ];

        let activity = vec![
            ActivityItem {
                message: format!(
                    "{} new users joined this month",
                    group_thousands(growth.new_users_this_month)
                ),
            },
            ActivityItem {
                message: format!(
                    "{} projects completed this month",
                    group_thousands(growth.projects_completed_this_month)
                ),
            },
            ActivityItem {
                message: format!("System uptime at {:.1}%", stats.system_uptime),
            },
            ActivityItem {
                message: format!("Project completion rate at {:.1}%", growth.completion_rate),
            },
        ];

        Self {
            cards,
            performance,
            realtime,
            activity,
            last_updated,
        }
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn bar(fill_percent: f64) -> String {
    let filled = ((clamp_percentage(fill_percent) / 100.0) * BAR_WIDTH as f64).round() as usize;
    let filled = filled.min(BAR_WIDTH);
    format!("[{}{}]", "#".repeat(filled), "-".repeat(BAR_WIDTH - filled))
}

/// Render a view as plain text
#[must_use]
pub fn render_text(view: &DashboardView) -> String {
    match view {
        DashboardView::Loading => "Loading dashboard...\n".to_string(),
        DashboardView::Error { message } => format!("Error: {message}\n"),
        DashboardView::Empty => "No dashboard data available\n".to_string(),
        DashboardView::Populated(dashboard) => render_populated(dashboard),
    }
}

fn render_populated(dashboard: &PopulatedDashboard) -> String {
    let mut out = String::new();

    // Writing to a String cannot fail
    let _ = writeln!(out, "== Dashboard ==");
    for card in &dashboard.cards {
        let _ = writeln!(out, "{:<18} {:>12}  {}", card.label, card.value, card.caption);
    }

    let _ = writeln!(out, "\n-- Performance --");
    for metric in &dashboard.performance {
        let _ = writeln!(
            out,
            "{:<18} {} {}",
            metric.label,
            bar(metric.fill_percent),
            metric.display
        );
    }

    let _ = writeln!(out, "\n-- Real-time --");
    for metric in &dashboard.realtime {
        let _ = writeln!(out, "{:<18} {:>12}", metric.label, metric.value);
    }

    let _ = writeln!(out, "\n-- Recent Activity --");
    for item in &dashboard.activity {
        let _ = writeln!(out, "* {}", item.message);
    }

    if let Some(at) = dashboard.last_updated {
        let _ = writeln!(out, "\nLast updated: {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
    }

    out
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
    use crate::store::Snapshot;
    use chrono::TimeZone;
    use dashboard_core::ActivityLog;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use std::sync::Arc;

    fn stats() -> DashboardStats {
        DashboardStats {
            total_pages: 42,
            total_users: 1000,
            active_projects: 12,
            monthly_visitors: 15_230,
            system_uptime: 99.5,
            average_rating: 4.2,
            completion_rate: 80.0,
            online_users: 37,
            messages_exchanged: 1_234,
        }
    }

    fn growth() -> GrowthMetrics {
        GrowthMetrics {
            user_growth_rate: 100.0 / 9.0,
            projects_completed_this_month: 3,
            new_users_this_month: 100,
            average_progress: 72.5,
            completion_rate: 80.0,
        }
    }

    fn updated_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap()
    }

    fn state(loading: bool, error: Option<&str>, with_data: bool) -> StoreState {
        StoreState {
            data: with_data.then(|| {
                Arc::new(Snapshot {
                    revision: 1,
                    stats: stats(),
                    history: Arc::new(ActivityLog::default()),
                    aggregated_at: updated_at(),
                })
            }),
            loading,
            refreshing: false,
            error: error.map(str::to_string),
            last_updated: with_data.then(updated_at),
            growth: with_data.then(growth),
        }
    }

    #[rstest]
    #[case(true, None, false)]
    #[case(true, Some("Network unreachable"), false)]
    #[case(true, None, true)]
    #[case(true, Some("Network unreachable"), true)]
    fn test_loading_takes_precedence(
        #[case] loading: bool,
        #[case] error: Option<&str>,
        #[case] with_data: bool,
    ) {
        assert_eq!(
            DashboardView::resolve(&state(loading, error, with_data)),
            DashboardView::Loading
        );
    }

    #[rstest]
    #[case(false)]
    #[case(true)]
    fn test_error_shown_verbatim_over_data(#[case] with_data: bool) {
        assert_eq!(
            DashboardView::resolve(&state(false, Some("Network unreachable"), with_data)),
            DashboardView::Error {
                message: "Network unreachable".to_string()
            }
        );
    }

    #[test]
    fn test_empty_without_data() {
        assert_eq!(
            DashboardView::resolve(&state(false, None, false)),
            DashboardView::Empty
        );
    }

    #[test]
    fn test_populated_layout() {
        let DashboardView::Populated(dashboard) = DashboardView::resolve(&state(false, None, true))
        else {
            panic!("expected populated view");
        };

        assert_eq!(dashboard.cards.len(), 4);
        assert_eq!(dashboard.cards[1].value, "1,000");
        assert_eq!(dashboard.cards[1].caption, "+100 this month");
        assert_eq!(dashboard.cards[2].caption, "3 completed this month");
        assert_eq!(dashboard.cards[3].value, "15,230");

        assert_eq!(dashboard.performance.len(), 3);
        assert_eq!(dashboard.performance[0].fill_percent, 99.5);
        assert!((dashboard.performance[1].fill_percent - 84.0).abs() < 1e-9);
        assert_eq!(dashboard.performance[1].display, "4.2/5");

        assert_eq!(dashboard.realtime[2].value, "+11.1%");
        assert_eq!(dashboard.activity.len(), 4);
        assert_eq!(dashboard.last_updated, Some(updated_at()));
    }

    #[test]
    fn test_render_text_states() {
        assert_eq!(render_text(&DashboardView::Loading), "Loading dashboard...\n");
        assert_eq!(
            render_text(&DashboardView::Error {
                message: "Network unreachable".to_string()
            }),
            "Error: Network unreachable\n"
        );
        assert_eq!(
            render_text(&DashboardView::Empty),
            "No dashboard data available\n"
        );
    }

    #[test]
    fn test_render_text_populated() {
        let text = render_text(&DashboardView::resolve(&state(false, None, true)));

        assert!(text.contains("Total Users"));
        assert!(text.contains("1,000"));
        assert!(text.contains("+11.1%"));
        assert!(text.contains("[################----] 80.0%"));
        assert!(text.contains("Last updated: 2024-03-15 12:00:00 UTC"));
    }

    #[rstest]
    #[case(0.0, "[--------------------]")]
    #[case(50.0, "[##########----------]")]
    #[case(100.0, "[####################]")]
    #[case(250.0, "[####################]")]
    fn test_bar(#[case] fill: f64, #[case] expected: &str) {
        assert_eq!(bar(fill), expected);
    }

    #[test]
    fn test_view_serializes_with_state_tag() {
        let json = serde_json::to_value(DashboardView::Error {
            message: "boom".to_string(),
        })
        .unwrap();

        assert_eq!(json["state"], "error");
        assert_eq!(json["message"], "boom");
    }
}
