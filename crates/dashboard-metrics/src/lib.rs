//! Metrics store and refresh service for the admin dashboard
//!
//! This crate aggregates raw activity records into dashboard statistics,
//! derives growth metrics from them and keeps the latest snapshot in an
//! observable store. A refresh service polls the configured source on an
//! interval, and the view module maps store state to exactly one
//! presentation state.

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

pub mod aggregate;
pub mod error;
pub mod growth;
pub mod mock;
pub mod service;
pub mod source;
pub mod store;
pub mod view;

// Re-export commonly used types
pub use aggregate::Aggregator;
pub use error::{MetricsError, Result};
pub use growth::{GrowthCalculator, compute_growth};
pub use service::{RefreshService, ServiceMetrics, ServiceStatus};
pub use source::{JsonFileSource, MetricsSource, StaticSource};
pub use store::{MetricsStore, RefreshHandle, Snapshot, StoreState, Subscription, SubscriptionId};
pub use view::{DashboardView, render_text};

use dashboard_core::Config;
use std::sync::Arc;

/// Build a store reading the configured activity log file
#[must_use]
pub fn init_store(config: &Config) -> MetricsStore {
    let source = Arc::new(JsonFileSource::new(config.source.activity_log.clone()));
    MetricsStore::from_config(source, config)
}

/// Build a store and a stopped refresh service from configuration
///
/// # Errors
///
/// Returns [`MetricsError`] if the configuration is invalid.
pub fn init_with_config(config: &Config) -> Result<RefreshService> {
    config.validate()?;
    Ok(RefreshService::new(init_store(config), config.refresh.clone()))
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
    use pretty_assertions::assert_eq;

    #[test]
    fn test_re_exports() {
        let _aggregator = Aggregator::default();
        let _error = MetricsError::configuration("test");
        let _status = ServiceStatus::Stopped;
        let _view = DashboardView::Empty;
    }

    #[test]
    fn test_init_with_config_builds_stopped_service() {
        let service = init_with_config(&Config::default()).unwrap();

        assert_eq!(service.status(), ServiceStatus::Stopped);
        assert!(service.store().snapshot().loading);
        assert!(!service.store().is_closed());
    }

    #[test]
    fn test_init_with_config_rejects_invalid_config() {
        let mut config = Config::default();
        config.refresh.interval_seconds = 0;

        assert!(matches!(
            init_with_config(&config),
            Err(MetricsError::Core(dashboard_core::Error::Configuration { .. }))
        ));
    }
}
