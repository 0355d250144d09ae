//! Metrics sources
//!
//! A source hands the store the raw [`ActivityLog`] one refresh cycle is
//! aggregated from. The store never talks to a backend directly.

use async_trait::async_trait;
use dashboard_core::{ActivityLog, AggregationError};
use parking_lot::RwLock;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Backend the metrics store pulls raw records from
#[async_trait]
pub trait MetricsSource: Send + Sync + Debug {
    /// Fetch the current activity log
    ///
    /// # Errors
    ///
    /// Returns an [`AggregationError`] if the backend cannot be reached or
    /// returns data that cannot be decoded.
    async fn fetch(&self) -> Result<ActivityLog, AggregationError>;

    /// Short description used in logs
    fn describe(&self) -> String;
}

/// Reads an activity log JSON document from disk on every fetch
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    /// Create a source for the given file
    #[must_use]
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    /// Path of the activity log document
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl MetricsSource for JsonFileSource {
    async fn fetch(&self) -> Result<ActivityLog, AggregationError> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|e| AggregationError::unreachable(self.describe(), e))?;

        debug!(
            path = %self.path.display(),
            bytes = bytes.len(),
            "Read activity log"
        );

        serde_json::from_slice(&bytes).map_err(|e| {
            AggregationError::malformed(format!("{}: {e}", self.path.display()))
        })
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}

/// Serves an in-memory activity log that can be swapped at runtime
#[derive(Debug, Default)]
pub struct StaticSource {
    log: RwLock<ActivityLog>,
}

impl StaticSource {
    /// Create a source serving `log`
    #[must_use]
    pub fn new(log: ActivityLog) -> Self {
        Self {
            log: RwLock::new(log),
        }
    }

    /// Replace the log served by subsequent fetches
    pub fn replace(&self, log: ActivityLog) {
        *self.log.write() = log;
    }
}

#[async_trait]
impl MetricsSource for StaticSource {
    async fn fetch(&self) -> Result<ActivityLog, AggregationError> {
        Ok(self.log.read().clone())
    }

    fn describe(&self) -> String {
        "in-memory activity log".to_string()
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
    use chrono::{TimeZone, Utc};
    use dashboard_core::types::UserRecord;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn sample_log() -> ActivityLog {
        ActivityLog {
            users: vec![UserRecord::registered(
                Utc.with_ymd_and_hms(2024, 3, 2, 10, 0, 0).unwrap(),
            )],
            ..ActivityLog::default()
        }
    }

    #[tokio::test]
    async fn test_json_file_source_reads_log() {
        let log = sample_log();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&serde_json::to_vec(&log).unwrap()).unwrap();

        let source = JsonFileSource::new(file.path());
        let fetched = source.fetch().await.unwrap();

        assert_eq!(fetched, log);
        assert!(source.describe().contains(&file.path().display().to_string()));
    }

    #[tokio::test]
    async fn test_json_file_source_missing_file_is_unreachable() {
        let source = JsonFileSource::new("/nonexistent/activity-log.json");
        let err = source.fetch().await.unwrap_err();

        assert!(err.message().contains("unreachable"));
        assert!(err.message().contains("/nonexistent/activity-log.json"));
    }

    #[tokio::test]
    async fn test_json_file_source_malformed_document() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{\"users\": 12}").unwrap();

        let err = JsonFileSource::new(file.path()).fetch().await.unwrap_err();
        assert!(err.message().starts_with("Malformed metrics data"));
    }

    #[tokio::test]
    async fn test_static_source_replace() {
        let source = StaticSource::default();
        assert!(source.fetch().await.unwrap().is_empty());

        source.replace(sample_log());
        assert_eq!(source.fetch().await.unwrap().users.len(), 1);
    }
}
