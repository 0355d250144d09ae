//! Configuration management for the dashboard metrics

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Longest supported online window, one year
pub const MAX_ONLINE_WINDOW_MINUTES: i64 = 525_600;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Metrics source configuration
    #[serde(default)]
    pub source: SourceConfig,

    /// Refresh scheduling configuration
    #[serde(default)]
    pub refresh: RefreshConfig,

    /// Aggregation configuration
    #[serde(default)]
    pub aggregation: AggregationConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metrics source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Activity log document the snapshot is aggregated from
    #[serde(default = "default_activity_log")]
    pub activity_log: PathBuf,

    /// Fetch timeout in seconds
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_seconds: u64,
}

/// Refresh scheduling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConfig {
    /// Interval between periodic refreshes in seconds
    #[serde(default = "default_refresh_interval")]
    pub interval_seconds: u64,

    /// Refresh immediately when the service starts
    #[serde(default = "default_refresh_on_start")]
    pub refresh_on_start: bool,

    /// Graceful shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_seconds: u64,
}

/// Aggregation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// A user counts as online if seen within this many minutes
    #[serde(default = "default_online_window")]
    pub online_window_minutes: i64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (json or pretty)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_activity_log() -> PathBuf {
    PathBuf::from("activity-log.json")
}

const fn default_fetch_timeout() -> u64 {
    10
}

const fn default_refresh_interval() -> u64 {
    30
}

const fn default_refresh_on_start() -> bool {
    true
}

const fn default_shutdown_timeout() -> u64 {
    10
}

const fn default_online_window() -> i64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            activity_log: default_activity_log(),
            fetch_timeout_seconds: default_fetch_timeout(),
        }
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_refresh_interval(),
            refresh_on_start: default_refresh_on_start(),
            shutdown_timeout_seconds: default_shutdown_timeout(),
        }
    }
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            online_window_minutes: default_online_window(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl SourceConfig {
    /// Get fetch timeout as Duration
    #[must_use]
    pub const fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_seconds)
    }
}

impl RefreshConfig {
    /// Get refresh interval as Duration
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    /// Get shutdown timeout as Duration
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }
}

impl AggregationConfig {
    /// Get the online window as a chrono duration
    #[must_use]
    pub fn online_window(&self) -> chrono::Duration {
        chrono::Duration::try_minutes(self.online_window_minutes).unwrap_or(chrono::Duration::MAX)
    }
}

impl Config {
    /// Load configuration from an optional `dashboard` file and the environment
    ///
    /// Environment variables use the `DASHBOARD_` prefix and `__` between
    /// nested keys, e.g. `DASHBOARD_REFRESH__INTERVAL_SECONDS=60`.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration cannot be loaded, parsed or validated.
    pub fn load() -> crate::Result<Self> {
        Self::build(config::File::with_name("dashboard").required(false))
    }

    /// Load configuration from an explicit file, still honoring the environment
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or invalid.
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        Self::build(config::File::from(path).required(true))
    }

    fn build<S>(file: S) -> crate::Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        Self::build_from(file, Self::environment())
    }

    fn environment() -> config::Environment {
        config::Environment::with_prefix("DASHBOARD")
            .prefix_separator("_")
            .separator("__")
    }

    fn build_from<S>(file: S, environment: config::Environment) -> crate::Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let config: Self = config::Config::builder()
            .add_source(file)
            .add_source(environment)
            .build()?
            .try_deserialize()?;

        config.validate()?;
        tracing::debug!(
            activity_log = %config.source.activity_log.display(),
            interval_seconds = config.refresh.interval_seconds,
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Check cross-field constraints
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Configuration`] naming the first offending key.
    pub fn validate(&self) -> crate::Result<()> {
        let invalid = |message: &str| {
            Err(crate::Error::Configuration {
                message: message.to_string(),
            })
        };

        if self.refresh.interval_seconds == 0 {
            return invalid("refresh.interval_seconds must be greater than zero");
        }
        if self.source.fetch_timeout_seconds == 0 {
            return invalid("source.fetch_timeout_seconds must be greater than zero");
        }
        if self.aggregation.online_window_minutes <= 0 {
            return invalid("aggregation.online_window_minutes must be greater than zero");
        }
        if self.aggregation.online_window_minutes > MAX_ONLINE_WINDOW_MINUTES {
            return invalid("aggregation.online_window_minutes must be at most 525600 (one year)");
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            return invalid("logging.format must be \"json\" or \"pretty\"");
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(
    clippy::missing_panics_doc,
    clippy::field_reassign_with_default,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_config_default() {
        let config = Config::default();

        assert_eq!(config.source.activity_log, PathBuf::from("activity-log.json"));
        assert_eq!(config.source.fetch_timeout(), Duration::from_secs(10));
        assert_eq!(config.refresh.interval(), Duration::from_secs(30));
        assert!(config.refresh.refresh_on_start);
        assert_eq!(config.refresh.shutdown_timeout(), Duration::from_secs(10));
        assert_eq!(
            config.aggregation.online_window(),
            chrono::Duration::minutes(5)
        );
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "pretty");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_config_deserialization() {
        let json_str = r#"{
            "source": {"activity_log": "/var/lib/dashboard/log.json"},
            "refresh": {"interval_seconds": 5}
        }"#;

        let config: Config = serde_json::from_str(json_str).unwrap();

        assert_eq!(
            config.source.activity_log,
            PathBuf::from("/var/lib/dashboard/log.json")
        );
        assert_eq!(config.source.fetch_timeout_seconds, 10);
        assert_eq!(config.refresh.interval_seconds, 5);
        assert!(config.refresh.refresh_on_start);
        assert_eq!(config.aggregation.online_window_minutes, 5);
    }

    #[test]
    fn test_from_file_reads_toml() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[refresh]\ninterval_seconds = 120\n\n[logging]\nformat = \"json\"\n"
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();

        assert_eq!(config.refresh.interval_seconds, 120);
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.source.fetch_timeout_seconds, 10);
    }

    #[test]
    fn test_environment_overrides_explicit_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[refresh]\ninterval_seconds = 30\n").unwrap();

        let env = HashMap::from([(
            "DASHBOARD_REFRESH__INTERVAL_SECONDS".to_string(),
            "60".to_string(),
        )]);
        let config = Config::build_from(
            config::File::from(file.path()).required(true),
            Config::environment().source(Some(env)),
        )
        .unwrap();

        assert_eq!(config.refresh.interval_seconds, 60);
    }

    #[test]
    fn test_from_file_missing_is_error() {
        let result = Config::from_file(Path::new("/nonexistent/dashboard.toml"));
        assert!(matches!(result, Err(crate::Error::Configuration { .. })));
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let mut config = Config::default();
        config.refresh.interval_seconds = 0;

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("refresh.interval_seconds"));
    }

    #[test]
    fn test_validate_rejects_unknown_log_format() {
        let mut config = Config::default();
        config.logging.format = "xml".to_string();

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_non_positive_online_window() {
        let mut config = Config::default();
        config.aggregation.online_window_minutes = 0;

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unrepresentable_online_window() {
        let mut config = Config::default();
        config.aggregation.online_window_minutes = 200_000_000_000;
        assert!(config.validate().is_err());

        // Still callable on an unvalidated config
        assert_eq!(config.aggregation.online_window(), chrono::Duration::MAX);

        config.aggregation.online_window_minutes = MAX_ONLINE_WINDOW_MINUTES;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization_round_trip() {
        let config = Config::default();

        let serialized = serde_json::to_string(&config).unwrap();
        let deserialized: Config = serde_json::from_str(&serialized).unwrap();

        assert_eq!(deserialized.source.activity_log, config.source.activity_log);
        assert_eq!(
            deserialized.refresh.interval_seconds,
            config.refresh.interval_seconds
        );
        assert_eq!(deserialized.logging.format, config.logging.format);
    }
}
