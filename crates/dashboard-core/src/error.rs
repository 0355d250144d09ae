//! Error types for the dashboard metrics

use std::{error::Error as StdError, fmt};

/// Main error type for the dashboard metrics
#[derive(Debug)]
pub enum Error {
    /// I/O error
    Io(std::io::Error),

    /// Configuration error
    Configuration {
        /// Error message
        message: String,
    },

    /// Validation error
    Validation {
        /// Field that failed validation
        field: String,
        /// Validation error message
        message: String,
    },

    /// Serialization error
    Serialization(serde_json::Error),

    /// Aggregation error surfaced outside the store
    Aggregation(AggregationError),

    /// Other error
    Other(String),
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "I/O error: {err}"),
            Self::Configuration { message } => write!(f, "Configuration error: {message}"),
            Self::Validation { field, message } => {
                write!(f, "Validation error: {field} - {message}")
            }
            Self::Serialization(err) => write!(f, "Serialization error: {err}"),
            Self::Aggregation(err) => write!(f, "Aggregation error: {err}"),
            Self::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Serialization(err) => Some(err),
            Self::Aggregation(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err)
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Self::Configuration {
            message: err.to_string(),
        }
    }
}

impl From<AggregationError> for Error {
    fn from(err: AggregationError) -> Self {
        Self::Aggregation(err)
    }
}

/// Failure to produce a snapshot from the metrics source.
///
/// This is the only error kind the metrics store exposes to its consumers.
/// It is stored as state rather than returned across the subscription
/// interface, and its `Display` output is the bare message so views can show
/// it verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationError {
    message: String,
}

impl AggregationError {
    /// Create an aggregation error from a human-readable message
    #[must_use]
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The data source could not be reached
    #[must_use]
    pub fn unreachable<S: fmt::Display, E: fmt::Display>(source: S, err: E) -> Self {
        Self::new(format!("Metrics source {source} is unreachable: {err}"))
    }

    /// The data source returned data that cannot be aggregated
    #[must_use]
    pub fn malformed<S: fmt::Display>(detail: S) -> Self {
        Self::new(format!("Malformed metrics data: {detail}"))
    }

    /// The fetch did not complete in time
    #[must_use]
    pub fn timeout(duration_ms: u128) -> Self {
        Self::new(format!("Metrics fetch timed out after {duration_ms}ms"))
    }

    /// The store was closed before the refresh could start
    #[must_use]
    pub fn closed() -> Self {
        Self::new("Metrics store is closed")
    }

    /// Human-readable message
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for AggregationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl StdError for AggregationError {}

#[cfg(test)]
#[allow(
    clippy::missing_panics_doc,
    clippy::uninlined_format_args,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io;

    #[test]
    fn test_io_error_conversion() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "File not found");
        let app_error = Error::from(io_error);

        assert!(matches!(app_error, Error::Io(_)));
        assert!(format!("{}", app_error).contains("I/O error"));
        assert!(app_error.source().is_some());
    }

    #[test]
    fn test_configuration_error() {
        let error = Error::Configuration {
            message: "refresh interval must be positive".to_string(),
        };

        assert_eq!(
            format!("{}", error),
            "Configuration error: refresh interval must be positive"
        );
        assert!(error.source().is_none());
    }

    #[test]
    fn test_validation_error() {
        let error = Error::Validation {
            field: "system_uptime".to_string(),
            message: "out of range".to_string(),
        };

        assert_eq!(
            format!("{}", error),
            "Validation error: system_uptime - out of range"
        );
    }

    #[test]
    fn test_serialization_error_conversion() {
        let json_error = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let app_error = Error::from(json_error);

        assert!(matches!(app_error, Error::Serialization(_)));
        assert!(app_error.source().is_some());
    }

    #[test]
    fn test_aggregation_error_displays_verbatim() {
        let error = AggregationError::new("Network unreachable");
        assert_eq!(error.to_string(), "Network unreachable");
        assert_eq!(error.message(), "Network unreachable");

        let wrapped = Error::from(error.clone());
        assert_eq!(wrapped.to_string(), "Aggregation error: Network unreachable");
        assert!(wrapped.source().is_some());
    }

    #[test]
    fn test_aggregation_error_constructors() {
        assert_eq!(
            AggregationError::timeout(250).to_string(),
            "Metrics fetch timed out after 250ms"
        );
        assert!(
            AggregationError::malformed("rating is NaN")
                .to_string()
                .contains("rating is NaN")
        );
        assert!(
            AggregationError::unreachable("file /tmp/x.json", "No such file")
                .to_string()
                .contains("/tmp/x.json")
        );
        assert_eq!(AggregationError::closed().message(), "Metrics store is closed");
    }

    #[test]
    fn test_other_error() {
        let error = Error::Other("Unexpected error occurred".to_string());
        assert_eq!(format!("{}", error), "Unexpected error occurred");
    }
}
