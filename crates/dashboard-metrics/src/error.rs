//! Error types for the metrics store and refresh service

use dashboard_core::AggregationError;
use std::{error::Error as StdError, fmt};

/// Result type alias for metrics operations
pub type Result<T> = std::result::Result<T, MetricsError>;

/// Errors raised by the metrics crate outside the subscription interface
///
/// Aggregation failures inside the store are captured as state; they only
/// appear here when a caller asks for the outcome of a refresh directly.
#[derive(Debug)]
pub enum MetricsError {
    /// Configuration error
    Configuration {
        /// Error message
        message: String,
    },

    /// Error from the core crate
    Core(dashboard_core::Error),

    /// Serialization error
    Serialization {
        /// Error message
        message: String,
    },

    /// A refresh cycle failed
    Aggregation(AggregationError),

    /// Refresh service already running
    ServiceAlreadyRunning,

    /// Shutdown error
    Shutdown {
        /// Error message
        message: String,
    },
}

impl MetricsError {
    /// Create a new configuration error
    #[must_use]
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a new serialization error
    #[must_use]
    pub fn serialization<S: Into<String>>(message: S) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a new shutdown error
    #[must_use]
    pub fn shutdown<S: Into<String>>(message: S) -> Self {
        Self::Shutdown {
            message: message.into(),
        }
    }
}

impl fmt::Display for MetricsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration { message } => write!(f, "Configuration error: {message}"),
            Self::Core(err) => write!(f, "{err}"),
            Self::Serialization { message } => write!(f, "Serialization error: {message}"),
            Self::Aggregation(err) => write!(f, "Refresh failed: {err}"),
            Self::ServiceAlreadyRunning => write!(f, "Refresh service is already running"),
            Self::Shutdown { message } => write!(f, "Shutdown error: {message}"),
        }
    }
}

impl StdError for MetricsError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Core(err) => Some(err),
            Self::Aggregation(err) => Some(err),
            _ => None,
        }
    }
}

// From implementations for automatic conversions
impl From<dashboard_core::Error> for MetricsError {
    fn from(err: dashboard_core::Error) -> Self {
        Self::Core(err)
    }
}

impl From<AggregationError> for MetricsError {
    fn from(err: AggregationError) -> Self {
        Self::Aggregation(err)
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
    use pretty_assertions::assert_eq;

    #[test]
    fn test_error_display() {
        assert_eq!(
            MetricsError::configuration("bad interval").to_string(),
            "Configuration error: bad interval"
        );
        assert_eq!(
            MetricsError::ServiceAlreadyRunning.to_string(),
            "Refresh service is already running"
        );
        assert_eq!(
            MetricsError::from(AggregationError::new("Network unreachable")).to_string(),
            "Refresh failed: Network unreachable"
        );
    }

    #[test]
    fn test_core_error_is_transparent() {
        let core = dashboard_core::Error::Configuration {
            message: "missing file".to_string(),
        };
        let err = MetricsError::from(core);

        assert_eq!(err.to_string(), "Configuration error: missing file");
        assert!(err.source().is_some());
    }

    #[test]
    fn test_error_debug() {
        let debug = format!("{:?}", MetricsError::shutdown("timed out"));
        assert!(debug.contains("Shutdown"));
        assert!(debug.contains("timed out"));
    }
}
