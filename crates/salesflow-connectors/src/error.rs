//! Error types for the salesflow connectors.
//!
//! Provides a unified error type for all connector operations including
//! configuration parsing, I/O, serialization, connectivity, and sink rejections.
//!
//! Errors are split into *transient* (worth retrying with the batch intact) and
//! *permanent* (retrying cannot help). See [`ConnectorError::is_retryable`].

use thiserror::Error;

/// Errors that can occur during connector operations.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// I/O error (file, network, etc).
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization or deserialization failure.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Failed to reach an external system, or the system is temporarily unable
    /// to serve the request (timeouts, resets, throttling).
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// The external system rejected the write and will keep rejecting it
    /// (constraint violation, schema mismatch).
    #[error("Sink error: {0}")]
    SinkError(String),

    /// Error in a source connector.
    #[error("Source error: {0}")]
    SourceError(String),
}

/// Result type alias for connector operations.
pub type Result<T> = std::result::Result<T, ConnectorError>;

impl ConnectorError {
    /// Whether the failed operation may succeed if attempted again.
    pub fn is_retryable(&self) -> bool {
        match self {
            ConnectorError::ConnectionError(_) => true,
            ConnectorError::IoError(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::Interrupted
            ),
            ConnectorError::ConfigError(_)
            | ConnectorError::SerializationError(_)
            | ConnectorError::SinkError(_)
            | ConnectorError::SourceError(_) => false,
        }
    }
}

impl From<serde_json::Error> for ConnectorError {
    fn from(e: serde_json::Error) -> Self {
        ConnectorError::SerializationError(e.to_string())
    }
}

impl From<reqwest::Error> for ConnectorError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_builder() {
            ConnectorError::ConfigError(e.to_string())
        } else if e.is_decode() {
            ConnectorError::SerializationError(e.to_string())
        } else {
            ConnectorError::ConnectionError(e.to_string())
        }
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for ConnectorError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => ConnectorError::ConnectionError(e.to_string()),
            sqlx::Error::Configuration(_) => ConnectorError::ConfigError(e.to_string()),
            sqlx::Error::Database(db) => {
                // SQLSTATE classes 08 (connection), 40 (rollback: serialization
                // failure, deadlock) and 57P (operator intervention) are transient.
                let code = db.code().map(|c| c.to_string()).unwrap_or_default();
                if code.starts_with("08") || code.starts_with("40") || code.starts_with("57P") {
                    ConnectorError::ConnectionError(e.to_string())
                } else {
                    ConnectorError::SinkError(e.to_string())
                }
            }
            _ => ConnectorError::SinkError(e.to_string()),
        }
    }
}

#[cfg(feature = "kafka")]
impl From<rdkafka::error::KafkaError> for ConnectorError {
    fn from(e: rdkafka::error::KafkaError) -> Self {
        ConnectorError::SourceError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_display_contains(err: &ConnectorError, expected: &str) {
        let msg = format!("{}", err);
        assert!(
            msg.contains(expected),
            "Expected display '{}' to contain '{}'",
            msg,
            expected
        );
    }

    // ---------------------------------------------------------------
    // Display
    // ---------------------------------------------------------------

    #[test]
    fn test_config_error() {
        let err = ConnectorError::ConfigError("missing field 'index.name'".to_string());
        assert_display_contains(&err, "Configuration error");
        assert_display_contains(&err, "missing field 'index.name'");
    }

    #[test]
    fn test_connection_error() {
        let err = ConnectorError::ConnectionError("connection refused".to_string());
        assert_display_contains(&err, "Connection error");
        assert_display_contains(&err, "connection refused");
    }

    #[test]
    fn test_sink_error() {
        let err = ConnectorError::SinkError("duplicate key".to_string());
        assert_display_contains(&err, "Sink error");
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: ConnectorError = json_err.into();
        assert_display_contains(&err, "Serialization error");
    }

    #[test]
    fn test_io_error_has_source() {
        let io_err = std::io::Error::new(std::io::ErrorKind::Other, "inner");
        let err = ConnectorError::IoError(io_err);
        assert!(std::error::Error::source(&err).is_some());
    }

    // ---------------------------------------------------------------
    // Retry classification
    // ---------------------------------------------------------------

    #[test]
    fn test_transient_errors_are_retryable() {
        assert!(ConnectorError::ConnectionError("reset".to_string()).is_retryable());
        assert!(ConnectorError::IoError(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "slow"
        ))
        .is_retryable());
    }

    #[test]
    fn test_permanent_errors_are_not_retryable() {
        let variants: Vec<ConnectorError> = vec![
            ConnectorError::ConfigError("s".to_string()),
            ConnectorError::SerializationError("s".to_string()),
            ConnectorError::SinkError("s".to_string()),
            ConnectorError::SourceError("s".to_string()),
            ConnectorError::IoError(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "s",
            )),
        ];
        for err in &variants {
            assert!(!err.is_retryable(), "Expected {:?} to be permanent", err);
        }
    }
}
