//! Error types for boilerroom-core.
//!
//! Every failure that crosses the field bus is reported as a single
//! [`TransportError`]. The transport never retries on its own; the periodic
//! control loops treat an error as "no data this tick", raise a health event
//! and try again on their next scheduled tick.
//!
//! | Error | Raised by | Typical handling |
//! |-------|-----------|------------------|
//! | [`TransportError::Connect`] | transport worker | health event, retry next tick |
//! | [`TransportError::Timeout`] | transport worker | health event, retry next tick |
//! | [`TransportError::Io`] | bus link | link dropped, reconnect on next call |
//! | [`TransportError::Exception`] | remote board | health event |
//! | [`TransportError::Malformed`] | transport | health event |
//! | [`Error::UnknownSensor`] | sensor cache | configuration bug, fix and restart |
//! | [`Error::InvalidConfig`] | component constructors | fix and restart |

use std::time::Duration;

use thiserror::Error;

use boilerroom_types::SensorId;

/// Failure of a single field-bus operation.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new reasons
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportError {
    /// The link could not be established.
    #[error("cannot connect to {endpoint}: {reason}")]
    Connect {
        /// Where the connection was attempted.
        endpoint: String,
        /// Why it failed.
        reason: String,
    },

    /// The operation did not complete in time.
    #[error("{operation} timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The configured timeout.
        duration: Duration,
    },

    /// The link failed while exchanging a frame.
    #[error("I/O failure during {operation}: {reason}")]
    Io {
        /// The operation in flight.
        operation: String,
        /// Reason reported by the link.
        reason: String,
    },

    /// The remote board answered with an exception response.
    #[error("{operation} rejected by device: {reason}")]
    Exception {
        /// The rejected operation.
        operation: String,
        /// The exception reported by the board.
        reason: String,
    },

    /// The response did not have the expected shape.
    #[error("malformed response to {operation}: {reason}")]
    Malformed {
        /// The operation whose response was malformed.
        operation: String,
        /// What was wrong with it.
        reason: String,
    },

    /// The transport worker is no longer running.
    #[error("transport worker stopped")]
    WorkerStopped,
}

impl TransportError {
    /// Create a connect failure.
    pub fn connect(endpoint: impl Into<String>, reason: impl ToString) -> Self {
        Self::Connect {
            endpoint: endpoint.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a timeout failure.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create an I/O failure.
    pub fn io(operation: impl Into<String>, reason: impl ToString) -> Self {
        Self::Io {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    /// Create an exception failure.
    pub fn exception(operation: impl Into<String>, reason: impl ToString) -> Self {
        Self::Exception {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a malformed-response failure.
    pub fn malformed(operation: impl Into<String>, reason: impl ToString) -> Self {
        Self::Malformed {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the link should be dropped and re-established after this error.
    pub fn invalidates_link(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. } | Self::Timeout { .. } | Self::Io { .. } | Self::Malformed { .. }
        )
    }
}

/// Errors raised by boilerroom-core components.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A field-bus operation failed.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// A sensor id was requested that is not configured.
    #[error("Unknown sensor: {0}")]
    UnknownSensor(SensorId),

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Whether this error originated on the field bus.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Result type alias using boilerroom-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::connect("10.0.0.5:502", "connection refused");
        assert_eq!(
            err.to_string(),
            "cannot connect to 10.0.0.5:502: connection refused"
        );

        let err = TransportError::timeout("read_register 3:4", Duration::from_millis(500));
        assert!(err.to_string().contains("read_register 3:4"));
        assert!(err.to_string().contains("500ms"));

        let err = TransportError::exception("write_coil 1:0", "IllegalDataAddress");
        assert!(err.to_string().contains("IllegalDataAddress"));
    }

    #[test]
    fn test_link_invalidation() {
        assert!(TransportError::io("read_coils 1", "broken pipe").invalidates_link());
        assert!(TransportError::timeout("x", Duration::from_secs(1)).invalidates_link());
        // Exceptions are answered by a live board, the link itself is fine.
        assert!(!TransportError::exception("x", "IllegalFunction").invalidates_link());
        assert!(!TransportError::WorkerStopped.invalidates_link());
    }

    #[test]
    fn test_error_from_transport() {
        let err: Error = TransportError::WorkerStopped.into();
        assert!(err.is_transport());
        assert_eq!(err.to_string(), "Transport error: transport worker stopped");
    }

    #[test]
    fn test_unknown_sensor_display() {
        let err = Error::UnknownSensor(SensorId::from("attic"));
        assert_eq!(err.to_string(), "Unknown sensor: attic");
        assert!(!err.is_transport());
    }

    #[test]
    fn test_invalid_config() {
        let err = Error::invalid_config("ttl must be > 0");
        assert!(matches!(err, Error::InvalidConfig(_)));
        assert!(err.to_string().contains("ttl must be > 0"));
    }
}
