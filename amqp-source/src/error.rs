//! Error types for the AMQP source adapter

use thiserror::Error;

/// Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Adapter error
///
/// Variants fall into two classes. Recoverable failures (connection, receive,
/// settlement) end the current connection and trigger a reconnect with
/// backoff; everything else terminates the instance.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed source/sink address, trust material or limits
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport dial or AMQP connection/session/link establishment failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Link or session failure while waiting for a message
    #[error("Receive error: {0}")]
    Receive(String),

    /// The disposition for a delivery could not be sent to the broker
    #[error("Settlement error: {0}")]
    Settlement(String),

    /// Dispatch failure escalated by the fail-fast policy
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// Metrics could not be exported or served
    #[error("Metrics error: {0}")]
    Metrics(String),

    /// Reconnect backoff gave up
    #[error("Reconnect exhausted after {attempts} attempts: {last_error}")]
    ReconnectExhausted {
        /// Attempts made since the last successful attach
        attempts: u32,
        /// Last recoverable error observed
        last_error: String,
    },
}

impl Error {
    /// Whether reconnecting may clear this failure
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Connection(_) | Error::Receive(_) | Error::Settlement(_)
        )
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

/// Failure to deliver an event to the HTTP sink
#[derive(Debug, Error)]
pub enum DispatchError {
    /// An envelope attribute cannot be carried as an HTTP header
    #[error("Invalid event attribute {name}: {reason}")]
    InvalidAttribute {
        /// Header carrying the attribute
        name: &'static str,
        /// Why encoding failed
        reason: String,
    },

    /// Request could not be built or sent
    #[error("HTTP transport error: {0}")]
    Transport(String),

    /// No response within the dispatch deadline
    #[error("Timeout after {seconds}s posting to sink")]
    Timeout {
        /// Deadline
        seconds: u64,
    },

    /// Sink answered with a non-success status
    #[error("Sink returned HTTP {status_code}")]
    Status {
        /// HTTP status code
        status_code: u16,
    },
}

impl DispatchError {
    /// Short label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::InvalidAttribute { .. } => "invalid_attribute",
            DispatchError::Transport(_) => "transport",
            DispatchError::Timeout { .. } => "timeout",
            DispatchError::Status { .. } => "status",
        }
    }
}
