//! Client error types.

use simlink_transport_traits::SourceError;
use thiserror::Error;

/// A specialized `Result` type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors surfaced by [`SimClient`](crate::SimClient) and its registries.
///
/// Transient connection failures are retried internally and only show up here
/// once the retry budget is exhausted. Failures inside handlers and predicates
/// never show up here at all.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ClientError {
    /// The operation needs an open session.
    #[error("Not connected to the simulator")]
    NotConnected,

    /// Every connect attempt allowed by the retry budget failed.
    #[error("Connection failed after {attempts} attempts: {source}")]
    ConnectionFailed {
        /// Attempts made, including the last one
        attempts: u32,
        /// Failure reported by the last attempt
        #[source]
        source: SourceError,
    },

    /// The simulator closed the stream and reconnecting is disabled.
    #[error("The simulator closed the message stream")]
    StreamTerminated,

    /// The custom event name collides with a built-in event.
    #[error("Event name '{0}' is reserved")]
    ReservedName(String),

    /// The id lies in the range the client keeps for itself.
    #[error("Id {0} is reserved for internal use")]
    ReservedId(u32),

    /// All custom event ids are in use.
    #[error("Custom event ids exhausted (range {start}..={end})")]
    EventIdsExhausted {
        /// First id of the range
        start: u32,
        /// Last id of the range
        end: u32,
    },

    /// [`SimClient::start`](crate::SimClient::start) was called twice.
    #[error("Client already started")]
    AlreadyStarted,

    /// The client is shutting down or has shut down.
    #[error("Client is shutting down")]
    ShuttingDown,

    /// The message source rejected an operation.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// Configuration could not be loaded or is invalid.
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// An I/O error, typically while setting up logging.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// Returns `true` if repeating the operation later may succeed.
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::NotConnected | Self::StreamTerminated => true,
            Self::Source(err) => err.is_transient(),
            _ => false,
        }
    }

    /// Builds a [`ClientError::Config`] from a message.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::Config(config::ConfigError::Message(message.into()))
    }
}
