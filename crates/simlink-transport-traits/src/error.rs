//! Message source error types.

use std::time::Duration;
use thiserror::Error;

/// A specialized `Result` type for message source operations.
pub type SourceResult<T> = std::result::Result<T, SourceError>;

/// Represents errors that can occur while talking to the external process.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SourceError {
    /// Failed to establish a session.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// An established session was lost.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Session establishment did not complete in time.
    #[error(
        "Connection timed out after {timeout:?}. \
         If the simulator is slow to start, raise `connection_timeout_ms`"
    )]
    ConnectionTimeout {
        /// The timeout that was exceeded
        timeout: Duration,
    },

    /// An operation was attempted while no session is open.
    #[error("No session is open")]
    NotConnected,

    /// The external process rejected or failed a typed request.
    #[error("Request {request} failed: {reason}")]
    RequestFailed {
        /// Short label of the request kind
        request: String,
        /// Why it failed
        reason: String,
    },

    /// A payload could not be decoded.
    #[error("Decode failed: {0}")]
    Decode(String),

    /// An underlying I/O error occurred.
    #[error("IO error: {0}")]
    Io(String),

    /// An unexpected internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SourceError {
    /// Returns `true` for failures a fresh connection attempt may cure.
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed(_)
                | Self::ConnectionLost(_)
                | Self::ConnectionTimeout { .. }
                | Self::Io(_)
        )
    }

    /// Shorthand for a failed request.
    pub fn request_failed(request: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::RequestFailed {
            request: request.into(),
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for SourceError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
