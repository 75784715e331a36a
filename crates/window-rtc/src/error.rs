//! Error types for the window registry, relay and peer sessions

use serde::{Deserialize, Serialize};

/// Result type alias using the crate Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in registry, relay and session operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A name or endpoint handle is already registered
    #[error("Window with name '{0}' is already registered")]
    DuplicateName(String),

    /// Name is empty after trimming, or otherwise unusable
    #[error("Invalid window name: {0}")]
    InvalidName(String),

    /// Calling endpoint has no registry entry (coordinator side)
    #[error("Endpoint is not registered")]
    NotRegistered,

    /// The local window could not resolve its own registered name
    #[error("Unable to get own registered window name, window may not have been registered")]
    SelfNotRegistered,

    /// Relay could not find the addressed receiver
    #[error("Receiver not found: {0}")]
    ReceiverNotFound(String),

    /// No transport binding was defined before opening a session
    #[error("Transport is not configured, call define_transport first")]
    TransportNotConfigured,

    /// Requested peer is not present in the registry
    #[error("Peer window with name '{0}' was not registered")]
    PeerNotRegistered(String),

    /// Operation on a session that has already been disposed
    #[error("Session {0} has been disposed")]
    SessionDisposed(String),

    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Underlying transport channel is gone or refused the message
    #[error("Transport error: {0}")]
    Transport(String),

    /// Error reported by the remote side of a request
    #[error("Remote error {code}: {message}")]
    Remote {
        /// JSON-RPC error code
        code: i32,
        /// Human-readable message
        message: String,
    },

    /// Connection engine error
    #[error("Connection engine error: {0}")]
    Engine(String),

    /// SDP parsing or negotiation error
    #[error("SDP error: {0}")]
    SdpError(String),

    /// ICE candidate error
    #[error("ICE candidate error: {0}")]
    IceCandidateError(String),

    /// Request did not complete in time
    #[error("Operation timed out: {0}")]
    OperationTimeout(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Generic error from anyhow
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ReceiverNotFound(_) | Error::OperationTimeout(_) | Error::Transport(_)
        )
    }

    /// Check if this error prevents a session from being created
    pub fn is_construction_error(&self) -> bool {
        matches!(
            self,
            Error::TransportNotConfigured | Error::PeerNotRegistered(_) | Error::SelfNotRegistered
        )
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }
}

/// Error returned by the relay as a value rather than raised.
///
/// Crosses the transport as the result of a `Signal` request, so the
/// sender can react without tearing down its own state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RelayError {
    #[error("Receiver window '{receiver}' is not registered")]
    ReceiverNotFound { receiver: String },
}

impl From<RelayError> for Error {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::ReceiverNotFound { receiver } => Error::ReceiverNotFound(receiver),
        }
    }
}
