use thiserror::Error;

use echolens_core::protocol::StreamMode;
use echolens_core::session::TransitionError;

/// Caller errors rejected locally; nothing reaches the wire.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("Not connected")]
    NotConnected,

    #[error("Operation requires {expected} mode but the client runs in {actual} mode")]
    WrongMode {
        expected: StreamMode,
        actual: StreamMode,
    },

    #[error("Session '{live}' is still live on this connection")]
    SessionAlreadyLive { live: String },

    #[error("Unknown session '{0}'")]
    UnknownSession(String),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("Protocol error: {0}")]
    Encode(String),
}

/// Transport write or close failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Transport is not open")]
    NotOpen,

    #[error("Write timed out")]
    Timeout,

    #[error("Transport error: {0}")]
    Io(String),
}
