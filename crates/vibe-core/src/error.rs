//! Core error types

use crate::protocol::CloseCode;
use serde_json::Value;
use thiserror::Error;

/// Errors raised by the event protocol core
#[derive(Debug, Error)]
pub enum Error {
    /// A registered action panicked while a dispatcher was firing
    #[error("Callback failed in {dispatcher}: {message}")]
    CallbackFailure { dispatcher: String, message: String },

    /// Operation attempted on a closing or closed socket
    #[error("Connection closed")]
    ConnectionClosed,

    /// Malformed handshake, no socket was created
    #[error("Invalid handshake: {0}")]
    HandshakeInvalid(String),

    /// Inbound reply referencing an unknown or already settled request
    #[error("Unknown reply correlation id: {0}")]
    ReplyCorrelationUnknown(u64),

    /// I/O failure reported by the transport
    #[error("Transport error: {0}")]
    Transport(String),

    /// Frame could not be encoded or decoded
    #[error("Invalid frame: {0}")]
    Codec(#[from] serde_json::Error),
}

impl Error {
    /// Create a handshake error
    #[must_use]
    pub fn handshake(msg: impl std::fmt::Display) -> Self {
        Self::HandshakeInvalid(msg.to_string())
    }

    /// Create a transport error
    #[must_use]
    pub fn transport(msg: impl std::fmt::Display) -> Self {
        Self::Transport(msg.to_string())
    }

    /// Whether the failure ends the socket it happened on
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::ConnectionClosed)
    }

    /// Close code reported to the peer when this error ends a channel
    #[must_use]
    pub fn close_code(&self) -> CloseCode {
        match self {
            Self::HandshakeInvalid(_) => CloseCode::HandshakeInvalid,
            Self::Codec(_) => CloseCode::DecodeError,
            Self::ConnectionClosed => CloseCode::Normal,
            Self::CallbackFailure { .. }
            | Self::ReplyCorrelationUnknown(_)
            | Self::Transport(_) => CloseCode::UnknownError,
        }
    }
}

/// Outcome delivered to a reject callback
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReplyError {
    /// The peer rejected the request with the given reason
    #[error("Rejected: {0}")]
    Rejected(Value),

    /// The socket closed before a reply arrived
    #[error("Connection closed")]
    ConnectionClosed,

    /// The request never reached the transport
    #[error("Request not sent: {0}")]
    Unsent(String),
}

impl From<Error> for ReplyError {
    fn from(err: Error) -> Self {
        match err {
            Error::ConnectionClosed => Self::ConnectionClosed,
            other => Self::Unsent(other.to_string()),
        }
    }
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, Error>;
