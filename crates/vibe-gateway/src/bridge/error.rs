//! Bridge error types

use thiserror::Error;
use vibe_core::CloseCode;

/// Errors raised while attaching a transport to the server
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Failure inside the event protocol core
    #[error(transparent)]
    Core(#[from] vibe_core::Error),

    /// Long polling request for a socket that does not exist
    #[error("Unknown socket: {0}")]
    UnknownSocket(String),

    /// Long polling request without a `when` parameter
    #[error("Missing long polling step")]
    MissingStep,

    /// HTTP method not valid for the requested step
    #[error("Method {0} not allowed")]
    MethodNotAllowed(String),

    /// Request body could not be read
    #[error("Invalid request body: {0}")]
    InvalidBody(String),
}

impl BridgeError {
    /// HTTP status reported to a long polling client
    pub fn status(&self) -> u16 {
        match self {
            Self::Core(vibe_core::Error::HandshakeInvalid(_) | vibe_core::Error::Codec(_))
            | Self::MissingStep
            | Self::InvalidBody(_) => 400,
            Self::UnknownSocket(_) => 404,
            Self::MethodNotAllowed(_) => 405,
            Self::Core(vibe_core::Error::ConnectionClosed) => 410,
            Self::Core(_) => 500,
        }
    }

    /// Close code reported to a channel client
    pub fn close_code(&self) -> CloseCode {
        match self {
            Self::Core(err) => err.close_code(),
            Self::UnknownSocket(_) | Self::MissingStep | Self::MethodNotAllowed(_) => {
                CloseCode::HandshakeInvalid
            }
            Self::InvalidBody(_) => CloseCode::DecodeError,
        }
    }
}

/// Bridge result type
pub type BridgeResult<T> = Result<T, BridgeError>;
