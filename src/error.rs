//! Error types for the relayterm library.

use thiserror::Error;

/// Main error type for protocol and transport operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from the underlying socket.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Payload could not be encoded or decoded as JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Well-formed frame carrying an unexpected or incomplete message.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// Frame length prefix exceeds the allowed maximum.
    #[error("frame too large: {len} bytes")]
    FrameTooLarge { len: usize },

    /// Endpoint string could not be parsed.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Attempted to send on a transport that is not connected.
    #[error("transport not connected")]
    NotConnected,
}

impl Error {
    /// Shorthand for a protocol error with the given message.
    pub fn protocol(message: impl Into<String>) -> Self {
        Error::Protocol {
            message: message.into(),
        }
    }

    /// Returns true if this error means the peer went away.
    pub fn is_disconnect(&self) -> bool {
        match self {
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::NotConnected
            ),
            Error::NotConnected => true,
            _ => false,
        }
    }
}

/// Result alias using the crate error type.
pub type Result<T> = std::result::Result<T, Error>;
