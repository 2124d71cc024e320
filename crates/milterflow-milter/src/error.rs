//! Error types for milter transport operations.

use std::io;

/// Result type alias for milter operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Milter error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid envelope address.
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    /// Modification was not negotiated with the MTA.
    #[error("Action not negotiated: {0}")]
    Unsupported(String),

    /// Protocol error (undecodable frame, unexpected command).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Transport already closed.
    #[error("Transport closed")]
    Closed,
}

impl Error {
    /// Returns true if this error means the peer is gone.
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::Closed => true,
            Self::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}
