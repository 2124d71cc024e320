//! Error types for message operations.

/// Result type alias for message operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Message error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid header line.
    #[error("Invalid header: {0}")]
    InvalidHeader(String),
}
