//! Error types for the core library.

use thiserror::Error;

/// Errors that can occur while running a milter session.
#[derive(Debug, Error)]
pub enum Error {
    /// Milter transport or protocol failure.
    #[error("Milter error: {0}")]
    Milter(#[from] milterflow_milter::Error),

    /// Message parsing failed.
    #[error("Message error: {0}")]
    Mime(#[from] milterflow_mime::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A phase plugin failed.
    #[error("Plugin {plugin} failed: {reason}")]
    Plugin {
        /// Plugin name.
        plugin: String,
        /// Failure description, including its causes.
        reason: String,
    },

    /// Applying message modifications failed.
    #[error("Commit error: {0}")]
    Commit(String),

    /// A blocking worker could not finish its job.
    #[error("Worker error: {0}")]
    Worker(String),
}

impl Error {
    /// Returns true if the MTA connection is gone.
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::Milter(err) => err.is_disconnect(),
            _ => false,
        }
    }

    /// Wraps a phase plugin failure.
    #[must_use]
    pub fn plugin(plugin: &str, err: &anyhow::Error) -> Self {
        Self::Plugin {
            plugin: plugin.to_string(),
            reason: format!("{err:#}"),
        }
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
