use thiserror::Error;

/// Unified error type for the Codecast relay
#[derive(Error, Debug)]
pub enum RelayError {
    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Listener errors
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    // Message errors
    #[error("Malformed message: {0}")]
    MalformedMessage(#[from] serde_json::Error),

    #[error("Serialization failed: {0}")]
    Serialization(String),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

impl RelayError {
    /// Check if this error must stop the process
    ///
    /// Only startup failures are fatal; everything that happens on a single
    /// connection is contained to that connection.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RelayError::InvalidConfig(_) | RelayError::Bind { .. } | RelayError::Io(_)
        )
    }
}

/// Why a frame could not be queued for one recipient
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("connection is not open")]
    NotOpen,

    #[error("outbound queue is full")]
    QueueFull,

    #[error("connection writer has gone away")]
    Closed,
}
