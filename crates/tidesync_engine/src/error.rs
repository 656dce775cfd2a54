//! Error types for the sync engine.

use thiserror::Error;
use tidesync_storage::StoreError;

/// Result type for engine operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while issuing or replaying requests.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A request was attempted while the network is offline and could not
    /// be queued (a GET, or the caller opted out of queuing).
    #[error("network is offline")]
    Offline,

    /// The server could not be reached; no response was received.
    #[error("transport error: {message}")]
    Transport {
        /// Error message from the transport layer.
        message: String,
    },

    /// The request did not complete within the configured timeout.
    #[error("request timed out")]
    Timeout,

    /// The server responded with a 5xx status.
    #[error("server error: status {status}")]
    Server {
        /// HTTP status code.
        status: u16,
    },

    /// The server rejected the request with a 4xx status. Terminal; such
    /// requests are never retried.
    #[error("client error: status {status}")]
    Client {
        /// HTTP status code.
        status: u16,
    },

    /// A durable-store operation failed.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

impl SyncError {
    /// Creates a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Classifies a non-2xx response status.
    #[must_use]
    pub fn from_status(status: u16) -> Self {
        if (400..500).contains(&status) {
            Self::Client { status }
        } else {
            Self::Server { status }
        }
    }

    /// Returns true if retrying the same request later could succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Transport { .. } | SyncError::Timeout | SyncError::Server { .. }
        )
    }
}
