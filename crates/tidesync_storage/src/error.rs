//! Error types for store operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The SQLite backend reported an error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A record could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Another process holds the store directory lock.
    #[error("store directory is locked: {path}")]
    Locked {
        /// The locked store directory.
        path: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = StoreError::Locked {
            path: PathBuf::from("/tmp/store"),
        };
        assert!(err.to_string().contains("/tmp/store"));

        let err = StoreError::Io(io::Error::new(io::ErrorKind::NotFound, "missing"));
        assert!(err.to_string().contains("missing"));
    }
}
