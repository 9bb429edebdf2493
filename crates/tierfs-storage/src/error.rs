//! Error types for the storage subsystem

use thiserror::Error;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Error variants for storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// Wraps standard I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An object-store request finished with a non-success status
    #[error("cloud {verb} {bucket}/{key} failed: status {status}")]
    Cloud {
        /// The operation that failed
        verb: &'static str,
        /// Target bucket
        bucket: String,
        /// Target key
        key: String,
        /// Status reported by the store
        status: u16,
    },
}

impl StorageError {
    pub(crate) fn cloud(verb: &'static str, bucket: &str, key: &str, status: u16) -> Self {
        StorageError::Cloud {
            verb,
            bucket: bucket.to_string(),
            key: key.to_string(),
            status,
        }
    }
}
