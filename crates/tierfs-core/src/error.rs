//! Error taxonomy for the tiering core

use std::path::PathBuf;
use thiserror::Error;
use tierfs_reduce::ReduceError;
use tierfs_storage::StorageError;

/// Result type alias for core operations
pub type TierResult<T> = Result<T, TierError>;

/// Error variants surfaced to the filesystem bridge
#[derive(Debug, Error)]
pub enum TierError {
    /// Missing proxy, metadata record, or tail file
    #[error("not found: {}", path.display())]
    NotFound {
        /// The on-SSD path that was expected to exist
        path: PathBuf,
    },

    /// A tiered write landed somewhere other than end-of-file.
    /// Tiered files are append-only; mid-body writes are unsupported.
    #[error("tiered writes are append-only: offset {offset}, file ends at {end}")]
    NonAppendWrite {
        /// Offset the caller asked for
        offset: i64,
        /// Current logical end of the file
        end: i64,
    },

    /// Index/metadata disagreement detected at read time. The read engine
    /// surfaces this rather than fabricate data.
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// Invalid configuration sizes
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Local disk I/O
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Segmenting, compression, or index failure
    #[error(transparent)]
    Reduce(#[from] ReduceError),

    /// Object-store failure
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl TierError {
    /// Errno the bridge should return for this failure
    pub fn errno(&self) -> i32 {
        match self {
            TierError::NotFound { .. } => 2,                      // ENOENT
            TierError::NonAppendWrite { .. } | TierError::Config(_) => 22, // EINVAL
            TierError::Io(e) => e.raw_os_error().unwrap_or(5),    // EIO
            TierError::Reduce(ReduceError::Io(e)) => e.raw_os_error().unwrap_or(5),
            TierError::Storage(StorageError::Io(e)) => e.raw_os_error().unwrap_or(5),
            _ => 5,                                               // EIO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping() {
        let not_found = TierError::NotFound {
            path: PathBuf::from("/ssd/a"),
        };
        assert_eq!(not_found.errno(), 2);
        assert_eq!(TierError::Config("bad".into()).errno(), 22);
        assert_eq!(
            TierError::NonAppendWrite { offset: 0, end: 9 }.errno(),
            22
        );
        assert_eq!(TierError::Invariant("x".into()).errno(), 5);
    }
}
