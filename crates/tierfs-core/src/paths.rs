//! Derives on-SSD paths for the proxy, metadata, and tail files
//!
//! Metadata records and tail files are keyed by the proxy's inode number, so
//! the mapping survives renames and never collides with user-visible names.

use crate::error::{TierError, TierResult};
use std::io::ErrorKind;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

/// Durable index mirror, a flat array of fixed records
pub const MIRROR_FILE: &str = ".hash_table";
/// Directory of materialised cache segments
pub const CACHE_DIR: &str = ".cache";
/// Scratch file for compression staging; at most one live at a time
pub const COMPRESS_SCRATCH: &str = ".temp_compress";
/// Scratch file for cache-disabled segment reads
pub const SEGMENT_SCRATCH: &str = ".segment_temp";

#[derive(Debug, Clone)]
pub struct PathMapper {
    root: PathBuf,
}

impl PathMapper {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// On-SSD file carrying the POSIX attributes (and, for resident files,
    /// the body) of a logical path
    pub fn proxy_path(&self, logical: &str) -> PathBuf {
        self.root.join(logical.trim_start_matches('/'))
    }

    /// Metadata record for a tiered file: `<ssd>/.<hex-inode>`.
    /// Fails with `NotFound` when the proxy does not exist.
    pub fn metadata_path(&self, logical: &str) -> TierResult<PathBuf> {
        let ino = self.proxy_inode(logical)?;
        Ok(self.root.join(format!(".{ino:x}")))
    }

    /// Tail file holding unsegmented appended bytes: `<ssd>/.<hex-inode>_data`
    pub fn tail_path(&self, logical: &str) -> TierResult<PathBuf> {
        let ino = self.proxy_inode(logical)?;
        Ok(self.root.join(format!(".{ino:x}_data")))
    }

    pub fn mirror_path(&self) -> PathBuf {
        self.root.join(MIRROR_FILE)
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root.join(CACHE_DIR)
    }

    pub fn compress_scratch(&self) -> PathBuf {
        self.root.join(COMPRESS_SCRATCH)
    }

    pub fn segment_scratch(&self) -> PathBuf {
        self.root.join(SEGMENT_SCRATCH)
    }

    fn proxy_inode(&self, logical: &str) -> TierResult<u64> {
        let proxy = self.proxy_path(logical);
        match std::fs::metadata(&proxy) {
            Ok(meta) => Ok(meta.ino()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(TierError::NotFound { path: proxy }),
            Err(e) => Err(e.into()),
        }
    }
}
