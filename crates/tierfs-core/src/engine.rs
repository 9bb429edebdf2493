//! Shared state threaded through the tiering engines
//!
//! All engines run under the bridge's serialised request loop, so the context
//! hands out plain mutable borrows; there is no locking to order.

use crate::config::TierConfig;
use crate::error::{TierError, TierResult};
use crate::paths::PathMapper;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::Path;
use tierfs_reduce::{SegmentDigest, SegmentIndex, Segmenter};
use tierfs_storage::{BlobId, ObjectStore, SegmentCache};
use tracing::warn;

pub(crate) struct EngineCtx<'a> {
    pub cfg: &'a TierConfig,
    pub paths: &'a PathMapper,
    pub segmenter: &'a Segmenter,
    pub index: &'a mut SegmentIndex,
    /// `None` when caching is disabled
    pub cache: Option<&'a mut SegmentCache>,
    pub store: &'a dyn ObjectStore,
}

impl EngineCtx<'_> {
    /// Rewrite the index mirror. A failed rewrite is logged and tolerated;
    /// the rebuild path copes with partial mirrors.
    pub fn flush_index(&self) {
        if let Err(e) = self.index.flush() {
            warn!(error = %e, "index mirror update failed; continuing");
        }
    }
}

/// Drop a zero-refcount segment: its cache entry and its blob
pub(crate) fn purge_segment(ctx: &mut EngineCtx<'_>, digest: &SegmentDigest) -> TierResult<()> {
    if let Some(cache) = ctx.cache.as_deref_mut() {
        cache.evict(digest);
    }
    let blob = BlobId::from_digest(digest);
    ctx.store.delete(&blob.bucket, &blob.key)?;
    Ok(())
}

pub(crate) fn open_read(path: &Path) -> TierResult<File> {
    map_not_found(File::open(path), path)
}

pub(crate) fn open_write(path: &Path) -> TierResult<File> {
    map_not_found(OpenOptions::new().read(true).write(true).open(path), path)
}

pub(crate) fn map_not_found(result: std::io::Result<File>, path: &Path) -> TierResult<File> {
    match result {
        Ok(file) => Ok(file),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(TierError::NotFound {
            path: path.to_path_buf(),
        }),
        Err(e) => Err(e.into()),
    }
}
