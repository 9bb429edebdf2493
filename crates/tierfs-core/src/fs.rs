//! The `TierFs` facade driven by the filesystem bridge
//!
//! The bridge serialises all requests, so every operation takes `&mut self`
//! and the engines assume mutual exclusion. Network and disk suspension
//! points live inside the engines; nothing here re-enters.

use crate::config::TierConfig;
use crate::engine::{self, EngineCtx};
use crate::error::TierResult;
use crate::handles::{FileHandle, HandleTable, OpenMode};
use crate::metadata::{self, MetaHeader};
use crate::migrate;
use crate::paths::PathMapper;
use crate::read;
use crate::tailwrite;
use crate::unlink;
use std::fs::{self, OpenOptions};
use std::os::unix::fs::MetadataExt;
use std::sync::Arc;
use tierfs_reduce::{SegmentIndex, Segmenter};
use tierfs_storage::{ObjectStore, SegmentCache};
use tracing::{info, warn};

pub struct TierFs {
    cfg: TierConfig,
    paths: PathMapper,
    segmenter: Segmenter,
    index: SegmentIndex,
    cache: Option<SegmentCache>,
    store: Arc<dyn ObjectStore>,
    handles: HandleTable,
}

impl TierFs {
    /// Validate the configuration, rebuild the index from its mirror, and
    /// resurrect whatever cache files survive the budget.
    pub fn new(cfg: TierConfig, store: Arc<dyn ObjectStore>) -> TierResult<Self> {
        cfg.validate()?;
        let paths = PathMapper::new(cfg.ssd_path.clone());
        let segmenter = Segmenter::new(cfg.segmenter());
        let index = SegmentIndex::rebuild(paths.mirror_path());
        let cache = init_cache(&cfg, &paths);
        let mut fs = Self {
            cfg,
            paths,
            segmenter,
            index,
            cache,
            store,
            handles: HandleTable::new(),
        };
        fs.resurrect_cache();
        info!(
            root = %fs.paths.root().display(),
            indexed_segments = fs.index.len(),
            cached_segments = fs.cache.as_ref().map(SegmentCache::len).unwrap_or(0),
            "tierfs ready"
        );
        Ok(fs)
    }

    /// Register a handle on the proxy of `logical`
    pub fn open(&mut self, logical: &str, mode: OpenMode) -> TierResult<FileHandle> {
        let proxy = self.paths.proxy_path(logical);
        let file = engine::map_not_found(
            OpenOptions::new()
                .read(true)
                .write(mode.is_writable())
                .open(&proxy),
            &proxy,
        )?;
        let ino = file.metadata()?.ino();
        Ok(self.handles.open(ino, logical, file, mode))
    }

    pub fn read(&mut self, logical: &str, buf: &mut [u8], offset: i64) -> TierResult<usize> {
        let (mut ctx, _) = self.split();
        read::run(&mut ctx, logical, buf, offset)
    }

    pub fn write(&mut self, logical: &str, buf: &[u8], offset: i64) -> TierResult<usize> {
        let (mut ctx, _) = self.split();
        tailwrite::run(&mut ctx, logical, buf, offset)
    }

    /// Drop a handle. When it was the last one on its inode, run the
    /// release-time decision; the count is decremented even when the
    /// decision fails, so a retry on the next open/release stays possible.
    pub fn release(&mut self, fh: FileHandle) -> TierResult<()> {
        let (mut ctx, handles) = self.split();
        let guard = handles.begin_release(fh)?;
        if !guard.is_last_close() {
            return Ok(());
        }
        let logical = guard.logical().to_string();
        release_decision(&mut ctx, &logical)
    }

    /// The release-time decision for `logical`, independent of any handle.
    /// Exposed for bridges that track their own open state.
    pub fn migrate_on_release(&mut self, logical: &str) -> TierResult<()> {
        let (mut ctx, _) = self.split();
        release_decision(&mut ctx, logical)
    }

    pub fn unlink(&mut self, logical: &str) -> TierResult<()> {
        let (mut ctx, _) = self.split();
        unlink::run(&mut ctx, logical)
    }

    /// Size and timestamps of a tiered file, read from its metadata record.
    /// `None` for resident files: their proxy carries real attributes.
    pub fn attr_view(&self, logical: &str) -> TierResult<Option<MetaHeader>> {
        let meta_path = self.paths.metadata_path(logical)?;
        if !metadata::exists(&meta_path) {
            return Ok(None);
        }
        metadata::read_header(&meta_path).map(Some)
    }

    /// Stamp atime/mtime on a tiered file's record. Returns `false` for
    /// resident files, whose times live on the proxy inode.
    pub fn set_times(&mut self, logical: &str, atime: i64, mtime: i64) -> TierResult<bool> {
        let meta_path = self.paths.metadata_path(logical)?;
        if !metadata::exists(&meta_path) {
            return Ok(false);
        }
        metadata::set_times(&meta_path, atime, mtime)?;
        Ok(true)
    }

    /// Final mirror flush before the process exits
    pub fn shutdown(&mut self) -> TierResult<()> {
        info!(indexed_segments = self.index.len(), "tierfs shutting down");
        self.index.flush().map_err(Into::into)
    }

    pub fn config(&self) -> &TierConfig {
        &self.cfg
    }

    pub fn index(&self) -> &SegmentIndex {
        &self.index
    }

    pub fn cache(&self) -> Option<&SegmentCache> {
        self.cache.as_ref()
    }

    pub fn open_count(&self, ino: u64) -> u32 {
        self.handles.open_count(ino)
    }

    fn split(&mut self) -> (EngineCtx<'_>, &mut HandleTable) {
        (
            EngineCtx {
                cfg: &self.cfg,
                paths: &self.paths,
                segmenter: &self.segmenter,
                index: &mut self.index,
                cache: self.cache.as_mut(),
                store: &*self.store,
            },
            &mut self.handles,
        )
    }

    fn resurrect_cache(&mut self) {
        let Some(cache) = self.cache.as_mut() else {
            return;
        };
        for (digest, entry) in self.index.iter() {
            if cache.file_path(digest).exists() {
                cache.resurrect(*digest, entry.length as u64);
            }
        }
    }
}

/// Decision on last close: resident files above the threshold migrate
/// whole; tiered files with a pending tail flush it; everything else is a
/// no-op. The proxy is reopened read-write here, since the closing handle
/// may have been read-only.
fn release_decision(ctx: &mut EngineCtx<'_>, logical: &str) -> TierResult<()> {
    let meta_path = ctx.paths.metadata_path(logical)?;
    if !metadata::exists(&meta_path) {
        let mut proxy = engine::open_write(&ctx.paths.proxy_path(logical))?;
        let size = proxy.metadata()?.len();
        if size <= ctx.cfg.threshold {
            return Ok(());
        }
        info!(logical, size, threshold = ctx.cfg.threshold, "migrating on release");
        migrate::run(ctx, logical, &mut proxy, true, true)
    } else {
        let tail_path = ctx.paths.tail_path(logical)?;
        if !tail_path.exists() {
            return Ok(());
        }
        info!(logical, "flushing tail on release");
        let mut tail = engine::open_write(&tail_path)?;
        migrate::run(ctx, logical, &mut tail, false, true)?;
        drop(tail);
        fs::remove_file(&tail_path)?;
        Ok(())
    }
}

fn init_cache(cfg: &TierConfig, paths: &PathMapper) -> Option<SegmentCache> {
    if cfg.no_cache {
        return None;
    }
    let max_seg = cfg.max_seg_size() as u64;
    if cfg.cache_size < max_seg {
        warn!(
            cache_size = cfg.cache_size,
            max_seg, "cache budget below one segment; caching disabled"
        );
        return None;
    }
    let dir = paths.cache_dir();
    if let Err(e) = fs::create_dir_all(&dir) {
        warn!(dir = %dir.display(), error = %e, "could not create cache directory; caching disabled");
        return None;
    }
    Some(SegmentCache::new(dir, cfg.cache_size))
}

impl std::fmt::Debug for TierFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TierFs")
            .field("root", &self.paths.root())
            .field("indexed_segments", &self.index.len())
            .field("cache_enabled", &self.cache.is_some())
            .finish()
    }
}
