//! Read engine: segment list → caller buffer
//!
//! Segment references are scanned strictly sequentially; a random-access read
//! pays one index lookup per reference before its starting segment. A digest
//! referenced by a record but absent from the index is an invariant violation
//! and the engine refuses to fabricate data for it.

use crate::engine::{self, EngineCtx};
use crate::error::{TierError, TierResult};
use crate::metadata;
use crate::paths::PathMapper;
use crate::scratch::ScratchFile;
use crate::config::TierConfig;
use std::fs::{self, File};
use std::io::ErrorKind;
use std::os::unix::fs::FileExt;
use std::path::Path;
use tierfs_reduce::{inflate, SegmentDigest, SegmentEntry};
use tierfs_storage::{BlobId, ObjectStore};
use tracing::debug;

pub(crate) fn run(
    ctx: &mut EngineCtx<'_>,
    logical: &str,
    buf: &mut [u8],
    offset: i64,
) -> TierResult<usize> {
    if buf.is_empty() {
        return Ok(0);
    }
    let meta_path = ctx.paths.metadata_path(logical)?;
    if !metadata::exists(&meta_path) {
        // resident: the proxy holds the body
        let file = engine::open_read(&ctx.paths.proxy_path(logical))?;
        return Ok(read_full_at(&file, buf, offset as u64)?);
    }

    let header = metadata::read_header(&meta_path)?;
    if offset >= header.total_size {
        return Ok(0);
    }

    let mut refs = metadata::refs(&meta_path)?;
    let mut current_offset: i64 = 0;
    // scan forward to the segment straddling `offset`
    let (mut digest, mut seg_len) = loop {
        match refs.next() {
            Some(r) => {
                let d = r?;
                let entry = indexed(ctx, &d)?;
                if current_offset + entry.length as i64 > offset {
                    break (d, entry.length);
                }
                current_offset += entry.length as i64;
            }
            None => {
                // the offset lands past every segment, in the tail file
                return read_tail(ctx, logical, buf, (offset - current_offset) as u64);
            }
        }
    };

    let mut segment_offset = (offset - current_offset) as u64;
    let mut total_read = 0usize;
    loop {
        let available = (seg_len as u64 - segment_offset) as usize;
        let want = (buf.len() - total_read).min(available);
        fetch(ctx, &digest, segment_offset, &mut buf[total_read..total_read + want])?;
        total_read += want;
        current_offset += seg_len as i64;
        segment_offset = 0;
        if total_read == buf.len() || current_offset >= header.total_size {
            break;
        }
        match refs.next() {
            Some(r) => {
                let d = r?;
                let entry = indexed(ctx, &d)?;
                digest = d;
                seg_len = entry.length;
            }
            None => {
                // the remainder lives in the tail file
                let n = read_tail(ctx, logical, &mut buf[total_read..], 0)?;
                return Ok(total_read + n);
            }
        }
    }
    Ok(total_read)
}

fn indexed(ctx: &EngineCtx<'_>, digest: &SegmentDigest) -> TierResult<SegmentEntry> {
    ctx.index.lookup(digest).ok_or_else(|| {
        TierError::Invariant(format!("segment {digest} is referenced but not indexed"))
    })
}

fn read_tail(
    ctx: &EngineCtx<'_>,
    logical: &str,
    buf: &mut [u8],
    tail_offset: u64,
) -> TierResult<usize> {
    let tail_path = ctx.paths.tail_path(logical)?;
    let file = match File::open(&tail_path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(TierError::Invariant(format!(
                "segment list of {logical} ends before its total size and no tail file exists"
            )))
        }
        Err(e) => return Err(e.into()),
    };
    Ok(read_full_at(&file, buf, tail_offset)?)
}

/// Serve `dest.len()` bytes of one segment starting at `seg_offset`,
/// materialising the segment on SSD first if needed.
pub(crate) fn fetch(
    ctx: &mut EngineCtx<'_>,
    digest: &SegmentDigest,
    seg_offset: u64,
    dest: &mut [u8],
) -> TierResult<()> {
    let entry = indexed(ctx, digest)?;
    if let Some(cache) = ctx.cache.as_deref_mut() {
        if cache.contains(digest) {
            cache.touch(digest);
            debug!(digest = %digest, "segment cache hit");
        } else {
            cache.ensure_capacity(entry.length as u64);
            let dest_path = cache.file_path(digest);
            materialise(ctx.cfg, ctx.paths, ctx.store, digest, &dest_path)?;
            cache.insert(*digest, entry.length as u64);
        }
        let file = File::open(cache.file_path(digest))?;
        let got = read_full_at(&file, dest, seg_offset)?;
        check_window(digest, got, dest.len())
    } else {
        let scratch_path = ctx.paths.segment_scratch();
        materialise(ctx.cfg, ctx.paths, ctx.store, digest, &scratch_path)?;
        let file = File::open(&scratch_path)?;
        let got = read_full_at(&file, dest, seg_offset)?;
        let _ = fs::remove_file(&scratch_path);
        check_window(digest, got, dest.len())
    }
}

fn check_window(digest: &SegmentDigest, got: usize, wanted: usize) -> TierResult<()> {
    if got != wanted {
        return Err(TierError::Invariant(format!(
            "segment {digest} served {got} bytes where {wanted} were indexed"
        )));
    }
    Ok(())
}

/// Download a segment and materialise its uncompressed bytes at `dest`.
/// A failed download never leaves a partial file behind.
pub(crate) fn materialise(
    cfg: &TierConfig,
    paths: &PathMapper,
    store: &dyn ObjectStore,
    digest: &SegmentDigest,
    dest: &Path,
) -> TierResult<()> {
    let blob = BlobId::from_digest(digest);
    let mut out = ScratchFile::create(dest.to_path_buf())?;
    if cfg.no_compress {
        store.get(&blob.bucket, &blob.key, out.file())?;
    } else {
        let mut compressed = ScratchFile::create(paths.compress_scratch())?;
        store.get(&blob.bucket, &blob.key, compressed.file())?;
        compressed.rewind()?;
        inflate(compressed.file(), out.file())?;
    }
    out.keep();
    debug!(digest = %digest, dest = %dest.display(), "segment materialised");
    Ok(())
}

/// pread until the buffer is full or the file ends
fn read_full_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match file.read_at(&mut buf[total..], offset + total as u64) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}
