//! Tail-write engine: append protocol for tiered files
//!
//! Tiered bodies are immutable mid-stream; only appends are supported. The
//! first write to a tiered file detaches its last segment back onto SSD as
//! the tail file, so appended bytes coalesce with the in-progress end of the
//! file instead of forcing a whole-body recall.

use crate::engine::{self, EngineCtx};
use crate::error::{TierError, TierResult};
use crate::metadata;
use crate::read;
use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::FileExt;
use std::path::Path;
use tierfs_reduce::Released;
use tracing::debug;

pub(crate) fn run(
    ctx: &mut EngineCtx<'_>,
    logical: &str,
    buf: &[u8],
    offset: i64,
) -> TierResult<usize> {
    let meta_path = ctx.paths.metadata_path(logical)?;
    if !metadata::exists(&meta_path) {
        // resident: write straight through to the proxy
        let file = engine::open_write(&ctx.paths.proxy_path(logical))?;
        file.write_all_at(buf, offset as u64)?;
        return Ok(buf.len());
    }

    let header = metadata::read_header(&meta_path)?;
    if offset != header.total_size {
        return Err(TierError::NonAppendWrite {
            offset,
            end: header.total_size,
        });
    }

    let tail_path = ctx.paths.tail_path(logical)?;
    if !tail_path.exists() {
        detach_last_segment(ctx, &meta_path, &tail_path)?;
    }

    let mut tail = OpenOptions::new().append(true).create(true).open(&tail_path)?;
    tail.write_all(buf)?;
    metadata::write_total_size(&meta_path, header.total_size + buf.len() as i64)?;
    metadata::refresh_times(&meta_path)?;
    debug!(logical, bytes = buf.len(), "appended to tail");
    Ok(buf.len())
}

/// Pull the last segment of the record back onto SSD as the tail file, drop
/// its reference, and purge it if nothing else shares it
fn detach_last_segment(
    ctx: &mut EngineCtx<'_>,
    meta_path: &Path,
    tail_path: &Path,
) -> TierResult<()> {
    let digest = metadata::last_ref(meta_path)?;
    read::materialise(ctx.cfg, ctx.paths, ctx.store, &digest, tail_path)?;
    metadata::truncate_last_ref(meta_path)?;
    match ctx.index.release(&digest)? {
        Released::ZeroNow => engine::purge_segment(ctx, &digest)?,
        Released::Shared(_) => {}
    }
    ctx.flush_index();
    debug!(digest = %digest, "detached last segment into the tail file");
    Ok(())
}
