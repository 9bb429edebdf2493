//! Unlink engine: drop a file's segment references and purge orphans

use crate::engine::{self, EngineCtx};
use crate::error::TierResult;
use crate::metadata;
use std::fs;
use std::io::ErrorKind;
use tierfs_reduce::{ReduceError, Released};
use tracing::{debug, info, warn};

pub(crate) fn run(ctx: &mut EngineCtx<'_>, logical: &str) -> TierResult<()> {
    let proxy = ctx.paths.proxy_path(logical);
    let meta_path = ctx.paths.metadata_path(logical)?;
    if metadata::exists(&meta_path) {
        let tail_path = ctx.paths.tail_path(logical)?;
        for r in metadata::refs(&meta_path)? {
            let digest = r?;
            match ctx.index.release(&digest) {
                Ok(Released::ZeroNow) => {
                    debug!(digest = %digest, "last reference gone; deleting blob");
                    engine::purge_segment(ctx, &digest)?;
                }
                Ok(Released::Shared(refcount)) => {
                    debug!(digest = %digest, refcount, "segment still shared");
                }
                Err(ReduceError::MissingSegment(_)) => {
                    warn!(digest = %digest, "unlinked reference was not indexed");
                }
                Err(e) => return Err(e.into()),
            }
        }
        ctx.flush_index();
        fs::remove_file(&meta_path)?;
        if let Err(e) = fs::remove_file(&tail_path) {
            if e.kind() != ErrorKind::NotFound {
                return Err(e.into());
            }
        }
    }
    fs::remove_file(&proxy)?;
    info!(logical, "unlinked");
    Ok(())
}
