//! Migration engine: turn a file body into a segment list
//!
//! The source handle feeds the segmenter; a secondary handle on the same
//! bytes stages payloads for upload and is kept aligned by skipping the spans
//! the index already holds. A new index entry is recorded only after its
//! upload succeeded, and the mirror is rewritten after every index mutation,
//! so a failed migration leaves at worst a re-usable partial record.

use crate::engine::EngineCtx;
use crate::error::{TierError, TierResult};
use crate::metadata::{self, MetaHeader};
use crate::scratch::ScratchFile;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom};
use std::os::unix::fs::MetadataExt;
use tierfs_reduce::{deflate, SegmentSpan};
use tierfs_storage::BlobId;
use tracing::debug;

/// Segment the bytes readable through `source` into the metadata record of
/// `logical`.
///
/// `from_ssd` selects the input: the resident proxy body (creating the
/// record) or an existing tail file (extending it). With `emit_tail` the
/// trailing residual becomes one more segment and the source is truncated;
/// without it the residual bytes are retained in the tail file for later.
///
/// A failed whole-file migration drops the half-built record; the proxy
/// still holds every byte, so the file stays resident and release can retry.
/// A failed tail flush leaves the record in place for the next attempt.
pub(crate) fn run(
    ctx: &mut EngineCtx<'_>,
    logical: &str,
    source: &mut File,
    from_ssd: bool,
    emit_tail: bool,
) -> TierResult<()> {
    let meta_path = ctx.paths.metadata_path(logical)?;
    let result = run_inner(ctx, logical, &meta_path, source, from_ssd, emit_tail);
    if result.is_err() && from_ssd {
        let _ = std::fs::remove_file(&meta_path);
    }
    result
}

fn run_inner(
    ctx: &mut EngineCtx<'_>,
    logical: &str,
    meta_path: &std::path::Path,
    source: &mut File,
    from_ssd: bool,
    emit_tail: bool,
) -> TierResult<()> {
    source.seek(SeekFrom::Start(0))?;
    if from_ssd {
        let info = source.metadata()?;
        metadata::create(
            meta_path,
            MetaHeader {
                total_size: info.len() as i64,
                atime: info.atime(),
                mtime: info.mtime(),
                ctime: info.ctime(),
            },
        )?;
    }
    let mut meta = OpenOptions::new().write(true).create(true).open(meta_path)?;
    meta.seek(SeekFrom::End(0))?;

    let data_path = if from_ssd {
        ctx.paths.proxy_path(logical)
    } else {
        ctx.paths.tail_path(logical)?
    };
    let mut staging = File::open(&data_path)?;

    let segmenter = ctx.segmenter;
    let mut spans = segmenter.segments(&mut *source).peekable();
    while let Some(span) = spans.next() {
        let span = span?;
        if spans.peek().is_none() && !emit_tail {
            retain_residual(ctx, logical, &mut staging, span.length)?;
            break;
        }
        push_segment(ctx, &mut meta, &mut staging, &span)?;
    }
    drop(meta);

    if from_ssd || emit_tail {
        source.set_len(0)?;
    }
    debug!(logical, from_ssd, emit_tail, "migration complete");
    Ok(())
}

/// One closed segment: dedup lookup, upload on miss, index + record update
fn push_segment(
    ctx: &mut EngineCtx<'_>,
    meta: &mut File,
    staging: &mut File,
    span: &SegmentSpan,
) -> TierResult<()> {
    let hit = if ctx.cfg.no_dedup {
        None
    } else {
        ctx.index.lookup(&span.digest)
    };
    if hit.is_some() {
        ctx.index.acquire(&span.digest)?;
        // keep the staging cursor aligned with the segmenter
        staging.seek(SeekFrom::Current(span.length as i64))?;
        debug!(digest = %span.digest, length = span.length, "segment deduplicated");
    } else {
        upload_segment(ctx, staging, span)?;
        if ctx.index.lookup(&span.digest).is_some() {
            // dedup disabled: the payload was re-uploaded over an identical blob
            ctx.index.acquire(&span.digest)?;
        } else {
            ctx.index.insert(span.digest, span.length)?;
        }
    }
    ctx.flush_index();
    metadata::append_ref_to(meta, &span.digest)?;
    Ok(())
}

fn upload_segment(ctx: &mut EngineCtx<'_>, staging: &mut File, span: &SegmentSpan) -> TierResult<()> {
    let blob = BlobId::from_digest(&span.digest);
    ctx.store.ensure_bucket(&blob.bucket)?;
    if ctx.cfg.no_compress {
        let mut body = staging.by_ref().take(span.length as u64);
        ctx.store
            .put(&blob.bucket, &blob.key, span.length as u64, &mut body)?;
    } else {
        let mut scratch = ScratchFile::create(ctx.paths.compress_scratch())?;
        deflate(staging, scratch.file(), span.length as u64)?;
        let compressed_len = scratch.len()?;
        scratch.rewind()?;
        ctx.store
            .put(&blob.bucket, &blob.key, compressed_len, scratch.file())?;
    }
    debug!(digest = %span.digest, length = span.length, "segment uploaded");
    Ok(())
}

/// Park the residual bytes in the tail file instead of uploading them.
/// The staging handle may itself be the tail file, so the bytes fold through
/// a scratch file.
fn retain_residual(
    ctx: &mut EngineCtx<'_>,
    logical: &str,
    staging: &mut File,
    length: u32,
) -> TierResult<()> {
    let tail_path = ctx.paths.tail_path(logical)?;
    let mut scratch = ScratchFile::create(ctx.paths.segment_scratch())?;
    let copied = io::copy(&mut staging.by_ref().take(length as u64), scratch.file())?;
    if copied != length as u64 {
        return Err(TierError::Invariant(format!(
            "residual ended after {copied} of {length} bytes"
        )));
    }
    scratch.rewind()?;
    let mut tail = File::create(&tail_path)?;
    io::copy(scratch.file(), &mut tail)?;
    debug!(logical, length, "residual retained in tail file");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TierConfig;
    use crate::paths::PathMapper;
    use std::fs;
    use std::sync::Arc;
    use tierfs_reduce::{SegmentIndex, Segmenter};
    use tierfs_storage::{MemoryObjectStore, ObjectStore};

    struct Rig {
        _dir: tempfile::TempDir,
        cfg: TierConfig,
        paths: PathMapper,
        segmenter: Segmenter,
        index: SegmentIndex,
        store: Arc<MemoryObjectStore>,
    }

    impl Rig {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let cfg = TierConfig {
                ssd_path: dir.path().to_path_buf(),
                threshold: 100,
                avg_seg_size: 256,
                no_compress: true,
                ..Default::default()
            };
            let paths = PathMapper::new(cfg.ssd_path.clone());
            let segmenter = Segmenter::new(cfg.segmenter());
            let index = SegmentIndex::new(paths.mirror_path());
            Self {
                _dir: dir,
                cfg,
                paths,
                segmenter,
                index,
                store: Arc::new(MemoryObjectStore::new()),
            }
        }

        fn ctx(&mut self) -> EngineCtx<'_> {
            EngineCtx {
                cfg: &self.cfg,
                paths: &self.paths,
                segmenter: &self.segmenter,
                index: &mut self.index,
                cache: None,
                store: &*self.store,
            }
        }
    }

    fn mixed_bytes(n: usize) -> Vec<u8> {
        let mut state = 0x9e3779b9_u64;
        (0..n)
            .map(|_| {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                (state >> 33) as u8
            })
            .collect()
    }

    #[test]
    fn whole_file_migration_covers_every_byte() {
        let mut rig = Rig::new();
        let body = mixed_bytes(4096);
        let proxy = rig.paths.proxy_path("/a");
        fs::write(&proxy, &body).unwrap();

        let mut source = OpenOptions::new().read(true).write(true).open(&proxy).unwrap();
        run(&mut rig.ctx(), "/a", &mut source, true, true).unwrap();

        let meta_path = rig.paths.metadata_path("/a").unwrap();
        let header = metadata::read_header(&meta_path).unwrap();
        assert_eq!(header.total_size, 4096);
        assert_eq!(fs::metadata(&proxy).unwrap().len(), 0);

        let indexed: u64 = metadata::refs(&meta_path)
            .unwrap()
            .map(|r| rig.index.lookup(&r.unwrap()).unwrap().length as u64)
            .sum();
        assert_eq!(indexed, 4096);
        assert!(!rig.paths.tail_path("/a").unwrap().exists());
        assert_eq!(rig.store.blob_count(), rig.index.len());
    }

    #[test]
    fn append_path_retains_the_residual() {
        let mut rig = Rig::new();
        let body = mixed_bytes(4096);
        let proxy = rig.paths.proxy_path("/a");
        fs::write(&proxy, &body).unwrap();

        let mut source = OpenOptions::new().read(true).write(true).open(&proxy).unwrap();
        run(&mut rig.ctx(), "/a", &mut source, true, false).unwrap();

        let meta_path = rig.paths.metadata_path("/a").unwrap();
        let tail_path = rig.paths.tail_path("/a").unwrap();
        let header = metadata::read_header(&meta_path).unwrap();
        let tail = fs::read(&tail_path).unwrap();
        let segmented: u64 = metadata::refs(&meta_path)
            .unwrap()
            .map(|r| rig.index.lookup(&r.unwrap()).unwrap().length as u64)
            .sum();

        assert_eq!(header.total_size, 4096);
        assert_eq!(segmented + tail.len() as u64, 4096);
        assert!(!tail.is_empty());
        assert_eq!(&body[body.len() - tail.len()..], &tail[..]);
        assert_eq!(fs::metadata(&proxy).unwrap().len(), 0);
        // scratch files never survive a migration
        assert!(!rig.paths.segment_scratch().exists());
        assert!(!rig.paths.compress_scratch().exists());
    }

    #[test]
    fn dedup_skips_the_upload_but_counts_the_reference() {
        let mut rig = Rig::new();
        let body = mixed_bytes(4096);
        for name in ["/a", "/b"] {
            let proxy = rig.paths.proxy_path(name);
            fs::write(&proxy, &body).unwrap();
            let mut source = OpenOptions::new().read(true).write(true).open(&proxy).unwrap();
            run(&mut rig.ctx(), name, &mut source, true, true).unwrap();
        }

        for (_, entry) in rig.index.iter() {
            assert_eq!(entry.refcount, 2);
        }
        // one upload per distinct digest
        assert_eq!(rig.store.stats().puts as usize, rig.index.len());
    }

    #[test]
    fn no_dedup_uploads_every_segment() {
        let mut rig = Rig::new();
        rig.cfg.no_dedup = true;
        let body = mixed_bytes(4096);
        for name in ["/a", "/b"] {
            let proxy = rig.paths.proxy_path(name);
            fs::write(&proxy, &body).unwrap();
            let mut source = OpenOptions::new().read(true).write(true).open(&proxy).unwrap();
            run(&mut rig.ctx(), name, &mut source, true, true).unwrap();
        }

        // both passes uploaded, but refcounts still track occurrences
        assert_eq!(rig.store.stats().puts as usize, 2 * rig.index.len());
        for (_, entry) in rig.index.iter() {
            assert_eq!(entry.refcount, 2);
        }
    }

    #[test]
    fn compressed_payloads_land_in_the_store() {
        let mut rig = Rig::new();
        rig.cfg.no_compress = false;
        // compressible content so the stored bytes shrink
        let body: Vec<u8> = b"abcdefgh".repeat(512);
        let proxy = rig.paths.proxy_path("/a");
        fs::write(&proxy, &body).unwrap();

        let mut source = OpenOptions::new().read(true).write(true).open(&proxy).unwrap();
        run(&mut rig.ctx(), "/a", &mut source, true, true).unwrap();

        assert!(rig.store.blob_count() >= 1);
        assert!(rig.store.stored_bytes() < body.len() as u64);
        // index lengths stay uncompressed
        let total: u64 = rig.index.iter().map(|(_, e)| e.length as u64).sum();
        assert_eq!(total, body.len() as u64);
        assert!(!rig.paths.compress_scratch().exists());
    }

    #[test]
    fn migration_failure_leaves_no_scratch_files() {
        let mut rig = Rig::new();
        let body = mixed_bytes(4096);
        let proxy = rig.paths.proxy_path("/a");
        fs::write(&proxy, &body).unwrap();

        // a store that refuses every put
        struct RefusingStore;
        impl ObjectStore for RefusingStore {
            fn ensure_bucket(&self, _: &str) -> tierfs_storage::StorageResult<()> {
                Ok(())
            }
            fn put(
                &self,
                bucket: &str,
                key: &str,
                _: u64,
                _: &mut dyn std::io::Read,
            ) -> tierfs_storage::StorageResult<()> {
                Err(tierfs_storage::StorageError::Cloud {
                    verb: "put",
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                    status: 500,
                })
            }
            fn get(
                &self,
                bucket: &str,
                key: &str,
                _: &mut dyn std::io::Write,
            ) -> tierfs_storage::StorageResult<()> {
                Err(tierfs_storage::StorageError::Cloud {
                    verb: "get",
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                    status: 500,
                })
            }
            fn delete(&self, bucket: &str, key: &str) -> tierfs_storage::StorageResult<()> {
                Err(tierfs_storage::StorageError::Cloud {
                    verb: "delete",
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                    status: 500,
                })
            }
        }

        let refusing = RefusingStore;
        let mut ctx = EngineCtx {
            cfg: &rig.cfg,
            paths: &rig.paths,
            segmenter: &rig.segmenter,
            index: &mut rig.index,
            cache: None,
            store: &refusing,
        };
        let mut source = OpenOptions::new().read(true).write(true).open(&proxy).unwrap();
        assert!(run(&mut ctx, "/a", &mut source, true, true).is_err());

        // nothing was indexed (insert happens only after a successful put)
        assert!(rig.index.is_empty());
        assert!(!rig.paths.compress_scratch().exists());
        assert!(!rig.paths.segment_scratch().exists());
        // the proxy body is untouched and the half-built record is gone,
        // so the file is still resident and release can retry
        assert_eq!(fs::metadata(&proxy).unwrap().len(), 4096);
        assert!(!rig.paths.metadata_path("/a").unwrap().exists());
    }
}
