//! Per-file metadata records for tiered files
//!
//! One record per tiered file, keyed by the proxy inode. Packed host-endian
//! layout: `total_size | atime | mtime | ctime` (i64 seconds each) followed
//! by the segment-reference stream, one fixed-width lowercase-hex digest per
//! segment in read order. The record grows by appends during migration and
//! shrinks only from the tail (first tiered write) or on unlink.

use crate::error::{TierError, TierResult};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tierfs_reduce::{SegmentDigest, DIGEST_HEX_LEN};

/// Bytes of header before the segment-reference stream
pub const HEADER_LEN: u64 = 32;
/// Bytes of one segment reference
pub const REF_LEN: u64 = DIGEST_HEX_LEN as u64;

/// The fixed header of a metadata record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetaHeader {
    /// Total logical size of the file
    pub total_size: i64,
    /// Access time, wall-clock seconds
    pub atime: i64,
    /// Modification time, wall-clock seconds
    pub mtime: i64,
    /// Attribute-change time, wall-clock seconds
    pub ctime: i64,
}

impl MetaHeader {
    fn to_bytes(self) -> [u8; HEADER_LEN as usize] {
        let mut out = [0u8; HEADER_LEN as usize];
        out[0..8].copy_from_slice(&self.total_size.to_ne_bytes());
        out[8..16].copy_from_slice(&self.atime.to_ne_bytes());
        out[16..24].copy_from_slice(&self.mtime.to_ne_bytes());
        out[24..32].copy_from_slice(&self.ctime.to_ne_bytes());
        out
    }

    fn from_bytes(bytes: &[u8; HEADER_LEN as usize]) -> Self {
        let field = |range: std::ops::Range<usize>| {
            i64::from_ne_bytes(bytes[range].try_into().unwrap_or([0; 8]))
        };
        Self {
            total_size: field(0..8),
            atime: field(8..16),
            mtime: field(16..24),
            ctime: field(24..32),
        }
    }
}

/// Wall-clock seconds since the epoch
pub(crate) fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

pub fn exists(path: &Path) -> bool {
    path.exists()
}

/// Create the record with its header; any previous content is discarded
pub fn create(path: &Path, header: MetaHeader) -> TierResult<()> {
    let mut file = File::create(path)?;
    file.write_all(&header.to_bytes())?;
    Ok(())
}

/// Read the header. Fails with `NotFound` when the record is absent.
pub fn read_header(path: &Path) -> TierResult<MetaHeader> {
    let file = open_existing(path)?;
    let mut bytes = [0u8; HEADER_LEN as usize];
    file.read_exact_at(&mut bytes, 0)?;
    Ok(MetaHeader::from_bytes(&bytes))
}

/// Rewrite the total-size field in place
pub fn write_total_size(path: &Path, total_size: i64) -> TierResult<()> {
    let file = open_writable(path)?;
    file.write_all_at(&total_size.to_ne_bytes(), 0)?;
    Ok(())
}

/// Stamp mtime and ctime with the current wall clock
pub fn refresh_times(path: &Path) -> TierResult<()> {
    let now = now_secs();
    let file = open_writable(path)?;
    let mut bytes = [0u8; 16];
    bytes[0..8].copy_from_slice(&now.to_ne_bytes());
    bytes[8..16].copy_from_slice(&now.to_ne_bytes());
    file.write_all_at(&bytes, 16)?;
    Ok(())
}

/// Set atime and mtime explicitly; ctime records the change itself
pub fn set_times(path: &Path, atime: i64, mtime: i64) -> TierResult<()> {
    let file = open_writable(path)?;
    let mut bytes = [0u8; 24];
    bytes[0..8].copy_from_slice(&atime.to_ne_bytes());
    bytes[8..16].copy_from_slice(&mtime.to_ne_bytes());
    bytes[16..24].copy_from_slice(&now_secs().to_ne_bytes());
    file.write_all_at(&bytes, 8)?;
    Ok(())
}

/// Append one segment reference through an already-open record handle
/// positioned at the end
pub fn append_ref_to(file: &mut File, digest: &SegmentDigest) -> TierResult<()> {
    file.write_all(digest.to_hex().as_bytes())?;
    Ok(())
}

/// Append one segment reference by path
pub fn append_ref(path: &Path, digest: &SegmentDigest) -> TierResult<()> {
    let mut file = OpenOptions::new().append(true).open(path)?;
    append_ref_to(&mut file, digest)
}

/// Number of complete segment references in the record
pub fn ref_count(path: &Path) -> TierResult<u64> {
    let len = std::fs::metadata(path)?.len();
    Ok(len.saturating_sub(HEADER_LEN) / REF_LEN)
}

/// Iterate segment references in read order. A trailing partial reference
/// ends the iteration: the remainder of the file body lives in the tail file.
pub fn refs(path: &Path) -> TierResult<RefIter> {
    let mut file = open_existing(path)?;
    file.seek(SeekFrom::Start(HEADER_LEN))?;
    Ok(RefIter { file })
}

pub struct RefIter {
    file: File,
}

impl Iterator for RefIter {
    type Item = TierResult<SegmentDigest>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut bytes = [0u8; REF_LEN as usize];
        match self.file.read_exact(&mut bytes) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return None,
            Err(e) => return Some(Err(e.into())),
        }
        let hex = match std::str::from_utf8(&bytes) {
            Ok(hex) => hex,
            Err(_) => {
                return Some(Err(TierError::Invariant(
                    "metadata record holds a non-hex segment reference".into(),
                )))
            }
        };
        Some(
            SegmentDigest::from_hex(hex)
                .map_err(|e| TierError::Invariant(format!("bad segment reference: {e}"))),
        )
    }
}

/// The last segment reference without modifying the record
pub fn last_ref(path: &Path) -> TierResult<SegmentDigest> {
    let file = open_existing(path)?;
    let len = file.metadata()?.len();
    if len < HEADER_LEN + REF_LEN {
        return Err(TierError::Invariant(
            "metadata record holds no segment references".into(),
        ));
    }
    let mut bytes = [0u8; REF_LEN as usize];
    file.read_exact_at(&mut bytes, len - REF_LEN)?;
    let hex = std::str::from_utf8(&bytes)
        .map_err(|_| TierError::Invariant("metadata record holds a non-hex segment reference".into()))?;
    SegmentDigest::from_hex(hex).map_err(|e| TierError::Invariant(format!("bad segment reference: {e}")))
}

/// Remove exactly one reference from the end of the record and return it
pub fn truncate_last_ref(path: &Path) -> TierResult<SegmentDigest> {
    let digest = last_ref(path)?;
    let file = open_writable(path)?;
    let len = file.metadata()?.len();
    file.set_len(len - REF_LEN)?;
    Ok(digest)
}

fn open_existing(path: &Path) -> TierResult<File> {
    map_not_found(File::open(path), path)
}

fn open_writable(path: &Path) -> TierResult<File> {
    map_not_found(OpenOptions::new().read(true).write(true).open(path), path)
}

fn map_not_found(result: std::io::Result<File>, path: &Path) -> TierResult<File> {
    match result {
        Ok(file) => Ok(file),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(TierError::NotFound {
            path: PathBuf::from(path),
        }),
        Err(e) => Err(e.into()),
    }
}
