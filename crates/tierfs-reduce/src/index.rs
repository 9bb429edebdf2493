//! Global segment index: digest → (length, refcount), with a durable mirror
//!
//! The mirror is a flat array of packed records under the SSD root, rewritten
//! in full after every mutating request. The rebuild path tolerates partial
//! mirrors: records that do not parse, or that were cut short by a crashed
//! rewrite, are dropped from the tail.

use crate::error::ReduceError;
use crate::fingerprint::{SegmentDigest, DIGEST_HEX_LEN};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Byte width of one packed mirror record: hex digest + length + refcount
pub const MIRROR_RECORD_LEN: usize = DIGEST_HEX_LEN + 4 + 4;

/// What the index knows about one segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentEntry {
    /// Uncompressed length in bytes
    pub length: u32,
    /// Number of segment references across all metadata records
    pub refcount: u32,
}

/// Outcome of releasing one reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Released {
    /// Other references remain; the new count is carried
    Shared(u32),
    /// The count reached zero and the entry was removed. The caller owns
    /// deleting the blob and any cache entry.
    ZeroNow,
}

pub struct SegmentIndex {
    entries: HashMap<SegmentDigest, SegmentEntry>,
    mirror: PathBuf,
}

impl SegmentIndex {
    /// An empty index mirrored at `mirror`
    pub fn new(mirror: PathBuf) -> Self {
        Self {
            entries: HashMap::new(),
            mirror,
        }
    }

    /// Load the mirror from disk. A missing mirror yields an empty index;
    /// a short or unparseable tail is dropped.
    pub fn rebuild(mirror: PathBuf) -> Self {
        let mut index = Self::new(mirror);
        let file = match File::open(&index.mirror) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return index,
            Err(e) => {
                warn!(mirror = %index.mirror.display(), error = %e, "could not open index mirror");
                return index;
            }
        };
        let mut reader = BufReader::new(file);
        let mut record = [0u8; MIRROR_RECORD_LEN];
        loop {
            match reader.read_exact(&mut record) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
                Err(e) => {
                    warn!(mirror = %index.mirror.display(), error = %e, "index mirror read failed");
                    break;
                }
            }
            let (digest, entry) = match parse_record(&record) {
                Some(parsed) => parsed,
                None => {
                    warn!("dropping unparseable index mirror record");
                    break;
                }
            };
            debug!(digest = %digest, length = entry.length, refcount = entry.refcount, "restored index entry");
            index.entries.insert(digest, entry);
        }
        index
    }

    pub fn lookup(&self, digest: &SegmentDigest) -> Option<SegmentEntry> {
        self.entries.get(digest).copied()
    }

    /// Register a freshly uploaded segment with refcount 1
    pub fn insert(&mut self, digest: SegmentDigest, length: u32) -> Result<(), ReduceError> {
        if self.entries.contains_key(&digest) {
            return Err(ReduceError::DuplicateSegment(digest.to_hex()));
        }
        debug!(digest = %digest, length, "indexing new segment");
        self.entries.insert(
            digest,
            SegmentEntry {
                length,
                refcount: 1,
            },
        );
        Ok(())
    }

    /// Add one reference to an indexed segment
    pub fn acquire(&mut self, digest: &SegmentDigest) -> Result<u32, ReduceError> {
        let entry = self
            .entries
            .get_mut(digest)
            .ok_or_else(|| ReduceError::MissingSegment(digest.to_hex()))?;
        entry.refcount += 1;
        Ok(entry.refcount)
    }

    /// Drop one reference. On [`Released::ZeroNow`] the entry is gone and the
    /// caller must delete the blob and cache entry.
    pub fn release(&mut self, digest: &SegmentDigest) -> Result<Released, ReduceError> {
        let entry = self
            .entries
            .get_mut(digest)
            .ok_or_else(|| ReduceError::MissingSegment(digest.to_hex()))?;
        if entry.refcount <= 1 {
            self.entries.remove(digest);
            debug!(digest = %digest, "segment released to zero");
            return Ok(Released::ZeroNow);
        }
        entry.refcount -= 1;
        Ok(Released::Shared(entry.refcount))
    }

    /// Rewrite the durable mirror: truncate, then one packed record per entry
    pub fn flush(&self) -> Result<(), ReduceError> {
        let mut writer = BufWriter::new(File::create(&self.mirror)?);
        for (digest, entry) in &self.entries {
            writer.write_all(digest.to_hex().as_bytes())?;
            writer.write_all(&(entry.length as i32).to_ne_bytes())?;
            writer.write_all(&(entry.refcount as i32).to_ne_bytes())?;
        }
        writer.flush()?;
        debug!(entries = self.entries.len(), mirror = %self.mirror.display(), "index mirror rewritten");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SegmentDigest, &SegmentEntry)> {
        self.entries.iter()
    }

    pub fn mirror_path(&self) -> &Path {
        &self.mirror
    }
}

fn parse_record(record: &[u8; MIRROR_RECORD_LEN]) -> Option<(SegmentDigest, SegmentEntry)> {
    let hex = std::str::from_utf8(&record[..DIGEST_HEX_LEN]).ok()?;
    let digest = SegmentDigest::from_hex(hex).ok()?;
    let length = i32::from_ne_bytes(record[DIGEST_HEX_LEN..DIGEST_HEX_LEN + 4].try_into().ok()?);
    let refcount = i32::from_ne_bytes(record[DIGEST_HEX_LEN + 4..].try_into().ok()?);
    if length < 0 || refcount < 0 {
        return None;
    }
    Some((
        digest,
        SegmentEntry {
            length: length as u32,
            refcount: refcount as u32,
        },
    ))
}
