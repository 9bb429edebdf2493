//! Open-handle accounting for deferred migration
//!
//! The release decision must run exactly once, when the last outstanding
//! handle on an inode goes away, including when the decision itself fails.
//! `begin_release` hands back a guard whose drop performs the decrement, so
//! no error path can leak a count.

use crate::error::{TierError, TierResult};
use std::collections::HashMap;
use std::fs::File;
use tracing::debug;

pub type FileHandle = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
    ReadWrite,
}

impl OpenMode {
    pub fn is_writable(&self) -> bool {
        matches!(self, OpenMode::Write | OpenMode::ReadWrite)
    }
}

pub struct OpenHandle {
    pub ino: u64,
    pub logical: String,
    pub file: File,
    pub mode: OpenMode,
}

pub struct HandleTable {
    next_fh: FileHandle,
    entries: HashMap<FileHandle, OpenHandle>,
    per_inode: HashMap<u64, u32>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            next_fh: 1,
            entries: HashMap::new(),
            per_inode: HashMap::new(),
        }
    }

    pub fn open(&mut self, ino: u64, logical: &str, file: File, mode: OpenMode) -> FileHandle {
        let fh = self.next_fh;
        self.next_fh += 1;
        self.entries.insert(
            fh,
            OpenHandle {
                ino,
                logical: logical.to_string(),
                file,
                mode,
            },
        );
        *self.per_inode.entry(ino).or_insert(0) += 1;
        debug!(fh, ino, logical, ?mode, "opened handle");
        fh
    }

    pub fn get(&self, fh: FileHandle) -> Option<&OpenHandle> {
        self.entries.get(&fh)
    }

    /// Outstanding handles on an inode
    pub fn open_count(&self, ino: u64) -> u32 {
        self.per_inode.get(&ino).copied().unwrap_or(0)
    }

    /// Detach `fh` from the table and return a guard that decrements the
    /// inode's count when it goes out of scope
    pub fn begin_release(&mut self, fh: FileHandle) -> TierResult<ReleaseGuard<'_>> {
        let handle = self
            .entries
            .remove(&fh)
            .ok_or_else(|| TierError::Invariant(format!("release of unknown handle {fh}")))?;
        debug!(fh, ino = handle.ino, "releasing handle");
        Ok(ReleaseGuard {
            table: self,
            handle,
        })
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ReleaseGuard<'a> {
    table: &'a mut HandleTable,
    handle: OpenHandle,
}

impl ReleaseGuard<'_> {
    /// True when this guard holds the only remaining handle on the inode
    pub fn is_last_close(&self) -> bool {
        self.table.open_count(self.handle.ino) == 1
    }

    pub fn logical(&self) -> &str {
        &self.handle.logical
    }

    pub fn ino(&self) -> u64 {
        self.handle.ino
    }

    pub fn mode(&self) -> OpenMode {
        self.handle.mode
    }

    pub fn file_mut(&mut self) -> &mut File {
        &mut self.handle.file
    }
}

impl Drop for ReleaseGuard<'_> {
    fn drop(&mut self) {
        let ino = self.handle.ino;
        if let Some(count) = self.table.per_inode.get_mut(&ino) {
            *count -= 1;
            if *count == 0 {
                self.table.per_inode.remove(&ino);
            }
        }
    }
}
