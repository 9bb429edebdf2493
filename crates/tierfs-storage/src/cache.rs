//! Byte-bounded LRU cache of materialised segments
//!
//! Entries are uncompressed segment files under `<ssd>/.cache/<digest>`. The
//! order list and the membership check are one insertion-ordered structure,
//! so touch, evict, and contains are all O(1).

use lru::LruCache;
use std::fs;
use std::path::{Path, PathBuf};
use tierfs_reduce::SegmentDigest;
use tracing::{debug, warn};

pub struct SegmentCache {
    dir: PathBuf,
    capacity_bytes: u64,
    current_bytes: u64,
    entries: LruCache<SegmentDigest, u64>,
}

impl SegmentCache {
    /// A cache rooted at `dir`, bounded by `capacity_bytes`. The directory
    /// must already exist.
    pub fn new(dir: PathBuf, capacity_bytes: u64) -> Self {
        debug!(dir = %dir.display(), capacity_bytes, "segment cache ready");
        Self {
            dir,
            capacity_bytes,
            current_bytes: 0,
            entries: LruCache::unbounded(),
        }
    }

    /// On-SSD path of a segment's cache file
    pub fn file_path(&self, digest: &SegmentDigest) -> PathBuf {
        self.dir.join(digest.to_hex())
    }

    /// Membership check; does not disturb the recency order
    pub fn contains(&self, digest: &SegmentDigest) -> bool {
        self.entries.contains(digest)
    }

    /// Promote `digest` to most-recently-used; no-op if absent
    pub fn touch(&mut self, digest: &SegmentDigest) {
        self.entries.get(digest);
    }

    /// Record a freshly materialised segment as most-recently-used. The
    /// caller must have ensured capacity first.
    pub fn insert(&mut self, digest: SegmentDigest, length: u64) {
        if self.entries.put(digest, length).is_none() {
            self.current_bytes += length;
        }
    }

    /// Evict least-recently-used entries (deleting their files) until `n`
    /// bytes fit inside the budget
    pub fn ensure_capacity(&mut self, n: u64) {
        while self.capacity_bytes.saturating_sub(self.current_bytes) < n {
            let Some((digest, length)) = self.entries.pop_lru() else {
                return;
            };
            debug!(digest = %digest, length, "evicting segment from cache");
            self.delete_file(&digest);
            self.current_bytes -= length;
        }
    }

    /// Drop `digest` from anywhere in the list and delete its file.
    /// Used when a segment's refcount reaches zero.
    pub fn evict(&mut self, digest: &SegmentDigest) {
        if let Some(length) = self.entries.pop(digest) {
            self.delete_file(digest);
            self.current_bytes -= length;
        }
    }

    /// Re-admit a cache file found on disk during rebuild. Skips (and
    /// removes) files that no longer fit the budget, so the restored cache
    /// is a subset of what was cached before shutdown.
    pub fn resurrect(&mut self, digest: SegmentDigest, length: u64) {
        if self.current_bytes + length <= self.capacity_bytes {
            debug!(digest = %digest, length, "resurrecting cached segment");
            self.insert(digest, length);
        } else {
            self.delete_file(&digest);
        }
    }

    pub fn current_bytes(&self) -> u64 {
        self.current_bytes
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Most-recently-used digest, if any
    pub fn mru(&self) -> Option<&SegmentDigest> {
        self.entries.iter().next().map(|(digest, _)| digest)
    }

    /// Entries in most- to least-recently-used order
    pub fn iter(&self) -> impl Iterator<Item = (&SegmentDigest, &u64)> {
        self.entries.iter()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn delete_file(&self, digest: &SegmentDigest) {
        let path = self.file_path(digest);
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "could not delete cache file");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tierfs_reduce::digest_of;

    fn cache_with_files(capacity: u64, payloads: &[&[u8]]) -> (tempfile::TempDir, SegmentCache, Vec<SegmentDigest>) {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = SegmentCache::new(dir.path().to_path_buf(), capacity);
        let mut digests = Vec::new();
        for payload in payloads {
            let digest = digest_of(payload);
            fs::write(cache.file_path(&digest), payload).unwrap();
            cache.ensure_capacity(payload.len() as u64);
            cache.insert(digest, payload.len() as u64);
            digests.push(digest);
        }
        (dir, cache, digests)
    }

    #[test]
    fn insert_tracks_bytes_and_order() {
        let (_dir, cache, digests) = cache_with_files(100, &[b"aaaa", b"bbbbbb"]);
        assert_eq!(cache.current_bytes(), 10);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.mru(), Some(&digests[1]));
    }

    #[test]
    fn contains_does_not_promote() {
        let (_dir, mut cache, digests) = cache_with_files(100, &[b"aaaa", b"bbbbbb"]);
        assert!(cache.contains(&digests[0]));
        assert_eq!(cache.mru(), Some(&digests[1]));
        cache.touch(&digests[0]);
        assert_eq!(cache.mru(), Some(&digests[0]));
    }

    #[test]
    fn ensure_capacity_evicts_from_the_lru_end() {
        let (_dir, mut cache, digests) = cache_with_files(10, &[b"aaaa", b"bbbb"]);
        // 8 of 10 bytes used; making room for 4 must evict the oldest
        cache.ensure_capacity(4);
        assert!(!cache.contains(&digests[0]));
        assert!(cache.contains(&digests[1]));
        assert!(!cache.file_path(&digests[0]).exists());
        assert_eq!(cache.current_bytes(), 4);
    }

    #[test]
    fn touch_changes_the_eviction_victim() {
        let (_dir, mut cache, digests) = cache_with_files(10, &[b"aaaa", b"bbbb"]);
        cache.touch(&digests[0]);
        cache.ensure_capacity(4);
        assert!(cache.contains(&digests[0]));
        assert!(!cache.contains(&digests[1]));
    }

    #[test]
    fn evict_removes_from_anywhere() {
        let (_dir, mut cache, digests) = cache_with_files(100, &[b"aa", b"bb", b"cc"]);
        cache.evict(&digests[1]);
        assert!(!cache.contains(&digests[1]));
        assert!(!cache.file_path(&digests[1]).exists());
        assert_eq!(cache.current_bytes(), 4);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn evict_absent_is_a_no_op() {
        let (_dir, mut cache, _) = cache_with_files(100, &[b"aa"]);
        cache.evict(&digest_of(b"never cached"));
        assert_eq!(cache.current_bytes(), 2);
    }

    #[test]
    fn resurrect_respects_the_budget() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = SegmentCache::new(dir.path().to_path_buf(), 6);
        let kept = digest_of(b"kept");
        let dropped = digest_of(b"dropped");
        fs::write(cache.file_path(&kept), b"kept").unwrap();
        fs::write(cache.file_path(&dropped), b"dropped").unwrap();

        cache.resurrect(kept, 4);
        cache.resurrect(dropped, 7);

        assert!(cache.contains(&kept));
        assert!(!cache.contains(&dropped));
        assert!(!cache.file_path(&dropped).exists());
        assert_eq!(cache.current_bytes(), 4);
    }

    #[test]
    fn budget_holds_after_mixed_traffic() {
        let (_dir, mut cache, _) = cache_with_files(12, &[b"aaaa", b"bbbb", b"cccc"]);
        cache.ensure_capacity(4);
        let d = digest_of(b"dddd");
        fs::write(cache.file_path(&d), b"dddd").unwrap();
        cache.insert(d, 4);
        assert!(cache.current_bytes() <= cache.capacity_bytes());
        let sum: u64 = cache.iter().map(|(_, len)| *len).sum();
        assert_eq!(sum, cache.current_bytes());
    }
}
