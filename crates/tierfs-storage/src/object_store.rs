//! Bucket-aware object storage behind a streaming trait
//!
//! The façade is the only component that talks to the network. Streaming
//! bodies are explicit call arguments, so a request's sink never outlives the
//! call that supplied it.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{StorageError, StorageResult};
use tierfs_reduce::SegmentDigest;

/// Where a segment payload lives: bucket = first three hex chars of the
/// digest, key = the remaining chars.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobId {
    pub bucket: String,
    pub key: String,
}

impl BlobId {
    pub fn from_digest(digest: &SegmentDigest) -> Self {
        let hex = digest.to_hex();
        Self {
            bucket: hex[..3].to_string(),
            key: hex[3..].to_string(),
        }
    }
}

/// Trait for object-store operations (S3-compatible stores and test doubles)
pub trait ObjectStore: Send + Sync {
    /// Create `bucket` if it does not exist
    fn ensure_bucket(&self, bucket: &str) -> StorageResult<()>;
    /// Store `len` bytes read from `body` under `bucket`/`key`
    fn put(&self, bucket: &str, key: &str, len: u64, body: &mut dyn Read) -> StorageResult<()>;
    /// Stream the blob at `bucket`/`key` into `sink`
    fn get(&self, bucket: &str, key: &str, sink: &mut dyn Write) -> StorageResult<()>;
    /// Delete the blob at `bucket`/`key`
    fn delete(&self, bucket: &str, key: &str) -> StorageResult<()>;
}

/// Request counters for the in-memory store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectStoreStats {
    /// Number of put operations
    pub puts: u64,
    /// Number of get operations
    pub gets: u64,
    /// Number of delete operations
    pub deletes: u64,
    /// Number of bucket-create operations
    pub bucket_creates: u64,
    /// Total payload bytes accepted
    pub bytes_in: u64,
    /// Total payload bytes served
    pub bytes_out: u64,
}

/// In-memory object store for tests. Counts every request so callers can
/// assert that reads were served from cache or that dedup suppressed uploads.
#[derive(Default)]
pub struct MemoryObjectStore {
    buckets: Mutex<HashMap<String, HashMap<String, Vec<u8>>>>,
    stats: Mutex<ObjectStoreStats>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> ObjectStoreStats {
        self.stats.lock().unwrap().clone()
    }

    /// Total number of blobs across all buckets
    pub fn blob_count(&self) -> usize {
        self.buckets.lock().unwrap().values().map(HashMap::len).sum()
    }

    /// Total stored payload bytes across all buckets
    pub fn stored_bytes(&self) -> u64 {
        self.buckets
            .lock()
            .unwrap()
            .values()
            .flat_map(HashMap::values)
            .map(|blob| blob.len() as u64)
            .sum()
    }

    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.buckets
            .lock()
            .unwrap()
            .get(bucket)
            .is_some_and(|b| b.contains_key(key))
    }
}

impl ObjectStore for MemoryObjectStore {
    fn ensure_bucket(&self, bucket: &str) -> StorageResult<()> {
        let mut buckets = self.buckets.lock().unwrap();
        if !buckets.contains_key(bucket) {
            debug!(bucket, "creating bucket");
            buckets.insert(bucket.to_string(), HashMap::new());
            self.stats.lock().unwrap().bucket_creates += 1;
        }
        Ok(())
    }

    fn put(&self, bucket: &str, key: &str, len: u64, body: &mut dyn Read) -> StorageResult<()> {
        let mut payload = vec![0u8; len as usize];
        body.read_exact(&mut payload)?;

        let mut buckets = self.buckets.lock().unwrap();
        let Some(blobs) = buckets.get_mut(bucket) else {
            return Err(StorageError::cloud("put", bucket, key, 404));
        };
        blobs.insert(key.to_string(), payload);

        let mut stats = self.stats.lock().unwrap();
        stats.puts += 1;
        stats.bytes_in += len;
        debug!(bucket, key, len, "put blob");
        Ok(())
    }

    fn get(&self, bucket: &str, key: &str, sink: &mut dyn Write) -> StorageResult<()> {
        let payload = {
            let buckets = self.buckets.lock().unwrap();
            buckets
                .get(bucket)
                .and_then(|blobs| blobs.get(key))
                .cloned()
                .ok_or_else(|| StorageError::cloud("get", bucket, key, 404))?
        };
        sink.write_all(&payload)?;

        let mut stats = self.stats.lock().unwrap();
        stats.gets += 1;
        stats.bytes_out += payload.len() as u64;
        debug!(bucket, key, len = payload.len(), "got blob");
        Ok(())
    }

    fn delete(&self, bucket: &str, key: &str) -> StorageResult<()> {
        let mut buckets = self.buckets.lock().unwrap();
        let removed = buckets.get_mut(bucket).and_then(|blobs| blobs.remove(key));
        if removed.is_none() {
            return Err(StorageError::cloud("delete", bucket, key, 404));
        }
        self.stats.lock().unwrap().deletes += 1;
        debug!(bucket, key, "deleted blob");
        Ok(())
    }
}
