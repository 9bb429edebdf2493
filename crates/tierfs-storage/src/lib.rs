//! TierFS storage subsystem: the bucket-aware object-store façade and the
//! byte-bounded LRU cache of materialised segments.

pub mod cache;
pub mod error;
pub mod object_store;

pub use cache::SegmentCache;
pub use error::{StorageError, StorageResult};
pub use object_store::{BlobId, MemoryObjectStore, ObjectStore, ObjectStoreStats};
