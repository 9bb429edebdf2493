//! TierFS data-reduction primitives: content-defined segmenting (FastCDC),
//! BLAKE3 fingerprinting, streaming zstd compression, and the global segment
//! index with its durable mirror.
//!
//! Write path: file → segments (FastCDC) → digest (BLAKE3) → dedup → compress → object store
//! Read path:  object store → decompress → segment cache → caller buffer

pub mod compression;
pub mod error;
pub mod fingerprint;
pub mod index;
pub mod segmenter;

pub use compression::{deflate, inflate};
pub use error::ReduceError;
pub use fingerprint::{digest_of, SegmentDigest, DIGEST_HEX_LEN};
pub use index::{Released, SegmentEntry, SegmentIndex, MIRROR_RECORD_LEN};
pub use segmenter::{SegmentSpan, Segmenter, SegmenterConfig, Segments};
