//! Content-defined segmenting over byte streams

use crate::error::ReduceError;
use crate::fingerprint::{digest_of, SegmentDigest};
use fastcdc::v2020::StreamCDC;
use serde::{Deserialize, Serialize};
use std::io::Read;

/// Smallest average segment size the chunker accepts
pub const MIN_AVG_SIZE: u32 = 256;
/// Largest average segment size the chunker accepts
pub const MAX_AVG_SIZE: u32 = 256 * 1024 * 1024;

/// Sizing for the content-defined chunker. The minimum and maximum segment
/// sizes are derived from the average as `avg - avg/16` and `avg + avg/16`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SegmenterConfig {
    /// Rolling-hash window size, kept for option compatibility; the chunker
    /// derives its window internally
    pub window_size: u32,
    /// Target segment length in bytes
    pub avg_size: u32,
}

impl SegmenterConfig {
    /// Smallest segment the chunker will emit (except a final residual)
    pub fn min_size(&self) -> u32 {
        self.avg_size - self.avg_size / 16
    }

    /// Largest segment the chunker will emit. The cache must hold at least
    /// one segment of this size or it is forced off.
    pub fn max_size(&self) -> u32 {
        self.avg_size + self.avg_size / 16
    }

    /// Reject sizes outside the chunker's supported range
    pub fn validate(&self) -> Result<(), ReduceError> {
        if self.avg_size < MIN_AVG_SIZE || self.avg_size > MAX_AVG_SIZE {
            return Err(ReduceError::Segmenter(format!(
                "average segment size {} out of range [{}, {}]",
                self.avg_size, MIN_AVG_SIZE, MAX_AVG_SIZE
            )));
        }
        if self.window_size == 0 || self.window_size >= self.min_size() {
            return Err(ReduceError::Segmenter(format!(
                "window size {} must be non-zero and smaller than the minimum segment size {}",
                self.window_size,
                self.min_size()
            )));
        }
        Ok(())
    }
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            window_size: 48,
            avg_size: 4096,
        }
    }
}

/// One closed segment: its position in the stream and the digest of its bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentSpan {
    /// Byte offset of this segment in the stream, cumulative from 0
    pub offset: u64,
    /// Uncompressed length in bytes
    pub length: u32,
    /// BLAKE3 digest of the segment bytes
    pub digest: SegmentDigest,
}

/// Drives the content-defined chunker across a byte stream and yields
/// `(offset, length, digest)` spans. Each [`Segmenter::segments`] call builds
/// a fresh chunker, so no state carries across files.
#[derive(Debug, Clone, Copy)]
pub struct Segmenter {
    config: SegmenterConfig,
}

impl Segmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SegmenterConfig {
        &self.config
    }

    /// Segment `source` from its current position to EOF. The final span of a
    /// non-empty stream is the residual candidate: the caller chooses whether
    /// to emit it as a segment or retain its bytes for a tail file.
    pub fn segments<R: Read>(&self, source: R) -> Segments<R> {
        Segments {
            inner: StreamCDC::new(
                source,
                self.config.min_size(),
                self.config.avg_size,
                self.config.max_size(),
            ),
        }
    }
}

/// Iterator over the spans of one stream
pub struct Segments<R: Read> {
    inner: StreamCDC<R>,
}

impl<R: Read> Iterator for Segments<R> {
    type Item = Result<SegmentSpan, ReduceError>;

    fn next(&mut self) -> Option<Self::Item> {
        let chunk = match self.inner.next()? {
            Ok(chunk) => chunk,
            Err(e) => return Some(Err(e.into())),
        };
        Some(Ok(SegmentSpan {
            offset: chunk.offset,
            length: chunk.length as u32,
            digest: digest_of(&chunk.data),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    fn spans_of(data: &[u8], avg: u32) -> Vec<SegmentSpan> {
        let seg = Segmenter::new(SegmenterConfig {
            window_size: 48,
            avg_size: avg,
        });
        seg.segments(Cursor::new(data.to_vec()))
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    fn mixed_bytes(n: usize) -> Vec<u8> {
        let mut state = 0x2545f491_u64;
        (0..n)
            .map(|_| {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                (state >> 33) as u8
            })
            .collect()
    }

    #[test]
    fn empty_stream_yields_no_spans() {
        assert!(spans_of(&[], 256).is_empty());
    }

    #[test]
    fn spans_partition_the_stream() {
        let data = mixed_bytes(64 * 1024);
        let spans = spans_of(&data, 512);
        assert!(spans.len() > 1);
        let mut expected_offset = 0u64;
        for span in &spans {
            assert_eq!(span.offset, expected_offset);
            expected_offset += span.length as u64;
        }
        assert_eq!(expected_offset, data.len() as u64);
    }

    #[test]
    fn span_digests_match_the_underlying_bytes() {
        let data = mixed_bytes(16 * 1024);
        for span in spans_of(&data, 512) {
            let start = span.offset as usize;
            let end = start + span.length as usize;
            assert_eq!(span.digest, digest_of(&data[start..end]));
        }
    }

    #[test]
    fn short_input_is_a_single_span() {
        let data = mixed_bytes(100);
        let spans = spans_of(&data, 4096);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].length, 100);
        assert_eq!(spans[0].digest, digest_of(&data));
    }

    #[test]
    fn segmenting_is_deterministic() {
        let data = mixed_bytes(32 * 1024);
        assert_eq!(spans_of(&data, 512), spans_of(&data, 512));
    }

    #[test]
    fn size_bounds_are_derived_from_the_average() {
        let config = SegmenterConfig {
            window_size: 48,
            avg_size: 4096,
        };
        assert_eq!(config.min_size(), 4096 - 256);
        assert_eq!(config.max_size(), 4096 + 256);
    }

    #[test]
    fn validate_rejects_tiny_average() {
        let config = SegmenterConfig {
            window_size: 48,
            avg_size: 16,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_oversized_window() {
        let config = SegmenterConfig {
            window_size: 4096,
            avg_size: 4096,
        };
        assert!(config.validate().is_err());
    }

    proptest! {
        #[test]
        fn prop_spans_cover_exactly_the_input(data in prop::collection::vec(0u8..=255, 0..50_000)) {
            let spans = spans_of(&data, 512);
            let total: u64 = spans.iter().map(|s| s.length as u64).sum();
            prop_assert_eq!(total, data.len() as u64);
        }
    }
}
