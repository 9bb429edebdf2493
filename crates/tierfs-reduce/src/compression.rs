//! Streaming zstd compression between file handles

use crate::error::ReduceError;
use std::io::{self, Read, Write};

/// zstd level for tiered payloads (balanced default)
const LEVEL: i32 = 3;

/// Stream exactly `n` uncompressed bytes from `src` through the encoder into
/// `dst`. Fails if the source ends before `n` bytes were consumed.
pub fn deflate<R: Read, W: Write>(src: &mut R, dst: &mut W, n: u64) -> Result<(), ReduceError> {
    let mut encoder =
        zstd::stream::Encoder::new(dst, LEVEL).map_err(|e| ReduceError::Compress(e.to_string()))?;
    let copied = io::copy(&mut src.take(n), &mut encoder)
        .map_err(|e| ReduceError::Compress(e.to_string()))?;
    if copied != n {
        return Err(ReduceError::Compress(format!(
            "input ended after {} of {} bytes",
            copied, n
        )));
    }
    encoder
        .finish()
        .map_err(|e| ReduceError::Compress(e.to_string()))?;
    Ok(())
}

/// Stream the full decoded output of `src` into `dst`
pub fn inflate<R: Read, W: Write>(src: &mut R, dst: &mut W) -> Result<(), ReduceError> {
    zstd::stream::copy_decode(src, dst).map_err(|e| ReduceError::Compress(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    fn roundtrip(data: &[u8]) -> Vec<u8> {
        let mut compressed = Vec::new();
        deflate(&mut Cursor::new(data), &mut compressed, data.len() as u64).unwrap();
        let mut out = Vec::new();
        inflate(&mut Cursor::new(compressed), &mut out).unwrap();
        out
    }

    #[test]
    fn empty_roundtrips() {
        assert_eq!(roundtrip(b""), b"");
    }

    #[test]
    fn text_roundtrips() {
        let data = b"the quick brown fox jumps over the lazy dog".repeat(100);
        assert_eq!(roundtrip(&data), data);
    }

    #[test]
    fn deflate_consumes_exactly_n() {
        let data = b"0123456789abcdef";
        let mut src = Cursor::new(data.to_vec());
        let mut compressed = Vec::new();
        deflate(&mut src, &mut compressed, 8).unwrap();
        // the window stops at byte 8; the rest of the source is untouched
        assert_eq!(src.position(), 8);
        let mut out = Vec::new();
        inflate(&mut Cursor::new(compressed), &mut out).unwrap();
        assert_eq!(out, &data[..8]);
    }

    #[test]
    fn deflate_fails_on_short_source() {
        let mut compressed = Vec::new();
        let err = deflate(&mut Cursor::new(b"abc".to_vec()), &mut compressed, 10);
        assert!(err.is_err());
    }

    #[test]
    fn inflate_rejects_garbage() {
        let mut out = Vec::new();
        assert!(inflate(&mut Cursor::new(b"not a zstd frame".to_vec()), &mut out).is_err());
    }

    proptest! {
        #[test]
        fn prop_roundtrip(data in prop::collection::vec(0u8..=255, 0..50_000)) {
            prop_assert_eq!(roundtrip(&data), data);
        }
    }
}
