//! Content fingerprinting: BLAKE3 digests keyed as lowercase hex

use crate::error::ReduceError;
use serde::{Deserialize, Serialize};

/// Width of a digest rendered as lowercase hex. Fixed by the hash primitive;
/// metadata records and the index mirror both store refs at this width.
pub const DIGEST_HEX_LEN: usize = 64;

/// A 32-byte BLAKE3 hash identifying a segment's content.
/// Doubles as the object-store address: bucket = first three hex chars,
/// key = the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SegmentDigest(pub [u8; 32]);

impl SegmentDigest {
    /// Render as a lowercase hex string of [`DIGEST_HEX_LEN`] chars
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Parse a lowercase hex string of exactly [`DIGEST_HEX_LEN`] chars
    pub fn from_hex(hex: &str) -> Result<Self, ReduceError> {
        let bytes = hex.as_bytes();
        if bytes.len() != DIGEST_HEX_LEN {
            return Err(ReduceError::MalformedDigest(hex.to_string()));
        }
        let mut out = [0u8; 32];
        for (i, pair) in bytes.chunks_exact(2).enumerate() {
            let hi = hex_val(pair[0]).ok_or_else(|| ReduceError::MalformedDigest(hex.to_string()))?;
            let lo = hex_val(pair[1]).ok_or_else(|| ReduceError::MalformedDigest(hex.to_string()))?;
            out[i] = (hi << 4) | lo;
        }
        Ok(SegmentDigest(out))
    }

    /// The raw digest bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Display for SegmentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

fn hex_val(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        _ => None,
    }
}

/// Compute the BLAKE3 digest of a byte slice
pub fn digest_of(data: &[u8]) -> SegmentDigest {
    SegmentDigest(*blake3::hash(data).as_bytes())
}
