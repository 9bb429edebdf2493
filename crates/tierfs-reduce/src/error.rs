//! Error types for the tierfs-reduce subsystem

/// All errors that can occur during segmenting, compression, or index upkeep
#[derive(Debug, thiserror::Error)]
pub enum ReduceError {
    /// The rolling-hash segmenter failed mid-stream
    #[error("segmenter failed: {0}")]
    Segmenter(String),
    /// Compression or decompression of a segment payload failed
    #[error("compression failed: {0}")]
    Compress(String),
    /// A digest was inserted into the index while already present
    #[error("segment {0} is already indexed")]
    DuplicateSegment(String),
    /// A refcount operation named a digest the index does not hold
    #[error("segment {0} is not indexed")]
    MissingSegment(String),
    /// A digest string was not valid lowercase hex of the expected width
    #[error("malformed digest: {0}")]
    MalformedDigest(String),
    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<fastcdc::v2020::Error> for ReduceError {
    fn from(err: fastcdc::v2020::Error) -> Self {
        match err {
            fastcdc::v2020::Error::IoError(e) => ReduceError::Io(e),
            other => ReduceError::Segmenter(format!("{other:?}")),
        }
    }
}
