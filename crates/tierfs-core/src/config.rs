//! Recognised configuration options for the tiering core

use crate::error::{TierError, TierResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tierfs_reduce::SegmenterConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierConfig {
    /// SSD filesystem root; proxies, metadata records, the index mirror, and
    /// the cache all live under it
    pub ssd_path: PathBuf,
    /// Files larger than this many bytes migrate on release
    pub threshold: u64,
    /// Target segment length in bytes
    pub avg_seg_size: u32,
    /// Rolling-hash window size
    pub rabin_window_size: u32,
    /// Segment cache budget in bytes; below one maximum segment the cache is
    /// forced off
    pub cache_size: u64,
    /// Upload every segment even when its digest is already indexed
    pub no_dedup: bool,
    /// Disable the segment cache
    pub no_cache: bool,
    /// Upload segments uncompressed
    pub no_compress: bool,
    /// Object-store endpoint, passed through to the store client
    pub hostname: String,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            ssd_path: PathBuf::from("/mnt/ssd"),
            threshold: 64 * 1024,
            avg_seg_size: 4096,
            rabin_window_size: 48,
            cache_size: 32 * 1024 * 1024,
            no_dedup: false,
            no_cache: false,
            no_compress: false,
            hostname: "localhost".to_string(),
        }
    }
}

impl TierConfig {
    /// Reject invalid sizes before any engine runs
    pub fn validate(&self) -> TierResult<()> {
        self.segmenter()
            .validate()
            .map_err(|e| TierError::Config(e.to_string()))?;
        if self.ssd_path.as_os_str().is_empty() {
            return Err(TierError::Config("ssd_path must not be empty".into()));
        }
        Ok(())
    }

    /// Chunker sizing derived from the configured average
    pub fn segmenter(&self) -> SegmenterConfig {
        SegmenterConfig {
            window_size: self.rabin_window_size,
            avg_size: self.avg_seg_size,
        }
    }

    /// Largest segment the chunker will emit
    pub fn max_seg_size(&self) -> u32 {
        self.segmenter().max_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        TierConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_tiny_segments() {
        let config = TierConfig {
            avg_seg_size: 32,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(TierError::Config(_))));
    }

    #[test]
    fn rejects_window_wider_than_a_segment() {
        let config = TierConfig {
            rabin_window_size: 1 << 20,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_empty_root() {
        let config = TierConfig {
            ssd_path: PathBuf::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn max_seg_size_tracks_the_average() {
        let config = TierConfig {
            avg_seg_size: 8192,
            ..Default::default()
        };
        assert_eq!(config.max_seg_size(), 8192 + 512);
    }
}
