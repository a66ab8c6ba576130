use super::{
    compress::DEFAULT_COMPRESS_THRESHOLD, pool::DEFAULT_POOL_CAPACITY, types::MAX_REMAINING_LENGTH,
};

/// Highest gzip level accepted by `flate2`.
const MAX_COMPRESSION_LEVEL: u32 = 9;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecConfig {
    /// PUBLISH payloads longer than this are gzipped. `None` turns
    /// compression off in both directions.
    pub compress_threshold: Option<usize>,
    pub compression_level: u32,
    /// Largest inbound remaining length, `0` means unlimited.
    pub max_size: u32,
    /// Largest payload a gzip PUBLISH may inflate to. A nonzero `max_size`
    /// lowers it further.
    pub max_inflated_size: usize,
    pub pool_capacity: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        CodecConfig::new()
    }
}

impl CodecConfig {
    pub fn new() -> Self {
        CodecConfig {
            compress_threshold: Some(DEFAULT_COMPRESS_THRESHOLD),
            compression_level: 6,
            max_size: 0,
            max_inflated_size: MAX_REMAINING_LENGTH as usize,
            pool_capacity: DEFAULT_POOL_CAPACITY,
        }
    }

    pub fn compress_threshold(mut self, threshold: Option<usize>) -> Self {
        self.compress_threshold = threshold;
        self
    }

    /// Set the gzip level, clamped to `0..=9`.
    pub fn compression_level(mut self, level: u32) -> Self {
        self.compression_level = level.min(MAX_COMPRESSION_LEVEL);
        self
    }

    pub fn max_size(mut self, size: u32) -> Self {
        self.max_size = size;
        self
    }

    pub fn max_inflated_size(mut self, size: usize) -> Self {
        self.max_inflated_size = size;
        self
    }

    pub fn pool_capacity(mut self, capacity: usize) -> Self {
        self.pool_capacity = capacity;
        self
    }

    pub(crate) fn should_compress(&self, payload_len: usize) -> bool {
        matches!(self.compress_threshold, Some(threshold) if payload_len > threshold)
    }

    pub(crate) fn decompress_enabled(&self) -> bool {
        self.compress_threshold.is_some()
    }

    pub(crate) fn inflate_limit(&self) -> usize {
        match self.max_size {
            0 => self.max_inflated_size,
            max_size => self.max_inflated_size.min(max_size as usize),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_is_exclusive() {
        let config = CodecConfig::new();
        assert!(!config.should_compress(512));
        assert!(config.should_compress(513));
    }

    #[test]
    fn disabled_compression() {
        let config = CodecConfig::new().compress_threshold(None);
        assert!(!config.should_compress(1 << 20));
        assert!(!config.decompress_enabled());
    }

    #[test]
    fn inflate_limit_follows_max_size() {
        let config = CodecConfig::new();
        assert_eq!(config.inflate_limit(), 268_435_455);

        let config = config.max_size(128 * 1024);
        assert_eq!(config.inflate_limit(), 128 * 1024);

        let config = config.max_inflated_size(1024);
        assert_eq!(config.inflate_limit(), 1024);
    }

    #[test]
    fn level_is_clamped() {
        assert_eq!(CodecConfig::new().compression_level(42).compression_level, 9);
    }
}
