//! Configuration options for the BlockDb storage engine.

/// Configuration options for a block store.
#[derive(Debug, Clone)]
pub struct Options {
    /// Maximum key length accepted by the store, in bytes.
    /// Bounds the prefix-delta scratch buffers.
    /// Default: 4KB
    pub max_key_length: usize,

    /// Capacity of the per-block write buffer. A block is flushed when the
    /// next entry would not fit.
    /// Default: 1MB
    pub block_buffer_size: usize,

    /// How many bytes of encoded entries accumulate before a new restart
    /// point is opened (and prefix-delta encoding resets).
    /// Default: 4KB
    pub restart_interval: usize,

    /// Size cap for a single block file produced by compaction.
    /// Default: 100MB
    pub max_file_size: u64,

    /// Digest written into every block envelope.
    /// Default: ChecksumKind::Sha3_512
    pub checksum: ChecksumKind,

    /// Zstd compression level for block bodies.
    /// Default: 3
    pub compression_level: i32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_key_length: 4 * 1024,
            block_buffer_size: 1024 * 1024,     // 1MB
            restart_interval: 4 * 1024,         // 4KB
            max_file_size: 100 * 1024 * 1024,   // 100MB
            checksum: ChecksumKind::Sha3_512,
            compression_level: 3,
        }
    }
}

impl Options {
    /// Creates a new Options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum key length.
    pub fn max_key_length(mut self, len: usize) -> Self {
        self.max_key_length = len;
        self
    }

    /// Sets the per-block write buffer capacity.
    pub fn block_buffer_size(mut self, size: usize) -> Self {
        self.block_buffer_size = size;
        self
    }

    /// Sets the restart-point interval.
    pub fn restart_interval(mut self, size: usize) -> Self {
        self.restart_interval = size;
        self
    }

    /// Sets the compaction output file size cap.
    pub fn max_file_size(mut self, size: u64) -> Self {
        self.max_file_size = size;
        self
    }

    /// Sets the block envelope digest.
    pub fn checksum(mut self, kind: ChecksumKind) -> Self {
        self.checksum = kind;
        self
    }

    /// Sets the zstd compression level.
    pub fn compression_level(mut self, level: i32) -> Self {
        self.compression_level = level;
        self
    }

    /// Validates the options and returns an error if any are invalid.
    pub fn validate(&self) -> crate::Result<()> {
        if self.max_key_length == 0 {
            return Err(crate::Error::invalid_argument("max_key_length must be > 0"));
        }
        if self.restart_interval == 0 {
            return Err(crate::Error::invalid_argument("restart_interval must be > 0"));
        }
        if self.block_buffer_size < self.restart_interval {
            return Err(crate::Error::invalid_argument(
                "block_buffer_size must be >= restart_interval",
            ));
        }
        if self.max_file_size == 0 {
            return Err(crate::Error::invalid_argument("max_file_size must be > 0"));
        }
        if !(1..=22).contains(&self.compression_level) {
            return Err(crate::Error::invalid_argument(
                "compression_level must be between 1 and 22",
            ));
        }
        Ok(())
    }
}

/// Digest algorithms supported by the block envelope.
///
/// Each variant knows its own digest length, so the envelope can skip over
/// the stored digest without a side table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChecksumKind {
    /// No digest. Skips both hashing and verification; used when integrity
    /// is already enforced outside this layer.
    None = 0,

    /// SHA-512.
    Sha512 = 1,

    /// SHA3-512.
    Sha3_512 = 2,
}

impl ChecksumKind {
    /// Convert from the wire id.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(ChecksumKind::None),
            1 => Some(ChecksumKind::Sha512),
            2 => Some(ChecksumKind::Sha3_512),
            _ => None,
        }
    }

    /// The wire id of this digest.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Length of the digest in bytes.
    pub fn digest_len(self) -> usize {
        match self {
            ChecksumKind::None => 0,
            ChecksumKind::Sha512 | ChecksumKind::Sha3_512 => 64,
        }
    }
}

impl Default for ChecksumKind {
    fn default() -> Self {
        ChecksumKind::Sha3_512
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let opts = Options::default();
        assert_eq!(opts.block_buffer_size, 1024 * 1024);
        assert_eq!(opts.restart_interval, 4 * 1024);
        assert_eq!(opts.checksum, ChecksumKind::Sha3_512);
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_options_builder() {
        let opts = Options::new()
            .block_buffer_size(64 * 1024)
            .restart_interval(1024)
            .checksum(ChecksumKind::None)
            .compression_level(1);

        assert_eq!(opts.block_buffer_size, 64 * 1024);
        assert_eq!(opts.restart_interval, 1024);
        assert_eq!(opts.checksum, ChecksumKind::None);
        assert_eq!(opts.compression_level, 1);
    }

    #[test]
    fn test_options_validation() {
        let mut opts = Options::default();
        assert!(opts.validate().is_ok());

        opts.restart_interval = 0;
        assert!(opts.validate().is_err());

        opts.restart_interval = 4096;
        opts.block_buffer_size = 1024;
        assert!(opts.validate().is_err());

        opts.block_buffer_size = 1024 * 1024;
        opts.compression_level = 99;
        assert!(opts.validate().is_err());
    }

    #[test]
    fn test_checksum_kind() {
        assert_eq!(ChecksumKind::from_u8(0), Some(ChecksumKind::None));
        assert_eq!(ChecksumKind::from_u8(1), Some(ChecksumKind::Sha512));
        assert_eq!(ChecksumKind::from_u8(2), Some(ChecksumKind::Sha3_512));
        assert_eq!(ChecksumKind::from_u8(3), None);

        assert_eq!(ChecksumKind::None.digest_len(), 0);
        assert_eq!(ChecksumKind::Sha512.digest_len(), 64);
        assert_eq!(ChecksumKind::Sha3_512.digest_len(), 64);
    }
}
