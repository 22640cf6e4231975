/// Configuration for SST file writers and readers.
#[derive(Debug, Clone)]
pub struct SstConfig {
    /// Target size for data blocks before they are flushed (default: 4KB).
    /// A block may exceed the target by the last record appended to it.
    pub block_size: usize,

    /// Verify block checksums when reading (default: true).
    pub verify_checksums: bool,
}

impl Default for SstConfig {
    fn default() -> Self {
        Self {
            block_size: 4 * 1024,
            verify_checksums: true,
        }
    }
}

impl SstConfig {
    /// Create a config with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the target data block size.
    pub fn block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    /// Enable or disable checksum verification on read.
    pub fn verify_checksums(mut self, enabled: bool) -> Self {
        self.verify_checksums = enabled;
        self
    }
}
