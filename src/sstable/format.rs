//! On-disk framing for blocks: the trailer written after every block and
//! the varint-encoded handles that locate blocks and bloom filters.

use crc::{Crc, CRC_32_ISCSI};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::slice::{Slice, SliceInput, SliceOutput};

/// Castagnoli CRC over block payloads.
const CRC32C: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

pub fn crc32c(data: &[u8]) -> u32 {
    CRC32C.checksum(data)
}

/// Trailer following every block's payload: one compression byte (0,
/// reserved) and the payload's CRC-32C.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockTrailer {
    compression: u8,
    crc32c: u32,
}

impl BlockTrailer {
    pub const ENCODED_LENGTH: usize = 5;

    pub fn new(compression: u8, crc32c: u32) -> Self {
        Self { compression, crc32c }
    }

    pub fn compression(&self) -> u8 {
        self.compression
    }

    pub fn crc32c(&self) -> u32 {
        self.crc32c
    }

    pub fn decode(input: &mut SliceInput) -> Result<Self> {
        let compression = input.read_u8()?;
        let crc32c = input.read_u32()?;
        Ok(Self { compression, crc32c })
    }

    pub fn encode(&self) -> Slice {
        let mut output = SliceOutput::new(Self::ENCODED_LENGTH);
        output.write_u8(self.compression);
        output.write_u32(self.crc32c);
        output.to_slice()
    }
}

/// Locates a block within the file: `(offset, size)` where `size` excludes
/// the trailer. Persisted by the caller (e.g. in a manifest) and presented
/// back on open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHandle {
    offset: u64,
    size: u32,
}

impl BlockHandle {
    /// Worst case for a valid file: 9 varint bytes for an offset below
    /// 2^63 plus 5 for the size.
    pub const MAX_ENCODED_LENGTH: usize = 14;

    pub fn new(offset: u64, size: u32) -> Self {
        Self { offset, size }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Block size including its trailer.
    pub fn full_size(&self) -> u32 {
        self.size + BlockTrailer::ENCODED_LENGTH as u32
    }

    pub fn decode(input: &mut SliceInput) -> Result<Self> {
        let offset = input.read_varint64()?;
        let size = input.read_varint32()?;
        Ok(Self { offset, size })
    }

    pub fn encode(&self) -> Slice {
        let mut output = SliceOutput::new(Self::MAX_ENCODED_LENGTH);
        output.write_varint64(self.offset);
        output.write_varint32(self.size);
        output.to_slice()
    }
}

impl std::fmt::Display for BlockHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BlockHandle{{offset={}, size={}}}", self.offset, self.size)
    }
}

/// Locates the serialized bloom filter and carries the entry count needed
/// to rebuild it. Persisted by the caller next to the index handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BloomFilterHandle {
    offset: u64,
    size: u32,
    expected_entries: u64,
}

impl BloomFilterHandle {
    pub fn new(offset: u64, size: u32, expected_entries: u64) -> Self {
        Self { offset, size, expected_entries }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn expected_entries(&self) -> u64 {
        self.expected_entries
    }
}
