//! Block codec: a block stores and random-accesses sorted key-value pairs.
//!
//! The on-disk layout is:
//!
//! ```text
//! +------------------------------------------------+----+
//! | key len | key bytes | value len | value bytes  |    |
//! +------------------------------------------------+    |
//! | key len | key bytes | value len | value bytes  |    +-> key-value pairs
//! +------------------------------------------------+    |
//! |                  ... ...                       |    |
//! +------------------------------------------------+----+
//! | entry pos | entry pos |    ...     | entry pos |    +-> unaligned blocks only
//! +------------------------------------------------+----+
//! |      entry num / entry size      | aligned tag |
//! +------------------------------------------------+
//! ```
//!
//! When every record encodes to the same width the block is ALIGNED: the
//! footer stores the record width and the count is implied. Otherwise the
//! block is UNALIGNED and the footer stores one start offset per record
//! followed by the record count. Key lengths and value lengths are varints;
//! footer integers are fixed-width little-endian.

use std::cmp::Ordering;

use crate::error::Result;
use crate::slice::{Slice, SliceInput, SliceOutput};
use crate::sstable::KeyComparator;

const ALIGNED: u8 = 0;
const UNALIGNED: u8 = 1;

/// Number of footer bytes shared by both encodings: one u32 (width or
/// record count) plus the tag byte.
const FOOTER_LENGTH: usize = 5;

/// Accumulates sorted key-value records into an encoded block.
///
/// The writer starts in aligned mode and falls back to unaligned the first
/// time a record's encoded width diverges from the first record's. Empty
/// blocks are always unaligned, since an aligned footer could not encode a
/// record count of zero.
pub struct BlockWriter {
    block: SliceOutput,
    positions: Vec<u32>,
    aligned: bool,
    aligned_size: u32,
}

impl BlockWriter {
    pub fn new(capacity: usize) -> Self {
        Self {
            block: SliceOutput::new(capacity),
            positions: Vec::new(),
            aligned: true,
            aligned_size: 0,
        }
    }

    /// Appends one record. Callers must append keys in non-decreasing
    /// order; the writer does not sort.
    pub fn append(&mut self, key: &[u8], value: &[u8]) {
        let start = self.block.size();
        self.block.write_varint32(key.len() as u32);
        self.block.write_slice(key);
        self.block.write_varint32(value.len() as u32);
        self.block.write_slice(value);
        self.positions.push(start as u32);

        if self.aligned {
            let width = (self.block.size() - start) as u32;
            if self.aligned_size == 0 {
                self.aligned_size = width;
            } else {
                self.aligned = width == self.aligned_size;
            }
        }
    }

    /// Number of records appended since the last reset.
    pub fn count(&self) -> usize {
        self.positions.len()
    }

    /// Bytes the finished block will occupy, including its trailer reserve
    /// and, for unaligned blocks, the position array.
    pub fn memory(&self) -> usize {
        let mut memory = self.block.size() + FOOTER_LENGTH;
        if !self.aligned {
            memory += self.positions.len() * 4;
        }
        memory
    }

    /// Appends the footer and returns the encoded block. Call [`reset`]
    /// before reusing the writer.
    ///
    /// [`reset`]: BlockWriter::reset
    pub fn finish(&mut self) -> Slice {
        if self.positions.is_empty() {
            // An empty block carries no width to divide by, so the record
            // count must be explicit.
            self.aligned = false;
        }
        if self.aligned {
            self.block.write_u32(self.aligned_size);
        } else {
            for position in &self.positions {
                self.block.write_u32(*position);
            }
            self.block.write_u32(self.positions.len() as u32);
        }
        self.block.write_u8(if self.aligned { ALIGNED } else { UNALIGNED });
        self.block.to_slice()
    }

    pub fn reset(&mut self) {
        self.positions.clear();
        self.block.reset();
        self.aligned = true;
        self.aligned_size = 0;
    }
}

/// A record decoded out of a block. Key and value are zero-copy views into
/// the block's buffer.
#[derive(Debug, Clone)]
pub struct BlockEntry {
    key: Slice,
    value: Slice,
}

impl BlockEntry {
    pub fn key(&self) -> &Slice {
        &self.key
    }

    pub fn value(&self) -> &Slice {
        &self.value
    }
}

#[derive(Clone, Debug)]
enum BlockLayout {
    /// Every record is exactly `width` bytes; record `i` starts at
    /// `i * width`.
    Aligned { width: usize },
    /// Record start offsets trail the data as little-endian u32s.
    Unaligned { index: Slice },
}

/// Decodes an encoded block and serves positioned record access. Cloning
/// is cheap: the underlying buffer and comparator are shared.
#[derive(Clone)]
pub struct BlockReader {
    data: Slice,
    layout: BlockLayout,
    record_count: usize,
    comparator: KeyComparator,
}

impl std::fmt::Debug for BlockReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockReader")
            .field("data", &self.data)
            .field("layout", &self.layout)
            .field("record_count", &self.record_count)
            .finish()
    }
}

impl BlockReader {
    /// Inspects the block's final byte to pick the layout variant.
    pub fn new(block: Slice, comparator: KeyComparator) -> Result<Self> {
        if block.len() < FOOTER_LENGTH {
            return errcorrupt!("block of {} bytes is shorter than its footer", block.len());
        }
        let tag = block.get_u8(block.len() - 1)?;
        let size_field = block.get_u32(block.len() - FOOTER_LENGTH)? as usize;
        match tag {
            ALIGNED => {
                let data = block.slice(0, block.len() - FOOTER_LENGTH)?;
                if size_field == 0 || data.len() % size_field != 0 {
                    return errcorrupt!(
                        "aligned block of {} bytes does not divide into records of {size_field}",
                        data.len()
                    );
                }
                let record_count = data.len() / size_field;
                Ok(Self {
                    data,
                    layout: BlockLayout::Aligned { width: size_field },
                    record_count,
                    comparator,
                })
            }
            UNALIGNED => {
                let payload_length = block.len() - FOOTER_LENGTH;
                let index_length = size_field * 4;
                if index_length > payload_length {
                    return errcorrupt!(
                        "position array of {size_field} records exceeds block of {payload_length} bytes"
                    );
                }
                let index_offset = payload_length - index_length;
                let data = block.slice(0, index_offset)?;
                let index = block.slice(index_offset, index_length)?;
                Ok(Self {
                    data,
                    layout: BlockLayout::Unaligned { index },
                    record_count: size_field,
                    comparator,
                })
            }
            other => errcorrupt!("invalid block aligned type: {other}"),
        }
    }

    pub fn record_count(&self) -> usize {
        self.record_count
    }

    /// Byte offset where record `index` starts within the data region.
    fn record_start(&self, index: usize) -> Result<usize> {
        match &self.layout {
            BlockLayout::Aligned { width } => Ok(index * width),
            BlockLayout::Unaligned { index: positions } => {
                Ok(positions.get_u32(index * 4)? as usize)
            }
        }
    }

    pub fn iter(&self) -> BlockIterator {
        BlockIterator { input: self.data.input(), reader: self.clone(), polled: None }
    }
}

/// Iterates records in a block, with binary-search seeking.
///
/// The iterator is either fresh (decoding at its cursor), holding one
/// pre-read entry left behind by [`seek_to`], or exhausted.
///
/// [`seek_to`]: BlockIterator::seek_to
pub struct BlockIterator {
    reader: BlockReader,
    input: SliceInput,
    polled: Option<BlockEntry>,
}

impl BlockIterator {
    pub fn has_next(&self) -> bool {
        self.polled.is_some() || self.input.is_readable()
    }

    fn read_entry(&mut self) -> Result<BlockEntry> {
        let key_length = self.input.read_varint32()? as usize;
        let key = self.input.read_slice(key_length)?;
        let value_length = self.input.read_varint32()? as usize;
        let value = self.input.read_slice(value_length)?;
        Ok(BlockEntry { key, value })
    }

    /// Positions the iterator at the smallest key >= `target` via binary
    /// search, returning true only on an exact match. If no key reaches the
    /// target the iterator ends up exhausted.
    pub fn seek_to(&mut self, target: &[u8]) -> Result<bool> {
        let mut left: isize = 0;
        let mut right: isize = self.reader.record_count() as isize - 1;

        while left <= right {
            let mid = left + (right - left) / 2;
            self.input.set_position(self.reader.record_start(mid as usize)?)?;
            let entry = self.read_entry()?;
            match (self.reader.comparator)(entry.key.as_bytes(), target) {
                Ordering::Equal => {
                    self.polled = Some(entry);
                    return Ok(true);
                }
                Ordering::Greater => {
                    self.polled = Some(entry);
                    right = mid - 1;
                }
                Ordering::Less => {
                    self.polled = None;
                    left = mid + 1;
                }
            }
        }
        Ok(false)
    }
}

impl Iterator for BlockIterator {
    type Item = Result<BlockEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(entry) = self.polled.take() {
            return Some(Ok(entry));
        }
        if !self.input.is_readable() {
            return None;
        }
        Some(self.read_entry())
    }
}
