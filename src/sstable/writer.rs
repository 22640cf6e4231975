//! Writes SST files: sorted key-value pairs streamed into data blocks,
//! indexed by a block of (last key → block handle) entries, with an
//! optional bloom filter over all keys.

use std::io::{Seek, Write};

use tracing::debug;

use crate::bloom::BloomFilter;
use crate::config::SstConfig;
use crate::error::Result;
use crate::hash::hash_bytes;
use crate::sstable::block::BlockWriter;
use crate::sstable::format::{crc32c, BlockHandle, BlockTrailer, BloomFilterHandle};

/// Streams key-value pairs in sorted order into an SST file.
///
/// Keys must be presented in non-decreasing order under the comparator the
/// file will later be read with; the writer does not sort. The caller owns
/// the output stream and is responsible for flushing and closing it after
/// [`write_bloom_filter`] and [`write_index_block`] return, and for
/// discarding the file if any write fails partway.
///
/// [`write_bloom_filter`]: SstFileWriter::write_bloom_filter
/// [`write_index_block`]: SstFileWriter::write_index_block
pub struct SstFileWriter<W: Write + Seek> {
    out: W,
    bloom_filter: Option<BloomFilter>,
    block_size: usize,
    last_key: Vec<u8>,
    data_block_writer: BlockWriter,
    index_block_writer: BlockWriter,
}

impl<W: Write + Seek> SstFileWriter<W> {
    pub fn new(out: W, bloom_filter: Option<BloomFilter>, config: &SstConfig) -> Self {
        let block_size = config.block_size;
        Self {
            out,
            bloom_filter,
            block_size,
            last_key: Vec::new(),
            // Data blocks run slightly past the target before flushing.
            data_block_writer: BlockWriter::new(block_size + block_size / 10),
            index_block_writer: BlockWriter::new(BlockHandle::MAX_ENCODED_LENGTH * 1024),
        }
    }

    /// Appends one record, flushing the data block once it outgrows the
    /// configured target size.
    pub fn write(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.data_block_writer.append(key, value);
        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        if self.data_block_writer.memory() > self.block_size {
            self.flush()?;
        }
        if let Some(filter) = &mut self.bloom_filter {
            filter.add_hash(hash_bytes(key))?;
        }
        Ok(())
    }

    /// Writes the in-flight data block (payload + trailer) and records its
    /// handle under the block's last key in the index. No-op when the data
    /// block is empty.
    pub fn flush(&mut self) -> Result<()> {
        if self.data_block_writer.count() == 0 {
            return Ok(());
        }
        let count = self.data_block_writer.count();
        let handle = Self::flush_block_writer(&mut self.out, &mut self.data_block_writer)?;
        debug!(offset = handle.offset(), size = handle.size(), records = count, "flushed data block");
        self.index_block_writer.append(&self.last_key, handle.encode().as_bytes());
        Ok(())
    }

    /// Writes the bloom filter bytes at the current position, returning the
    /// handle the caller must persist to reopen it. `None` when the writer
    /// was built without a filter.
    pub fn write_bloom_filter(&mut self) -> Result<Option<BloomFilterHandle>> {
        let Some(filter) = &self.bloom_filter else {
            return Ok(None);
        };
        let bytes = filter.as_bytes();
        let offset = self.out.stream_position()?;
        let handle = BloomFilterHandle::new(offset, bytes.len() as u32, filter.expected_entries());
        self.out.write_all(bytes)?;
        Ok(Some(handle))
    }

    /// Flushes any in-flight data block, then writes the index block the
    /// same way and returns its handle for the caller to persist.
    pub fn write_index_block(&mut self) -> Result<BlockHandle> {
        self.flush()?;
        let entries = self.index_block_writer.count();
        let handle = Self::flush_block_writer(&mut self.out, &mut self.index_block_writer)?;
        debug!(offset = handle.offset(), size = handle.size(), entries, "wrote index block");
        Ok(handle)
    }

    /// Number of data blocks indexed so far.
    pub fn index_entry_count(&self) -> usize {
        self.index_block_writer.count()
    }

    /// Returns the underlying stream so the caller can flush and close it.
    pub fn into_inner(self) -> W {
        self.out
    }

    fn flush_block_writer(out: &mut W, writer: &mut BlockWriter) -> Result<BlockHandle> {
        let block = writer.finish();
        // todo attempt to compress the block
        let trailer = BlockTrailer::new(0, crc32c(block.as_bytes()));
        let offset = out.stream_position()?;
        let handle = BlockHandle::new(offset, block.len() as u32);
        out.write_all(block.as_bytes())?;
        out.write_all(trailer.encode().as_bytes())?;
        writer.reset();
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn new_writer(block_size: usize) -> SstFileWriter<Cursor<Vec<u8>>> {
        SstFileWriter::new(
            Cursor::new(Vec::new()),
            None,
            &SstConfig::new().block_size(block_size),
        )
    }

    #[test]
    fn test_small_writes_stay_in_one_block() {
        let mut writer = new_writer(4096);
        for i in 0..10 {
            writer.write(format!("key{i}").as_bytes(), b"value").unwrap();
        }
        assert_eq!(writer.index_entry_count(), 0);
        writer.flush().unwrap();
        assert_eq!(writer.index_entry_count(), 1);
    }

    #[test]
    fn test_memory_trigger_splits_blocks() {
        let mut writer = new_writer(32);
        for i in 0..8 {
            writer.write(format!("key{i}").as_bytes(), b"0123456789").unwrap();
        }
        writer.flush().unwrap();
        assert!(writer.index_entry_count() > 1);
    }

    #[test]
    fn test_write_index_block_flushes_pending_data() {
        let mut writer = new_writer(4096);
        writer.write(b"solo", b"value").unwrap();
        let handle = writer.write_index_block().unwrap();
        assert_eq!(writer.index_entry_count(), 0); // index writer was reset
        assert!(handle.offset() > 0);
        assert!(handle.size() > 0);
    }

    #[test]
    fn test_empty_file_still_writes_index_block() {
        let mut writer = new_writer(4096);
        let handle = writer.write_index_block().unwrap();
        assert_eq!(handle.offset(), 0);
        // Empty unaligned block: 5 footer bytes.
        assert_eq!(handle.size(), 5);
        let bytes = writer.into_inner().into_inner();
        assert_eq!(bytes.len(), 5 + BlockTrailer::ENCODED_LENGTH);
    }

    #[test]
    fn test_bloom_filter_region() {
        let mut writer = SstFileWriter::new(
            Cursor::new(Vec::new()),
            Some(crate::bloom::BloomFilter::with_fpp(30, 0.01)),
            &SstConfig::default(),
        );
        for i in 1..=5 {
            writer.write(format!("k{i}").as_bytes(), b"v").unwrap();
        }
        writer.flush().unwrap();

        let before = writer.out.stream_position().unwrap();
        let handle = writer.write_bloom_filter().unwrap().unwrap();
        assert_eq!(handle.offset(), before);
        assert_eq!(handle.size(), 36);
        assert_eq!(handle.expected_entries(), 30);
        assert_eq!(writer.out.stream_position().unwrap(), before + 36);
    }

    #[test]
    fn test_no_bloom_filter_writes_nothing() {
        let mut writer = new_writer(4096);
        writer.write(b"a", b"1").unwrap();
        writer.flush().unwrap();
        let before = writer.out.stream_position().unwrap();
        assert_eq!(writer.write_bloom_filter().unwrap(), None);
        assert_eq!(writer.out.stream_position().unwrap(), before);
    }

    #[test]
    fn test_exact_file_bytes() {
        let mut writer = new_writer(4096);
        writer.write(b"apple", b"fruit1").unwrap();
        writer.write(b"apricot", b"fruit2").unwrap();
        writer.flush().unwrap();
        let index_handle = writer.write_index_block().unwrap();
        let bytes = writer.into_inner().into_inner();

        // Record 1: varint key len, key, varint value len, value.
        let mut expected = vec![5u8];
        expected.extend_from_slice(b"apple");
        expected.push(6);
        expected.extend_from_slice(b"fruit1");
        // Record 2.
        expected.push(7);
        expected.extend_from_slice(b"apricot");
        expected.push(6);
        expected.extend_from_slice(b"fruit2");
        // Unaligned footer: positions 0 and 13, count 2, tag 1.
        expected.extend_from_slice(&0u32.to_le_bytes());
        expected.extend_from_slice(&13u32.to_le_bytes());
        expected.extend_from_slice(&2u32.to_le_bytes());
        expected.push(0x01);

        assert_eq!(&bytes[..expected.len()], &expected[..]);

        // Trailer: compression byte then the payload CRC.
        let trailer = &bytes[expected.len()..expected.len() + 5];
        assert_eq!(trailer[0], 0);
        assert_eq!(
            u32::from_le_bytes([trailer[1], trailer[2], trailer[3], trailer[4]]),
            crc32c(&expected)
        );

        // Index block starts right after the data block's trailer.
        assert_eq!(index_handle.offset(), (expected.len() + 5) as u64);
        assert_eq!(
            bytes.len(),
            index_handle.offset() as usize + index_handle.full_size() as usize
        );
    }
}
