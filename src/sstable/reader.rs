//! Reads SST files: point lookups through the bloom filter and two-level
//! index, and ordered scans starting at any key.

use std::io::{Read, Seek};

use tracing::{debug, trace};

use crate::bloom::BloomFilter;
use crate::config::SstConfig;
use crate::error::Result;
use crate::fmt::Raw;
use crate::hash::hash_bytes;
use crate::sstable::block::{BlockIterator, BlockReader};
use crate::sstable::block_cache::BlockCache;
use crate::sstable::format::{crc32c, BlockHandle, BlockTrailer};
use crate::sstable::KeyComparator;

/// Serves point lookups and scans over one SST file.
///
/// Construction eagerly loads the index block through the cache. The
/// comparator must match the order the file was written in. A reader is
/// safe to share across threads; its positioned reads are serialized
/// internally.
pub struct SstFileReader<R: Read + Seek> {
    block_cache: BlockCache<R>,
    bloom_filter: Option<BloomFilter>,
    index_block_reader: BlockReader,
    comparator: KeyComparator,
    verify_checksums: bool,
}

impl<R: Read + Seek> SstFileReader<R> {
    pub fn new(
        block_cache: BlockCache<R>,
        index_block_handle: BlockHandle,
        bloom_filter: Option<BloomFilter>,
        comparator: KeyComparator,
        config: &SstConfig,
    ) -> Result<Self> {
        let verify_checksums = config.verify_checksums;
        let index_block_reader = Self::read_block_from(
            &block_cache,
            &index_block_handle,
            true,
            comparator.clone(),
            verify_checksums,
        )?;
        debug!(
            offset = index_block_handle.offset(),
            entries = index_block_reader.record_count(),
            "opened sst file"
        );
        Ok(Self {
            block_cache,
            bloom_filter,
            index_block_reader,
            comparator,
            verify_checksums,
        })
    }

    /// Returns the value stored under `key`, or `None` if the file does
    /// not contain it.
    pub fn lookup(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(filter) = &self.bloom_filter {
            if !filter.test_hash(hash_bytes(key)) {
                trace!(key = %Raw::bytes(key), "bloom filter ruled out key");
                return Ok(None);
            }
        }
        // Seek the index to the block that may contain the key. An
        // exhausted index iterator means every data block's last key is
        // below the target.
        let mut index_iter = self.index_block_reader.iter();
        index_iter.seek_to(key)?;
        if !index_iter.has_next() {
            return Ok(None);
        }
        let mut data_iter = self.next_block_iter(&mut index_iter)?;
        if data_iter.seek_to(key)? {
            if let Some(entry) = data_iter.next() {
                return Ok(Some(entry?.value().copy_to_vec()));
            }
        }
        Ok(None)
    }

    /// Creates a scan iterator over the whole file, positioned at the
    /// first key. Use [`SstFileIterator::seek_to`] to start elsewhere.
    pub fn iter(&self) -> SstFileIterator<'_, R> {
        SstFileIterator {
            reader: self,
            index_iter: self.index_block_reader.iter(),
            data_iter: None,
        }
    }

    /// Loads the data block referenced by the index iterator's next entry
    /// and returns an iterator over it.
    fn next_block_iter(&self, index_iter: &mut BlockIterator) -> Result<BlockIterator> {
        let Some(entry) = index_iter.next() else {
            return errinput!("no such element in index block");
        };
        let handle = BlockHandle::decode(&mut entry?.value().input())?;
        Ok(self.read_block(&handle, false)?.iter())
    }

    fn read_block(&self, handle: &BlockHandle, is_index: bool) -> Result<BlockReader> {
        Self::read_block_from(
            &self.block_cache,
            handle,
            is_index,
            self.comparator.clone(),
            self.verify_checksums,
        )
    }

    fn read_block_from(
        cache: &BlockCache<R>,
        handle: &BlockHandle,
        is_index: bool,
        comparator: KeyComparator,
        verify_checksums: bool,
    ) -> Result<BlockReader> {
        let trailer_data = cache.get_block(
            handle.offset() + handle.size() as u64,
            BlockTrailer::ENCODED_LENGTH,
            is_index,
        )?;
        let trailer = BlockTrailer::decode(&mut trailer_data.input())?;

        let data = cache.get_block(handle.offset(), handle.size() as usize, is_index)?;
        if verify_checksums {
            let actual = crc32c(data.as_bytes());
            if actual != trailer.crc32c() {
                return errcorrupt!(
                    "block at offset {} failed checksum: expected {:#010x}, computed {:#010x}",
                    handle.offset(),
                    trailer.crc32c(),
                    actual
                );
            }
        }
        BlockReader::new(data, comparator)
    }
}

/// Ordered scan over an SST file. Advancing past the end of a data block
/// transparently loads the next one through the index iterator.
pub struct SstFileIterator<'a, R: Read + Seek> {
    reader: &'a SstFileReader<R>,
    index_iter: BlockIterator,
    data_iter: Option<BlockIterator>,
}

impl<R: Read + Seek> SstFileIterator<'_, R> {
    /// Positions the iterator at the record whose key is equal to or the
    /// smallest greater than `key`.
    pub fn seek_to(&mut self, key: &[u8]) -> Result<()> {
        self.index_iter.seek_to(key)?;
        if self.index_iter.has_next() {
            let mut data_iter = self.reader.next_block_iter(&mut self.index_iter)?;
            // The index entry key is the last key of its data block, so a
            // block whose index entry reaches the target must contain some
            // key >= target.
            data_iter.seek_to(key)?;
            self.data_iter = Some(data_iter);
        } else {
            self.data_iter = None;
        }
        Ok(())
    }
}

impl<R: Read + Seek> Iterator for SstFileIterator<'_, R> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(data_iter) = &mut self.data_iter {
                match data_iter.next() {
                    Some(Ok(entry)) => {
                        return Some(Ok((
                            entry.key().copy_to_vec(),
                            entry.value().copy_to_vec(),
                        )))
                    }
                    Some(Err(e)) => return Some(Err(e)),
                    None => {}
                }
            }
            if !self.index_iter.has_next() {
                return None;
            }
            match self.reader.next_block_iter(&mut self.index_iter) {
                Ok(iter) => self.data_iter = Some(iter),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
