//! Per-file block fetching through the shared page caches.

use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing::trace;

use crate::cache::{CacheKey, CacheManager};
use crate::error::Result;
use crate::slice::Slice;

/// Pulls byte ranges of one SST file, consulting the cache manager before
/// touching the underlying reader. Index pages and data pages are routed
/// to separate caches so they can have different sizes and eviction
/// priorities.
pub struct BlockCache<R: Read + Seek> {
    path: PathBuf,
    reader: Mutex<R>,
    cache: Arc<CacheManager>,
}

impl<R: Read + Seek> BlockCache<R> {
    pub fn new(path: impl Into<PathBuf>, reader: R, cache: Arc<CacheManager>) -> Self {
        Self { path: path.into(), reader: Mutex::new(reader), cache }
    }

    /// Returns `length` bytes starting at `offset`, from cache or via one
    /// positioned read.
    pub fn get_block(&self, offset: u64, length: usize, is_index: bool) -> Result<Slice> {
        let key = CacheKey::for_position(&self.path, offset, length, is_index);
        self.cache.get_page(&key, &mut |key: &CacheKey| {
            trace!(
                path = %key.path.display(),
                offset = key.offset,
                length = key.length,
                is_index = key.is_index,
                "loading block from file"
            );
            let mut reader = self.reader.lock()?;
            reader.seek(SeekFrom::Start(key.offset))?;
            let mut buf = vec![0u8; key.length];
            reader.read_exact(&mut buf)?;
            Ok(Slice::from(buf))
        })
    }
}
