//! SST files: immutable, sorted key-value files serving frequent point
//! queries and range scans by key.
//!
//! An SST file is an append-only sequence of blocks, each followed by a
//! 5-byte trailer (compression tag + CRC-32C of the block payload). Data
//! blocks hold the records; the index block maps the last key of each data
//! block to that block's handle; an optional bloom filter sits between
//! them. The index and bloom handles are returned to the caller at write
//! time and presented back on open — the file itself carries no footer.
//!
//! ## File Layout
//!
//! ```text
//! +--------------------------+
//! | Data Block 1             |
//! | Data Block 1 Trailer     |
//! +--------------------------+
//! | ...                      |
//! +--------------------------+
//! | Data Block N             |
//! | Data Block N Trailer     |
//! +--------------------------+
//! | Bloom Filter (optional)  |
//! +--------------------------+
//! | Index Block              |
//! | Index Block Trailer      |
//! +--------------------------+
//! ```

use std::cmp::Ordering;
use std::sync::Arc;

pub mod block;
pub mod block_cache;
pub mod format;
pub mod reader;
pub mod writer;

pub use block_cache::BlockCache;
pub use format::{BlockHandle, BloomFilterHandle};
pub use reader::{SstFileIterator, SstFileReader};
pub use writer::SstFileWriter;

/// Total order over keys. Must agree with the order keys were written in;
/// the comparator a reader is constructed with is passed by value into
/// every iterator it creates.
pub type KeyComparator = Arc<dyn Fn(&[u8], &[u8]) -> Ordering + Send + Sync>;

/// Orders keys as raw bytes: unsigned lexicographic, shorter first on a
/// common prefix.
pub fn bytewise_comparator() -> KeyComparator {
    Arc::new(|a: &[u8], b: &[u8]| a.cmp(b))
}
