//! SST (Sorted String Table) file I/O: an immutable, sorted key-value file
//! format with a two-level index, optional bloom filter, CRC-checked
//! blocks, and a pluggable page cache.
//!
//! Writing streams pre-sorted pairs through [`sstable::writer::SstFileWriter`],
//! which returns the index and bloom handles the caller persists out of
//! band (e.g. in a manifest). Reading presents those handles back to
//! [`sstable::reader::SstFileReader`] for point lookups and ordered scans.

#[macro_use]
pub mod error;

pub mod bitset;
pub mod bloom;
pub mod cache;
pub mod config;
pub mod fmt;
pub mod hash;
pub mod slice;
pub mod sstable;

pub use config::SstConfig;
pub use error::{Error, Result};
