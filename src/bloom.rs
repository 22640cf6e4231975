//! Bloom filter used to skip point lookups for absent keys.
//!
//! The filter never reports false negatives: a negative probe proves the
//! key was not inserted, while a positive probe must be confirmed against
//! the data block. Serialization is the raw bit bytes written verbatim;
//! [`BloomFilter::from_bytes`] maps the same window back.

use crate::bitset::BitSet;
use crate::error::Result;

/// Bloom filter over a [`BitSet`] with double-hash probe expansion.
///
/// Probing derives a second hash `h2 = h1 >> 16` and visits
/// `(h1 + i * h2) mod bits` for `i` in `1..=k`, flipping negative combined
/// hashes to positive. Writer and reader must feed hashes from the same
/// function (see [`crate::hash::hash_bytes`]).
#[derive(Debug, Clone)]
pub struct BloomFilter {
    expected_entries: u64,
    num_hash_functions: u32,
    bits: BitSet,
}

impl BloomFilter {
    /// Creates an empty filter of `byte_length` bytes, with the hash count
    /// derived from the expected entries and available bits.
    pub fn new(expected_entries: u64, byte_length: usize) -> Self {
        Self {
            expected_entries,
            num_hash_functions: Self::optimal_num_of_hash_functions(
                expected_entries,
                byte_length as u64 * 8,
            ),
            bits: BitSet::new(byte_length),
        }
    }

    /// Creates an empty filter sized for `expected_entries` at the given
    /// target false positive probability.
    pub fn with_fpp(expected_entries: u64, fpp: f64) -> Self {
        let bits = Self::optimal_num_of_bits(expected_entries, fpp) as usize;
        let byte_length = bits.div_ceil(8).max(1);
        Self::new(expected_entries, byte_length)
    }

    /// Rewraps serialized filter bytes read back from a file.
    pub fn from_bytes(expected_entries: u64, bytes: Vec<u8>) -> Self {
        Self {
            expected_entries,
            num_hash_functions: Self::optimal_num_of_hash_functions(
                expected_entries,
                bytes.len() as u64 * 8,
            ),
            bits: BitSet::from_bytes(bytes),
        }
    }

    /// Bits needed to hold `items` entries at false positive probability
    /// `fpp`, clamped to `[0, i32::MAX]`.
    pub fn optimal_num_of_bits(items: u64, fpp: f64) -> u32 {
        let ln2_squared = std::f64::consts::LN_2 * std::f64::consts::LN_2;
        let bits = (-(items as f64) * fpp.ln() / ln2_squared).ceil();
        bits.clamp(0.0, i32::MAX as f64) as u32
    }

    /// Hash function count minimizing the false positive rate for `bits`
    /// total bits over `items` entries, at least 1.
    pub fn optimal_num_of_hash_functions(items: u64, bits: u64) -> u32 {
        if items == 0 {
            return 1;
        }
        let k = (bits as f64 / items as f64 * std::f64::consts::LN_2).round();
        (k as u32).max(1)
    }

    pub fn expected_entries(&self) -> u64 {
        self.expected_entries
    }

    pub fn num_hash_functions(&self) -> u32 {
        self.num_hash_functions
    }

    pub fn byte_len(&self) -> usize {
        self.bits.byte_len()
    }

    /// The raw bit bytes, written verbatim to the file.
    pub fn as_bytes(&self) -> &[u8] {
        self.bits.as_bytes()
    }

    /// Records a key hash in the filter.
    pub fn add_hash(&mut self, hash1: i32) -> Result<()> {
        let bit_len = self.bits.bit_len();
        if bit_len == 0 {
            return Ok(());
        }
        let hash2 = hash1 >> 16;
        for i in 1..=self.num_hash_functions as i32 {
            let mut combined = hash1.wrapping_add(i.wrapping_mul(hash2));
            // Probe positions must be non-negative; flip all bits when the
            // combined hash goes negative.
            if combined < 0 {
                combined = !combined;
            }
            self.bits.set(combined as usize % bit_len)?;
        }
        Ok(())
    }

    /// Tests a key hash. False means the key was definitely never added;
    /// true means it probably was.
    pub fn test_hash(&self, hash1: i32) -> bool {
        let bit_len = self.bits.bit_len();
        if bit_len == 0 {
            return true;
        }
        let hash2 = hash1 >> 16;
        for i in 1..=self.num_hash_functions as i32 {
            let mut combined = hash1.wrapping_add(i.wrapping_mul(hash2));
            if combined < 0 {
                combined = !combined;
            }
            if !self.bits.get(combined as usize % bit_len) {
                return false;
            }
        }
        true
    }

    /// Zeroes the filter.
    pub fn clear(&mut self) {
        self.bits.clear();
    }
}
