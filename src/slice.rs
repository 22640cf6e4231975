//! Shared byte slices and the bounded cursors used to encode and decode
//! on-disk structures.
//!
//! A [`Slice`] is a cheap, clonable view `(buffer, offset, length)` over a
//! reference-counted byte buffer. Sub-slicing is O(1) and never copies.
//! [`SliceInput`] reads fixed-width little-endian and variable-length
//! integers out of a slice, refusing to read past its end. [`SliceOutput`]
//! is the inverse: a growable encoder that snapshots into an immutable
//! slice.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::Result;
use crate::fmt::Raw;

/// A zero-copy view into a shared byte buffer.
///
/// Slices order by unsigned-byte lexicographic comparison, with the shorter
/// slice ordered first on a common prefix.
#[derive(Clone)]
pub struct Slice {
    data: Arc<[u8]>,
    offset: usize,
    len: usize,
}

impl Slice {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Offset of this view within the shared buffer.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// The viewed bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[self.offset..self.offset + self.len]
    }

    /// Reads the byte at `position`.
    pub fn get_u8(&self, position: usize) -> Result<u8> {
        if position >= self.len {
            return errinput!("position {position} out of bounds for slice of {} bytes", self.len);
        }
        Ok(self.data[self.offset + position])
    }

    /// Reads a little-endian u16 starting at `position`.
    pub fn get_u16(&self, position: usize) -> Result<u16> {
        let bytes = self.range(position, 2)?;
        Ok(LittleEndian::read_u16(bytes))
    }

    /// Reads a little-endian u32 starting at `position`.
    pub fn get_u32(&self, position: usize) -> Result<u32> {
        let bytes = self.range(position, 4)?;
        Ok(LittleEndian::read_u32(bytes))
    }

    /// Reads a little-endian u64 starting at `position`.
    pub fn get_u64(&self, position: usize) -> Result<u64> {
        let bytes = self.range(position, 8)?;
        Ok(LittleEndian::read_u64(bytes))
    }

    fn range(&self, position: usize, width: usize) -> Result<&[u8]> {
        if position + width > self.len {
            return errinput!("position {position} out of bounds for slice of {} bytes", self.len);
        }
        let start = self.offset + position;
        Ok(&self.data[start..start + width])
    }

    /// Returns a sub-view of `length` bytes starting at `index`, sharing
    /// the same buffer.
    pub fn slice(&self, index: usize, length: usize) -> Result<Slice> {
        if index + length > self.len {
            return errinput!(
                "range {index}..{} out of bounds for slice of {} bytes",
                index + length,
                self.len
            );
        }
        Ok(Slice { data: self.data.clone(), offset: self.offset + index, len: length })
    }

    /// Copies the viewed bytes into an owned buffer.
    pub fn copy_to_vec(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    /// Creates a cursor over this slice, positioned at its start.
    pub fn input(&self) -> SliceInput {
        SliceInput { slice: self.clone(), position: 0 }
    }
}

impl From<Vec<u8>> for Slice {
    fn from(data: Vec<u8>) -> Self {
        let data: Arc<[u8]> = data.into();
        let len = data.len();
        Slice { data, offset: 0, len }
    }
}

impl From<&[u8]> for Slice {
    fn from(data: &[u8]) -> Self {
        data.to_vec().into()
    }
}

impl PartialEq for Slice {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for Slice {}

impl Ord for Slice {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_bytes().cmp(other.as_bytes())
    }
}

impl PartialOrd for Slice {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for Slice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Slice({})", Raw::bytes(self.as_bytes()))
    }
}

/// A cursor reading forward through a [`Slice`].
pub struct SliceInput {
    slice: Slice,
    position: usize,
}

impl SliceInput {
    pub fn position(&self) -> usize {
        self.position
    }

    /// Moves the cursor. Positions past the end of the slice are rejected.
    pub fn set_position(&mut self, position: usize) -> Result<()> {
        if position > self.slice.len() {
            return errinput!(
                "position {position} out of bounds for slice of {} bytes",
                self.slice.len()
            );
        }
        self.position = position;
        Ok(())
    }

    /// Bytes remaining before the end of the slice.
    pub fn available(&self) -> usize {
        self.slice.len() - self.position
    }

    pub fn is_readable(&self) -> bool {
        self.available() > 0
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let v = self.slice.get_u8(self.position)?;
        self.position += 1;
        Ok(v)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let v = self.slice.get_u32(self.position)?;
        self.position += 4;
        Ok(v)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let v = self.slice.get_u64(self.position)?;
        self.position += 8;
        Ok(v)
    }

    /// Decodes a base-128 varint of at most 5 bytes.
    pub fn read_varint32(&mut self) -> Result<u32> {
        let mut result: u64 = 0;
        for shift in (0..35).step_by(7) {
            let b = self.read_u8()?;
            result |= ((b & 0x7f) as u64) << shift;
            if b & 0x80 == 0 {
                if result > u32::MAX as u64 {
                    return errcorrupt!("varint32 overflows 32 bits");
                }
                return Ok(result as u32);
            }
        }
        errcorrupt!("malformed varint32")
    }

    /// Decodes a base-128 varint of at most 10 bytes.
    pub fn read_varint64(&mut self) -> Result<u64> {
        let mut result: u64 = 0;
        for shift in (0..70).step_by(7) {
            let b = self.read_u8()?;
            result |= ((b & 0x7f) as u64) << shift;
            if b & 0x80 == 0 {
                return Ok(result);
            }
        }
        errcorrupt!("malformed varint64")
    }

    /// Returns the next `length` bytes as a sub-slice without copying.
    pub fn read_slice(&mut self, length: usize) -> Result<Slice> {
        let slice = self.slice.slice(self.position, length)?;
        self.position += length;
        Ok(slice)
    }
}

/// A growable little-endian encoder producing immutable [`Slice`]s.
pub struct SliceOutput {
    buf: Vec<u8>,
}

impl SliceOutput {
    pub fn new(capacity: usize) -> Self {
        Self { buf: Vec::with_capacity(capacity) }
    }

    pub fn size(&self) -> usize {
        self.buf.len()
    }

    /// Discards buffered bytes, keeping the allocation for reuse.
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Encodes a u32 as a base-128 varint: seven data bits per byte, high
    /// bit set on all but the final byte.
    pub fn write_varint32(&mut self, mut value: u32) {
        while value & !0x7f != 0 {
            self.buf.push((value & 0x7f) as u8 | 0x80);
            value >>= 7;
        }
        self.buf.push(value as u8);
    }

    /// Encodes a u64 as a base-128 varint, up to 10 bytes.
    pub fn write_varint64(&mut self, mut value: u64) {
        while value & !0x7f != 0 {
            self.buf.push((value & 0x7f) as u8 | 0x80);
            value >>= 7;
        }
        self.buf.push(value as u8);
    }

    pub fn write_slice(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Snapshots the buffered bytes into an immutable slice.
    pub fn to_slice(&self) -> Slice {
        Slice::from(self.buf.clone())
    }
}
