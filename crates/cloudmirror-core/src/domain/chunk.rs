//! Chunk partitioning and the verified-chunk bitmap
//!
//! A file of `size` bytes is split into fixed-size chunks; only the final
//! chunk may be shorter. The chunk set always partitions `[0, size)` with no
//! gaps and no overlaps. A zero-byte file has no chunks at all.
//!
//! [`ChunkBitmap`] tracks which chunks have been verified-written. It is pure
//! data and never touches the filesystem.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use super::errors::DomainError;

/// A contiguous byte range `[offset, offset + length)` of one file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Chunk {
    /// Position of this chunk within the file's chunk set
    pub index: u32,
    /// First byte covered by this chunk
    pub offset: u64,
    /// Number of bytes covered
    pub length: u64,
}

impl Chunk {
    /// Number of chunks needed to cover `size` bytes
    ///
    /// A zero `chunk_size` is treated as one byte to keep the arithmetic total.
    #[must_use]
    pub fn count(size: u64, chunk_size: u64) -> u32 {
        let chunks = size.div_ceil(chunk_size.max(1));
        u32::try_from(chunks).unwrap_or(u32::MAX)
    }

    /// The chunk at `index`, or `None` if out of range
    #[must_use]
    pub fn nth(size: u64, chunk_size: u64, index: u32) -> Option<Self> {
        let chunk_size = chunk_size.max(1);
        let offset = u64::from(index).checked_mul(chunk_size)?;
        if offset >= size {
            return None;
        }
        Some(Self {
            index,
            offset,
            length: (size - offset).min(chunk_size),
        })
    }

    /// Partition `[0, size)` into chunks of `chunk_size` bytes
    #[must_use]
    pub fn partition(size: u64, chunk_size: u64) -> Vec<Self> {
        (0..Self::count(size, chunk_size))
            .filter_map(|index| Self::nth(size, chunk_size, index))
            .collect()
    }

    /// One past the last byte covered
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.offset + self.length
    }

    /// Byte range covered by this chunk
    #[must_use]
    pub const fn range(&self) -> Range<u64> {
        self.offset..self.end()
    }
}

/// Per-file set of verified-complete chunks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkBitmap {
    len: u32,
    bits: Vec<u8>,
}

impl ChunkBitmap {
    /// Create an all-unset bitmap for `len` chunks
    #[must_use]
    pub fn new(len: u32) -> Self {
        Self {
            len,
            bits: vec![0; Self::byte_len(len)],
        }
    }

    /// Restore a bitmap from its packed byte form
    ///
    /// # Errors
    /// Returns error if the byte length does not match `len` or padding bits are set
    pub fn from_bytes(len: u32, bytes: Vec<u8>) -> Result<Self, DomainError> {
        if bytes.len() != Self::byte_len(len) {
            return Err(DomainError::InvalidChunk(format!(
                "bitmap for {len} chunks needs {} bytes, got {}",
                Self::byte_len(len),
                bytes.len()
            )));
        }
        let tail_bits = len % 8;
        if tail_bits != 0 {
            if let Some(last) = bytes.last() {
                if last >> tail_bits != 0 {
                    return Err(DomainError::InvalidChunk(
                        "bitmap has bits set beyond its length".to_string(),
                    ));
                }
            }
        }
        Ok(Self { len, bits: bytes })
    }

    fn byte_len(len: u32) -> usize {
        (len as usize).div_ceil(8)
    }

    /// Packed byte form, least significant bit first
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    /// Number of chunks tracked
    #[must_use]
    pub const fn len(&self) -> u32 {
        self.len
    }

    /// Whether the bitmap tracks no chunks at all
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether chunk `index` is verified
    #[must_use]
    pub fn is_set(&self, index: u32) -> bool {
        index < self.len && self.bits[(index / 8) as usize] & (1 << (index % 8)) != 0
    }

    /// Mark chunk `index` as verified
    ///
    /// # Errors
    /// Returns error if `index` is out of range
    pub fn set(&mut self, index: u32) -> Result<(), DomainError> {
        self.check_index(index)?;
        self.bits[(index / 8) as usize] |= 1 << (index % 8);
        Ok(())
    }

    /// Mark chunk `index` as not verified
    ///
    /// # Errors
    /// Returns error if `index` is out of range
    pub fn clear(&mut self, index: u32) -> Result<(), DomainError> {
        self.check_index(index)?;
        self.bits[(index / 8) as usize] &= !(1 << (index % 8));
        Ok(())
    }

    /// Unset every chunk
    pub fn clear_all(&mut self) {
        self.bits.iter_mut().for_each(|b| *b = 0);
    }

    /// Number of verified chunks
    #[must_use]
    pub fn count_set(&self) -> u32 {
        self.bits.iter().map(|b| b.count_ones()).sum()
    }

    /// Whether every chunk is verified (vacuously true for zero chunks)
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.count_set() == self.len
    }

    /// Indices of verified chunks in ascending order
    pub fn set_indices(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.len).filter(move |i| self.is_set(*i))
    }

    /// Indices of unverified chunks in ascending order
    pub fn unset_indices(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.len).filter(move |i| !self.is_set(*i))
    }

    fn check_index(&self, index: u32) -> Result<(), DomainError> {
        if index >= self.len {
            return Err(DomainError::InvalidChunk(format!(
                "chunk index {index} out of range for {} chunks",
                self.len
            )));
        }
        Ok(())
    }
}
