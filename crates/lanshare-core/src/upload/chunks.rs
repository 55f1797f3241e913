//! Chunk coverage tracking.
//!
//! [`ChunkSet`] is a fixed-size bitset over `[0, len)`. It is persisted as a
//! base64 bitmap so a ledger record stays small even for sessions with
//! hundreds of thousands of chunks.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Set of admitted chunk indices, bounded by the session's chunk count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ChunkSetRepr", into = "ChunkSetRepr")]
pub struct ChunkSet {
    len: u32,
    count: u32,
    bits: Vec<u8>,
}

impl ChunkSet {
    /// Create an empty set able to hold indices `0..len`.
    #[must_use]
    pub fn new(len: u32) -> Self {
        Self {
            len,
            count: 0,
            bits: vec![0; byte_len(len)],
        }
    }

    /// Number of indices the set can hold.
    #[must_use]
    pub const fn capacity(&self) -> u32 {
        self.len
    }

    /// Number of indices present.
    #[must_use]
    pub const fn len(&self) -> u32 {
        self.count
    }

    /// Whether no index is present.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Whether every index in `0..capacity` is present.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.count == self.len
    }

    /// Whether `index` is present.
    #[must_use]
    pub fn contains(&self, index: u32) -> bool {
        if index >= self.len {
            return false;
        }
        let (byte, mask) = locate(index);
        self.bits[byte] & mask != 0
    }

    /// Add `index`, returning `true` if it was not present before.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `index` is outside `0..capacity`.
    pub fn insert(&mut self, index: u32) -> Result<bool> {
        if index >= self.len {
            return Err(Error::invalid(format!(
                "chunk index {index} out of range (total chunks {})",
                self.len
            )));
        }
        let (byte, mask) = locate(index);
        if self.bits[byte] & mask != 0 {
            return Ok(false);
        }
        self.bits[byte] |= mask;
        self.count += 1;
        Ok(true)
    }

    /// Indices not yet present, ascending.
    pub fn missing(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.len).filter(|&i| !self.contains(i))
    }

    /// Indices present, ascending.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.len).filter(|&i| self.contains(i))
    }
}

const fn byte_len(len: u32) -> usize {
    len.div_ceil(8) as usize
}

const fn locate(index: u32) -> (usize, u8) {
    ((index / 8) as usize, 1 << (index % 8))
}

/// On-disk form: capacity plus base64 bitmap.
#[derive(Serialize, Deserialize)]
struct ChunkSetRepr {
    len: u32,
    bitmap: String,
}

impl From<ChunkSet> for ChunkSetRepr {
    fn from(set: ChunkSet) -> Self {
        Self {
            len: set.len,
            bitmap: BASE64.encode(&set.bits),
        }
    }
}

impl TryFrom<ChunkSetRepr> for ChunkSet {
    type Error = String;

    fn try_from(repr: ChunkSetRepr) -> std::result::Result<Self, Self::Error> {
        let bits = BASE64
            .decode(repr.bitmap.as_bytes())
            .map_err(|e| format!("invalid chunk bitmap: {e}"))?;

        if bits.len() != byte_len(repr.len) {
            return Err(format!(
                "chunk bitmap holds {} bytes, expected {} for {} chunks",
                bits.len(),
                byte_len(repr.len),
                repr.len
            ));
        }

        let tail = repr.len % 8;
        if tail != 0 {
            if let Some(last) = bits.last() {
                if last >> tail != 0 {
                    return Err("chunk bitmap has bits set past the chunk count".to_string());
                }
            }
        }

        let count = bits.iter().map(|b| b.count_ones()).sum();

        Ok(Self {
            len: repr.len,
            count,
            bits,
        })
    }
}
