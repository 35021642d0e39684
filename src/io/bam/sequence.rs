//! 4-bit BAM sequence decoding.
//!
//! BAM stores sequences in 4-bit encoding (2 bases per byte).
//! Each nibble encodes one base through a fixed 16-symbol table.
//!
//! # Format
//!
//! - High nibble holds the even index, low nibble the odd index
//! - An odd-length sequence leaves the final low nibble unused
//! - Example: byte 0x12 -> bases 'A' (1) and 'C' (2)

use crate::error::{Error, Result, Stage};
use std::fmt;

/// BAM 4-bit to ASCII base lookup table.
///
/// - 0 = '=' (match to reference, not used in practice)
/// - 1, 2, 4, 8 = A, C, G, T
/// - remaining codes are IUPAC ambiguity symbols, 15 = N
pub const SEQ_LOOKUP: [u8; 16] = [
    b'=', b'A', b'C', b'M', // 0-3
    b'G', b'R', b'S', b'V', // 4-7
    b'T', b'W', b'Y', b'H', // 8-11
    b'K', b'D', b'B', b'N', // 12-15
];

/// Decode base `i` of a packed buffer.
///
/// `i` must be below the logical length the buffer was packed for; an
/// index past the end of `packed` panics.
///
/// ```
/// use bamfetch::io::bam::base_at;
///
/// let packed = [0x12, 0x48, 0x10];
/// assert_eq!(base_at(&packed, 3), b'T');
/// ```
#[inline]
pub fn base_at(packed: &[u8], i: usize) -> u8 {
    let byte = packed[i / 2];
    let code = if i % 2 == 0 { byte >> 4 } else { byte & 0x0F };
    SEQ_LOOKUP[code as usize]
}

/// Decode `length` bases from packed data to ASCII.
///
/// # Errors
///
/// `TruncatedField { stage: Sequence }` if `data` is shorter than
/// `ceil(length / 2)` bytes.
///
/// # Example
///
/// ```
/// use bamfetch::io::bam::decode_sequence;
///
/// let sequence = decode_sequence(&[0x12], 2).unwrap();
/// assert_eq!(sequence, b"AC");
/// ```
pub fn decode_sequence(data: &[u8], length: usize) -> Result<Vec<u8>> {
    if data.len() < length.div_ceil(2) {
        return Err(Error::TruncatedField { stage: Stage::Sequence });
    }
    Ok((0..length).map(|i| base_at(data, i)).collect())
}

/// Packed read sequence.
///
/// Keeps the on-disk representation: `packed.len() == ceil(len / 2)`.
/// Bases are decoded on access, so indexing never allocates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sequence {
    packed: Vec<u8>,
    len: usize,
}

impl Sequence {
    /// Empty sequence.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of a packed buffer holding `len` bases.
    ///
    /// # Errors
    ///
    /// `MalformedLength` when `packed` is not exactly `ceil(len / 2)` bytes.
    pub fn from_packed(packed: Vec<u8>, len: usize) -> Result<Self> {
        if packed.len() != len.div_ceil(2) {
            return Err(Error::MalformedLength {
                msg: format!(
                    "{} packed bytes cannot hold exactly {} bases",
                    packed.len(),
                    len
                ),
            });
        }
        Ok(Self { packed, len })
    }

    /// Replace the contents with `len` bases from `packed`, reusing the buffer.
    pub(crate) fn set_packed(&mut self, packed: &[u8], len: usize) {
        debug_assert_eq!(packed.len(), len.div_ceil(2));
        self.packed.clear();
        self.packed.extend_from_slice(packed);
        self.len = len;
    }

    pub(crate) fn clear(&mut self) {
        self.packed.clear();
        self.len = 0;
    }

    /// Number of bases.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Base at `i`, or `None` past the end.
    pub fn get(&self, i: usize) -> Option<u8> {
        (i < self.len).then(|| base_at(&self.packed, i))
    }

    /// Raw 4-bit code at `i`, or `None` past the end.
    pub fn code_at(&self, i: usize) -> Option<u8> {
        (i < self.len).then(|| {
            let byte = self.packed[i / 2];
            if i % 2 == 0 {
                byte >> 4
            } else {
                byte & 0x0F
            }
        })
    }

    /// Iterate over decoded ASCII bases.
    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        (0..self.len).map(move |i| base_at(&self.packed, i))
    }

    /// Decode all bases to an ASCII vector.
    pub fn to_vec(&self) -> Vec<u8> {
        self.iter().collect()
    }

    /// Packed bytes as stored in the record.
    pub fn as_packed(&self) -> &[u8] {
        &self.packed
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("*");
        }
        for base in self.iter() {
            write!(f, "{}", base as char)?;
        }
        Ok(())
    }
}
