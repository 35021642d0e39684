//! CIGAR operations.
//!
//! CIGAR strings describe how a read aligns to the reference, including
//! matches, insertions, deletions, and other operations.
//!
//! # BAM Format
//!
//! In BAM, each operation is stored as a 32-bit little-endian integer:
//! - Low 4 bits: operation kind (0-8)
//! - High 28 bits: operation length (0 to 268,435,455)
//!
//! [`CigarOp`] keeps that packed value as-is. Kind codes 9-15 are not
//! rejected: they survive decoding unchanged and report no
//! [`kind`](CigarOp::kind).

use crate::error::{Error, Result, Stage};
use std::fmt;

/// Operation kinds, in BAM code order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CigarKind {
    /// Match or mismatch (M)
    Match,
    /// Insertion to reference (I)
    Insertion,
    /// Deletion from reference (D)
    Deletion,
    /// Skipped region from reference (N)
    RefSkip,
    /// Soft clipping (S)
    SoftClip,
    /// Hard clipping (H)
    HardClip,
    /// Padding (P)
    Padding,
    /// Sequence match (=)
    SeqMatch,
    /// Sequence mismatch (X)
    SeqMismatch,
}

impl CigarKind {
    /// Map a 4-bit BAM code to a kind.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(CigarKind::Match),
            1 => Some(CigarKind::Insertion),
            2 => Some(CigarKind::Deletion),
            3 => Some(CigarKind::RefSkip),
            4 => Some(CigarKind::SoftClip),
            5 => Some(CigarKind::HardClip),
            6 => Some(CigarKind::Padding),
            7 => Some(CigarKind::SeqMatch),
            8 => Some(CigarKind::SeqMismatch),
            _ => None,
        }
    }

    /// BAM code of this kind.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// SAM character for this kind.
    pub fn as_char(self) -> char {
        b"MIDNSHP=X"[self as usize] as char
    }

    /// Whether the operation advances along the reference.
    pub fn consumes_reference(self) -> bool {
        matches!(
            self,
            CigarKind::Match
                | CigarKind::Deletion
                | CigarKind::RefSkip
                | CigarKind::SeqMatch
                | CigarKind::SeqMismatch
        )
    }

    /// Whether the operation consumes bases of the read.
    pub fn consumes_query(self) -> bool {
        matches!(
            self,
            CigarKind::Match
                | CigarKind::Insertion
                | CigarKind::SoftClip
                | CigarKind::SeqMatch
                | CigarKind::SeqMismatch
        )
    }
}

/// A single packed CIGAR operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CigarOp(u32);

impl CigarOp {
    /// Pack a kind and a length. Lengths wider than 28 bits are truncated.
    ///
    /// ```
    /// use bamfetch::io::bam::{CigarKind, CigarOp};
    ///
    /// let op = CigarOp::new(CigarKind::Match, 100);
    /// assert_eq!(op.len(), 100);
    /// assert_eq!(op.to_string(), "100M");
    /// ```
    pub fn new(kind: CigarKind, len: u32) -> Self {
        CigarOp((len << 4) | u32::from(kind.code()))
    }

    /// Wrap a raw packed value without validation.
    pub fn from_raw(raw: u32) -> Self {
        CigarOp(raw)
    }

    /// Raw packed value.
    pub fn as_raw(self) -> u32 {
        self.0
    }

    /// The low 4 bits.
    pub fn code(self) -> u8 {
        (self.0 & 0x0F) as u8
    }

    /// Operation kind, or `None` for codes 9-15.
    pub fn kind(self) -> Option<CigarKind> {
        CigarKind::from_code(self.code())
    }

    /// Operation length.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(self) -> u32 {
        self.0 >> 4
    }

    /// SAM character, `?` for unknown codes.
    pub fn as_char(self) -> char {
        self.kind().map_or('?', CigarKind::as_char)
    }

    pub fn consumes_reference(self) -> bool {
        self.kind().is_some_and(CigarKind::consumes_reference)
    }

    pub fn consumes_query(self) -> bool {
        self.kind().is_some_and(CigarKind::consumes_query)
    }
}

impl fmt::Display for CigarOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.len(), self.as_char())
    }
}

/// Number of reference bases covered by `ops`.
///
/// Summed in 64 bits: enough 28-bit operations overflow `u32`.
pub fn reference_length(ops: &[CigarOp]) -> u64 {
    ops.iter()
        .filter(|op| op.consumes_reference())
        .map(|op| u64::from(op.len()))
        .sum()
}

/// Number of read bases described by `ops`.
pub fn query_length(ops: &[CigarOp]) -> u64 {
    ops.iter()
        .filter(|op| op.consumes_query())
        .map(|op| u64::from(op.len()))
        .sum()
}

/// Format a CIGAR as a SAM string (`*` when empty).
pub fn format_cigar(ops: &[CigarOp]) -> String {
    if ops.is_empty() {
        return "*".to_string();
    }
    ops.iter().map(|op| op.to_string()).collect()
}

/// Decode `n_ops` packed operations, appending to `out`.
///
/// # Errors
///
/// `TruncatedField { stage: Cigar }` when `data` holds fewer than
/// `n_ops * 4` bytes.
///
/// # Example
///
/// ```
/// use bamfetch::io::bam::{parse_cigar_into, CigarKind};
///
/// // 100M = 100 << 4 | 0 = 1600 = 0x00000640 (little-endian)
/// let mut ops = Vec::new();
/// parse_cigar_into(&[0x40, 0x06, 0x00, 0x00], 1, &mut ops).unwrap();
/// assert_eq!(ops[0].kind(), Some(CigarKind::Match));
/// assert_eq!(ops[0].len(), 100);
/// ```
pub fn parse_cigar_into(data: &[u8], n_ops: usize, out: &mut Vec<CigarOp>) -> Result<()> {
    let required = n_ops * 4;
    if data.len() < required {
        return Err(Error::TruncatedField { stage: Stage::Cigar });
    }
    out.reserve(n_ops);
    out.extend(
        data[..required]
            .chunks_exact(4)
            .map(|b| CigarOp(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))),
    );
    Ok(())
}

/// Decode `n_ops` packed operations into a new vector.
pub fn parse_cigar(data: &[u8], n_ops: usize) -> Result<Vec<CigarOp>> {
    let mut ops = Vec::with_capacity(n_ops);
    parse_cigar_into(data, n_ops, &mut ops)?;
    Ok(ops)
}
