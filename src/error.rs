//! Error types for bamfetch

use std::fmt;
use std::io;
use thiserror::Error;

/// Result type alias for bamfetch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Section of a BAM record being read when the input ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// The 4-byte `block_size` prefix
    BlockSize,
    /// The 32-byte fixed-width header
    Header,
    /// Read name
    Name,
    /// Packed CIGAR operations
    Cigar,
    /// 4-bit packed bases
    Sequence,
    /// Per-base quality scores
    Quality,
    /// Auxiliary tag block
    Aux,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::BlockSize => "block size",
            Stage::Header => "fixed header",
            Stage::Name => "read name",
            Stage::Cigar => "cigar",
            Stage::Sequence => "sequence",
            Stage::Quality => "quality",
            Stage::Aux => "auxiliary data",
        };
        f.write_str(name)
    }
}

/// Which reference id of a record failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefField {
    /// The record's own `refID`
    Read,
    /// The mate's `next_refID`
    Mate,
}

impl fmt::Display for RefField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefField::Read => f.write_str("read"),
            RefField::Mate => f.write_str("mate"),
        }
    }
}

/// Error types that can occur in bamfetch
#[derive(Debug, Error)]
pub enum Error {
    /// Input ended part-way through a record
    #[error("truncated record: input ended while reading {stage}")]
    TruncatedField {
        /// Field being read when the input ran out
        stage: Stage,
    },

    /// Block size is inconsistent with the record contents
    #[error("malformed record length: {msg}")]
    MalformedLength {
        /// What was inconsistent
        msg: String,
    },

    /// Auxiliary tag type code outside the known set
    #[error("unknown auxiliary type '{}' for tag {}", type_char(.type_code), tag_name(.tag))]
    UnknownAuxType {
        /// Tag name
        tag: [u8; 2],
        /// Offending type code
        type_code: u8,
    },

    /// `Z` or `H` tag without a NUL terminator
    #[error("unterminated string value for tag {}", tag_name(.tag))]
    UnterminatedAuxString {
        /// Tag name
        tag: [u8; 2],
    },

    /// Record refers to a reference that is not in the header
    #[error("{field} reference id {id} out of range (header has {count} references)")]
    ReferenceIdOutOfRange {
        /// Which id was invalid
        field: RefField,
        /// The raw id
        id: i32,
        /// Number of references in the header
        count: usize,
    },

    /// Read name is not NUL-terminated or not valid UTF-8
    #[error("invalid read name: {msg}")]
    InvalidName {
        /// Description
        msg: String,
    },

    /// Error from the underlying stream or BGZF layer
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// Index query for a reference the index does not cover
    #[error("index reference id {id} out of range (index has {count} references)")]
    IndexReferenceOutOfRange {
        /// Requested reference id
        id: usize,
        /// Number of references in the index
        count: usize,
    },

    /// Query coordinates are inverted
    #[error("invalid range: begin ({begin}) > end ({end})")]
    InvalidRange {
        /// Query begin
        begin: i32,
        /// Query end
        end: i32,
    },

    /// Malformed BAM header
    #[error("invalid BAM header: {msg}")]
    InvalidHeader {
        /// Description
        msg: String,
    },

    /// Malformed index file
    #[error("invalid index: {msg}")]
    InvalidIndex {
        /// Description
        msg: String,
    },

    /// Fetch stopped by its cancellation flag
    #[error("fetch cancelled")]
    Cancelled,
}

impl Error {
    /// True for errors raised by a record that ended early.
    pub fn is_truncation(&self) -> bool {
        matches!(self, Error::TruncatedField { .. })
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Transport(io_err) => io_err,
            Error::TruncatedField { .. } => io::Error::new(io::ErrorKind::UnexpectedEof, e),
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

pub(crate) fn tag_name(tag: &[u8; 2]) -> String {
    format!("{}{}", tag[0] as char, tag[1] as char)
}

fn type_char(code: &u8) -> char {
    char::from(*code)
}
