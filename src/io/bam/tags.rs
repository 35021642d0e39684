//! BAM optional tags (auxiliary data).
//!
//! Optional tags store additional information about alignments such as:
//! - Edit distance (NM:i)
//! - Alignment score (AS:i)
//! - Read group (RG:Z)
//!
//! # Format
//!
//! Each tag is encoded as:
//! - 2 bytes: tag name (e.g., "NM")
//! - 1 byte: value type
//! - N bytes: value, width fixed by the type
//!
//! | Type | Value |
//! |------|-------|
//! | `A` | printable character (1 byte) |
//! | `c` `C` | i8 / u8 |
//! | `s` `S` | i16 / u16 |
//! | `i` `I` | i32 / u32 |
//! | `f` | f32 |
//! | `d` | f64 |
//! | `Z` | NUL-terminated string |
//! | `H` | NUL-terminated hex string |
//! | `B` | subtype (1 byte), count (u32), count elements |
//!
//! Tags are kept in one contiguous buffer per record. Parsing validates the
//! whole block up front and records where each tag starts, so lookups and
//! iteration afterwards never fail and never allocate.

use crate::error::{tag_name, Error, Result};
use std::ops::Range;

/// Byte width of a scalar type code, `None` for variable or unknown types.
fn scalar_width(type_code: u8) -> Option<usize> {
    match type_code {
        b'A' | b'c' | b'C' => Some(1),
        b's' | b'S' => Some(2),
        b'i' | b'I' | b'f' => Some(4),
        b'd' => Some(8),
        _ => None,
    }
}

/// Element width for a `B` array subtype.
fn array_width(subtype: u8) -> Option<usize> {
    match subtype {
        b'c' | b'C' => Some(1),
        b's' | b'S' => Some(2),
        b'i' | b'I' | b'f' => Some(4),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct TagSpan {
    name: [u8; 2],
    type_code: u8,
    /// Value bytes, excluding the NUL of `Z`/`H`
    payload: Range<usize>,
}

/// Auxiliary tags of one record, in stored order.
///
/// Duplicate names are kept; [`get`](Tags::get) returns the first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tags {
    data: Vec<u8>,
    spans: Vec<TagSpan>,
}

impl Tags {
    /// Create empty tags.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a raw aux block.
    ///
    /// # Example
    ///
    /// ```
    /// use bamfetch::io::bam::{TagValue, Tags};
    ///
    /// let tags = Tags::parse(b"NMC\x02RGZgrp1\x00").unwrap();
    /// assert_eq!(tags.get(*b"NM").unwrap().value(), TagValue::Int(2));
    /// assert_eq!(tags.get(*b"RG").unwrap().value(), TagValue::String("grp1".into()));
    /// ```
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut tags = Self::new();
        tags.parse_into(data)?;
        Ok(tags)
    }

    /// Replace the contents with the tags in `data`, reusing allocations.
    ///
    /// The entire buffer must be consumed by whole tags. On error the
    /// container is left empty.
    pub fn parse_into(&mut self, data: &[u8]) -> Result<()> {
        self.clear();
        self.data.extend_from_slice(data);
        if let Err(e) = scan(&self.data, &mut self.spans) {
            self.clear();
            return Err(e);
        }
        Ok(())
    }

    pub(crate) fn clear(&mut self) {
        self.data.clear();
        self.spans.clear();
    }

    /// First tag named `name`.
    pub fn get(&self, name: [u8; 2]) -> Option<Tag<'_>> {
        self.iter().find(|tag| tag.name == name)
    }

    /// Iterate tags in stored order.
    pub fn iter(&self) -> impl Iterator<Item = Tag<'_>> + '_ {
        self.spans.iter().map(move |span| Tag {
            name: span.name,
            type_code: span.type_code,
            payload: &self.data[span.payload.clone()],
        })
    }

    /// Raw aux block.
    pub fn as_raw(&self) -> &[u8] {
        &self.data
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Number of tags.
    pub fn len(&self) -> usize {
        self.spans.len()
    }
}

/// Parse an aux block into owned tags.
pub fn parse_tags(data: &[u8]) -> Result<Tags> {
    Tags::parse(data)
}

fn malformed(tag: [u8; 2], what: &str) -> Error {
    Error::MalformedLength {
        msg: format!("tag {} {}", tag_name(&tag), what),
    }
}

fn scan(data: &[u8], spans: &mut Vec<TagSpan>) -> Result<()> {
    let mut pos = 0;
    while pos < data.len() {
        if data.len() - pos < 3 {
            return Err(Error::MalformedLength {
                msg: format!("{} leftover bytes after last tag", data.len() - pos),
            });
        }
        let name = [data[pos], data[pos + 1]];
        let type_code = data[pos + 2];
        pos += 3;

        let payload = match type_code {
            b'Z' | b'H' => {
                let nul = data[pos..]
                    .iter()
                    .position(|&b| b == 0)
                    .ok_or(Error::UnterminatedAuxString { tag: name })?;
                let range = pos..pos + nul;
                pos += nul + 1;
                range
            }
            b'B' => {
                if data.len() - pos < 5 {
                    return Err(malformed(name, "array header is short"));
                }
                let subtype = data[pos];
                let width = array_width(subtype).ok_or(Error::UnknownAuxType {
                    tag: name,
                    type_code: subtype,
                })?;
                let count = u32::from_le_bytes([
                    data[pos + 1],
                    data[pos + 2],
                    data[pos + 3],
                    data[pos + 4],
                ]) as usize;
                let len = count
                    .checked_mul(width)
                    .and_then(|n| n.checked_add(5))
                    .ok_or_else(|| malformed(name, "array length overflows"))?;
                if data.len() - pos < len {
                    return Err(malformed(name, "array is short"));
                }
                let range = pos..pos + len;
                pos += len;
                range
            }
            other => {
                let width = scalar_width(other).ok_or(Error::UnknownAuxType {
                    tag: name,
                    type_code: other,
                })?;
                if data.len() - pos < width {
                    return Err(malformed(name, "value is short"));
                }
                let range = pos..pos + width;
                pos += width;
                range
            }
        };

        spans.push(TagSpan {
            name,
            type_code,
            payload,
        });
    }
    Ok(())
}

/// Borrowed view of one tag.
///
/// Only handed out by [`Tags`], so the payload always matches its type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tag<'a> {
    name: [u8; 2],
    type_code: u8,
    payload: &'a [u8],
}

impl<'a> Tag<'a> {
    /// Two-character name.
    pub fn name(&self) -> [u8; 2] {
        self.name
    }

    /// Type code as stored.
    pub fn type_code(&self) -> u8 {
        self.type_code
    }

    /// Value bytes. String types exclude the terminator; arrays include
    /// their subtype and count.
    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }

    /// Name as a string.
    pub fn name_str(&self) -> String {
        tag_name(&self.name)
    }

    /// Decode the value.
    pub fn value(&self) -> TagValue {
        let p = self.payload;
        match self.type_code {
            b'A' => TagValue::Char(p[0]),
            b'c' => TagValue::Int(i64::from(p[0] as i8)),
            b'C' => TagValue::Int(i64::from(p[0])),
            b's' => TagValue::Int(i64::from(i16::from_le_bytes([p[0], p[1]]))),
            b'S' => TagValue::Int(i64::from(u16::from_le_bytes([p[0], p[1]]))),
            b'i' => TagValue::Int(i64::from(i32::from_le_bytes([p[0], p[1], p[2], p[3]]))),
            b'I' => TagValue::Int(i64::from(u32::from_le_bytes([p[0], p[1], p[2], p[3]]))),
            b'f' => TagValue::Float(f32::from_le_bytes([p[0], p[1], p[2], p[3]])),
            b'd' => TagValue::Double(f64::from_le_bytes([
                p[0], p[1], p[2], p[3], p[4], p[5], p[6], p[7],
            ])),
            b'Z' => TagValue::String(String::from_utf8_lossy(p).into_owned()),
            b'H' => TagValue::Hex(String::from_utf8_lossy(p).into_owned()),
            // Only `B` remains after the scan
            _ => TagValue::Array(decode_array(p[0], &p[5..])),
        }
    }

    /// Integer value for any of the integer types.
    pub fn as_int(&self) -> Option<i64> {
        match self.value() {
            TagValue::Int(v) => Some(v),
            _ => None,
        }
    }

    /// String value for `Z` tags.
    pub fn as_str(&self) -> Option<&str> {
        match self.type_code {
            b'Z' => std::str::from_utf8(self.payload).ok(),
            _ => None,
        }
    }
}

fn decode_array(subtype: u8, body: &[u8]) -> ArrayValue {
    match subtype {
        b'c' => ArrayValue::Int8(body.iter().map(|&b| b as i8).collect()),
        b'C' => ArrayValue::UInt8(body.to_vec()),
        b's' => ArrayValue::Int16(
            body.chunks_exact(2)
                .map(|b| i16::from_le_bytes([b[0], b[1]]))
                .collect(),
        ),
        b'S' => ArrayValue::UInt16(
            body.chunks_exact(2)
                .map(|b| u16::from_le_bytes([b[0], b[1]]))
                .collect(),
        ),
        b'i' => ArrayValue::Int32(
            body.chunks_exact(4)
                .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
        ),
        b'I' => ArrayValue::UInt32(
            body.chunks_exact(4)
                .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
        ),
        _ => ArrayValue::Float(
            body.chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
        ),
    }
}

/// Decoded tag value.
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    /// `A`
    Char(u8),
    /// Any of `c C s S i I`
    Int(i64),
    /// `f`
    Float(f32),
    /// `d`
    Double(f64),
    /// `Z`
    String(String),
    /// `H`
    Hex(String),
    /// `B`
    Array(ArrayValue),
}

/// Decoded `B` array.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayValue {
    Int8(Vec<i8>),
    UInt8(Vec<u8>),
    Int16(Vec<i16>),
    UInt16(Vec<u16>),
    Int32(Vec<i32>),
    UInt32(Vec<u32>),
    Float(Vec<f32>),
}

impl ArrayValue {
    /// Number of elements.
    pub fn len(&self) -> usize {
        match self {
            ArrayValue::Int8(v) => v.len(),
            ArrayValue::UInt8(v) => v.len(),
            ArrayValue::Int16(v) => v.len(),
            ArrayValue::UInt16(v) => v.len(),
            ArrayValue::Int32(v) => v.len(),
            ArrayValue::UInt32(v) => v.len(),
            ArrayValue::Float(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
