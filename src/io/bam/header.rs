//! BAM header parsing.
//!
//! The BAM header consists of:
//! 1. Magic bytes ("BAM\1")
//! 2. SAM header text
//! 3. Reference sequence dictionary
//!
//! # Format
//!
//! ```text
//! - 4 bytes: Magic ("BAM\1")
//! - 4 bytes: SAM header text length (l_text, int32)
//! - l_text bytes: SAM header text
//! - 4 bytes: Number of reference sequences (n_ref, int32)
//! - For each reference:
//!   - 4 bytes: Reference name length (l_name, int32, includes NUL)
//!   - l_name bytes: Reference name (NUL-terminated)
//!   - 4 bytes: Reference length (int32)
//! ```
//!
//! Read groups (`@RG`) and programs (`@PG`) are pulled out of the SAM text.

use crate::error::{Error, Result};
use log::debug;
use std::collections::HashMap;
use std::io::{self, Read};

/// BAM magic bytes.
const BAM_MAGIC: &[u8; 4] = b"BAM\x01";

/// Reference sequence information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// Reference sequence name (e.g., "chr1", "chrM")
    pub name: String,
    /// Reference sequence length in bases
    pub length: u32,
}

impl Reference {
    /// Create a new reference.
    pub fn new(name: impl Into<String>, length: u32) -> Self {
        Self {
            name: name.into(),
            length,
        }
    }
}

/// An `@RG` header line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadGroup {
    /// `ID` field
    pub id: String,
    /// Every other `TAG:VALUE` field, in line order
    pub fields: Vec<(String, String)>,
}

/// An `@PG` header line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    /// `ID` field
    pub id: String,
    /// Every other `TAG:VALUE` field, in line order
    pub fields: Vec<(String, String)>,
}

impl ReadGroup {
    /// Value of a field such as `SM` or `LB`.
    pub fn field(&self, tag: &str) -> Option<&str> {
        find_field(&self.fields, tag)
    }
}

impl Program {
    /// Value of a field such as `PN` or `VN`.
    pub fn field(&self, tag: &str) -> Option<&str> {
        find_field(&self.fields, tag)
    }
}

fn find_field<'a>(fields: &'a [(String, String)], tag: &str) -> Option<&'a str> {
    fields
        .iter()
        .find(|(t, _)| t == tag)
        .map(|(_, v)| v.as_str())
}

/// BAM file header.
///
/// The reference table is immutable once parsed; record reference ids are
/// indices into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    text: String,
    references: Vec<Reference>,
    read_groups: Vec<ReadGroup>,
    programs: Vec<Program>,
    name_to_id: HashMap<String, usize>,
}

impl Header {
    /// Build a header, extracting `@RG`/`@PG` records from `text`.
    pub fn new(text: String, references: Vec<Reference>) -> Self {
        let (read_groups, programs) = parse_text_records(&text);
        let name_to_id = references
            .iter()
            .enumerate()
            .map(|(id, r)| (r.name.clone(), id))
            .collect();
        Self {
            text,
            references,
            read_groups,
            programs,
            name_to_id,
        }
    }

    /// SAM header text (includes @HD, @SQ, @RG, @PG lines).
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Reference sequences (chromosomes/contigs), indexed by ID.
    pub fn references(&self) -> &[Reference] {
        &self.references
    }

    /// `@RG` lines.
    pub fn read_groups(&self) -> &[ReadGroup] {
        &self.read_groups
    }

    /// `@PG` lines.
    pub fn programs(&self) -> &[Program] {
        &self.programs
    }

    /// Get reference by ID.
    pub fn reference(&self, id: usize) -> Option<&Reference> {
        self.references.get(id)
    }

    /// Get reference name by ID.
    pub fn reference_name(&self, id: usize) -> Option<&str> {
        self.reference(id).map(|r| r.name.as_str())
    }

    /// Look up a reference ID by name.
    pub fn reference_id(&self, name: &str) -> Option<usize> {
        self.name_to_id.get(name).copied()
    }

    /// Get number of reference sequences.
    pub fn reference_count(&self) -> usize {
        self.references.len()
    }

    /// Read group by `ID`.
    pub fn read_group(&self, id: &str) -> Option<&ReadGroup> {
        self.read_groups.iter().find(|rg| rg.id == id)
    }
}

fn parse_text_records(text: &str) -> (Vec<ReadGroup>, Vec<Program>) {
    let mut read_groups = Vec::new();
    let mut programs = Vec::new();
    for line in text.lines() {
        let mut columns = line.split('\t');
        let kind = columns.next();
        if kind != Some("@RG") && kind != Some("@PG") {
            continue;
        }
        let mut id = None;
        let mut fields = Vec::new();
        for column in columns {
            let Some((tag, value)) = column.split_once(':') else {
                continue;
            };
            if tag == "ID" && id.is_none() {
                id = Some(value.to_string());
            } else {
                fields.push((tag.to_string(), value.to_string()));
            }
        }
        // Lines without an ID are skipped
        let Some(id) = id else {
            continue;
        };
        if kind == Some("@RG") {
            read_groups.push(ReadGroup { id, fields });
        } else {
            programs.push(Program { id, fields });
        }
    }
    (read_groups, programs)
}

fn read_i32<R: Read>(reader: &mut R) -> Result<i32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

/// Read exactly `len` bytes into `out`, growing it only as data arrives.
fn read_exact_len<R: Read>(reader: &mut R, len: usize, out: &mut Vec<u8>) -> Result<()> {
    let n = reader.by_ref().take(len as u64).read_to_end(out)?;
    if n < len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("expected {} bytes, got {}", len, n),
        )
        .into());
    }
    Ok(())
}

/// Read and validate BAM magic bytes.
pub fn read_magic<R: Read>(reader: &mut R) -> Result<()> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;

    if &magic != BAM_MAGIC {
        return Err(Error::InvalidHeader {
            msg: format!("expected magic {:?}, got {:?}", BAM_MAGIC, magic),
        });
    }

    Ok(())
}

/// Read the SAM header text.
///
/// Trailing NUL padding, which some writers append, is dropped.
pub fn read_header_text<R: Read>(reader: &mut R) -> Result<String> {
    let len = read_i32(reader)?;
    if len < 0 {
        return Err(Error::InvalidHeader {
            msg: format!("negative SAM text length: {}", len),
        });
    }

    let mut text_bytes = Vec::new();
    read_exact_len(reader, len as usize, &mut text_bytes)?;
    while text_bytes.last() == Some(&0) {
        text_bytes.pop();
    }

    String::from_utf8(text_bytes).map_err(|e| Error::InvalidHeader {
        msg: format!("SAM text is not UTF-8: {}", e),
    })
}

/// Read a single reference sequence entry.
pub fn read_reference<R: Read>(reader: &mut R) -> Result<Reference> {
    let name_len = read_i32(reader)?;
    if name_len <= 0 {
        return Err(Error::InvalidHeader {
            msg: format!("invalid reference name length: {}", name_len),
        });
    }

    let mut name_bytes = Vec::new();
    read_exact_len(reader, name_len as usize, &mut name_bytes)?;
    if name_bytes.pop() != Some(0) {
        return Err(Error::InvalidHeader {
            msg: "reference name not NUL-terminated".to_string(),
        });
    }

    let name = String::from_utf8(name_bytes).map_err(|e| Error::InvalidHeader {
        msg: format!("reference name is not UTF-8: {}", e),
    })?;

    let length = read_i32(reader)?;
    if length < 0 {
        return Err(Error::InvalidHeader {
            msg: format!("negative length {} for reference {}", length, name),
        });
    }

    Ok(Reference::new(name, length as u32))
}

/// Read the reference dictionary.
pub fn read_references<R: Read>(reader: &mut R) -> Result<Vec<Reference>> {
    let count = read_i32(reader)?;
    if count < 0 {
        return Err(Error::InvalidHeader {
            msg: format!("negative reference count: {}", count),
        });
    }

    // Capped: the count is untrusted
    let mut references = Vec::with_capacity((count as usize).min(4096));
    for _ in 0..count {
        references.push(read_reference(reader)?);
    }
    Ok(references)
}

/// Read a complete BAM header.
///
/// # Example
///
/// ```no_run
/// use bamfetch::io::bam::header::read_header;
/// use bamfetch::io::bgzf::BgzfReader;
/// use std::fs::File;
///
/// # fn main() -> bamfetch::Result<()> {
/// let mut reader = BgzfReader::new(File::open("alignments.bam")?);
/// let header = read_header(&mut reader)?;
///
/// for (i, r) in header.references().iter().enumerate() {
///     println!("{}: {} ({} bp)", i, r.name, r.length);
/// }
/// # Ok(())
/// # }
/// ```
pub fn read_header<R: Read>(reader: &mut R) -> Result<Header> {
    read_magic(reader)?;
    let text = read_header_text(reader)?;
    let references = read_references(reader)?;
    let header = Header::new(text, references);
    debug!(
        "BAM header: {} references, {} read groups, {} programs",
        header.reference_count(),
        header.read_groups().len(),
        header.programs().len()
    );
    Ok(header)
}
