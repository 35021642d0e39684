//! BAM record structure and decoding.
//!
//! A BAM record represents a single alignment (read mapped to reference).
//!
//! # Binary Format
//!
//! ```text
//! BAM Record (binary, little-endian):
//! - block_size (int32): Record size in bytes (excluding this field)
//! - refID (int32): Reference sequence ID (-1 for none)
//! - pos (int32): 0-based leftmost position
//! - l_read_name (uint8): Length of read name (includes NUL)
//! - mapq (uint8): Mapping quality (255 = unavailable)
//! - bin (uint16): BAI index bin (ignored)
//! - n_cigar_op (uint16): Number of CIGAR operations
//! - flag (uint16): Bitwise FLAGS
//! - l_seq (int32): Sequence length
//! - next_refID (int32): Reference ID of mate/next read
//! - next_pos (int32): Position of mate/next read
//! - tlen (int32): Template length
//! - read_name (char[l_read_name]): NUL-terminated read name
//! - cigar (uint32[n_cigar_op]): CIGAR operations
//! - seq (uint8[(l_seq+1)/2]): 4-bit encoded sequence
//! - qual (char[l_seq]): Phred quality scores (0xFF = missing)
//! - tags: Optional tags (rest of the block)
//! ```
//!
//! Decoding fails fast. A record whose input ends early reports the
//! [`Stage`] it was in; a complete block whose fields do not add up to its
//! declared size is a [`Error::MalformedLength`].

use super::cigar::{self, CigarKind, CigarOp};
use super::sequence::Sequence;
use super::tags::{ArrayValue, TagValue, Tags};
use crate::error::{Error, RefField, Result, Stage};
use crate::io::bgzf::read_up_to;
use log::trace;
use std::io::Read;

/// Size of the fixed-width part of a record, after `block_size`.
pub const FIXED_SIZE: usize = 32;

/// Initial capacity of the block scratch buffer.
pub const DEFAULT_BUFFER_SIZE: usize = 512;

/// Template having multiple segments
pub const FLAG_PAIRED: u16 = 0x1;
/// Each segment properly aligned
pub const FLAG_PROPER_PAIR: u16 = 0x2;
/// Segment unmapped
pub const FLAG_UNMAPPED: u16 = 0x4;
/// Next segment unmapped
pub const FLAG_MATE_UNMAPPED: u16 = 0x8;
/// SEQ reverse complemented
pub const FLAG_REVERSE: u16 = 0x10;
/// SEQ of next segment reverse complemented
pub const FLAG_MATE_REVERSE: u16 = 0x20;
/// First segment in the template
pub const FLAG_READ1: u16 = 0x40;
/// Last segment in the template
pub const FLAG_READ2: u16 = 0x80;
/// Secondary alignment
pub const FLAG_SECONDARY: u16 = 0x100;
/// Not passing quality controls
pub const FLAG_QC_FAIL: u16 = 0x200;
/// PCR or optical duplicate
pub const FLAG_DUPLICATE: u16 = 0x400;
/// Supplementary alignment
pub const FLAG_SUPPLEMENTARY: u16 = 0x800;

/// BAM alignment record.
///
/// Records can be reused across reads with
/// [`BamReader::read_into`](super::BamReader::read_into); every field is
/// overwritten on each successful decode.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    /// Reference sequence ID, `None` for refID -1
    pub reference_id: Option<usize>,

    /// 0-based leftmost mapping position (-1 when unplaced)
    pub position: i32,

    /// Mapping quality (255 = unavailable)
    pub mapq: u8,

    /// Bitwise FLAGS, preserved bit-for-bit
    pub flags: u16,

    /// Read name without its terminator
    pub name: String,

    /// CIGAR operations
    pub cigar: Vec<CigarOp>,

    /// Packed bases
    pub sequence: Sequence,

    /// Phred scores, one per base (all 0xFF when absent)
    pub quality: Vec<u8>,

    /// Optional tags
    pub tags: Tags,

    /// Mate reference ID, `None` for -1
    pub mate_reference_id: Option<usize>,

    /// Mate 0-based position
    pub mate_position: i32,

    /// Template length (TLEN)
    pub template_length: i32,
}

impl Record {
    /// Create a new empty record.
    pub fn new() -> Self {
        Self {
            position: -1,
            mate_position: -1,
            mapq: 255,
            ..Default::default()
        }
    }

    /// Reset every field, keeping allocations.
    pub fn clear(&mut self) {
        self.reference_id = None;
        self.position = -1;
        self.mapq = 255;
        self.flags = 0;
        self.name.clear();
        self.cigar.clear();
        self.sequence.clear();
        self.quality.clear();
        self.tags.clear();
        self.mate_reference_id = None;
        self.mate_position = -1;
        self.template_length = 0;
    }

    pub fn is_paired(&self) -> bool {
        self.flags & FLAG_PAIRED != 0
    }

    pub fn is_proper_pair(&self) -> bool {
        self.flags & FLAG_PROPER_PAIR != 0
    }

    pub fn is_unmapped(&self) -> bool {
        self.flags & FLAG_UNMAPPED != 0
    }

    pub fn is_mate_unmapped(&self) -> bool {
        self.flags & FLAG_MATE_UNMAPPED != 0
    }

    /// Check if the read is a reverse complement.
    pub fn is_reverse_complement(&self) -> bool {
        self.flags & FLAG_REVERSE != 0
    }

    pub fn is_mate_reverse_complement(&self) -> bool {
        self.flags & FLAG_MATE_REVERSE != 0
    }

    pub fn is_first_segment(&self) -> bool {
        self.flags & FLAG_READ1 != 0
    }

    pub fn is_last_segment(&self) -> bool {
        self.flags & FLAG_READ2 != 0
    }

    pub fn is_secondary(&self) -> bool {
        self.flags & FLAG_SECONDARY != 0
    }

    pub fn is_qc_fail(&self) -> bool {
        self.flags & FLAG_QC_FAIL != 0
    }

    pub fn is_duplicate(&self) -> bool {
        self.flags & FLAG_DUPLICATE != 0
    }

    pub fn is_supplementary(&self) -> bool {
        self.flags & FLAG_SUPPLEMENTARY != 0
    }

    /// Mapping quality, `None` when 255.
    pub fn mapping_quality(&self) -> Option<u8> {
        (self.mapq != 255).then_some(self.mapq)
    }

    /// Whether per-base qualities are present (not all 0xFF).
    pub fn has_quality(&self) -> bool {
        !self.quality.is_empty() && self.quality.iter().any(|&q| q != 0xFF)
    }

    /// Number of reference bases covered by the CIGAR.
    pub fn reference_length(&self) -> u64 {
        cigar::reference_length(&self.cigar)
    }

    /// Exclusive end of the alignment on the reference.
    ///
    /// Records without reference-consuming operations span one base.
    pub fn alignment_end(&self) -> i64 {
        let span = i64::try_from(self.reference_length().max(1)).unwrap_or(i64::MAX);
        i64::from(self.position).saturating_add(span)
    }

    /// Whether the alignment intersects the half-open range `[begin, end)`.
    pub fn overlaps(&self, begin: i32, end: i32) -> bool {
        i64::from(self.position) < i64::from(end) && self.alignment_end() > i64::from(begin)
    }

    /// Sequence length in bases.
    pub fn sequence_length(&self) -> usize {
        self.sequence.len()
    }
}

/// Bounds-checked reader over one record block.
///
/// `declared` is the record's `block_size`. When `data` is shorter than that
/// the input was cut off, so running out of bytes is a truncation at the
/// current stage; otherwise the fields overran the block.
struct BlockCursor<'a> {
    data: &'a [u8],
    declared: usize,
    pos: usize,
}

impl<'a> BlockCursor<'a> {
    fn take(&mut self, n: usize, stage: Stage) -> Result<&'a [u8]> {
        match self.pos.checked_add(n) {
            Some(end) if end <= self.data.len() => {
                let bytes = &self.data[self.pos..end];
                self.pos = end;
                Ok(bytes)
            }
            _ if self.data.len() < self.declared => Err(Error::TruncatedField { stage }),
            _ => Err(Error::MalformedLength {
                msg: format!(
                    "{} of {} bytes at offset {} overruns block size {}",
                    stage, n, self.pos, self.declared
                ),
            }),
        }
    }

    fn rest(&mut self) -> &'a [u8] {
        let bytes = &self.data[self.pos..];
        self.pos = self.data.len();
        bytes
    }
}

fn le_i32(b: &[u8], at: usize) -> i32 {
    i32::from_le_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]])
}

fn le_u16(b: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([b[at], b[at + 1]])
}

/// Validate a raw reference id against the header.
fn resolve_reference_id(id: i32, count: usize, field: RefField) -> Result<Option<usize>> {
    match id {
        -1 => Ok(None),
        n if n >= 0 && (n as usize) < count => Ok(Some(n as usize)),
        n => Err(Error::ReferenceIdOutOfRange {
            field,
            id: n,
            count,
        }),
    }
}

/// Decode one record block into `record`.
///
/// `data` holds the bytes following `block_size`; it may be shorter than
/// `block_size` if the input ended early, in which case the stage that ran
/// out is reported. `reference_count` bounds both reference ids.
///
/// On error `record` is cleared.
pub fn decode_record(
    data: &[u8],
    block_size: usize,
    reference_count: usize,
    record: &mut Record,
) -> Result<()> {
    let result = decode_fields(data, block_size, reference_count, record);
    if result.is_err() {
        record.clear();
    }
    result
}

fn decode_fields(
    data: &[u8],
    block_size: usize,
    reference_count: usize,
    record: &mut Record,
) -> Result<()> {
    if block_size < FIXED_SIZE {
        return Err(Error::MalformedLength {
            msg: format!("block size {} is smaller than the fixed header", block_size),
        });
    }
    let data = &data[..data.len().min(block_size)];
    let mut cursor = BlockCursor {
        data,
        declared: block_size,
        pos: 0,
    };

    let fixed = cursor.take(FIXED_SIZE, Stage::Header)?;
    let ref_id = le_i32(fixed, 0);
    let pos = le_i32(fixed, 4);
    let l_read_name = fixed[8] as usize;
    let mapq = fixed[9];
    // fixed[10..12] is the bin, recomputed by consumers if needed
    let n_cigar_op = le_u16(fixed, 12) as usize;
    let flags = le_u16(fixed, 14);
    let l_seq = le_i32(fixed, 16);
    let next_ref_id = le_i32(fixed, 20);
    let next_pos = le_i32(fixed, 24);
    let tlen = le_i32(fixed, 28);

    if l_seq < 0 {
        return Err(Error::MalformedLength {
            msg: format!("negative sequence length {}", l_seq),
        });
    }
    let l_seq = l_seq as usize;

    if l_read_name == 0 {
        return Err(Error::InvalidName {
            msg: "read name length is zero".to_string(),
        });
    }
    let name_bytes = cursor.take(l_read_name, Stage::Name)?;
    let (terminator, name_bytes) = name_bytes
        .split_last()
        .ok_or_else(|| Error::InvalidName {
            msg: "read name is empty".to_string(),
        })?;
    if *terminator != 0 {
        return Err(Error::InvalidName {
            msg: "read name not NUL-terminated".to_string(),
        });
    }
    let name = std::str::from_utf8(name_bytes).map_err(|e| Error::InvalidName {
        msg: format!("read name is not UTF-8: {}", e),
    })?;

    let cigar_bytes = cursor.take(n_cigar_op * 4, Stage::Cigar)?;
    let seq_bytes = cursor.take(l_seq.div_ceil(2), Stage::Sequence)?;
    let qual_bytes = cursor.take(l_seq, Stage::Quality)?;

    // Whatever is left belongs to the tags; a cut-off block loses its tail here
    if data.len() < block_size {
        return Err(Error::TruncatedField { stage: Stage::Aux });
    }
    let aux_bytes = cursor.rest();

    record.name.clear();
    record.name.push_str(name);
    record.cigar.clear();
    cigar::parse_cigar_into(cigar_bytes, n_cigar_op, &mut record.cigar)?;
    record.sequence.set_packed(seq_bytes, l_seq);
    record.quality.clear();
    record.quality.extend_from_slice(qual_bytes);
    record.tags.parse_into(aux_bytes)?;

    recover_oversized_cigar(record, l_seq);

    record.reference_id = resolve_reference_id(ref_id, reference_count, RefField::Read)?;
    record.mate_reference_id =
        resolve_reference_id(next_ref_id, reference_count, RefField::Mate)?;
    record.position = pos;
    record.mapq = mapq;
    record.flags = flags;
    record.mate_position = next_pos;
    record.template_length = tlen;
    Ok(())
}

/// Replace a `kS mN` placeholder CIGAR with the one stored in `CG:B,I`.
///
/// Records with more than 65535 operations cannot fit `n_cigar_op`, so
/// writers store the real CIGAR in the tag and leave a two-operation stand-in.
fn recover_oversized_cigar(record: &mut Record, l_seq: usize) {
    let [first, second] = record.cigar[..] else {
        return;
    };
    if first.kind() != Some(CigarKind::SoftClip)
        || first.len() as usize != l_seq
        || second.kind() != Some(CigarKind::RefSkip)
    {
        return;
    }
    let Some(tag) = record.tags.get(*b"CG") else {
        return;
    };
    let ops: Vec<CigarOp> = match tag.value() {
        TagValue::Array(ArrayValue::UInt32(values)) => {
            values.into_iter().map(CigarOp::from_raw).collect()
        }
        TagValue::Array(ArrayValue::Int32(values)) => values
            .into_iter()
            .map(|v| CigarOp::from_raw(v as u32))
            .collect(),
        _ => return,
    };
    trace!(
        "{}: restored {} CIGAR ops from CG tag",
        record.name,
        ops.len()
    );
    record.cigar = ops;
}

/// Read the next record from `reader` into `record`.
///
/// Returns `Ok(false)` when the stream ends cleanly before a record starts.
/// `buf` is scratch space reused across calls.
pub fn read_record_into<R: Read + ?Sized>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    reference_count: usize,
    record: &mut Record,
) -> Result<bool> {
    let mut size_bytes = [0u8; 4];
    match read_up_to(reader, &mut size_bytes)? {
        0 => return Ok(false),
        4 => {}
        _ => {
            record.clear();
            return Err(Error::TruncatedField {
                stage: Stage::BlockSize,
            });
        }
    }

    let block_size = i32::from_le_bytes(size_bytes);
    if block_size < FIXED_SIZE as i32 {
        record.clear();
        return Err(Error::MalformedLength {
            msg: format!("block size {} is smaller than the fixed header", block_size),
        });
    }
    let block_size = block_size as usize;

    // Grows with the bytes actually present, not the declared size
    buf.clear();
    let n = match (&mut *reader).take(block_size as u64).read_to_end(buf) {
        Ok(n) => n,
        Err(e) => {
            record.clear();
            return Err(e.into());
        }
    };
    decode_record(&buf[..n], block_size, reference_count, record)?;
    Ok(true)
}

/// Read the next record as a freshly owned value.
pub fn read_record<R: Read + ?Sized>(
    reader: &mut R,
    reference_count: usize,
) -> Result<Option<Record>> {
    let mut buf = Vec::with_capacity(DEFAULT_BUFFER_SIZE);
    let mut record = Record::new();
    Ok(read_record_into(reader, &mut buf, reference_count, &mut record)?.then_some(record))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Cursor;

    /// Fields for building a record block by hand.
    pub(crate) struct RawRecord<'a> {
        pub ref_id: i32,
        pub pos: i32,
        pub name: &'a [u8],
        pub mapq: u8,
        pub flags: u16,
        pub cigar: Vec<u32>,
        pub seq: &'a [u8],
        pub qual: Vec<u8>,
        pub aux: Vec<u8>,
        pub next_ref_id: i32,
        pub next_pos: i32,
        pub tlen: i32,
    }

    impl Default for RawRecord<'_> {
        fn default() -> Self {
            Self {
                ref_id: 0,
                pos: 0,
                name: b"read",
                mapq: 60,
                flags: 0,
                cigar: Vec::new(),
                seq: b"",
                qual: Vec::new(),
                aux: Vec::new(),
                next_ref_id: -1,
                next_pos: -1,
                tlen: 0,
            }
        }
    }

    fn base_code(base: u8) -> u8 {
        match base {
            b'A' => 1,
            b'C' => 2,
            b'G' => 4,
            b'T' => 8,
            _ => 15,
        }
    }

    impl RawRecord<'_> {
        /// Encode including the `block_size` prefix.
        pub(crate) fn encode(&self) -> Vec<u8> {
            let mut body = Vec::new();
            body.extend_from_slice(&self.ref_id.to_le_bytes());
            body.extend_from_slice(&self.pos.to_le_bytes());
            body.push(self.name.len() as u8 + 1);
            body.push(self.mapq);
            body.extend_from_slice(&0u16.to_le_bytes()); // bin
            body.extend_from_slice(&(self.cigar.len() as u16).to_le_bytes());
            body.extend_from_slice(&self.flags.to_le_bytes());
            body.extend_from_slice(&(self.seq.len() as i32).to_le_bytes());
            body.extend_from_slice(&self.next_ref_id.to_le_bytes());
            body.extend_from_slice(&self.next_pos.to_le_bytes());
            body.extend_from_slice(&self.tlen.to_le_bytes());
            body.extend_from_slice(self.name);
            body.push(0);
            for op in &self.cigar {
                body.extend_from_slice(&op.to_le_bytes());
            }
            for pair in self.seq.chunks(2) {
                let hi = base_code(pair[0]) << 4;
                let lo = pair.get(1).map_or(0, |&b| base_code(b));
                body.push(hi | lo);
            }
            if self.qual.is_empty() {
                body.extend(std::iter::repeat(0xFF).take(self.seq.len()));
            } else {
                body.extend_from_slice(&self.qual);
            }
            body.extend_from_slice(&self.aux);

            let mut data = (body.len() as i32).to_le_bytes().to_vec();
            data.extend_from_slice(&body);
            data
        }
    }

    fn decode(bytes: &[u8], reference_count: usize) -> Result<Record> {
        let mut record = Record::new();
        let block_size = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        decode_record(&bytes[4..], block_size, reference_count, &mut record)?;
        Ok(record)
    }

    #[test]
    fn test_record_flags() {
        let mut record = Record::new();

        record.flags = FLAG_UNMAPPED;
        assert!(record.is_unmapped());
        assert!(!record.is_paired());

        record.flags = FLAG_PAIRED | FLAG_READ2 | FLAG_MATE_REVERSE;
        assert!(record.is_paired());
        assert!(record.is_last_segment());
        assert!(record.is_mate_reverse_complement());
        assert!(!record.is_first_segment());

        record.flags = FLAG_SECONDARY | FLAG_SUPPLEMENTARY | FLAG_DUPLICATE | FLAG_QC_FAIL;
        assert!(record.is_secondary());
        assert!(record.is_supplementary());
        assert!(record.is_duplicate());
        assert!(record.is_qc_fail());
    }

    #[test]
    fn test_decode_minimal_unmapped_record() {
        let bytes = RawRecord {
            ref_id: -1,
            pos: -1,
            mapq: 255,
            flags: FLAG_UNMAPPED,
            ..Default::default()
        }
        .encode();
        let record = decode(&bytes, 0).unwrap();
        assert_eq!(record.name, "read");
        assert_eq!(record.reference_id, None);
        assert_eq!(record.position, -1);
        assert_eq!(record.mapping_quality(), None);
        assert!(record.is_unmapped());
        assert!(record.sequence.is_empty());
        assert!(record.quality.is_empty());
        assert!(record.cigar.is_empty());
        assert!(record.tags.is_empty());
    }

    #[test]
    fn test_decode_full_record() {
        let mut aux = b"NMC\x01".to_vec();
        aux.extend_from_slice(b"RGZgrp1\0");
        let bytes = RawRecord {
            ref_id: 1,
            pos: 100,
            name: b"r001",
            flags: FLAG_PAIRED | FLAG_READ1,
            cigar: vec![(2 << 4) | 4, (3 << 4), (1 << 4) | 2],
            seq: b"ACGTA",
            qual: vec![30, 31, 32, 33, 34],
            aux,
            next_ref_id: 1,
            next_pos: 300,
            tlen: -250,
            ..Default::default()
        }
        .encode();

        let record = decode(&bytes, 2).unwrap();
        assert_eq!(record.name, "r001");
        assert_eq!(record.reference_id, Some(1));
        assert_eq!(record.position, 100);
        assert_eq!(record.mapq, 60);
        assert_eq!(cigar::format_cigar(&record.cigar), "2S3M1D");
        assert_eq!(record.sequence.to_vec(), b"ACGTA");
        assert_eq!(record.quality, vec![30, 31, 32, 33, 34]);
        assert!(record.has_quality());
        assert_eq!(record.tags.len(), 2);
        assert_eq!(record.tags.get(*b"RG").unwrap().as_str(), Some("grp1"));
        assert_eq!(record.mate_reference_id, Some(1));
        assert_eq!(record.mate_position, 300);
        assert_eq!(record.template_length, -250);
        assert_eq!(record.reference_length(), 4);
        assert_eq!(record.alignment_end(), 104);
    }

    #[test]
    fn test_missing_quality() {
        let bytes = RawRecord {
            seq: b"ACGT",
            ..Default::default()
        }
        .encode();
        let record = decode(&bytes, 1).unwrap();
        assert_eq!(record.quality, vec![0xFF; 4]);
        assert!(!record.has_quality());
    }

    #[test]
    fn test_zero_length_sequence_with_tags() {
        let bytes = RawRecord {
            cigar: vec![10 << 4],
            aux: b"XYA!".to_vec(),
            ..Default::default()
        }
        .encode();
        let record = decode(&bytes, 1).unwrap();
        assert!(record.sequence.is_empty());
        assert!(record.quality.is_empty());
        assert_eq!(record.tags.get(*b"XY").unwrap().value(), TagValue::Char(b'!'));
    }

    #[test]
    fn test_reference_id_bounds() {
        let bytes = RawRecord {
            ref_id: 2,
            ..Default::default()
        }
        .encode();
        let err = decode(&bytes, 2).unwrap_err();
        assert!(matches!(
            err,
            Error::ReferenceIdOutOfRange {
                field: RefField::Read,
                id: 2,
                count: 2
            }
        ));

        let bytes = RawRecord {
            next_ref_id: 5,
            ..Default::default()
        }
        .encode();
        let err = decode(&bytes, 2).unwrap_err();
        assert!(matches!(
            err,
            Error::ReferenceIdOutOfRange {
                field: RefField::Mate,
                ..
            }
        ));

        let bytes = RawRecord {
            ref_id: -2,
            ..Default::default()
        }
        .encode();
        assert!(decode(&bytes, 2).is_err());
    }

    #[test]
    fn test_block_size_too_small() {
        let mut record = Record::new();
        let err = decode_record(&[0u8; 16], 16, 1, &mut record).unwrap_err();
        assert!(matches!(err, Error::MalformedLength { .. }));

        let mut stream = Cursor::new((-5i32).to_le_bytes().to_vec());
        let mut buf = Vec::new();
        let err = read_record_into(&mut stream, &mut buf, 1, &mut record).unwrap_err();
        assert!(matches!(err, Error::MalformedLength { .. }));
    }

    #[test]
    fn test_fields_overrun_block() {
        // Declared size cuts into the name: a complete but inconsistent block
        let mut bytes = RawRecord::default().encode();
        let short = (FIXED_SIZE + 2) as i32;
        bytes[0..4].copy_from_slice(&short.to_le_bytes());
        bytes.truncate(4 + FIXED_SIZE + 2);
        let err = decode(&bytes, 1).unwrap_err();
        assert!(matches!(err, Error::MalformedLength { .. }));
    }

    #[test]
    fn test_missing_name_terminator() {
        let mut bytes = RawRecord::default().encode();
        // Overwrite the NUL after "read"
        let nul = 4 + FIXED_SIZE + 4;
        bytes[nul] = b'x';
        let err = decode(&bytes, 1).unwrap_err();
        assert!(matches!(err, Error::InvalidName { .. }));
    }

    #[test]
    fn test_invalid_utf8_name() {
        let bytes = RawRecord {
            name: &[0xFF, 0xFE],
            ..Default::default()
        }
        .encode();
        let err = decode(&bytes, 1).unwrap_err();
        assert!(matches!(err, Error::InvalidName { .. }));
    }

    #[test]
    fn test_negative_sequence_length() {
        let mut bytes = RawRecord::default().encode();
        bytes[4 + 16..4 + 20].copy_from_slice(&(-1i32).to_le_bytes());
        let err = decode(&bytes, 1).unwrap_err();
        assert!(matches!(err, Error::MalformedLength { .. }));
    }

    #[test]
    fn test_bad_aux_clears_record() {
        let bytes = RawRecord {
            aux: b"XYq\x00".to_vec(),
            ..Default::default()
        }
        .encode();
        let mut record = Record::new();
        record.name.push_str("stale");
        let block_size = bytes.len() - 4;
        let err = decode_record(&bytes[4..], block_size, 1, &mut record).unwrap_err();
        assert!(matches!(err, Error::UnknownAuxType { .. }));
        assert!(record.name.is_empty());
    }

    #[test]
    fn test_truncation_at_every_offset() {
        let bytes = RawRecord {
            name: b"abc",
            cigar: vec![4 << 4],
            seq: b"ACGT",
            aux: b"NMC\x00".to_vec(),
            ..Default::default()
        }
        .encode();
        // prefix(4) header(32) name(4) cigar(4) seq(2) qual(4) aux(4)
        let layout = [
            (4, Stage::BlockSize),
            (36, Stage::Header),
            (40, Stage::Name),
            (44, Stage::Cigar),
            (46, Stage::Sequence),
            (50, Stage::Quality),
            (54, Stage::Aux),
        ];
        assert_eq!(bytes.len(), 54);
        for cut in 1..bytes.len() {
            let expected = layout
                .iter()
                .find(|(field_end, _)| cut < *field_end)
                .map(|(_, stage)| *stage)
                .unwrap();
            let mut stream = Cursor::new(bytes[..cut].to_vec());
            let err = read_record(&mut stream, 1).unwrap_err();
            match err {
                Error::TruncatedField { stage } => assert_eq!(stage, expected, "cut at {}", cut),
                other => panic!("cut at {}: unexpected {:?}", cut, other),
            }
        }
    }

    #[test]
    fn test_declared_size_does_not_preallocate() {
        // 256 MiB declared, 20 bytes present
        let mut data = (256i32 << 20).to_le_bytes().to_vec();
        data.extend_from_slice(&[0u8; 20]);
        let mut buf = Vec::new();
        let mut record = Record::new();
        let err = read_record_into(&mut Cursor::new(data), &mut buf, 1, &mut record).unwrap_err();
        assert!(matches!(
            err,
            Error::TruncatedField {
                stage: Stage::Header
            }
        ));
        assert_eq!(buf.len(), 20);
        assert!(buf.capacity() < 1 << 20);
    }

    #[test]
    fn test_record_with_every_tag_type() {
        let bytes = RawRecord {
            seq: b"ACGT",
            cigar: vec![4 << 4],
            aux: crate::io::bam::tags::tests::all_types_block(),
            ..Default::default()
        }
        .encode();
        let record = decode(&bytes, 1).unwrap();
        assert_eq!(record.tags.len(), 12);
        assert_eq!(record.tags.get(*b"XA").unwrap().value(), TagValue::Char(b'Q'));
        assert_eq!(record.tags.get(*b"XI").unwrap().value(), TagValue::Int(4_000_000_000));
        assert_eq!(record.tags.get(*b"Xd").unwrap().value(), TagValue::Double(2.25));
        assert_eq!(
            record.tags.get(*b"XH").unwrap().value(),
            TagValue::Hex("1AE3".to_string())
        );
        assert_eq!(
            record.tags.get(*b"XB").unwrap().value(),
            TagValue::Array(ArrayValue::Int16(vec![-1, 0, 1]))
        );
        assert_eq!(record.sequence.to_string(), "ACGT");
    }

    #[test]
    fn test_clean_end_of_stream() {
        let mut stream = Cursor::new(Vec::new());
        assert!(read_record(&mut stream, 1).unwrap().is_none());
    }

    #[test]
    fn test_read_consecutive_records() {
        let mut data = RawRecord {
            name: b"first",
            ..Default::default()
        }
        .encode();
        data.extend_from_slice(
            &RawRecord {
                name: b"second",
                pos: 10,
                ..Default::default()
            }
            .encode(),
        );
        let mut stream = Cursor::new(data);
        let mut buf = Vec::new();
        let mut record = Record::new();
        assert!(read_record_into(&mut stream, &mut buf, 1, &mut record).unwrap());
        assert_eq!(record.name, "first");
        assert!(read_record_into(&mut stream, &mut buf, 1, &mut record).unwrap());
        assert_eq!(record.name, "second");
        assert_eq!(record.position, 10);
        assert!(!read_record_into(&mut stream, &mut buf, 1, &mut record).unwrap());
    }

    #[test]
    fn test_oversized_cigar_from_cg_tag() {
        // Real CIGAR 5M3D5M stored in CG:B,I
        let mut aux = b"CGBI".to_vec();
        aux.extend_from_slice(&3u32.to_le_bytes());
        for op in [5u32 << 4, (3 << 4) | 2, 5 << 4] {
            aux.extend_from_slice(&op.to_le_bytes());
        }
        let bytes = RawRecord {
            seq: b"ACGTACGTAC",
            // Placeholder 10S 13N
            cigar: vec![(10 << 4) | 4, (13 << 4) | 3],
            aux,
            ..Default::default()
        }
        .encode();
        let record = decode(&bytes, 1).unwrap();
        assert_eq!(cigar::format_cigar(&record.cigar), "5M3D5M");
        assert_eq!(record.reference_length(), 13);
    }

    #[test]
    fn test_placeholder_cigar_without_cg_tag() {
        let bytes = RawRecord {
            seq: b"ACGT",
            cigar: vec![(4 << 4) | 4, (9 << 4) | 3],
            ..Default::default()
        }
        .encode();
        let record = decode(&bytes, 1).unwrap();
        assert_eq!(cigar::format_cigar(&record.cigar), "4S9N");
    }

    #[test]
    fn test_two_op_cigar_not_placeholder() {
        let mut aux = b"CGBI".to_vec();
        aux.extend_from_slice(&1u32.to_le_bytes());
        aux.extend_from_slice(&(7u32 << 4).to_le_bytes());
        let bytes = RawRecord {
            seq: b"ACGT",
            cigar: vec![(2 << 4) | 4, 2 << 4],
            aux,
            ..Default::default()
        }
        .encode();
        let record = decode(&bytes, 1).unwrap();
        assert_eq!(cigar::format_cigar(&record.cigar), "2S2M");
    }

    #[test]
    fn test_alignment_end_and_overlap() {
        let mut record = Record::new();
        record.position = 100;
        // No CIGAR: one-base span
        assert_eq!(record.alignment_end(), 101);
        assert!(record.overlaps(100, 101));
        assert!(!record.overlaps(101, 200));

        record.cigar = vec![CigarOp::new(CigarKind::Match, 50)];
        assert_eq!(record.alignment_end(), 150);
        assert!(record.overlaps(149, 300));
        assert!(!record.overlaps(150, 300));
        assert!(!record.overlaps(0, 100));
        assert!(record.overlaps(0, 101));
    }

    #[test]
    fn test_alignment_end_past_u32() {
        let max = 268_435_455u32;
        let bytes = RawRecord {
            pos: 1000,
            seq: b"ACGT",
            cigar: std::iter::once(4 << 4)
                .chain(std::iter::repeat((max << 4) | 2).take(17))
                .collect(),
            ..Default::default()
        }
        .encode();
        let record = decode(&bytes, 1).unwrap();
        assert_eq!(record.reference_length(), 4 + 17 * u64::from(max));
        assert_eq!(
            record.alignment_end(),
            1000 + 4 + 17 * i64::from(max)
        );
        assert!(record.overlaps(1_000_000, 1_000_001));
    }

    #[test]
    fn test_clear_resets() {
        let bytes = RawRecord {
            seq: b"AC",
            aux: b"NMC\x01".to_vec(),
            ..Default::default()
        }
        .encode();
        let mut record = decode(&bytes, 1).unwrap();
        record.clear();
        assert_eq!(record, Record::new());
    }
}
