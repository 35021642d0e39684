//! BAI index parsing and chunk queries.
//!
//! A BAI index maps, per reference, hierarchical genomic bins to the chunks
//! of the BGZF stream holding records that fall in them, plus a linear index
//! of the smallest record offset in each 16 kbp window.
//!
//! # Binning Scheme
//!
//! Six levels cover 2^29 bp:
//!
//! | Level | Bins | Bin size |
//! |-------|------|----------|
//! | 0 | 0 | 512 Mbp |
//! | 1 | 1-8 | 64 Mbp |
//! | 2 | 9-72 | 8 Mbp |
//! | 3 | 73-584 | 1 Mbp |
//! | 4 | 585-4680 | 128 kbp |
//! | 5 | 4681-37448 | 16 kbp |
//!
//! Bin 37450 is a pseudo-bin carrying per-reference statistics.
//!
//! # File Format
//!
//! ```text
//! magic        "BAI\1"
//! n_ref        i32
//! per reference:
//!   n_bin      i32
//!   per bin:   bin u32, n_chunk i32, n_chunk x (beg u64, end u64)
//!   n_intv     i32
//!   ioffset    n_intv x u64
//! n_no_coor    u64 (optional)
//! ```

use super::fetch::FetchOptions;
use crate::error::{Error, Result};
use crate::io::bgzf::{read_up_to, VirtualOffset};
use log::debug;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

const BAI_MAGIC: &[u8; 4] = b"BAI\x01";

/// Pseudo-bin holding per-reference statistics.
pub const METADATA_BIN: u32 = 37450;

/// Largest coordinate addressable by the binning scheme.
pub const MAX_COORDINATE: i32 = 1 << 29;

/// log2 of the linear index window (16 kbp).
const LINEAR_SHIFT: u32 = 14;

/// A half-open range `[start, end)` of virtual offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Chunk {
    pub start: VirtualOffset,
    pub end: VirtualOffset,
}

impl Chunk {
    pub fn new(start: VirtualOffset, end: VirtualOffset) -> Self {
        Self { start, end }
    }
}

/// A bin and its chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bin {
    pub bin_id: u32,
    pub chunks: Vec<Chunk>,
}

/// Contents of the metadata pseudo-bin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceMetadata {
    /// Span of the reference's records in the stream
    pub span: Chunk,
    /// Records placed on the reference and mapped
    pub mapped: u64,
    /// Records placed on the reference but unmapped
    pub unmapped: u64,
}

/// Index data for one reference.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceIndex {
    bins: HashMap<u32, Vec<Chunk>>,
    intervals: Vec<VirtualOffset>,
    metadata: Option<ReferenceMetadata>,
}

impl ReferenceIndex {
    /// Build from decoded bins and linear offsets.
    pub fn new(bins: Vec<Bin>, intervals: Vec<VirtualOffset>) -> Self {
        Self {
            bins: bins.into_iter().map(|b| (b.bin_id, b.chunks)).collect(),
            intervals,
            metadata: None,
        }
    }

    /// Chunks attached to `bin_id`.
    pub fn chunks(&self, bin_id: u32) -> &[Chunk] {
        self.bins.get(&bin_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn bin_count(&self) -> usize {
        self.bins.len()
    }

    /// Linear index entries.
    pub fn intervals(&self) -> &[VirtualOffset] {
        &self.intervals
    }

    pub fn metadata(&self) -> Option<&ReferenceMetadata> {
        self.metadata.as_ref()
    }

    /// Lower bound on the offset of any record overlapping `begin`.
    pub fn min_offset(&self, begin: i32) -> VirtualOffset {
        let window = (begin.max(0) >> LINEAR_SHIFT) as usize;
        self.intervals
            .get(window)
            .or_else(|| self.intervals.last())
            .copied()
            .unwrap_or_default()
    }
}

/// Per-reference bin to chunk mapping, immutable once built.
///
/// Shared read-only between readers if wrapped in an `Arc`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkIndex {
    references: Vec<ReferenceIndex>,
    unplaced_unmapped: Option<u64>,
}

impl ChunkIndex {
    /// Build from already-decoded reference data.
    pub fn from_references(references: Vec<ReferenceIndex>) -> Self {
        Self {
            references,
            unplaced_unmapped: None,
        }
    }

    /// Parse a BAI file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Self::read(BufReader::new(file))
    }

    /// Parse BAI bytes.
    pub fn read<R: Read>(mut reader: R) -> Result<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != BAI_MAGIC {
            return Err(Error::InvalidIndex {
                msg: format!("expected magic {:?}, got {:?}", BAI_MAGIC, magic),
            });
        }

        let n_ref = read_count(&mut reader, "reference count")?;
        let mut references = Vec::with_capacity(n_ref.min(4096));
        for _ in 0..n_ref {
            references.push(read_reference(&mut reader)?);
        }

        let mut tail = [0u8; 8];
        let unplaced_unmapped = match read_up_to(&mut reader, &mut tail)? {
            8 => Some(u64::from_le_bytes(tail)),
            _ => None,
        };

        debug!("BAI index: {} references", references.len());
        Ok(Self {
            references,
            unplaced_unmapped,
        })
    }

    /// Number of references covered.
    pub fn reference_count(&self) -> usize {
        self.references.len()
    }

    pub fn reference(&self, ref_id: usize) -> Option<&ReferenceIndex> {
        self.references.get(ref_id)
    }

    /// Count of records with no reference, if the file recorded it.
    pub fn unplaced_unmapped(&self) -> Option<u64> {
        self.unplaced_unmapped
    }

    /// Chunks that may hold records overlapping `[begin, end)` on `ref_id`.
    ///
    /// Uses the default options: overlapping chunks merged and the linear
    /// index applied.
    pub fn query(&self, ref_id: usize, begin: i32, end: i32) -> Result<Vec<Chunk>> {
        self.query_with(ref_id, begin, end, &FetchOptions::default())
    }

    /// As [`query`](Self::query), with explicit options.
    ///
    /// The result is sorted by start offset. An empty range, or a reference
    /// with no bins, yields an empty list.
    ///
    /// # Errors
    ///
    /// - `IndexReferenceOutOfRange` if `ref_id` is not covered
    /// - `InvalidRange` if `begin > end`
    pub fn query_with(
        &self,
        ref_id: usize,
        begin: i32,
        end: i32,
        options: &FetchOptions,
    ) -> Result<Vec<Chunk>> {
        let reference = self
            .references
            .get(ref_id)
            .ok_or(Error::IndexReferenceOutOfRange {
                id: ref_id,
                count: self.references.len(),
            })?;
        if begin > end {
            return Err(Error::InvalidRange { begin, end });
        }
        let begin = begin.max(0);
        if begin >= end || begin >= MAX_COORDINATE {
            return Ok(Vec::new());
        }

        let mut chunks: Vec<Chunk> = reg2bins(begin, end)
            .into_iter()
            .flat_map(|bin| reference.chunks(bin).iter().copied())
            .collect();

        if options.linear_index {
            let min_offset = reference.min_offset(begin);
            chunks.retain(|c| c.end > min_offset);
        }

        chunks.sort_unstable();
        chunks.dedup();
        if options.merge_chunks {
            chunks = merge_chunks(chunks);
        }
        Ok(chunks)
    }
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(reader: &mut R) -> Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_count<R: Read>(reader: &mut R, what: &str) -> Result<usize> {
    let n = read_u32(reader)? as i32;
    if n < 0 {
        return Err(Error::InvalidIndex {
            msg: format!("negative {}: {}", what, n),
        });
    }
    Ok(n as usize)
}

fn read_reference<R: Read>(reader: &mut R) -> Result<ReferenceIndex> {
    let n_bin = read_count(reader, "bin count")?;
    let mut bins: HashMap<u32, Vec<Chunk>> = HashMap::with_capacity(n_bin.min(65536));
    let mut metadata = None;

    for _ in 0..n_bin {
        let bin_id = read_u32(reader)?;
        let n_chunk = read_count(reader, "chunk count")?;
        let mut chunks = Vec::with_capacity(n_chunk.min(65536));
        for _ in 0..n_chunk {
            let start = VirtualOffset::from_raw(read_u64(reader)?);
            let end = VirtualOffset::from_raw(read_u64(reader)?);
            chunks.push(Chunk::new(start, end));
        }

        if bin_id == METADATA_BIN {
            if chunks.len() != 2 {
                return Err(Error::InvalidIndex {
                    msg: format!("metadata bin has {} chunks, expected 2", chunks.len()),
                });
            }
            metadata = Some(ReferenceMetadata {
                span: chunks[0],
                mapped: chunks[1].start.as_raw(),
                unmapped: chunks[1].end.as_raw(),
            });
        } else {
            bins.entry(bin_id).or_default().extend(chunks);
        }
    }

    let n_intv = read_count(reader, "interval count")?;
    let mut intervals = Vec::with_capacity(n_intv.min(1 << 16));
    for _ in 0..n_intv {
        intervals.push(VirtualOffset::from_raw(read_u64(reader)?));
    }

    Ok(ReferenceIndex {
        bins,
        intervals,
        metadata,
    })
}

/// Bins that may contain records overlapping `[begin, end)`, all levels.
///
/// Coordinates are clamped to `[0, 2^29)`; callers pass `begin < end`.
pub fn reg2bins(begin: i32, end: i32) -> Vec<u32> {
    let begin = begin.clamp(0, MAX_COORDINATE - 1) as u32;
    let last = (end.clamp(1, MAX_COORDINATE) - 1) as u32;
    let mut bins = vec![0];
    for (offset, shift) in [(1u32, 26u32), (9, 23), (73, 20), (585, 17), (4681, 14)] {
        bins.extend((offset + (begin >> shift))..=(offset + (last >> shift)));
    }
    bins
}

/// Merge chunks that overlap or touch. Input must be sorted by start.
pub fn merge_chunks(chunks: Vec<Chunk>) -> Vec<Chunk> {
    let mut merged: Vec<Chunk> = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        match merged.last_mut() {
            Some(last) if chunk.start <= last.end => {
                last.end = last.end.max(chunk.end);
            }
            _ => merged.push(chunk),
        }
    }
    merged
}
