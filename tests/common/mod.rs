//! Synthetic BAM/BAI builders for integration tests.
//!
//! Files are assembled in memory: records are encoded by hand, the stream is
//! cut into small BGZF blocks so records straddle block boundaries, and a
//! BAI index is derived from the virtual offset of every record.

#![allow(dead_code)]

use flate2::write::DeflateEncoder;
use flate2::{Compression, Crc};
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

pub const EOF_BLOCK: [u8; 28] = [
    31, 139, 8, 4, 0, 0, 0, 0, 0, 255, 6, 0, 66, 67, 2, 0, 27, 0, 3, 0, 0, 0, 0, 0, 0, 0, 0, 0,
];

/// One alignment to encode.
#[derive(Debug, Clone)]
pub struct Alignment {
    pub ref_id: i32,
    pub pos: i32,
    pub name: String,
    /// Packed CIGAR values
    pub cigar: Vec<u32>,
    pub seq: Vec<u8>,
    pub aux: Vec<u8>,
}

impl Alignment {
    /// A read with a single `len`M CIGAR and matching sequence.
    pub fn matched(ref_id: i32, pos: i32, len: u32, name: &str) -> Self {
        Self {
            ref_id,
            pos,
            name: name.to_string(),
            cigar: vec![len << 4],
            seq: b"ACGT".iter().cycle().take(len as usize).copied().collect(),
            aux: b"NMC\x00".to_vec(),
        }
    }

    /// Exclusive end on the reference (minimum one base).
    pub fn end(&self) -> i32 {
        let ref_len: u32 = self
            .cigar
            .iter()
            .filter(|&&op| matches!(op & 0xF, 0 | 2 | 3 | 7 | 8))
            .map(|op| op >> 4)
            .sum();
        self.pos + ref_len.max(1) as i32
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&self.ref_id.to_le_bytes());
        body.extend_from_slice(&self.pos.to_le_bytes());
        body.push(self.name.len() as u8 + 1);
        body.push(60); // mapq
        body.extend_from_slice(&0u16.to_le_bytes()); // bin
        body.extend_from_slice(&(self.cigar.len() as u16).to_le_bytes());
        body.extend_from_slice(&0u16.to_le_bytes()); // flag
        body.extend_from_slice(&(self.seq.len() as i32).to_le_bytes());
        body.extend_from_slice(&(-1i32).to_le_bytes()); // next refID
        body.extend_from_slice(&(-1i32).to_le_bytes()); // next pos
        body.extend_from_slice(&0i32.to_le_bytes()); // tlen
        body.extend_from_slice(self.name.as_bytes());
        body.push(0);
        for op in &self.cigar {
            body.extend_from_slice(&op.to_le_bytes());
        }
        for pair in self.seq.chunks(2) {
            let hi = base_code(pair[0]) << 4;
            let lo = pair.get(1).map_or(0, |&b| base_code(b));
            body.push(hi | lo);
        }
        body.extend((0..self.seq.len()).map(|i| 20 + (i % 20) as u8));
        body.extend_from_slice(&self.aux);

        let mut data = (body.len() as i32).to_le_bytes().to_vec();
        data.extend_from_slice(&body);
        data
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

/// Header bytes for references `chr1..chrN`.
pub fn header_bytes(reference_count: usize) -> Vec<u8> {
    let mut data = b"BAM\x01".to_vec();
    let text = "@HD\tVN:1.6\tSO:coordinate\n@RG\tID:rg1\tSM:sample1\n";
    data.extend_from_slice(&(text.len() as i32).to_le_bytes());
    data.extend_from_slice(text.as_bytes());
    data.extend_from_slice(&(reference_count as i32).to_le_bytes());
    for i in 0..reference_count {
        let name = format!("chr{}", i + 1);
        data.extend_from_slice(&(name.len() as i32 + 1).to_le_bytes());
        data.extend_from_slice(name.as_bytes());
        data.push(0);
        data.extend_from_slice(&100_000_000u32.to_le_bytes());
    }
    data
}

/// Compress `data` into one BGZF block.
pub fn bgzf_block(data: &[u8]) -> Vec<u8> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    let cdata = encoder.finish().unwrap();

    let block_size = 18 + cdata.len() + 8;
    let mut block = vec![31, 139, 8, 4, 0, 0, 0, 0, 0, 255, 6, 0, b'B', b'C', 2, 0];
    block.extend_from_slice(&((block_size - 1) as u16).to_le_bytes());
    block.extend_from_slice(&cdata);
    let mut crc = Crc::new();
    crc.update(data);
    block.extend_from_slice(&crc.sum().to_le_bytes());
    block.extend_from_slice(&(data.len() as u32).to_le_bytes());
    block
}

/// A BGZF file plus the raw virtual offset of any uncompressed position.
pub struct Bgzf {
    pub bytes: Vec<u8>,
    block_starts: Vec<u64>,
    block_size: usize,
}

impl Bgzf {
    /// Split `data` into blocks of `block_size` uncompressed bytes.
    pub fn compress(data: &[u8], block_size: usize) -> Self {
        let mut bytes = Vec::new();
        let mut block_starts = Vec::new();
        for piece in data.chunks(block_size) {
            block_starts.push(bytes.len() as u64);
            bytes.extend_from_slice(&bgzf_block(piece));
        }
        // Offsets at the very end point at the EOF block
        block_starts.push(bytes.len() as u64);
        bytes.extend_from_slice(&EOF_BLOCK);
        Self {
            bytes,
            block_starts,
            block_size,
        }
    }

    pub fn virtual_offset(&self, uncompressed: usize) -> u64 {
        let block = uncompressed / self.block_size;
        let within = uncompressed % self.block_size;
        (self.block_starts[block] << 16) | within as u64
    }
}

/// Standard single-bin assignment for `[beg, end)`.
pub fn reg2bin(beg: i32, end: i32) -> u32 {
    let end = end - 1;
    if beg >> 14 == end >> 14 {
        return 4681 + (beg >> 14) as u32;
    }
    if beg >> 17 == end >> 17 {
        return 585 + (beg >> 17) as u32;
    }
    if beg >> 20 == end >> 20 {
        return 73 + (beg >> 20) as u32;
    }
    if beg >> 23 == end >> 23 {
        return 9 + (beg >> 23) as u32;
    }
    if beg >> 26 == end >> 26 {
        return 1 + (beg >> 26) as u32;
    }
    0
}

/// A complete synthetic BAM with its index.
pub struct SyntheticBam {
    pub alignments: Vec<Alignment>,
    pub bgzf: Bgzf,
    pub bai: Vec<u8>,
    /// Uncompressed start of each record
    pub record_starts: Vec<usize>,
}

impl SyntheticBam {
    /// `alignments` must be sorted by (ref_id, pos) with unplaced reads last.
    pub fn build(reference_count: usize, alignments: Vec<Alignment>, block_size: usize) -> Self {
        let mut data = header_bytes(reference_count);
        let mut record_starts = Vec::new();
        for alignment in &alignments {
            record_starts.push(data.len());
            data.extend_from_slice(&alignment.encode());
        }
        let total = data.len();
        let bgzf = Bgzf::compress(&data, block_size);

        // Per reference: bin -> chunks, plus linear index
        let mut bins: Vec<std::collections::BTreeMap<u32, Vec<(u64, u64)>>> =
            vec![Default::default(); reference_count];
        let mut linear: Vec<Vec<u64>> = vec![Vec::new(); reference_count];
        for (i, alignment) in alignments.iter().enumerate() {
            if alignment.ref_id < 0 {
                continue;
            }
            let start = bgzf.virtual_offset(record_starts[i]);
            let end_pos = record_starts.get(i + 1).copied().unwrap_or(total);
            let end = bgzf.virtual_offset(end_pos);
            let r = alignment.ref_id as usize;
            let bin = reg2bin(alignment.pos, alignment.end());
            bins[r].entry(bin).or_default().push((start, end));

            let last_window = ((alignment.end() - 1) >> 14) as usize;
            let first_window = (alignment.pos >> 14) as usize;
            if linear[r].len() <= last_window {
                linear[r].resize(last_window + 1, 0);
            }
            for slot in &mut linear[r][first_window..=last_window] {
                if *slot == 0 || start < *slot {
                    *slot = start;
                }
            }
        }

        let mut bai = b"BAI\x01".to_vec();
        bai.extend_from_slice(&(reference_count as i32).to_le_bytes());
        for r in 0..reference_count {
            bai.extend_from_slice(&(bins[r].len() as i32).to_le_bytes());
            for (bin, chunks) in &bins[r] {
                bai.extend_from_slice(&bin.to_le_bytes());
                bai.extend_from_slice(&(chunks.len() as i32).to_le_bytes());
                for (start, end) in chunks {
                    bai.extend_from_slice(&start.to_le_bytes());
                    bai.extend_from_slice(&end.to_le_bytes());
                }
            }
            bai.extend_from_slice(&(linear[r].len() as i32).to_le_bytes());
            for offset in &linear[r] {
                bai.extend_from_slice(&offset.to_le_bytes());
            }
        }
        let unplaced = alignments.iter().filter(|a| a.ref_id < 0).count() as u64;
        bai.extend_from_slice(&unplaced.to_le_bytes());

        Self {
            alignments,
            bgzf,
            bai,
            record_starts,
        }
    }

    /// Names of alignments on `ref_id` intersecting `[begin, end)`.
    pub fn expected(&self, ref_id: i32, begin: i32, end: i32) -> Vec<String> {
        self.alignments
            .iter()
            .filter(|a| a.ref_id == ref_id && a.pos < end && a.end() > begin)
            .map(|a| a.name.clone())
            .collect()
    }
}

/// In-memory seekable source that counts seeks and bytes read.
pub struct CountingCursor {
    inner: Cursor<Vec<u8>>,
    pub seeks: usize,
    pub bytes_read: usize,
}

impl CountingCursor {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            inner: Cursor::new(data),
            seeks: 0,
            bytes_read: 0,
        }
    }
}

impl Read for CountingCursor {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.bytes_read += n;
        Ok(n)
    }
}

impl Seek for CountingCursor {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.seeks += 1;
        self.inner.seek(pos)
    }
}
