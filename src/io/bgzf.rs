//! BGZF block transport with virtual-offset seeking.
//!
//! BGZF is a series of independent gzip members ("blocks"), each at most
//! 64 KiB compressed and 64 KiB uncompressed. Every block carries a `BC`
//! extra subfield holding its total compressed size, which lets a reader hop
//! from block to block without inflating, and lets an index address any byte
//! of the decompressed stream with a 64-bit *virtual offset*.
//!
//! # Block Structure
//!
//! ```text
//! ID1 ID2 CM FLG  MTIME  XFL OS  XLEN   extra subfields      CDATA    CRC32 ISIZE
//! 31  139 8  4    (4)    (1) (1) (2)    SI1=B SI2=C SLEN=2   ...      (4)   (4)
//!                                       BSIZE (total - 1)
//! ```
//!
//! # Virtual Offsets
//!
//! - High 48 bits: byte offset of the block start in the compressed file
//! - Low 16 bits: byte offset within the decompressed block

use flate2::read::DeflateDecoder;
use flate2::Crc;
use log::trace;
use std::fmt;
use std::io::{self, Read, Seek, SeekFrom};

/// Largest compressed or decompressed size of a single BGZF block.
pub const BGZF_MAX_BLOCK_SIZE: usize = 64 * 1024;

// ID1 (1) + ID2 (1) + CM (1) + FLG (1) + MTIME (4) + XFL (1) + OS (1)
const GZIP_HEADER_SIZE: usize = 10;

// XLEN (2)
const GZIP_XLEN_SIZE: usize = 2;

// CRC32 (4) + ISIZE (4)
const TRAILER_SIZE: usize = 8;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

const FLG_FEXTRA: u8 = 0x04;

/// Virtual file offset into a BGZF stream.
///
/// Ordering is lexicographic on (compressed block offset, intra-block
/// offset), which is the same as ordering the raw 64-bit value.
///
/// # Example
///
/// ```
/// use bamfetch::io::bgzf::VirtualOffset;
///
/// let offset = VirtualOffset::new(1024, 512);
/// assert_eq!(offset.compressed_offset(), 1024);
/// assert_eq!(offset.uncompressed_offset(), 512);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtualOffset(u64);

impl VirtualOffset {
    /// Create a virtual offset from a block start and an offset inside the block.
    pub fn new(compressed: u64, uncompressed: u16) -> Self {
        VirtualOffset((compressed << 16) | u64::from(uncompressed))
    }

    /// Create from the raw 64-bit value stored in index files.
    pub fn from_raw(value: u64) -> Self {
        VirtualOffset(value)
    }

    /// Raw 64-bit value.
    pub fn as_raw(self) -> u64 {
        self.0
    }

    /// Byte offset of the containing block in the compressed file.
    pub fn compressed_offset(self) -> u64 {
        self.0 >> 16
    }

    /// Byte offset within the decompressed block.
    pub fn uncompressed_offset(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }
}

impl fmt::Display for VirtualOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.compressed_offset(), self.uncompressed_offset())
    }
}

impl From<u64> for VirtualOffset {
    fn from(value: u64) -> Self {
        VirtualOffset(value)
    }
}

/// A byte stream that can jump to a virtual offset.
///
/// After a successful [`seek_virtual`](Self::seek_virtual), ordinary
/// sequential reads resume from the addressed byte. Streams that cannot seek
/// (plain pipes, uncompressed readers) simply do not implement this trait,
/// so indexed fetching on them is rejected at compile time.
pub trait SeekableByteStream: Read {
    /// Position the stream at `offset`.
    fn seek_virtual(&mut self, offset: VirtualOffset) -> io::Result<()>;

    /// Virtual offset of the next byte to be read.
    fn virtual_offset(&self) -> VirtualOffset;
}

impl<S: SeekableByteStream + ?Sized> SeekableByteStream for &mut S {
    fn seek_virtual(&mut self, offset: VirtualOffset) -> io::Result<()> {
        (**self).seek_virtual(offset)
    }

    fn virtual_offset(&self) -> VirtualOffset {
        (**self).virtual_offset()
    }
}

/// Sequential BGZF decompressor.
///
/// Holds exactly one decompressed block in memory. Implements [`Read`] for
/// any inner reader and [`SeekableByteStream`] when the inner reader is
/// also [`Seek`].
///
/// Not safe for concurrent use: the block buffer and cursor are mutated by
/// every read.
pub struct BgzfReader<R> {
    inner: R,
    /// Compressed payload scratch (reused across blocks)
    cdata: Vec<u8>,
    /// Current decompressed block
    block: Vec<u8>,
    /// Read cursor within `block`
    position: usize,
    /// Compressed offset of the current block
    block_offset: u64,
    /// Compressed offset of the next block
    next_block_offset: u64,
}

impl<R: Read> BgzfReader<R> {
    /// Wrap a reader positioned at the start of a BGZF block.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            cdata: Vec::with_capacity(BGZF_MAX_BLOCK_SIZE),
            block: Vec::with_capacity(BGZF_MAX_BLOCK_SIZE),
            position: 0,
            block_offset: 0,
            next_block_offset: 0,
        }
    }

    /// Get a reference to the underlying reader.
    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Unwrap the underlying reader.
    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Virtual offset of the next byte to be read.
    ///
    /// At the end of a block this reports the start of the following block,
    /// matching what index writers record.
    pub fn virtual_offset(&self) -> VirtualOffset {
        if self.position < self.block.len() {
            VirtualOffset::new(self.block_offset, self.position as u16)
        } else {
            VirtualOffset::new(self.next_block_offset, 0)
        }
    }

    /// Load the next block. Returns `false` at a clean end of input.
    fn read_block(&mut self) -> io::Result<bool> {
        let mut header = [0u8; GZIP_HEADER_SIZE + GZIP_XLEN_SIZE];
        let n = read_up_to(&mut self.inner, &mut header)?;
        if n == 0 {
            self.block.clear();
            self.position = 0;
            self.block_offset = self.next_block_offset;
            return Ok(false);
        }
        if n < header.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "Incomplete BGZF header at offset {} ({} bytes)",
                    self.next_block_offset, n
                ),
            ));
        }

        if header[0..2] != GZIP_MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Invalid gzip magic bytes at offset {}: expected {:?}, got {:?}",
                    self.next_block_offset,
                    GZIP_MAGIC,
                    &header[0..2]
                ),
            ));
        }
        if header[3] & FLG_FEXTRA == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Gzip member at offset {} has no extra field (not BGZF)",
                    self.next_block_offset
                ),
            ));
        }

        let xlen = u16::from_le_bytes([header[10], header[11]]) as usize;
        let mut extra = vec![0u8; xlen];
        self.inner.read_exact(&mut extra)?;
        let bsize = find_bsize(&extra).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Missing BC subfield in block at offset {}", self.next_block_offset),
            )
        })?;

        // BSIZE is total block size minus 1
        let block_size = bsize as usize + 1;
        let overhead = GZIP_HEADER_SIZE + GZIP_XLEN_SIZE + xlen + TRAILER_SIZE;
        if block_size < overhead {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("expected block size >= {}, got {}", overhead, block_size),
            ));
        }

        self.cdata.resize(block_size - overhead, 0);
        self.inner.read_exact(&mut self.cdata)?;

        let mut trailer = [0u8; TRAILER_SIZE];
        self.inner.read_exact(&mut trailer)?;
        let expected_crc = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        let expected_len =
            u32::from_le_bytes([trailer[4], trailer[5], trailer[6], trailer[7]]) as usize;

        // Intra-block offsets are 16 bits wide
        if expected_len > BGZF_MAX_BLOCK_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "BGZF block at offset {} declares {} uncompressed bytes, limit is {}",
                    self.next_block_offset, expected_len, BGZF_MAX_BLOCK_SIZE
                ),
            ));
        }

        self.block.clear();
        if expected_len > 0 {
            let decoder = DeflateDecoder::new(&self.cdata[..]);
            decoder
                .take(BGZF_MAX_BLOCK_SIZE as u64 + 1)
                .read_to_end(&mut self.block)?;
        }

        if self.block.len() != expected_len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "BGZF block at offset {} inflated to {} bytes, ISIZE says {}",
                    self.next_block_offset,
                    self.block.len(),
                    expected_len
                ),
            ));
        }
        let mut crc = Crc::new();
        crc.update(&self.block);
        if crc.sum() != expected_crc {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("BGZF block at offset {} failed CRC32 check", self.next_block_offset),
            ));
        }

        self.block_offset = self.next_block_offset;
        self.next_block_offset += block_size as u64;
        self.position = 0;
        trace!(
            "bgzf block at {}: {} -> {} bytes",
            self.block_offset,
            block_size,
            self.block.len()
        );
        Ok(true)
    }
}

impl<R: Read> Read for BgzfReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        // Empty blocks (including the EOF marker) are skipped
        while self.position >= self.block.len() {
            if !self.read_block()? {
                return Ok(0);
            }
        }
        let available = &self.block[self.position..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.position += n;
        Ok(n)
    }
}

impl<R: Read + Seek> SeekableByteStream for BgzfReader<R> {
    fn seek_virtual(&mut self, offset: VirtualOffset) -> io::Result<()> {
        let coffset = offset.compressed_offset();
        let uoffset = offset.uncompressed_offset() as usize;

        if coffset != self.block_offset || self.block.is_empty() {
            self.inner.seek(SeekFrom::Start(coffset))?;
            self.next_block_offset = coffset;
            self.block.clear();
            self.position = 0;
            if !self.read_block()? && uoffset > 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("Virtual offset {} is past the end of the stream", offset),
                ));
            }
        }

        if uoffset > self.block.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "Virtual offset {} points past the end of a {}-byte block",
                    offset,
                    self.block.len()
                ),
            ));
        }
        self.position = uoffset;
        Ok(())
    }

    fn virtual_offset(&self) -> VirtualOffset {
        BgzfReader::virtual_offset(self)
    }
}

/// Locate the BSIZE value in a gzip extra field.
fn find_bsize(extra: &[u8]) -> Option<u16> {
    let mut pos = 0;
    while pos + 4 <= extra.len() {
        let si1 = extra[pos];
        let si2 = extra[pos + 1];
        let slen = u16::from_le_bytes([extra[pos + 2], extra[pos + 3]]) as usize;
        if si1 == b'B' && si2 == b'C' && slen == 2 && pos + 6 <= extra.len() {
            return Some(u16::from_le_bytes([extra[pos + 4], extra[pos + 5]]));
        }
        pos += 4 + slen;
    }
    None
}

/// Fill `buf` as far as the reader allows; returns the number of bytes read.
pub(crate) fn read_up_to<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
