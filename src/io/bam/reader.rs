//! BAM reader.
//!
//! Reads the header eagerly, then streams records sequentially or fetches
//! the records of a region through a BAI index.
//!
//! # Usage
//!
//! ```no_run
//! use bamfetch::io::bam::{BamReader, ChunkIndex};
//!
//! # fn main() -> bamfetch::Result<()> {
//! let mut bam = BamReader::from_path("alignments.bam")?;
//! let index = ChunkIndex::from_path("alignments.bam.bai")?;
//!
//! let chr1 = bam.header().reference_id("chr1").unwrap_or(0);
//! for result in bam.fetch(&index, chr1, 10_000, 20_000)? {
//!     let record = result?;
//!     println!("{} at {}", record.name, record.position);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Concurrency
//!
//! A reader owns one stream cursor. Sequential reads and fetches share it,
//! so a reader must not be used from several threads without external
//! locking, and starting a fetch abandons any sequential read in progress.

use super::fetch::{Fetch, FetchOptions};
use super::header::{read_header, Header};
use super::index::ChunkIndex;
use super::record::{read_record_into, Record, DEFAULT_BUFFER_SIZE};
use crate::error::Result;
use crate::io::bgzf::{BgzfReader, SeekableByteStream};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// BAM file reader.
///
/// `S` is the decompressed byte stream. [`BamReader::new`] wraps a BGZF
/// source, which also makes [`fetch`](BamReader::fetch) available.
///
/// # Buffer Reuse
///
/// Keeps one scratch buffer for raw record blocks. It grows to the largest
/// record seen and is never shrunk.
pub struct BamReader<S> {
    stream: S,
    header: Header,
    buffer: Vec<u8>,
}

impl<R: Read> BamReader<BgzfReader<R>> {
    /// Create a reader over BGZF-compressed BAM data.
    ///
    /// Reads and validates the header immediately.
    pub fn new(inner: R) -> Result<Self> {
        BamReader::new_uncompressed(BgzfReader::new(inner))
    }
}

impl BamReader<BgzfReader<BufReader<File>>> {
    /// Open a BAM file from a path.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Self::new(BufReader::new(file))
    }
}

impl<S: Read> BamReader<S> {
    /// Create a reader over an already-decompressed BAM byte stream.
    ///
    /// Plain readers can only be read sequentially; fetching needs a
    /// stream that implements [`SeekableByteStream`].
    pub fn new_uncompressed(mut stream: S) -> Result<Self> {
        let header = read_header(&mut stream)?;
        Ok(Self {
            stream,
            header,
            buffer: Vec::with_capacity(DEFAULT_BUFFER_SIZE),
        })
    }

    /// Get a reference to the BAM header.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Get a reference to the underlying stream.
    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    /// Unwrap the underlying stream.
    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Read the next record as a new value.
    ///
    /// Returns `Ok(None)` at a clean end of stream. A stream that ends
    /// inside a record is an error, never `None`.
    pub fn read_record(&mut self) -> Result<Option<Record>> {
        let mut record = Record::new();
        Ok(self.read_into(&mut record)?.then_some(record))
    }

    /// Read the next record into a caller-owned buffer.
    ///
    /// Returns `Ok(false)` at a clean end of stream. Every field of
    /// `record` is overwritten; its allocations are reused. After an error
    /// `record` is cleared.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use bamfetch::io::bam::{BamReader, Record};
    ///
    /// # fn main() -> bamfetch::Result<()> {
    /// let mut bam = BamReader::from_path("alignments.bam")?;
    /// let mut record = Record::new();
    /// let mut mapped = 0;
    /// while bam.read_into(&mut record)? {
    ///     if !record.is_unmapped() {
    ///         mapped += 1;
    ///     }
    /// }
    /// println!("{} mapped", mapped);
    /// # Ok(())
    /// # }
    /// ```
    pub fn read_into(&mut self, record: &mut Record) -> Result<bool> {
        read_record_into(
            &mut self.stream,
            &mut self.buffer,
            self.header.reference_count(),
            record,
        )
    }

    /// Iterate over the remaining records.
    pub fn records(&mut self) -> Records<'_, S> {
        Records {
            reader: self,
            failed: false,
        }
    }
}

impl<S: SeekableByteStream> BamReader<S> {
    /// Records overlapping `[begin, end)` on reference `ref_id`.
    ///
    /// Coordinates are 0-based. The returned iterator is lazy: the stream
    /// is only repositioned when it is first advanced, and not at all when
    /// the index has no chunks for the region.
    ///
    /// # Errors
    ///
    /// - `IndexReferenceOutOfRange` if the index does not cover `ref_id`
    /// - `InvalidRange` if `begin > end`
    ///
    /// Decode and transport errors surface through the iterator.
    pub fn fetch(
        &mut self,
        index: &ChunkIndex,
        ref_id: usize,
        begin: i32,
        end: i32,
    ) -> Result<Fetch<'_, S>> {
        self.fetch_with(index, ref_id, begin, end, &FetchOptions::default())
    }

    /// As [`fetch`](Self::fetch), with explicit options.
    pub fn fetch_with(
        &mut self,
        index: &ChunkIndex,
        ref_id: usize,
        begin: i32,
        end: i32,
        options: &FetchOptions,
    ) -> Result<Fetch<'_, S>> {
        let chunks = index.query_with(ref_id, begin, end, options)?;
        Ok(Fetch::new(
            &mut self.stream,
            &mut self.buffer,
            self.header.reference_count(),
            chunks,
            ref_id,
            begin,
            end,
            options,
        ))
    }
}

/// Iterator over BAM records.
///
/// Created by [`BamReader::records()`]. Stops after the first error.
pub struct Records<'a, S> {
    reader: &'a mut BamReader<S>,
    failed: bool,
}

impl<S: Read> Iterator for Records<'_, S> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.reader.read_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
