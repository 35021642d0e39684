//! Indexed region fetching.
//!
//! A fetch seeks to the first chunk the index returns for a region, then
//! decodes records sequentially and filters them against the region. BAM
//! files sorted by coordinate are ordered by reference id then position, so
//! the first record starting at or past the region end ends the scan.
//!
//! ```text
//! Seeking --seek--> Scanning --past region / end of stream--> Done
//!    |                  |
//!    +--no chunks-------+------------------------------------> Done
//!    +--error-----------+------------------------------------> Failed
//! ```

use super::index::Chunk;
use super::record::{read_record_into, Record};
use crate::error::{Error, Result};
use crate::io::bgzf::SeekableByteStream;
use log::{debug, trace};
use std::cmp::Ordering;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

/// Options for chunk planning and scanning.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Merge overlapping or adjacent chunks (default true)
    pub merge_chunks: bool,
    /// Drop chunks that end before the linear index bound (default true)
    pub linear_index: bool,
    /// Checked once per scanned record; setting it ends the fetch with
    /// [`Error::Cancelled`]
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            merge_chunks: true,
            linear_index: true,
            cancel: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Seeking,
    Scanning,
    Done,
    Failed,
}

/// What to do with one decoded record.
#[derive(Debug, PartialEq, Eq)]
enum Verdict {
    Skip,
    Emit,
    Stop,
}

/// Lazy sequence of records overlapping `[begin, end)` on one reference.
///
/// Created by [`BamReader::fetch`](super::BamReader::fetch). Yields
/// `Result<Record>`; after the first error it yields nothing more.
///
/// Holds the reader's stream for its lifetime. Any sequential read position
/// on that reader is lost once the fetch starts.
pub struct Fetch<'r, S> {
    stream: &'r mut S,
    buf: &'r mut Vec<u8>,
    reference_count: usize,
    chunks: Vec<Chunk>,
    ref_id: usize,
    begin: i32,
    end: i32,
    cancel: Option<Arc<AtomicBool>>,
    state: State,
}

impl<'r, S: SeekableByteStream> Fetch<'r, S> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        stream: &'r mut S,
        buf: &'r mut Vec<u8>,
        reference_count: usize,
        chunks: Vec<Chunk>,
        ref_id: usize,
        begin: i32,
        end: i32,
        options: &FetchOptions,
    ) -> Self {
        debug!(
            "fetch ref {} [{}, {}): {} chunks",
            ref_id,
            begin,
            end,
            chunks.len()
        );
        let state = if chunks.is_empty() {
            State::Done
        } else {
            State::Seeking
        };
        Self {
            stream,
            buf,
            reference_count,
            chunks,
            ref_id,
            begin,
            end,
            cancel: options.cancel.clone(),
            state,
        }
    }

    /// Chunks planned for this fetch, in visiting order.
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Whether the fetch has finished, successfully or not.
    pub fn is_finished(&self) -> bool {
        matches!(self.state, State::Done | State::Failed)
    }

    /// Decode the next overlapping record into `record`.
    ///
    /// Returns `Ok(false)` once the region is exhausted. `record` is
    /// overwritten by every scanned record, including skipped ones.
    pub fn next_into(&mut self, record: &mut Record) -> Result<bool> {
        match self.advance(record) {
            Ok(found) => Ok(found),
            Err(e) => {
                self.state = State::Failed;
                Err(e)
            }
        }
    }

    fn advance(&mut self, record: &mut Record) -> Result<bool> {
        loop {
            match self.state {
                State::Done | State::Failed => return Ok(false),
                State::Seeking => {
                    let start = self.chunks[0].start;
                    debug!("fetch seeking to {}", start);
                    self.stream.seek_virtual(start)?;
                    self.state = State::Scanning;
                }
                State::Scanning => {
                    if self
                        .cancel
                        .as_ref()
                        .is_some_and(|flag| flag.load(AtomicOrdering::Relaxed))
                    {
                        return Err(Error::Cancelled);
                    }
                    if !read_record_into(self.stream, self.buf, self.reference_count, record)? {
                        debug!("fetch done: end of stream");
                        self.state = State::Done;
                        return Ok(false);
                    }
                    match self.classify(record) {
                        Verdict::Emit => return Ok(true),
                        Verdict::Skip => {
                            trace!("fetch skipped {} at {}", record.name, record.position);
                        }
                        Verdict::Stop => {
                            debug!(
                                "fetch done: {} at {} is past the region",
                                record.name, record.position
                            );
                            self.state = State::Done;
                            return Ok(false);
                        }
                    }
                }
            }
        }
    }

    fn classify(&self, record: &Record) -> Verdict {
        // Unplaced records compare as reference -1
        let reference = record.reference_id.map_or(-1, |id| id as i64);
        match reference.cmp(&(self.ref_id as i64)) {
            Ordering::Less => Verdict::Skip,
            Ordering::Greater => Verdict::Stop,
            Ordering::Equal if record.position >= self.end => Verdict::Stop,
            Ordering::Equal if record.alignment_end() <= i64::from(self.begin) => Verdict::Skip,
            Ordering::Equal => Verdict::Emit,
        }
    }
}

impl<S: SeekableByteStream> Iterator for Fetch<'_, S> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut record = Record::new();
        match self.next_into(&mut record) {
            Ok(true) => Some(Ok(record)),
            Ok(false) => None,
            Err(e) => Some(Err(e)),
        }
    }
}
