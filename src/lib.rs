//! bamfetch: streaming and indexed reader for BAM alignment files
//!
//! # Overview
//!
//! BAM files are sequences of binary alignment records compressed in BGZF
//! blocks. bamfetch decodes them in two ways:
//!
//! - **Streaming**: read every record in file order
//! - **Fetch**: use a BAI index to seek close to a genomic region, then
//!   scan forward and yield only the records overlapping it
//!
//! ## Quick Start
//!
//! ```no_run
//! use bamfetch::{BamReader, ChunkIndex};
//!
//! # fn main() -> bamfetch::Result<()> {
//! let mut bam = BamReader::from_path("alignments.bam")?;
//! let index = ChunkIndex::from_path("alignments.bam.bai")?;
//!
//! for record in bam.fetch(&index, 0, 25_000, 55_000)? {
//!     let record = record?;
//!     println!("{}\t{}\t{}", record.name, record.position, record.alignment_end());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Errors
//!
//! Every failure is returned as an [`Error`]; nothing is printed. Records
//! that end early report which field was being read, so a truncated file is
//! never mistaken for a clean end of stream.
//!
//! ## Logging
//!
//! Diagnostics go through the [`log`] facade (`debug` for header, index and
//! fetch planning, `trace` per block and per skipped record). Install any
//! logger to see them.
//!
//! ## Module Organization
//!
//! - [`io::bgzf`]: BGZF blocks and virtual offsets
//! - [`io::bam`]: header, records, index and reader
//! - [`error`]: error types

#![warn(rustdoc::missing_crate_level_docs)]

pub mod error;
pub mod io;

// Re-export commonly used types
pub use error::{Error, Result};
pub use io::bam::{BamReader, ChunkIndex, Fetch, FetchOptions, Header, Record};
pub use io::bgzf::{BgzfReader, SeekableByteStream, VirtualOffset};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
