//! BAM (Binary Alignment Map) reading.
//!
//! - [`header`]: magic, SAM text, reference dictionary, `@RG`/`@PG` records
//! - [`record`]: record layout and the block decoder
//! - [`cigar`], [`sequence`], [`tags`]: decoders for the packed sub-fields
//! - [`index`]: BAI parsing and region to chunk queries
//! - [`fetch`]: the filtered region scan
//! - [`reader`]: [`BamReader`], tying the pieces to a byte stream
//!
//! # Example
//!
//! ```no_run
//! use bamfetch::io::bam::BamReader;
//!
//! # fn main() -> bamfetch::Result<()> {
//! let mut bam = BamReader::from_path("alignments.bam")?;
//! let header = bam.header().clone();
//! println!("Header: {} references", header.reference_count());
//!
//! for record in bam.records() {
//!     let record = record?;
//!     if let Some(id) = record.reference_id {
//!         let name = header.reference_name(id).unwrap_or("*");
//!         println!("{} {}:{}", record.name, name, record.position);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod cigar;
pub mod fetch;
pub mod header;
pub mod index;
pub mod reader;
pub mod record;
pub mod sequence;
pub mod tags;

pub use cigar::{parse_cigar, parse_cigar_into, CigarKind, CigarOp};
pub use fetch::{Fetch, FetchOptions};
pub use header::{Header, Program, ReadGroup, Reference};
pub use index::{reg2bins, Bin, Chunk, ChunkIndex, ReferenceIndex};
pub use reader::{BamReader, Records};
pub use record::{decode_record, Record};
pub use sequence::{base_at, decode_sequence, Sequence};
pub use tags::{parse_tags, ArrayValue, Tag, TagValue, Tags};
