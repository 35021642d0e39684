//! I/O module: BGZF transport and BAM decoding

pub mod bam;
pub mod bgzf;

pub use bam::BamReader;
pub use bgzf::{BgzfReader, SeekableByteStream, VirtualOffset};
