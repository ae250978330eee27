//! # Storage Layer
//!
//! Owns the two files backing an index and nothing above them:
//!
//! - `buckets`: the tree file - byte-addressed page reads and writes plus
//!   append-at-end allocation for pages created by splits
//! - `values`: the append-only value store addressed by `(start, size)`
//! - `headers`: zerocopy on-disk headers with CRC-protected layout parameters
//!
//! The storage layer knows offsets and bytes; interpreting page contents is
//! the tree engine's job. Both files use absolute u32 offsets (the on-disk
//! pointer width), which caps an index at 4 GiB per file.

mod buckets;
mod headers;
mod values;

pub use buckets::BucketsFile;
pub use headers::{
    IndexFileHeader, ValueFileHeader, DATA_START, FORMAT_VERSION, INDEX_HEADER_SIZE, INDEX_MAGIC,
    ROOT_FLAG_OFFSET, VALUES_HEADER_SIZE, VALUES_MAGIC,
};
pub use values::ValueStorage;
