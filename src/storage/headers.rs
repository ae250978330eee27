//! # File Header Definitions
//!
//! Type-safe, zerocopy-based headers for the two files of an index. Each
//! header carries magic bytes, a format version, and a CRC-32 over its
//! parameter block so that an index can never be opened with layout
//! parameters other than the ones it was created with.
//!
//! ## Tree File Layout
//!
//! ```text
//! Offset  Size  Description
//! 0       8     Magic: "bucktree"
//! 8       2     Format version
//! 10      2     Node capacity
//! 12      2     Key size in bytes
//! 14      2     Doc id size in bytes
//! 16      44    Reserved (zero)
//! 60      4     CRC-32 (Castagnoli) over bytes 0..60
//! 64      1     Root flag: b'l' (root is a leaf) or b'n' (root is a node)
//! 65      ...   Root page, then appended leaf/node pages
//! ```
//!
//! The root page always lives at [`DATA_START`]; the root flag alone decides
//! how its bytes are interpreted.
//!
//! All multi-byte fields are little-endian via zerocopy's `U16`/`U32` types,
//! so the structs can be read from and written to disk without any manual
//! field marshalling.

use crc::{Crc, CRC_32_ISCSI};
use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::error::{IndexError, Result};
use crate::format::TreeFormat;

pub const INDEX_MAGIC: &[u8; 8] = b"bucktree";
pub const VALUES_MAGIC: &[u8; 8] = b"buckstor";

pub const FORMAT_VERSION: u16 = 1;

pub const INDEX_HEADER_SIZE: usize = 64;
pub const VALUES_HEADER_SIZE: usize = 32;

/// File offset of the root flag byte.
pub const ROOT_FLAG_OFFSET: u32 = INDEX_HEADER_SIZE as u32;
/// File offset of the root page.
pub const DATA_START: u32 = ROOT_FLAG_OFFSET + 1;

const HEADER_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct IndexFileHeader {
    magic: [u8; 8],
    version: U16,
    node_capacity: U16,
    key_size: U16,
    doc_id_size: U16,
    reserved: [u8; 44],
    crc32: U32,
}

const _: () = assert!(std::mem::size_of::<IndexFileHeader>() == INDEX_HEADER_SIZE);

impl IndexFileHeader {
    pub fn new(format: &TreeFormat) -> Self {
        let mut header = Self {
            magic: *INDEX_MAGIC,
            version: U16::new(FORMAT_VERSION),
            node_capacity: U16::new(format.node_capacity() as u16),
            key_size: U16::new(format.key_size() as u16),
            doc_id_size: U16::new(format.doc_id_size() as u16),
            reserved: [0u8; 44],
            crc32: U32::new(0),
        };
        let crc = HEADER_CRC.checksum(&header.as_bytes()[..INDEX_HEADER_SIZE - 4]);
        header.crc32 = U32::new(crc);
        header
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < INDEX_HEADER_SIZE {
            return Err(IndexError::Corrupted(format!(
                "index header truncated: {} bytes",
                bytes.len()
            )));
        }
        let header = Self::read_from_bytes(&bytes[..INDEX_HEADER_SIZE])
            .map_err(|e| IndexError::Corrupted(format!("unreadable index header: {e:?}")))?;
        if &header.magic != INDEX_MAGIC {
            return Err(IndexError::Corrupted(
                "bad magic bytes in tree file".to_string(),
            ));
        }
        if header.version.get() != FORMAT_VERSION {
            return Err(IndexError::Corrupted(format!(
                "unsupported format version {} (expected {FORMAT_VERSION})",
                header.version.get()
            )));
        }
        let crc = HEADER_CRC.checksum(&bytes[..INDEX_HEADER_SIZE - 4]);
        if crc != header.crc32.get() {
            return Err(IndexError::Corrupted(format!(
                "index header checksum mismatch: stored {:08x}, computed {crc:08x}",
                header.crc32.get()
            )));
        }
        Ok(header)
    }

    /// Rebuilds the layout parameters recorded at creation time.
    pub fn tree_format(&self) -> Result<TreeFormat> {
        TreeFormat::new(
            self.key_size.get() as usize,
            self.doc_id_size.get() as usize,
            self.node_capacity.get() as usize,
        )
    }

    pub fn node_capacity(&self) -> u16 {
        self.node_capacity.get()
    }

    pub fn key_size(&self) -> u16 {
        self.key_size.get()
    }

    pub fn doc_id_size(&self) -> u16 {
        self.doc_id_size.get()
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct ValueFileHeader {
    magic: [u8; 8],
    version: U16,
    reserved: [u8; 18],
    crc32: U32,
}

const _: () = assert!(std::mem::size_of::<ValueFileHeader>() == VALUES_HEADER_SIZE);

impl ValueFileHeader {
    pub fn new() -> Self {
        let mut header = Self {
            magic: *VALUES_MAGIC,
            version: U16::new(FORMAT_VERSION),
            reserved: [0u8; 18],
            crc32: U32::new(0),
        };
        let crc = HEADER_CRC.checksum(&header.as_bytes()[..VALUES_HEADER_SIZE - 4]);
        header.crc32 = U32::new(crc);
        header
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < VALUES_HEADER_SIZE {
            return Err(IndexError::Corrupted(format!(
                "value store header truncated: {} bytes",
                bytes.len()
            )));
        }
        let header = Self::read_from_bytes(&bytes[..VALUES_HEADER_SIZE])
            .map_err(|e| IndexError::Corrupted(format!("unreadable value store header: {e:?}")))?;
        if &header.magic != VALUES_MAGIC {
            return Err(IndexError::Corrupted(
                "bad magic bytes in value store".to_string(),
            ));
        }
        if header.version.get() != FORMAT_VERSION {
            return Err(IndexError::Corrupted(format!(
                "unsupported value store version {}",
                header.version.get()
            )));
        }
        let crc = HEADER_CRC.checksum(&bytes[..VALUES_HEADER_SIZE - 4]);
        if crc != header.crc32.get() {
            return Err(IndexError::Corrupted(
                "value store header checksum mismatch".to_string(),
            ));
        }
        Ok(header)
    }
}

impl Default for ValueFileHeader {
    fn default() -> Self {
        Self::new()
    }
}
