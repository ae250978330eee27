//! # Record Codec
//!
//! Fixed-width binary encoding of the two record shapes stored in tree pages:
//!
//! ```text
//! Leaf record:  key | doc_id | start u32 | size u32 | status u8
//! Node probe:   left u32 | key | right u32     (read view, overlapping)
//! Node entry:   key | right u32                (write view)
//! ```
//!
//! A node page interleaves pointers and keys as `p0 k0 p1 k1 p2 ...`; a probe
//! at entry `i` reads the pointer on each side of key `i`, while entry writes
//! address the `(key, right pointer)` pairs that start after the leftmost
//! pointer. Encode and decode must round-trip exactly for every value that
//! fits the configured widths.

use crate::error::{IndexError, Result};
use crate::format::{TreeFormat, FLAG_SIZE, POINTER_SIZE};

/// Lifecycle flag of a leaf record. Deleted records are tombstones: invisible
/// to every read path, reclaimed only by a later split or compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordStatus {
    Live,
    Deleted,
}

impl RecordStatus {
    pub const fn as_byte(self) -> u8 {
        match self {
            RecordStatus::Live => b'o',
            RecordStatus::Deleted => b'd',
        }
    }

    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            b'o' => Ok(RecordStatus::Live),
            b'd' => Ok(RecordStatus::Deleted),
            other => Err(IndexError::Corrupted(format!(
                "invalid record status byte 0x{other:02x}"
            ))),
        }
    }

    pub fn is_live(self) -> bool {
        matches!(self, RecordStatus::Live)
    }
}

/// Whether a node's children are leaves or further nodes. The same flag
/// domain describes the root page itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Leaf,
    Node,
}

impl NodeKind {
    pub const fn as_byte(self) -> u8 {
        match self {
            NodeKind::Leaf => b'l',
            NodeKind::Node => b'n',
        }
    }

    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            b'l' => Ok(NodeKind::Leaf),
            b'n' => Ok(NodeKind::Node),
            other => Err(IndexError::Corrupted(format!(
                "invalid node kind byte 0x{other:02x}"
            ))),
        }
    }
}

/// One leaf record: the unit stored in leaves and yielded by every query.
/// `key` and `doc_id` always carry the full configured width.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: Box<[u8]>,
    pub doc_id: Box<[u8]>,
    pub start: u32,
    pub size: u32,
    pub status: RecordStatus,
}

/// One (key, right child) entry of a node page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeEntry {
    pub key: Box<[u8]>,
    pub right: u32,
}

/// Read view of entry `i` together with the child pointers on both sides of
/// its key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeProbe {
    pub left: u32,
    pub key: Box<[u8]>,
    pub right: u32,
}

pub fn encode_leaf_record(fmt: &TreeFormat, record: &Record, out: &mut Vec<u8>) {
    debug_assert_eq!(record.key.len(), fmt.key_size());
    debug_assert_eq!(record.doc_id.len(), fmt.doc_id_size());
    out.extend_from_slice(&record.key);
    out.extend_from_slice(&record.doc_id);
    out.extend_from_slice(&record.start.to_le_bytes());
    out.extend_from_slice(&record.size.to_le_bytes());
    out.push(record.status.as_byte());
}

pub fn decode_leaf_record(fmt: &TreeFormat, bytes: &[u8]) -> Result<Record> {
    if bytes.len() != fmt.leaf_record_size() {
        return Err(IndexError::Corrupted(format!(
            "leaf record of {} bytes, expected {}",
            bytes.len(),
            fmt.leaf_record_size()
        )));
    }
    let ks = fmt.key_size();
    let ds = fmt.doc_id_size();
    let start = u32::from_le_bytes(bytes[ks + ds..ks + ds + 4].try_into().unwrap());
    let size = u32::from_le_bytes(bytes[ks + ds + 4..ks + ds + 8].try_into().unwrap());
    Ok(Record {
        key: bytes[..ks].into(),
        doc_id: bytes[ks..ks + ds].into(),
        start,
        size,
        status: RecordStatus::from_byte(bytes[ks + ds + 8])?,
    })
}

pub fn encode_node_entry(fmt: &TreeFormat, entry: &NodeEntry, out: &mut Vec<u8>) {
    debug_assert_eq!(entry.key.len(), fmt.key_size());
    out.extend_from_slice(&entry.key);
    out.extend_from_slice(&entry.right.to_le_bytes());
}

pub fn decode_node_probe(fmt: &TreeFormat, bytes: &[u8]) -> Result<NodeProbe> {
    let expected = 2 * POINTER_SIZE + fmt.key_size();
    if bytes.len() != expected {
        return Err(IndexError::Corrupted(format!(
            "node probe of {} bytes, expected {expected}",
            bytes.len()
        )));
    }
    let ks = fmt.key_size();
    Ok(NodeProbe {
        left: u32::from_le_bytes(bytes[..4].try_into().unwrap()),
        key: bytes[4..4 + ks].into(),
        right: u32::from_le_bytes(bytes[4 + ks..].try_into().unwrap()),
    })
}

/// Builds a complete leaf page image from raw record bytes, zero-padding the
/// unused slots.
pub fn encode_leaf_page(
    fmt: &TreeFormat,
    count: u16,
    prev: u32,
    next: u32,
    record_bytes: &[u8],
) -> Vec<u8> {
    debug_assert_eq!(record_bytes.len() % fmt.leaf_record_size(), 0);
    let mut page = Vec::with_capacity(fmt.leaf_size());
    page.extend_from_slice(&count.to_le_bytes());
    page.extend_from_slice(&prev.to_le_bytes());
    page.extend_from_slice(&next.to_le_bytes());
    page.extend_from_slice(record_bytes);
    page.resize(fmt.leaf_size(), 0);
    page
}

/// Builds a complete node page image from raw entry bytes, zero-padding the
/// unused slots.
pub fn encode_node_page(
    fmt: &TreeFormat,
    count: u16,
    kind: NodeKind,
    leftmost: u32,
    entry_bytes: &[u8],
) -> Vec<u8> {
    debug_assert_eq!(entry_bytes.len() % fmt.node_entry_size(), 0);
    let mut page = Vec::with_capacity(fmt.node_size());
    page.extend_from_slice(&count.to_le_bytes());
    page.push(kind.as_byte());
    page.extend_from_slice(&leftmost.to_le_bytes());
    page.extend_from_slice(entry_bytes);
    page.resize(fmt.node_size(), 0);
    page
}

/// Offset of the status byte within an encoded leaf record.
pub fn status_offset(fmt: &TreeFormat) -> usize {
    fmt.leaf_record_size() - FLAG_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt() -> TreeFormat {
        TreeFormat::new(8, 8, 4).unwrap()
    }

    fn record(key: &[u8], doc_id: &[u8], start: u32, size: u32, status: RecordStatus) -> Record {
        let fmt = fmt();
        Record {
            key: fmt.normalize_key(key).unwrap(),
            doc_id: fmt.normalize_doc_id(doc_id).unwrap(),
            start,
            size,
            status,
        }
    }

    #[test]
    fn leaf_record_round_trips() {
        let fmt = fmt();
        let original = record(b"key-a", b"doc-1", 77, 1024, RecordStatus::Live);

        let mut bytes = Vec::new();
        encode_leaf_record(&fmt, &original, &mut bytes);
        assert_eq!(bytes.len(), fmt.leaf_record_size());

        assert_eq!(decode_leaf_record(&fmt, &bytes).unwrap(), original);
    }

    #[test]
    fn tombstone_round_trips() {
        let fmt = fmt();
        let original = record(b"gone", b"doc-2", 0, 0, RecordStatus::Deleted);

        let mut bytes = Vec::new();
        encode_leaf_record(&fmt, &original, &mut bytes);
        assert_eq!(bytes[status_offset(&fmt)], b'd');
        assert_eq!(decode_leaf_record(&fmt, &bytes).unwrap(), original);
    }

    #[test]
    fn extreme_field_values_round_trip() {
        let fmt = fmt();
        let original = record(
            &[0xff; 8],
            &[0x00; 8],
            u32::MAX,
            u32::MAX,
            RecordStatus::Live,
        );

        let mut bytes = Vec::new();
        encode_leaf_record(&fmt, &original, &mut bytes);
        assert_eq!(decode_leaf_record(&fmt, &bytes).unwrap(), original);
    }

    #[test]
    fn invalid_status_byte_is_corruption() {
        let fmt = fmt();
        let mut bytes = Vec::new();
        encode_leaf_record(
            &fmt,
            &record(b"k", b"d", 1, 2, RecordStatus::Live),
            &mut bytes,
        );
        let off = status_offset(&fmt);
        bytes[off] = b'x';

        assert!(matches!(
            decode_leaf_record(&fmt, &bytes),
            Err(IndexError::Corrupted(_))
        ));
    }

    #[test]
    fn node_probe_decodes_both_pointers() {
        let fmt = fmt();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&17u32.to_le_bytes());
        bytes.extend_from_slice(b"separato");
        bytes.extend_from_slice(&99u32.to_le_bytes());

        let probe = decode_node_probe(&fmt, &bytes).unwrap();
        assert_eq!(probe.left, 17);
        assert_eq!(probe.key.as_ref(), b"separato");
        assert_eq!(probe.right, 99);
    }

    #[test]
    fn leaf_page_image_is_padded_to_page_size() {
        let fmt = fmt();
        let mut record_bytes = Vec::new();
        encode_leaf_record(
            &fmt,
            &record(b"a", b"1", 0, 0, RecordStatus::Live),
            &mut record_bytes,
        );
        let page = encode_leaf_page(&fmt, 1, 0, 4096, &record_bytes);

        assert_eq!(page.len(), fmt.leaf_size());
        assert_eq!(u16::from_le_bytes(page[..2].try_into().unwrap()), 1);
        assert_eq!(u32::from_le_bytes(page[2..6].try_into().unwrap()), 0);
        assert_eq!(u32::from_le_bytes(page[6..10].try_into().unwrap()), 4096);
    }

    #[test]
    fn node_page_image_carries_kind_and_leftmost() {
        let fmt = fmt();
        let mut entries = Vec::new();
        encode_node_entry(
            &fmt,
            &NodeEntry {
                key: fmt.normalize_key(b"mid").unwrap(),
                right: 555,
            },
            &mut entries,
        );
        let page = encode_node_page(&fmt, 1, NodeKind::Leaf, 222, &entries);

        assert_eq!(page.len(), fmt.node_size());
        assert_eq!(page[2], b'l');
        assert_eq!(u32::from_le_bytes(page[3..7].try_into().unwrap()), 222);
    }
}
