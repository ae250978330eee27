//! # Interior Node Operations
//!
//! Node pages interleave child pointers and separator keys,
//! `p0 k0 p1 k1 p2 ...`: every key in the subtree reached through the
//! pointer left of `k` is `<= k`. A probe of entry `i` therefore reads the
//! pointer on each side of key `i` in one go.
//!
//! ## Duplicate-Key Tie-Breaks
//!
//! With duplicate keys in the tree a separator can equal the search key, and
//! matching records may live on both sides of it. The two search modes pick
//! the child deterministically: first-occurrence mode descends left of the
//! first equal separator, last-occurrence mode right of the last one. Get
//! and ascending scans use the former, inserts and descending scans the
//! latter - which is what keeps equal keys in insertion order.
//!
//! ## Separator Insertion
//!
//! After a child split, the entry index remembered during the descent says
//! where the separator belongs: before that entry if the split child hung on
//! its left pointer, after it otherwise. A full node splits with the same
//! staged-merge math as a leaf, except that the middle entry is not copied
//! into either half - its key moves up to the parent and its pointer becomes
//! the new node's leftmost child.

use bumpalo::collections::Vec as BumpVec;
use bumpalo::Bump;

use super::tree::{IndexStack, PathStack, TreeIndex};
use crate::error::{IndexError, Result};
use crate::format::{COUNTER_SIZE, FLAG_SIZE, POINTER_SIZE};
use crate::record::{decode_node_probe, encode_node_page, NodeKind, NodeProbe};
use crate::storage::DATA_START;

impl TreeIndex {
    pub(crate) fn read_node_meta(&mut self, node: u32) -> Result<(u16, NodeKind)> {
        if let Some(meta) = self.caches.node_meta.get(node) {
            return Ok(meta);
        }
        let mut buf = [0u8; COUNTER_SIZE + FLAG_SIZE];
        self.buckets.read_at(node, &mut buf)?;
        let count = u16::from_le_bytes([buf[0], buf[1]]);
        let kind = NodeKind::from_byte(buf[2])?;
        self.caches.node_meta.insert(node, (count, kind));
        Ok((count, kind))
    }

    pub(crate) fn read_node_probe(&mut self, node: u32, entry: usize) -> Result<NodeProbe> {
        let sub = entry as u16;
        if let Some(probe) = self.caches.node_probe.get(node, &sub) {
            return Ok(probe);
        }
        let mut buf = vec![0u8; 2 * POINTER_SIZE + self.format.key_size()];
        self.buckets
            .read_at(self.format.node_probe_offset(node, entry), &mut buf)?;
        let probe = decode_node_probe(&self.format, &buf)?;
        self.caches.node_probe.insert(node, sub, probe.clone());
        Ok(probe)
    }

    fn write_node_len(&mut self, node: u32, count: u16) -> Result<()> {
        self.buckets.write_at(node, &count.to_le_bytes())?;
        self.caches.invalidate(node);
        Ok(())
    }

    /// First entry whose key is `>= key`, or `count` if none.
    fn node_lower_bound(&mut self, node: u32, key: &[u8], count: u16) -> Result<usize> {
        let (mut lo, mut hi) = (0usize, count as usize);
        while lo < hi {
            let mid = (lo + hi) / 2;
            let probe = self.read_node_probe(node, mid)?;
            if probe.key.as_ref() < key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo)
    }

    /// First entry whose key is `> key`, or `count` if none.
    fn node_upper_bound(&mut self, node: u32, key: &[u8], count: u16) -> Result<usize> {
        let (mut lo, mut hi) = (0usize, count as usize);
        while lo < hi {
            let mid = (lo + hi) / 2;
            let probe = self.read_node_probe(node, mid)?;
            if probe.key.as_ref() <= key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo)
    }

    /// Child to descend into for the first occurrence of `key`: left of the
    /// first equal-or-greater separator, right only when every separator is
    /// smaller. Returns the entry index alongside the pointer.
    pub(crate) fn find_first_occurrence(
        &mut self,
        node: u32,
        key: &[u8],
        count: u16,
    ) -> Result<(usize, u32)> {
        let sub: Box<[u8]> = key.into();
        if let Some(hit) = self.caches.node_first.get(node, &sub) {
            return Ok(hit);
        }
        let lower = self.node_lower_bound(node, key, count)?;
        let entry = lower.min((count as usize).saturating_sub(1));
        let probe = self.read_node_probe(node, entry)?;
        let pointer = if probe.key.as_ref() < key {
            probe.right
        } else {
            probe.left
        };
        self.caches.node_first.insert(node, sub, (entry, pointer));
        Ok((entry, pointer))
    }

    /// Child to descend into for the last occurrence of `key`: right of the
    /// last equal-or-smaller separator, left only when every separator is
    /// greater.
    pub(crate) fn find_last_occurrence(
        &mut self,
        node: u32,
        key: &[u8],
        count: u16,
    ) -> Result<(usize, u32)> {
        let sub: Box<[u8]> = key.into();
        if let Some(hit) = self.caches.node_last.get(node, &sub) {
            return Ok(hit);
        }
        let upper = self.node_upper_bound(node, key, count)?;
        let entry = upper.saturating_sub(1);
        let probe = self.read_node_probe(node, entry)?;
        let pointer = if probe.key.as_ref() > key {
            probe.left
        } else {
            probe.right
        };
        self.caches.node_last.insert(node, sub, (entry, pointer));
        Ok((entry, pointer))
    }

    /// Inserts the separator produced by a child split into `node`,
    /// recursing upward when the node itself is full.
    pub(crate) fn insert_separator(
        &mut self,
        node: u32,
        separator: Box<[u8]>,
        old_half: u32,
        new_half: u32,
        ancestors: &mut PathStack,
        indexes: &mut IndexStack,
    ) -> Result<()> {
        let Some(entry_index) = indexes.pop() else {
            return Err(IndexError::Corrupted(
                "descent stack exhausted during split propagation".to_string(),
            ));
        };
        let (count, kind) = self.read_node_meta(node)?;
        let probe = self.read_node_probe(node, entry_index)?;
        let position = if probe.left == old_half {
            entry_index
        } else {
            entry_index + 1
        };

        if (count as usize) < self.format.node_capacity() {
            return self.insert_node_entry(node, position, count, &separator, new_half);
        }
        match ancestors.pop() {
            None => self.split_root_node(position, &separator, new_half, kind),
            Some(parent) => {
                let (new_node, moved) = self.split_node(node, position, &separator, new_half, kind)?;
                self.insert_separator(parent, moved, node, new_node, ancestors, indexes)
            }
        }
    }

    fn insert_node_entry(
        &mut self,
        node: u32,
        position: usize,
        count: u16,
        key: &[u8],
        right: u32,
    ) -> Result<()> {
        let entry_size = self.format.node_entry_size();
        let rewrite = count as usize - position;
        let mut packed = Vec::with_capacity((rewrite + 1) * entry_size);
        packed.extend_from_slice(key);
        packed.extend_from_slice(&right.to_le_bytes());
        if rewrite > 0 {
            let mut tail = vec![0u8; rewrite * entry_size];
            self.buckets
                .read_at(self.format.node_entry_offset(node, position), &mut tail)?;
            packed.extend_from_slice(&tail);
        }
        self.write_node_len(node, count + 1)?;
        self.buckets
            .write_at(self.format.node_entry_offset(node, position), &packed)?;
        self.caches.invalidate(node);
        self.buckets.flush()
    }

    /// Splits a full non-root node and returns the appended half plus the
    /// entry key that moves up to the parent.
    fn split_node(
        &mut self,
        node: u32,
        position: usize,
        key: &[u8],
        right: u32,
        kind: NodeKind,
    ) -> Result<(u32, Box<[u8]>)> {
        let arena = Bump::new();
        let (_leftmost, merged) = self.stage_node_entries(node, position, key, right, &arena)?;

        let (old_size, new_size) = self.format.node_split_sizes();
        let entry_size = self.format.node_entry_size();
        let key_size = self.format.key_size();
        let separator_at = old_size * entry_size;
        let separator: Box<[u8]> = merged[separator_at..separator_at + key_size].into();
        let separator_right = u32::from_le_bytes(
            merged[separator_at + key_size..separator_at + entry_size]
                .try_into()
                .unwrap(),
        );

        let new_page = encode_node_page(
            &self.format,
            new_size as u16,
            kind,
            separator_right,
            &merged[separator_at + entry_size..],
        );
        let new_node = self.buckets.append(&new_page)?;
        self.caches.invalidate(new_node);

        self.write_node_len(node, old_size as u16)?;
        let split_at = position * entry_size;
        if split_at < separator_at {
            self.buckets.write_at(
                self.format.node_entry_offset(node, position),
                &merged[split_at..separator_at],
            )?;
        }
        self.caches.invalidate(node);
        Ok((new_node, separator))
    }

    /// Splits the full root node: both halves are appended at end-of-file
    /// and the root page is rewritten in place with the single middle entry.
    fn split_root_node(
        &mut self,
        position: usize,
        key: &[u8],
        right: u32,
        kind: NodeKind,
    ) -> Result<()> {
        let arena = Bump::new();
        let (leftmost, merged) =
            self.stage_node_entries(DATA_START, position, key, right, &arena)?;

        let (old_size, new_size) = self.format.node_split_sizes();
        let entry_size = self.format.node_entry_size();
        let key_size = self.format.key_size();
        let separator_at = old_size * entry_size;
        let separator = &merged[separator_at..separator_at + key_size];
        let separator_right = u32::from_le_bytes(
            merged[separator_at + key_size..separator_at + entry_size]
                .try_into()
                .unwrap(),
        );

        let left_page = encode_node_page(
            &self.format,
            old_size as u16,
            kind,
            leftmost,
            &merged[..separator_at],
        );
        let right_page = encode_node_page(
            &self.format,
            new_size as u16,
            kind,
            separator_right,
            &merged[separator_at + entry_size..],
        );
        let left_start = self.buckets.append(&left_page)?;
        let right_start = self.buckets.append(&right_page)?;
        self.caches.invalidate(left_start);
        self.caches.invalidate(right_start);

        let mut root_entry = Vec::with_capacity(entry_size);
        root_entry.extend_from_slice(separator);
        root_entry.extend_from_slice(&right_start.to_le_bytes());
        let root_page = encode_node_page(&self.format, 1, NodeKind::Node, left_start, &root_entry);
        self.buckets.write_at(DATA_START, &root_page)?;
        self.caches.invalidate(DATA_START);
        self.buckets.flush()
    }

    /// Reads a full node and stages its entries with `(key, right)` spliced
    /// in at `position`. Returns the node's leftmost pointer and the merged
    /// entry bytes, allocated in `arena`.
    fn stage_node_entries<'a>(
        &mut self,
        node: u32,
        position: usize,
        key: &[u8],
        right: u32,
        arena: &'a Bump,
    ) -> Result<(u32, BumpVec<'a, u8>)> {
        let capacity = self.format.node_capacity();
        let entry_size = self.format.node_entry_size();
        let region_len = POINTER_SIZE + capacity * entry_size;

        let mut region = BumpVec::with_capacity_in(region_len, arena);
        region.resize(region_len, 0);
        self.buckets
            .read_at(node + self.format.node_header_size() as u32, &mut region)?;
        let leftmost = u32::from_le_bytes(region[..POINTER_SIZE].try_into().unwrap());
        let entries = &region[POINTER_SIZE..];

        let split_at = position * entry_size;
        let mut merged = BumpVec::with_capacity_in((capacity + 1) * entry_size, arena);
        merged.extend_from_slice(&entries[..split_at]);
        merged.extend_from_slice(key);
        merged.extend_from_slice(&right.to_le_bytes());
        merged.extend_from_slice(&entries[split_at..]);
        Ok((leftmost, merged))
    }
}
