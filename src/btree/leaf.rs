//! # Leaf Page Operations
//!
//! Everything that reads or mutates a single leaf page: typed accessors for
//! the header fields and records, the binary searches behind lookups and
//! placement, and the leaf split.
//!
//! ## Invariants
//!
//! - Records are key-ascending within a leaf; duplicate keys appear in
//!   insertion order, so an insert always lands after its equals
//!   (upper-bound placement).
//! - Tombstones keep their slot and their position in the order until a
//!   shift rewrite, a split, or compaction removes them; every search
//!   skips them by walking forward along the duplicate-key run, across the
//!   next pointer if needed.
//! - Neighbour pointers always reference valid leaf offsets, 0 at the ends.
//!
//! ## Cache Discipline
//!
//! Reads go through the decode caches; every write helper here invalidates
//! the touched page before returning, so the engine above never has to
//! remember to. Stale cache entries after a write would corrupt searches,
//! not just slow them down.

use bumpalo::collections::Vec as BumpVec;
use bumpalo::Bump;

use super::tree::TreeIndex;
use crate::error::{IndexError, Result};
use crate::format::{COUNTER_SIZE, POINTER_SIZE};
use crate::record::{
    decode_leaf_record, encode_leaf_page, encode_leaf_record, encode_node_page, status_offset,
    NodeKind, Record, RecordStatus,
};
use crate::storage::{DATA_START, ROOT_FLAG_OFFSET};

/// Where an insert lands in a leaf, as computed by `find_place_in_leaf`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Placement {
    /// Slot the new record occupies.
    pub index: usize,
    /// The slot holds a tombstone that is overwritten in place; the element
    /// count does not change.
    pub on_deleted: bool,
    /// The leaf is at capacity with no reclaimable slot at the insertion
    /// boundary.
    pub needs_split: bool,
}

impl TreeIndex {
    pub(crate) fn read_leaf_len(&mut self, leaf: u32) -> Result<u16> {
        if let Some(count) = self.caches.leaf_len.get(leaf) {
            return Ok(count);
        }
        let mut buf = [0u8; COUNTER_SIZE];
        self.buckets.read_at(leaf, &mut buf)?;
        let count = u16::from_le_bytes(buf);
        self.caches.leaf_len.insert(leaf, count);
        Ok(count)
    }

    pub(crate) fn read_leaf_neighbours(&mut self, leaf: u32) -> Result<(u32, u32)> {
        if let Some(neighbours) = self.caches.leaf_neighbours.get(leaf) {
            return Ok(neighbours);
        }
        let mut buf = [0u8; 2 * POINTER_SIZE];
        self.buckets.read_at(leaf + COUNTER_SIZE as u32, &mut buf)?;
        let prev = u32::from_le_bytes(buf[..4].try_into().unwrap());
        let next = u32::from_le_bytes(buf[4..].try_into().unwrap());
        self.caches.leaf_neighbours.insert(leaf, (prev, next));
        Ok((prev, next))
    }

    pub(crate) fn read_leaf_meta(&mut self, leaf: u32) -> Result<(u16, u32, u32)> {
        if let Some(meta) = self.caches.leaf_meta.get(leaf) {
            return Ok(meta);
        }
        let mut buf = [0u8; COUNTER_SIZE + 2 * POINTER_SIZE];
        self.buckets.read_at(leaf, &mut buf)?;
        let meta = (
            u16::from_le_bytes(buf[..2].try_into().unwrap()),
            u32::from_le_bytes(buf[2..6].try_into().unwrap()),
            u32::from_le_bytes(buf[6..10].try_into().unwrap()),
        );
        self.caches.leaf_meta.insert(leaf, meta);
        Ok(meta)
    }

    pub(crate) fn read_leaf_record(&mut self, leaf: u32, slot: usize) -> Result<Record> {
        let sub = slot as u16;
        if let Some(record) = self.caches.leaf_record.get(leaf, &sub) {
            return Ok(record);
        }
        let mut buf = vec![0u8; self.format.leaf_record_size()];
        self.buckets
            .read_at(self.format.leaf_record_offset(leaf, slot), &mut buf)?;
        let record = decode_leaf_record(&self.format, &buf)?;
        self.caches.leaf_record.insert(leaf, sub, record.clone());
        Ok(record)
    }

    pub(crate) fn write_leaf_len(&mut self, leaf: u32, count: u16) -> Result<()> {
        self.buckets.write_at(leaf, &count.to_le_bytes())?;
        self.caches.invalidate(leaf);
        Ok(())
    }

    pub(crate) fn write_leaf_header(
        &mut self,
        leaf: u32,
        count: u16,
        prev: u32,
        next: u32,
    ) -> Result<()> {
        let mut buf = [0u8; COUNTER_SIZE + 2 * POINTER_SIZE];
        buf[..2].copy_from_slice(&count.to_le_bytes());
        buf[2..6].copy_from_slice(&prev.to_le_bytes());
        buf[6..10].copy_from_slice(&next.to_le_bytes());
        self.buckets.write_at(leaf, &buf)?;
        self.caches.invalidate(leaf);
        Ok(())
    }

    pub(crate) fn write_leaf_prev(&mut self, leaf: u32, prev: u32) -> Result<()> {
        self.buckets
            .write_at(leaf + COUNTER_SIZE as u32, &prev.to_le_bytes())?;
        self.caches.invalidate(leaf);
        Ok(())
    }

    pub(crate) fn write_leaf_record(&mut self, leaf: u32, slot: usize, record: &Record) -> Result<()> {
        let mut buf = Vec::with_capacity(self.format.leaf_record_size());
        encode_leaf_record(&self.format, record, &mut buf);
        self.buckets
            .write_at(self.format.leaf_record_offset(leaf, slot), &buf)?;
        self.caches.invalidate(leaf);
        Ok(())
    }

    /// Writes pre-encoded records contiguously from `slot` on.
    pub(crate) fn write_leaf_tail_raw(&mut self, leaf: u32, slot: usize, bytes: &[u8]) -> Result<()> {
        self.buckets
            .write_at(self.format.leaf_record_offset(leaf, slot), bytes)?;
        self.caches.invalidate(leaf);
        Ok(())
    }

    /// Rewrites only the meta fields of a record, leaving its key alone.
    pub(crate) fn write_leaf_meta_fields(
        &mut self,
        leaf: u32,
        slot: usize,
        doc_id: &[u8],
        start: u32,
        size: u32,
        status: RecordStatus,
    ) -> Result<()> {
        let mut buf = Vec::with_capacity(self.format.meta_size());
        buf.extend_from_slice(doc_id);
        buf.extend_from_slice(&start.to_le_bytes());
        buf.extend_from_slice(&size.to_le_bytes());
        buf.push(status.as_byte());
        let offset = self.format.leaf_record_offset(leaf, slot) + self.format.key_size() as u32;
        self.buckets.write_at(offset, &buf)?;
        self.caches.invalidate(leaf);
        Ok(())
    }

    /// Flips the status byte of one record.
    pub(crate) fn write_leaf_status(
        &mut self,
        leaf: u32,
        slot: usize,
        status: RecordStatus,
    ) -> Result<()> {
        let offset =
            self.format.leaf_record_offset(leaf, slot) + status_offset(&self.format) as u32;
        self.buckets.write_at(offset, &[status.as_byte()])?;
        self.caches.invalidate(leaf);
        Ok(())
    }

    /// First slot whose key is `>= key`, or `count` if none.
    fn leaf_lower_bound(&mut self, leaf: u32, key: &[u8], count: u16) -> Result<usize> {
        let (mut lo, mut hi) = (0usize, count as usize);
        while lo < hi {
            let mid = (lo + hi) / 2;
            let record = self.read_leaf_record(leaf, mid)?;
            if record.key.as_ref() < key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo)
    }

    /// First slot whose key is `> key`, or `count` if none.
    fn leaf_upper_bound(&mut self, leaf: u32, key: &[u8], count: u16) -> Result<usize> {
        let (mut lo, mut hi) = (0usize, count as usize);
        while lo < hi {
            let mid = (lo + hi) / 2;
            let record = self.read_leaf_record(leaf, mid)?;
            if record.key.as_ref() <= key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo)
    }

    /// Slot of the first occurrence of `key`, or the nearest slot when the
    /// key is absent (floor position, clamped into the leaf). Seeds the
    /// ascending range scans; callers adjust by one after comparing the
    /// landed key. `count` must be non-zero.
    pub(crate) fn leaf_closest_first(&mut self, leaf: u32, key: &[u8], count: u16) -> Result<usize> {
        let lower = self.leaf_lower_bound(leaf, key, count)?;
        Ok(lower.min(count as usize - 1))
    }

    /// Slot of the last occurrence of `key`, or the nearest slot when the
    /// key is absent. Seeds the descending range scans.
    pub(crate) fn leaf_closest_last(&mut self, leaf: u32, key: &[u8], count: u16) -> Result<usize> {
        let upper = self.leaf_upper_bound(leaf, key, count)?;
        Ok(upper.saturating_sub(1))
    }

    /// First live record with exactly `key`, walking any tombstone run
    /// forward, across leaves if necessary. Returns the leaf and slot the
    /// record actually lives in.
    pub(crate) fn find_key_in_leaf(
        &mut self,
        leaf: u32,
        key: &[u8],
        count: u16,
    ) -> Result<(u32, usize, Record)> {
        if count == 0 {
            return Err(IndexError::ElemNotFound);
        }
        let slot = self.leaf_lower_bound(leaf, key, count)?;
        if slot == count as usize {
            return Err(IndexError::ElemNotFound);
        }
        let record = self.read_leaf_record(leaf, slot)?;
        if record.key.as_ref() != key {
            return Err(IndexError::ElemNotFound);
        }
        if record.status.is_live() {
            return Ok((leaf, slot, record));
        }
        self.find_existing(leaf, key, slot, count)
    }

    /// Continues past a tombstone to the next live record with the same key.
    fn find_existing(
        &mut self,
        leaf: u32,
        key: &[u8],
        slot: usize,
        count: u16,
    ) -> Result<(u32, usize, Record)> {
        let (_, mut next) = self.read_leaf_neighbours(leaf)?;
        let mut current_leaf = leaf;
        let mut current = slot + 1;
        let mut remaining = count as usize;
        loop {
            if current < remaining {
                let record = self.read_leaf_record(current_leaf, current)?;
                if record.key.as_ref() != key {
                    return Err(IndexError::ElemNotFound);
                }
                if record.status.is_live() {
                    return Ok((current_leaf, current, record));
                }
                current += 1;
            } else {
                if next == 0 {
                    return Err(IndexError::ElemNotFound);
                }
                current_leaf = next;
                let (count, _prev, following) = self.read_leaf_meta(current_leaf)?;
                remaining = count as usize;
                next = following;
                current = 0;
            }
        }
    }

    /// Like `find_key_in_leaf`, but the record must also carry `doc_id`.
    /// A duplicate-key run that ends without it is `DocIdNotFound`.
    pub(crate) fn find_key_for_update(
        &mut self,
        leaf: u32,
        key: &[u8],
        doc_id: &[u8],
        count: u16,
    ) -> Result<(u32, usize, Record)> {
        let (leaf, slot, record) = self.find_key_in_leaf(leaf, key, count)?;
        if record.doc_id.as_ref() == doc_id {
            return Ok((leaf, slot, record));
        }
        let count = self.read_leaf_len(leaf)?;
        self.match_doc_id(leaf, key, doc_id, slot, count)
    }

    fn match_doc_id(
        &mut self,
        leaf: u32,
        key: &[u8],
        doc_id: &[u8],
        slot: usize,
        count: u16,
    ) -> Result<(u32, usize, Record)> {
        let (_, mut next) = self.read_leaf_neighbours(leaf)?;
        let mut current_leaf = leaf;
        let mut current = slot + 1;
        let mut remaining = count as usize;
        loop {
            if current < remaining {
                let record = self.read_leaf_record(current_leaf, current)?;
                if record.key.as_ref() != key {
                    return Err(IndexError::DocIdNotFound);
                }
                if record.status.is_live() && record.doc_id.as_ref() == doc_id {
                    return Ok((current_leaf, current, record));
                }
                current += 1;
            } else {
                if next == 0 {
                    return Err(IndexError::DocIdNotFound);
                }
                current_leaf = next;
                let (count, _prev, following) = self.read_leaf_meta(current_leaf)?;
                remaining = count as usize;
                next = following;
                current = 0;
            }
        }
    }

    /// Upper-bound placement: a new record lands after its equal keys. A
    /// tombstone at the landing slot, or immediately before it when the slot
    /// key is larger, is overwritten in place instead of shifting anything.
    pub(crate) fn find_place_in_leaf(
        &mut self,
        key: &[u8],
        leaf: u32,
        count: u16,
    ) -> Result<Placement> {
        let n = count as usize;
        let upper = self.leaf_upper_bound(leaf, key, count)?;
        let landing = upper.min(n - 1);
        let at_landing = self.read_leaf_record(leaf, landing)?;
        if !at_landing.status.is_live() {
            return Ok(Placement {
                index: landing,
                on_deleted: true,
                needs_split: false,
            });
        }
        if upper < n && landing > 0 {
            let before = self.read_leaf_record(leaf, landing - 1)?;
            if !before.status.is_live() {
                return Ok(Placement {
                    index: landing - 1,
                    on_deleted: true,
                    needs_split: false,
                });
            }
        }
        Ok(Placement {
            index: upper,
            on_deleted: false,
            needs_split: n == self.format.node_capacity(),
        })
    }

    pub(crate) fn insert_first_record(&mut self, leaf: u32, record: &Record) -> Result<()> {
        self.write_leaf_len(leaf, 1)?;
        self.write_leaf_record(leaf, 0, record)
    }

    /// Non-split insert: overwrite a reclaimed tombstone, append at the end,
    /// or shift the tail one slot up - dropping any tombstones the rewritten
    /// tail contains, which is the only way dead slots in the middle of a
    /// leaf get reclaimed outside a split.
    pub(crate) fn update_leaf(
        &mut self,
        leaf: u32,
        place: &Placement,
        record: &Record,
        count: u16,
    ) -> Result<()> {
        if place.on_deleted {
            self.write_leaf_record(leaf, place.index, record)?;
            return self.buckets.flush();
        }
        let rewrite = count as usize - place.index;
        if rewrite == 0 {
            self.write_leaf_record(leaf, place.index, record)?;
            self.buckets.flush()?;
            return self.write_leaf_len(leaf, count + 1);
        }

        let record_size = self.format.leaf_record_size();
        let status_at = status_offset(&self.format);
        let mut tail = vec![0u8; rewrite * record_size];
        self.buckets
            .read_at(self.format.leaf_record_offset(leaf, place.index), &mut tail)?;

        let mut packed = Vec::with_capacity((rewrite + 1) * record_size);
        encode_leaf_record(&self.format, record, &mut packed);
        let mut live = 0usize;
        for chunk in tail.chunks_exact(record_size) {
            if chunk[status_at] == RecordStatus::Live.as_byte() {
                packed.extend_from_slice(chunk);
                live += 1;
            }
        }

        self.write_leaf_tail_raw(leaf, place.index, &packed)?;
        self.buckets.flush()?;
        self.write_leaf_len(leaf, (place.index + 1 + live) as u16)
    }

    /// Splits a full non-root leaf. The records from the rewrite boundary to
    /// the end are staged with the new record at its sorted slot; the upper
    /// half becomes a brand-new leaf at end-of-file and the first key of that
    /// half is handed back as the separator for the parent. If the staged
    /// records contain tombstones the leaf is compacted in place instead and
    /// no split happens.
    pub(crate) fn split_leaf(
        &mut self,
        leaf: u32,
        position: usize,
        record: &Record,
    ) -> Result<Option<(u32, Box<[u8]>)>> {
        let capacity = self.format.node_capacity();
        let (old_size, new_size) = self.format.leaf_split_sizes();
        let record_size = self.format.leaf_record_size();
        let read_start = position.min(old_size);

        let arena = Bump::new();
        let tail_len = (capacity - read_start) * record_size;
        let mut tail = BumpVec::with_capacity_in(tail_len, &arena);
        tail.resize(tail_len, 0);
        self.buckets
            .read_at(self.format.leaf_record_offset(leaf, read_start), &mut tail)?;

        if self.reclaim_dead_instead_of_split(leaf, read_start, &tail, record)? {
            return Ok(None);
        }

        let mut encoded = Vec::with_capacity(record_size);
        encode_leaf_record(&self.format, record, &mut encoded);
        let split_at = (position - read_start) * record_size;
        let mut merged = BumpVec::with_capacity_in(tail_len + record_size, &arena);
        merged.extend_from_slice(&tail[..split_at]);
        merged.extend_from_slice(&encoded);
        merged.extend_from_slice(&tail[split_at..]);

        let boundary = (old_size - read_start) * record_size;
        let separator: Box<[u8]> = merged[boundary..boundary + self.format.key_size()].into();

        let (prev, next) = self.read_leaf_neighbours(leaf)?;

        // The appended half goes out before the surviving half is cut down,
        // so an interrupted split leaves every old record readable.
        let new_page = encode_leaf_page(
            &self.format,
            new_size as u16,
            leaf,
            next,
            &merged[boundary..],
        );
        let new_leaf = self.buckets.append(&new_page)?;
        self.caches.invalidate(new_leaf);

        self.write_leaf_header(leaf, old_size as u16, prev, new_leaf)?;
        if boundary > 0 {
            self.write_leaf_tail_raw(leaf, read_start, &merged[..boundary])?;
        }
        if next != 0 {
            self.write_leaf_prev(next, new_leaf)?;
        }
        Ok(Some((new_leaf, separator)))
    }

    /// Splits the root leaf: the root page becomes a node with one separator
    /// pointing at two freshly laid-out leaf halves. Flag, root node, and
    /// both halves are assembled in memory and written in a single write.
    pub(crate) fn split_root_leaf(&mut self, position: usize, record: &Record) -> Result<()> {
        let capacity = self.format.node_capacity();
        let (old_size, new_size) = self.format.leaf_split_sizes();
        let record_size = self.format.leaf_record_size();

        let arena = Bump::new();
        let mut records = BumpVec::with_capacity_in(capacity * record_size, &arena);
        records.resize(capacity * record_size, 0);
        self.buckets
            .read_at(self.format.leaf_record_offset(DATA_START, 0), &mut records)?;

        if self.reclaim_dead_instead_of_split(DATA_START, 0, &records, record)? {
            return Ok(());
        }

        let mut encoded = Vec::with_capacity(record_size);
        encode_leaf_record(&self.format, record, &mut encoded);
        let split_at = position * record_size;
        let mut merged = BumpVec::with_capacity_in((capacity + 1) * record_size, &arena);
        merged.extend_from_slice(&records[..split_at]);
        merged.extend_from_slice(&encoded);
        merged.extend_from_slice(&records[split_at..]);

        let boundary = old_size * record_size;
        let separator = &merged[boundary..boundary + self.format.key_size()];

        let left = DATA_START + self.format.node_size() as u32;
        let right = left + self.format.leaf_size() as u32;

        let mut root_entry = Vec::with_capacity(self.format.node_entry_size());
        root_entry.extend_from_slice(separator);
        root_entry.extend_from_slice(&right.to_le_bytes());
        let root_page = encode_node_page(&self.format, 1, NodeKind::Leaf, left, &root_entry);
        let left_page = encode_leaf_page(
            &self.format,
            old_size as u16,
            0,
            right,
            &merged[..boundary],
        );
        let right_page = encode_leaf_page(
            &self.format,
            new_size as u16,
            left,
            0,
            &merged[boundary..],
        );

        let mut image =
            Vec::with_capacity(1 + root_page.len() + left_page.len() + right_page.len());
        image.push(NodeKind::Node.as_byte());
        image.extend_from_slice(&root_page);
        image.extend_from_slice(&left_page);
        image.extend_from_slice(&right_page);
        self.buckets.write_at(ROOT_FLAG_OFFSET, &image)?;
        self.buckets.flush()?;

        self.root_kind = NodeKind::Node;
        self.caches.invalidate(DATA_START);
        self.caches.invalidate(left);
        self.caches.invalidate(right);
        Ok(())
    }

    /// If the staged records contain any tombstone, rewrites the run with
    /// the tombstones dropped and the new record at its sorted slot, and
    /// reports that the split is no longer needed. Reclaiming dead space is
    /// always preferred over growing the tree.
    fn reclaim_dead_instead_of_split(
        &mut self,
        leaf: u32,
        read_start: usize,
        staged: &[u8],
        record: &Record,
    ) -> Result<bool> {
        let record_size = self.format.leaf_record_size();
        let status_at = status_offset(&self.format);
        let key_size = self.format.key_size();
        let live_byte = RecordStatus::Live.as_byte();

        if staged
            .chunks_exact(record_size)
            .all(|chunk| chunk[status_at] == live_byte)
        {
            return Ok(false);
        }

        let mut encoded = Vec::with_capacity(record_size);
        encode_leaf_record(&self.format, record, &mut encoded);
        let mut packed = Vec::with_capacity(staged.len() + record_size);
        let mut live = 0usize;
        let mut inserted = false;
        for chunk in staged.chunks_exact(record_size) {
            if chunk[status_at] != live_byte {
                continue;
            }
            if !inserted && record.key.as_ref() < &chunk[..key_size] {
                packed.extend_from_slice(&encoded);
                inserted = true;
            }
            packed.extend_from_slice(chunk);
            live += 1;
        }
        if !inserted {
            packed.extend_from_slice(&encoded);
        }

        self.write_leaf_tail_raw(leaf, read_start, &packed)?;
        self.write_leaf_len(leaf, (read_start + live + 1) as u16)?;
        Ok(true)
    }
}
