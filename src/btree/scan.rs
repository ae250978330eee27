//! # Range Scans
//!
//! Every range query - `all`, `get_many`, `get_between` and its open-ended
//! variants - is one lazy iterator walking the leaf linked list. The query
//! constructors position the scan on a starting leaf and slot via the
//! descent searches; the iterator then steps slot by slot, hops leaves
//! through the next/prev pointers, skips tombstones, and applies the
//! offset/limit bookkeeping.
//!
//! A scan holds the index exclusively for its lifetime and is restartable
//! only by issuing the query again; it does not survive mutations or
//! process restarts. An I/O error mid-scan is yielded once and terminates
//! the sequence, mirroring how a failed probe silently ends the stream for
//! the consumer.

use super::tree::TreeIndex;
use crate::error::{IndexError, Result};
use crate::record::{NodeKind, Record};
use crate::storage::DATA_START;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Backward,
}

/// Lazy sequence of live records in key order (or reverse key order).
pub struct RangeScan<'t> {
    index: &'t mut TreeIndex,
    leaf: u32,
    slot: isize,
    count: u16,
    prev: u32,
    next: u32,
    direction: Direction,
    key_filter: Option<Box<[u8]>>,
    end_bound: Option<(Box<[u8]>, bool)>,
    skip: usize,
    remaining: Option<usize>,
    done: bool,
}

impl<'t> RangeScan<'t> {
    fn empty(index: &'t mut TreeIndex) -> Self {
        Self {
            index,
            leaf: 0,
            slot: 0,
            count: 0,
            prev: 0,
            next: 0,
            direction: Direction::Forward,
            key_filter: None,
            end_bound: None,
            skip: 0,
            remaining: None,
            done: true,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn positioned(
        index: &'t mut TreeIndex,
        leaf: u32,
        slot: isize,
        direction: Direction,
        key_filter: Option<Box<[u8]>>,
        end_bound: Option<(Box<[u8]>, bool)>,
        skip: usize,
        remaining: Option<usize>,
    ) -> Result<Self> {
        let (count, prev, next) = index.read_leaf_meta(leaf)?;
        Ok(Self {
            index,
            leaf,
            slot,
            count,
            prev,
            next,
            direction,
            key_filter,
            end_bound,
            skip,
            remaining,
            done: false,
        })
    }

    fn step(&mut self) -> Result<Option<Record>> {
        loop {
            if self.done {
                return Ok(None);
            }
            if self.remaining == Some(0) {
                self.done = true;
                return Ok(None);
            }

            match self.direction {
                Direction::Forward => {
                    if self.slot >= self.count as isize {
                        if self.next == 0 {
                            self.done = true;
                            return Ok(None);
                        }
                        self.move_to(self.next)?;
                        self.slot = 0;
                        continue;
                    }
                }
                Direction::Backward => {
                    if self.slot < 0 {
                        if self.prev == 0 {
                            self.done = true;
                            return Ok(None);
                        }
                        self.move_to(self.prev)?;
                        self.slot = self.count as isize - 1;
                        continue;
                    }
                }
            }

            let record = self.index.read_leaf_record(self.leaf, self.slot as usize)?;
            match self.direction {
                Direction::Forward => self.slot += 1,
                Direction::Backward => self.slot -= 1,
            }

            if let Some(filter) = &self.key_filter {
                if record.key != *filter {
                    self.done = true;
                    return Ok(None);
                }
            }
            if let Some((end, inclusive)) = &self.end_bound {
                let beyond = record.key.as_ref() > end.as_ref()
                    || (!inclusive && record.key.as_ref() == end.as_ref());
                if beyond {
                    self.done = true;
                    return Ok(None);
                }
            }
            if !record.status.is_live() {
                continue;
            }
            if self.skip > 0 {
                self.skip -= 1;
                continue;
            }
            if let Some(remaining) = &mut self.remaining {
                *remaining -= 1;
            }
            return Ok(Some(record));
        }
    }

    fn move_to(&mut self, leaf: u32) -> Result<()> {
        self.leaf = leaf;
        let (count, prev, next) = self.index.read_leaf_meta(leaf)?;
        self.count = count;
        self.prev = prev;
        self.next = next;
        Ok(())
    }
}

impl Iterator for RangeScan<'_> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.step() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl TreeIndex {
    /// Ascending scan over every live record. `limit` of `None` yields all;
    /// `offset` skips that many live records first.
    pub fn all(&mut self, limit: Option<usize>, offset: usize) -> Result<RangeScan<'_>> {
        // The leftmost leaf never moves: it is the root leaf until the first
        // root split, and the in-place half of that split forever after.
        let leaf = if self.root_kind == NodeKind::Node {
            DATA_START + self.format.node_size() as u32
        } else {
            DATA_START
        };
        RangeScan::positioned(self, leaf, 0, Direction::Forward, None, None, offset, limit)
    }

    /// Every live record carrying exactly `key`, in insertion order.
    pub fn get_many(
        &mut self,
        key: &[u8],
        limit: Option<usize>,
        offset: usize,
    ) -> Result<RangeScan<'_>> {
        let key = self.format.normalize_key(key)?;
        let leaf = self.find_leaf_first(&key)?;
        let count = self.read_leaf_len(leaf)?;
        match self.find_key_in_leaf(leaf, &key, count) {
            Ok((found_leaf, slot, _)) => RangeScan::positioned(
                self,
                found_leaf,
                slot as isize,
                Direction::Forward,
                Some(key),
                None,
                offset,
                limit,
            ),
            Err(IndexError::ElemNotFound) => {
                let (_, _, next) = self.read_leaf_meta(leaf)?;
                if next == 0 {
                    return Ok(RangeScan::empty(self));
                }
                RangeScan::positioned(
                    self,
                    next,
                    0,
                    Direction::Forward,
                    Some(key),
                    None,
                    offset,
                    limit,
                )
            }
            Err(e) => Err(e),
        }
    }

    /// Records within `[start, end]` under the requested inclusivity. An
    /// absent `start` scans downward from `end`; an absent `end` scans
    /// upward from `start`; both absent degenerates to `all`.
    #[allow(clippy::too_many_arguments)]
    pub fn get_between(
        &mut self,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
        limit: Option<usize>,
        offset: usize,
        inclusive_start: bool,
        inclusive_end: bool,
    ) -> Result<RangeScan<'_>> {
        match (start, end) {
            (None, None) => self.all(limit, offset),
            (Some(start), None) => self.scan_up_from(start, inclusive_start, None, limit, offset),
            (None, Some(end)) => self.scan_down_from(end, inclusive_end, limit, offset),
            (Some(start), Some(end)) => {
                let end = self.format.normalize_key(end)?;
                self.scan_up_from(start, inclusive_start, Some((end, inclusive_end)), limit, offset)
            }
        }
    }

    /// Ascending scan from the first record `>= start` (or `> start`).
    fn scan_up_from(
        &mut self,
        start: &[u8],
        inclusive: bool,
        end_bound: Option<(Box<[u8]>, bool)>,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<RangeScan<'_>> {
        let start = self.format.normalize_key(start)?;
        let (leaf, slot) = if inclusive {
            let leaf = self.find_leaf_first(&start)?;
            let count = self.read_leaf_len(leaf)?;
            if count == 0 {
                return Ok(RangeScan::empty(self));
            }
            let mut slot = self.leaf_closest_first(leaf, &start, count)? as isize;
            let landed = self.read_leaf_record(leaf, slot as usize)?;
            if landed.key.as_ref() < start.as_ref() {
                slot += 1;
            }
            (leaf, slot)
        } else {
            let leaf = self.find_leaf_last(&start)?;
            let count = self.read_leaf_len(leaf)?;
            if count == 0 {
                return Ok(RangeScan::empty(self));
            }
            let mut slot = self.leaf_closest_last(leaf, &start, count)? as isize;
            let landed = self.read_leaf_record(leaf, slot as usize)?;
            if landed.key.as_ref() <= start.as_ref() {
                slot += 1;
            }
            (leaf, slot)
        };
        RangeScan::positioned(
            self,
            leaf,
            slot,
            Direction::Forward,
            None,
            end_bound,
            offset,
            limit,
        )
    }

    /// Descending scan from the last record `<= end` (or `< end`).
    fn scan_down_from(
        &mut self,
        end: &[u8],
        inclusive: bool,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<RangeScan<'_>> {
        let end = self.format.normalize_key(end)?;
        let (leaf, slot) = if inclusive {
            let leaf = self.find_leaf_last(&end)?;
            let count = self.read_leaf_len(leaf)?;
            if count == 0 {
                return Ok(RangeScan::empty(self));
            }
            let mut slot = self.leaf_closest_last(leaf, &end, count)? as isize;
            let landed = self.read_leaf_record(leaf, slot as usize)?;
            if landed.key.as_ref() > end.as_ref() {
                slot -= 1;
            }
            (leaf, slot)
        } else {
            let leaf = self.find_leaf_first(&end)?;
            let count = self.read_leaf_len(leaf)?;
            if count == 0 {
                return Ok(RangeScan::empty(self));
            }
            let mut slot = self.leaf_closest_first(leaf, &end, count)? as isize;
            let landed = self.read_leaf_record(leaf, slot as usize)?;
            if landed.key.as_ref() >= end.as_ref() {
                slot -= 1;
            }
            (leaf, slot)
        };
        RangeScan::positioned(
            self,
            leaf,
            slot,
            Direction::Backward,
            None,
            None,
            offset,
            limit,
        )
    }
}
