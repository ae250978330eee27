//! # LFU Decode Caches
//!
//! Parsing the same page header or record repeatedly dominates the cost of a
//! lookup: a single insert performs a multi-probe binary search against one
//! leaf, touching the same element count and neighbouring records over and
//! over. The decode caches memoize those parsed quantities, keyed by the page
//! offset they came from.
//!
//! ## Eviction
//!
//! Least-frequently-used: each hit bumps a counter, and a full cache drops
//! the bottom tenth of its entries (at least one) by hit count before
//! admitting a new one. Unlike recency-based eviction this keeps the hot
//! upper-tree pages resident through full-index scans.
//!
//! ## Invalidation Is Correctness
//!
//! Every page mutation must call [`DecodeCaches::invalidate`] for the touched
//! offset before the next read. Mutations are rare relative to reads, but a
//! stale hit after a write would silently corrupt search results, so the
//! typed page writers in the tree engine invalidate unconditionally rather
//! than leaving it to call sites. A cache constructed with capacity 0 stores
//! nothing, which turns the caches off without touching any read path.

use std::hash::Hash;

use hashbrown::HashMap;

use crate::config::CACHE_EVICTION_DIVISOR;
use crate::record::{NodeKind, NodeProbe, Record};

#[derive(Debug, Clone)]
struct Slot<V> {
    value: V,
    hits: u64,
}

/// One-level cache keyed by page offset.
#[derive(Debug)]
pub struct LfuCache<V> {
    map: HashMap<u32, Slot<V>>,
    capacity: usize,
}

impl<V: Clone> LfuCache<V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            map: HashMap::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn get(&mut self, offset: u32) -> Option<V> {
        let slot = self.map.get_mut(&offset)?;
        slot.hits += 1;
        Some(slot.value.clone())
    }

    pub fn insert(&mut self, offset: u32, value: V) {
        if self.capacity == 0 {
            return;
        }
        if !self.map.contains_key(&offset) && self.map.len() >= self.capacity {
            self.evict();
        }
        self.map.insert(offset, Slot { value, hits: 0 });
    }

    pub fn delete(&mut self, offset: u32) {
        self.map.remove(&offset);
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    fn evict(&mut self) {
        let victims = eviction_quota(self.capacity);
        let mut ranked: Vec<(u64, u32)> =
            self.map.iter().map(|(k, s)| (s.hits, *k)).collect();
        ranked.sort_unstable();
        for (_, key) in ranked.into_iter().take(victims) {
            self.map.remove(&key);
        }
    }
}

/// Two-level cache keyed by page offset plus a per-page sub-key (a slot
/// index, or a search key for memoized node descents). Invalidation drops
/// every entry of a page at once.
#[derive(Debug)]
pub struct TwoLevelCache<K, V> {
    map: HashMap<u32, HashMap<K, Slot<V>>>,
    len: usize,
    capacity: usize,
}

impl<K: Eq + Hash + Clone, V: Clone> TwoLevelCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            map: HashMap::new(),
            len: 0,
            capacity,
        }
    }

    pub fn get(&mut self, offset: u32, sub: &K) -> Option<V> {
        let slot = self.map.get_mut(&offset)?.get_mut(sub)?;
        slot.hits += 1;
        Some(slot.value.clone())
    }

    pub fn insert(&mut self, offset: u32, sub: K, value: V) {
        if self.capacity == 0 {
            return;
        }
        let already_present = self
            .map
            .get(&offset)
            .is_some_and(|inner| inner.contains_key(&sub));
        if !already_present {
            if self.len >= self.capacity {
                self.evict();
            }
            self.len += 1;
        }
        self.map
            .entry(offset)
            .or_default()
            .insert(sub, Slot { value, hits: 0 });
    }

    pub fn delete(&mut self, offset: u32) {
        if let Some(inner) = self.map.remove(&offset) {
            self.len -= inner.len();
        }
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.len = 0;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn evict(&mut self) {
        let victims = eviction_quota(self.capacity);
        let mut ranked: Vec<(u64, u32, K)> = self
            .map
            .iter()
            .flat_map(|(page, inner)| {
                inner.iter().map(|(sub, s)| (s.hits, *page, sub.clone()))
            })
            .collect();
        ranked.sort_unstable_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
        for (_, page, sub) in ranked.into_iter().take(victims) {
            if let Some(inner) = self.map.get_mut(&page) {
                if inner.remove(&sub).is_some() {
                    self.len -= 1;
                }
                if inner.is_empty() {
                    self.map.remove(&page);
                }
            }
        }
    }
}

fn eviction_quota(capacity: usize) -> usize {
    (capacity / CACHE_EVICTION_DIVISOR).max(1)
}

/// The full set of decode caches owned by one index instance, one cache per
/// decoded quantity.
#[derive(Debug)]
pub struct DecodeCaches {
    pub leaf_len: LfuCache<u16>,
    pub leaf_neighbours: LfuCache<(u32, u32)>,
    pub leaf_meta: LfuCache<(u16, u32, u32)>,
    pub node_meta: LfuCache<(u16, NodeKind)>,
    pub leaf_record: TwoLevelCache<u16, Record>,
    pub node_probe: TwoLevelCache<u16, NodeProbe>,
    pub node_first: TwoLevelCache<Box<[u8]>, (usize, u32)>,
    pub node_last: TwoLevelCache<Box<[u8]>, (usize, u32)>,
}

impl DecodeCaches {
    pub fn new(single_capacity: usize, two_level_capacity: usize) -> Self {
        Self {
            leaf_len: LfuCache::new(single_capacity),
            leaf_neighbours: LfuCache::new(single_capacity),
            leaf_meta: LfuCache::new(single_capacity),
            node_meta: LfuCache::new(single_capacity),
            leaf_record: TwoLevelCache::new(two_level_capacity),
            node_probe: TwoLevelCache::new(two_level_capacity),
            node_first: TwoLevelCache::new(two_level_capacity),
            node_last: TwoLevelCache::new(two_level_capacity),
        }
    }

    /// Drops every cached quantity decoded from the page at `offset`.
    pub fn invalidate(&mut self, offset: u32) {
        self.leaf_len.delete(offset);
        self.leaf_neighbours.delete(offset);
        self.leaf_meta.delete(offset);
        self.node_meta.delete(offset);
        self.leaf_record.delete(offset);
        self.node_probe.delete(offset);
        self.node_first.delete(offset);
        self.node_last.delete(offset);
    }

    pub fn clear(&mut self) {
        self.leaf_len.clear();
        self.leaf_neighbours.clear();
        self.leaf_meta.clear();
        self.node_meta.clear();
        self.leaf_record.clear();
        self.node_probe.clear();
        self.node_first.clear();
        self.node_last.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_returns_inserted_value() {
        let mut cache = LfuCache::new(10);
        cache.insert(100, 7u16);

        assert_eq!(cache.get(100), Some(7));
        assert_eq!(cache.get(200), None);
    }

    #[test]
    fn delete_removes_entry() {
        let mut cache = LfuCache::new(10);
        cache.insert(100, 7u16);
        cache.delete(100);

        assert_eq!(cache.get(100), None);
    }

    #[test]
    fn full_cache_evicts_least_frequently_used() {
        let mut cache = LfuCache::new(10);
        for i in 0..10u32 {
            cache.insert(i, i as u16);
        }
        // Touch everything except offset 3.
        for i in 0..10u32 {
            if i != 3 {
                cache.get(i);
            }
        }

        cache.insert(99, 99);

        assert_eq!(cache.get(3), None);
        assert_eq!(cache.get(99), Some(99));
        assert_eq!(cache.len(), 10);
    }

    #[test]
    fn eviction_drops_a_tenth_of_a_large_cache() {
        let mut cache = LfuCache::new(100);
        for i in 0..100u32 {
            cache.insert(i, 0u16);
            if i >= 10 {
                cache.get(i);
            }
        }

        cache.insert(1000, 0);

        // 10 cold entries out, the newcomer in.
        assert_eq!(cache.len(), 91);
        for i in 0..10u32 {
            assert_eq!(cache.get(i), None);
        }
    }

    #[test]
    fn zero_capacity_stores_nothing() {
        let mut cache = LfuCache::new(0);
        cache.insert(1, 1u16);

        assert_eq!(cache.get(1), None);
    }

    #[test]
    fn two_level_delete_drops_every_slot_of_a_page() {
        let mut cache: TwoLevelCache<u16, u32> = TwoLevelCache::new(10);
        cache.insert(100, 0, 11);
        cache.insert(100, 1, 22);
        cache.insert(200, 0, 33);

        cache.delete(100);

        assert_eq!(cache.get(100, &0), None);
        assert_eq!(cache.get(100, &1), None);
        assert_eq!(cache.get(200, &0), Some(33));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn two_level_eviction_respects_hit_counts() {
        let mut cache: TwoLevelCache<u16, u32> = TwoLevelCache::new(4);
        cache.insert(1, 0, 10);
        cache.insert(1, 1, 11);
        cache.insert(2, 0, 20);
        cache.insert(2, 1, 21);
        cache.get(1, &0);
        cache.get(1, &1);
        cache.get(2, &1);

        cache.insert(3, 0, 30);

        assert_eq!(cache.get(2, &0), None);
        assert_eq!(cache.get(3, &0), Some(30));
        assert_eq!(cache.len(), 4);
    }

    #[test]
    fn two_level_reinsert_overwrites_in_place() {
        let mut cache: TwoLevelCache<u16, u32> = TwoLevelCache::new(4);
        cache.insert(1, 0, 10);
        cache.insert(1, 0, 99);

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(1, &0), Some(99));
    }

    #[test]
    fn invalidate_clears_all_caches_for_offset() {
        let mut caches = DecodeCaches::new(10, 10);
        caches.leaf_len.insert(100, 4);
        caches.leaf_meta.insert(100, (4, 0, 0));
        caches.leaf_len.insert(200, 2);

        caches.invalidate(100);

        assert_eq!(caches.leaf_len.get(100), None);
        assert_eq!(caches.leaf_meta.get(100), None);
        assert_eq!(caches.leaf_len.get(200), Some(2));
    }
}
