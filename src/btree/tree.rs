//! # Tree Index
//!
//! `TreeIndex` owns the two backing files, the decode caches, and the root
//! flag, and exposes the full operation surface: lifecycle
//! (`create`/`open`/`close`/`destroy`), point operations
//! (`insert`/`get`/`update`/`delete`), the range queries in `scan`, and
//! `compact`.
//!
//! ## Descent
//!
//! Every operation starts at the root page (a fixed offset; the root flag
//! says whether it is a leaf or a node) and walks down one child per level.
//! Inserts descend in last-occurrence mode and remember the ancestor node
//! offsets plus the entry index chosen at each level; a split deeper down
//! pops that stack to know where the separator key must be written without
//! re-searching the tree.
//!
//! ## Write Discipline
//!
//! Mutations precompute everything before the first file write, and splits
//! write the appended half before truncating the surviving half, so an
//! interrupted operation never makes previously committed records
//! unreachable. There is no write-ahead log; crash atomicity across the few
//! writes of one split is out of scope.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use smallvec::SmallVec;
use zerocopy::IntoBytes;

use crate::cache::DecodeCaches;
use crate::config::{
    DEFAULT_DOC_ID_SIZE, DEFAULT_KEY_SIZE, DEFAULT_NODE_CAPACITY, DEFAULT_SINGLE_CACHE_CAPACITY,
    DEFAULT_TWO_LEVEL_CACHE_CAPACITY, MAX_TREE_DEPTH,
};
use crate::error::{IndexError, Result};
use crate::format::TreeFormat;
use crate::record::{encode_leaf_page, NodeKind, Record, RecordStatus};
use crate::storage::{
    BucketsFile, IndexFileHeader, ValueStorage, DATA_START, INDEX_HEADER_SIZE, ROOT_FLAG_OFFSET,
};

pub(crate) type PathStack = SmallVec<[u32; MAX_TREE_DEPTH]>;
pub(crate) type IndexStack = SmallVec<[usize; MAX_TREE_DEPTH]>;

/// Creation-time parameters of an index. The layout parameters (widths and
/// capacity) are persisted in the file header; the cache capacities are
/// per-process tuning.
#[derive(Debug, Clone)]
pub struct TreeIndexOptions {
    key_size: usize,
    doc_id_size: usize,
    node_capacity: usize,
    single_cache_capacity: usize,
    two_level_cache_capacity: usize,
}

impl Default for TreeIndexOptions {
    fn default() -> Self {
        Self {
            key_size: DEFAULT_KEY_SIZE,
            doc_id_size: DEFAULT_DOC_ID_SIZE,
            node_capacity: DEFAULT_NODE_CAPACITY,
            single_cache_capacity: DEFAULT_SINGLE_CACHE_CAPACITY,
            two_level_cache_capacity: DEFAULT_TWO_LEVEL_CACHE_CAPACITY,
        }
    }
}

impl TreeIndexOptions {
    pub fn key_size(mut self, bytes: usize) -> Self {
        self.key_size = bytes;
        self
    }

    pub fn doc_id_size(mut self, bytes: usize) -> Self {
        self.doc_id_size = bytes;
        self
    }

    pub fn node_capacity(mut self, records: usize) -> Self {
        self.node_capacity = records;
        self
    }

    /// Capacity of each one-level decode cache. Zero disables caching.
    pub fn single_cache_capacity(mut self, entries: usize) -> Self {
        self.single_cache_capacity = entries;
        self
    }

    /// Capacity of each two-level decode cache. Zero disables caching.
    pub fn two_level_cache_capacity(mut self, entries: usize) -> Self {
        self.two_level_cache_capacity = entries;
        self
    }
}

/// An open B+tree index over one `_buck`/`_stor` file pair.
#[derive(Debug)]
pub struct TreeIndex {
    pub(crate) format: TreeFormat,
    pub(crate) buckets: BucketsFile,
    pub(crate) values: ValueStorage,
    pub(crate) caches: DecodeCaches,
    pub(crate) root_kind: NodeKind,
    dir: PathBuf,
    name: String,
    single_cache_capacity: usize,
    two_level_cache_capacity: usize,
}

impl TreeIndex {
    /// Creates a fresh index: header, root flag, and an empty root leaf.
    /// Fails with `AlreadyExists` if either backing file is present.
    pub fn create(dir: impl AsRef<Path>, name: &str, options: TreeIndexOptions) -> Result<Self> {
        let dir = dir.as_ref();
        let format = TreeFormat::new(
            options.key_size,
            options.doc_id_size,
            options.node_capacity,
        )?;

        let mut buckets = BucketsFile::create(&buckets_path(dir, name))?;
        let values = match ValueStorage::create(&values_path(dir, name)) {
            Ok(values) => values,
            Err(e) => {
                let _ = fs::remove_file(buckets.path());
                return Err(e);
            }
        };

        let header = IndexFileHeader::new(&format);
        buckets.write_at(0, header.as_bytes())?;
        buckets.write_at(ROOT_FLAG_OFFSET, &[NodeKind::Leaf.as_byte()])?;
        let empty_root = encode_leaf_page(&format, 0, 0, 0, &[]);
        buckets.write_at(DATA_START, &empty_root)?;
        buckets.flush()?;

        Ok(Self {
            format,
            buckets,
            values,
            caches: DecodeCaches::new(
                options.single_cache_capacity,
                options.two_level_cache_capacity,
            ),
            root_kind: NodeKind::Leaf,
            dir: dir.to_owned(),
            name: name.to_owned(),
            single_cache_capacity: options.single_cache_capacity,
            two_level_cache_capacity: options.two_level_cache_capacity,
        })
    }

    /// Opens an existing index, validating the header and root flag. The
    /// layout parameters come from the file, not from the caller.
    pub fn open(dir: impl AsRef<Path>, name: &str) -> Result<Self> {
        Self::open_with_caches(
            dir.as_ref(),
            name,
            DEFAULT_SINGLE_CACHE_CAPACITY,
            DEFAULT_TWO_LEVEL_CACHE_CAPACITY,
        )
    }

    fn open_with_caches(
        dir: &Path,
        name: &str,
        single_cache_capacity: usize,
        two_level_cache_capacity: usize,
    ) -> Result<Self> {
        let mut buckets = BucketsFile::open(&buckets_path(dir, name))?;
        if buckets.len() < DATA_START as u64 {
            return Err(IndexError::Corrupted(format!(
                "tree file of {} bytes is shorter than its header",
                buckets.len()
            )));
        }
        let mut header_bytes = [0u8; INDEX_HEADER_SIZE];
        buckets.read_at(0, &mut header_bytes)?;
        let header = IndexFileHeader::from_bytes(&header_bytes)?;
        let format = header.tree_format()?;

        let mut flag = [0u8; 1];
        buckets.read_at(ROOT_FLAG_OFFSET, &mut flag)?;
        let root_kind = NodeKind::from_byte(flag[0])?;

        let values = ValueStorage::open(&values_path(dir, name))?;
        Ok(Self {
            format,
            buckets,
            values,
            caches: DecodeCaches::new(single_cache_capacity, two_level_cache_capacity),
            root_kind,
            dir: dir.to_owned(),
            name: name.to_owned(),
            single_cache_capacity,
            two_level_cache_capacity,
        })
    }

    /// Flushes and closes the index. Dropping the index closes it as well;
    /// this form surfaces flush errors.
    pub fn close(mut self) -> Result<()> {
        self.flush()?;
        self.caches.clear();
        Ok(())
    }

    /// Removes both backing files.
    pub fn destroy(self) -> Result<()> {
        let buck = self.buckets.path().to_owned();
        let stor = self.values.path().to_owned();
        drop(self);
        fs::remove_file(&buck)?;
        fs::remove_file(&stor)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.buckets.flush()?;
        self.values.flush()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn format(&self) -> &TreeFormat {
        &self.format
    }

    /// The append-only store holding record payloads. Callers append a value
    /// first, then index its `(start, size)` address.
    pub fn value_store(&mut self) -> &mut ValueStorage {
        &mut self.values
    }

    /// Inserts a record for `(doc_id, key)` pointing at `start`/`size` in
    /// the value store. Duplicate keys are allowed and kept in insertion
    /// order.
    pub fn insert(
        &mut self,
        doc_id: &[u8],
        key: &[u8],
        start: u32,
        size: u32,
        status: RecordStatus,
    ) -> Result<()> {
        let record = Record {
            key: self.format.normalize_key(key)?,
            doc_id: self.format.normalize_doc_id(doc_id)?,
            start,
            size,
            status,
        };
        let (leaf, mut ancestors, mut indexes) = self.find_leaf_to_insert(&record.key)?;

        let count = self.read_leaf_len(leaf)?;
        if count == 0 {
            return self.insert_first_record(leaf, &record);
        }
        let place = self.find_place_in_leaf(&record.key, leaf, count)?;
        if !place.needs_split {
            return self.update_leaf(leaf, &place, &record, count);
        }
        match ancestors.pop() {
            None => self.split_root_leaf(place.index, &record),
            Some(parent) => {
                if let Some((new_leaf, separator)) =
                    self.split_leaf(leaf, place.index, &record)?
                {
                    self.insert_separator(
                        parent,
                        separator,
                        leaf,
                        new_leaf,
                        &mut ancestors,
                        &mut indexes,
                    )?;
                }
                Ok(())
            }
        }
    }

    /// Returns the first live record with `key`, or `ElemNotFound`.
    pub fn get(&mut self, key: &[u8]) -> Result<Record> {
        let key = self.format.normalize_key(key)?;
        let leaf = self.find_leaf_first(&key)?;
        let (count, _prev, next) = self.read_leaf_meta(leaf)?;
        match self.find_key_in_leaf(leaf, &key, count) {
            Ok((_, _, record)) => Ok(record),
            // A boundary separator equal to the key can steer the descent one
            // leaf too far left; the run then starts in the next leaf.
            Err(IndexError::ElemNotFound) if next != 0 => {
                let count = self.read_leaf_len(next)?;
                let (_, _, record) = self.find_key_in_leaf(next, &key, count)?;
                Ok(record)
            }
            Err(e) => Err(e),
        }
    }

    /// Rewrites the meta fields (doc id, value location, status) of the
    /// record matching `(key, doc_id)` in place. The key never changes, so
    /// an update can never split a page.
    pub fn update(
        &mut self,
        doc_id: &[u8],
        key: &[u8],
        start: u32,
        size: u32,
        status: RecordStatus,
    ) -> Result<()> {
        let key = self.format.normalize_key(key)?;
        let doc_id = self.format.normalize_doc_id(doc_id)?;
        let (leaf, slot, _) = self.find_key_to_update(&key, &doc_id)?;
        self.write_leaf_meta_fields(leaf, slot, &doc_id, start, size, status)
    }

    /// Tombstones the record matching `(key, doc_id)`: a single status-byte
    /// write. The slot is reclaimed by a later split or by compaction.
    pub fn delete(&mut self, doc_id: &[u8], key: &[u8]) -> Result<()> {
        let key = self.format.normalize_key(key)?;
        let doc_id = self.format.normalize_doc_id(doc_id)?;
        let (leaf, slot, _) = self.find_key_to_update(&key, &doc_id)?;
        self.write_leaf_status(leaf, slot, RecordStatus::Deleted)
    }

    /// Inserts one record per distinct key for a single document.
    pub fn insert_many<'k, I>(
        &mut self,
        doc_id: &[u8],
        keys: I,
        start: u32,
        size: u32,
        status: RecordStatus,
    ) -> Result<()>
    where
        I: IntoIterator<Item = &'k [u8]>,
    {
        for key in self.distinct_keys(keys)? {
            self.insert(doc_id, &key, start, size, status)?;
        }
        Ok(())
    }

    pub fn update_many<'k, I>(
        &mut self,
        doc_id: &[u8],
        keys: I,
        start: u32,
        size: u32,
        status: RecordStatus,
    ) -> Result<()>
    where
        I: IntoIterator<Item = &'k [u8]>,
    {
        for key in self.distinct_keys(keys)? {
            self.update(doc_id, &key, start, size, status)?;
        }
        Ok(())
    }

    pub fn delete_many<'k, I>(&mut self, doc_id: &[u8], keys: I) -> Result<()>
    where
        I: IntoIterator<Item = &'k [u8]>,
    {
        for key in self.distinct_keys(keys)? {
            self.delete(doc_id, &key)?;
        }
        Ok(())
    }

    fn distinct_keys<'k, I>(&self, keys: I) -> Result<BTreeSet<Box<[u8]>>>
    where
        I: IntoIterator<Item = &'k [u8]>,
    {
        keys.into_iter()
            .map(|key| self.format.normalize_key(key))
            .collect()
    }

    /// Rebuilds the index into fresh files, dropping every tombstone and
    /// copying only live payloads into a new value store. `node_capacity`
    /// of 0 keeps the current capacity. The original files are replaced only
    /// after the rebuilt index has been written out completely; any earlier
    /// failure leaves them untouched.
    pub fn compact(&mut self, node_capacity: usize) -> Result<()> {
        let capacity = if node_capacity == 0 {
            self.format.node_capacity()
        } else {
            node_capacity
        };
        let compact_name = format!("{}_compact", self.name);
        let options = TreeIndexOptions::default()
            .key_size(self.format.key_size())
            .doc_id_size(self.format.doc_id_size())
            .node_capacity(capacity)
            .single_cache_capacity(self.single_cache_capacity)
            .two_level_cache_capacity(self.two_level_cache_capacity);

        let mut rebuilt = TreeIndex::create(&self.dir, &compact_name, options)?;
        if let Err(e) = self.copy_live_records(&mut rebuilt) {
            let _ = rebuilt.destroy();
            return Err(e);
        }
        rebuilt.close()?;

        self.flush()?;
        fs::rename(
            buckets_path(&self.dir, &compact_name),
            buckets_path(&self.dir, &self.name),
        )?;
        fs::rename(
            values_path(&self.dir, &compact_name),
            values_path(&self.dir, &self.name),
        )?;

        let dir = self.dir.clone();
        let name = self.name.clone();
        let reopened = Self::open_with_caches(
            &dir,
            &name,
            self.single_cache_capacity,
            self.two_level_cache_capacity,
        )?;
        *self = reopened;
        Ok(())
    }

    fn copy_live_records(&mut self, rebuilt: &mut TreeIndex) -> Result<()> {
        let records = self.all(None, 0)?.collect::<Result<Vec<_>>>()?;
        for record in records {
            let value = self.values.read(record.start, record.size)?;
            let (start, size) = rebuilt.values.append(&value)?;
            rebuilt.insert(&record.doc_id, &record.key, start, size, record.status)?;
        }
        Ok(())
    }

    /// Last-occurrence descent that remembers each visited node and the
    /// entry index chosen there, for separator propagation after a split.
    fn find_leaf_to_insert(&mut self, key: &[u8]) -> Result<(u32, PathStack, IndexStack)> {
        let mut ancestors = PathStack::new();
        let mut indexes = IndexStack::new();
        if self.root_kind == NodeKind::Leaf {
            return Ok((DATA_START, ancestors, indexes));
        }
        let mut node = DATA_START;
        loop {
            let (count, kind) = self.read_node_meta(node)?;
            let (entry_index, child) = self.find_last_occurrence(node, key, count)?;
            ancestors.push(node);
            indexes.push(entry_index);
            if kind == NodeKind::Leaf {
                return Ok((child, ancestors, indexes));
            }
            node = child;
        }
    }

    /// Descends to the leaf holding the first occurrence of `key`.
    pub(crate) fn find_leaf_first(&mut self, key: &[u8]) -> Result<u32> {
        if self.root_kind == NodeKind::Leaf {
            return Ok(DATA_START);
        }
        let mut node = DATA_START;
        loop {
            let (count, kind) = self.read_node_meta(node)?;
            let (_, child) = self.find_first_occurrence(node, key, count)?;
            if kind == NodeKind::Leaf {
                return Ok(child);
            }
            node = child;
        }
    }

    /// Descends to the leaf holding the last occurrence of `key`.
    pub(crate) fn find_leaf_last(&mut self, key: &[u8]) -> Result<u32> {
        if self.root_kind == NodeKind::Leaf {
            return Ok(DATA_START);
        }
        let mut node = DATA_START;
        loop {
            let (count, kind) = self.read_node_meta(node)?;
            let (_, child) = self.find_last_occurrence(node, key, count)?;
            if kind == NodeKind::Leaf {
                return Ok(child);
            }
            node = child;
        }
    }

    /// Locates `(key, doc_id)` for update/delete. The record must live in
    /// the leaf the first-occurrence descent lands on or in its immediate
    /// successor; anywhere else means the caller's key for this document is
    /// stale and a delete + reinsert is required.
    fn find_key_to_update(&mut self, key: &[u8], doc_id: &[u8]) -> Result<(u32, usize, Record)> {
        let leaf = self.find_leaf_first(key)?;
        let (count, _prev, next) = self.read_leaf_meta(leaf)?;
        match self.find_key_for_update(leaf, key, doc_id, count) {
            Ok(found) => Ok(found),
            Err(IndexError::ElemNotFound) => {
                if next == 0 {
                    return Err(IndexError::TryReindex);
                }
                let count = self.read_leaf_len(next)?;
                match self.find_key_for_update(next, key, doc_id, count) {
                    Ok(found) => Ok(found),
                    Err(IndexError::ElemNotFound) => Err(IndexError::TryReindex),
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }
}

fn buckets_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}_buck"))
}

fn values_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}_stor"))
}
