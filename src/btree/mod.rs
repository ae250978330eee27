//! # B+Tree Engine
//!
//! The algorithmic core of bucktree: a balanced B+tree whose leaves hold
//! fixed-width records and form a doubly-linked list in key order, with
//! interior nodes holding separator keys and child pointers.
//!
//! ## Node Types
//!
//! - **Leaf pages** store the records. Records are kept key-ascending;
//!   duplicate keys are kept in insertion order. Deleting a record only
//!   flips its status byte to a tombstone.
//!
//! - **Interior node pages** store separator keys and child pointers laid
//!   out `p0 k0 p1 k1 p2 ...`: children reached through the pointer left of
//!   a key hold keys `<=` that key.
//!
//! ## Descent Modes
//!
//! Duplicate keys make the choice of child ambiguous at a node whose
//! separator equals the search key. Two binary-search modes resolve it:
//! first-occurrence mode descends left of the first equal separator (used by
//! lookups and ascending range starts), last-occurrence mode descends right
//! of the last equal separator (used by inserts, which append duplicates
//! after their equals, and by descending range starts).
//!
//! ## Splits
//!
//! A full page splits by staging the capacity + 1 records in memory, writing
//! the upper half as a brand-new page at end-of-file, cutting the surviving
//! page down in place, and propagating one separator to the parent -
//! recursively, with a new root page when the split reaches the top. A leaf
//! about to split first re-checks the staged records for tombstones and
//! reclaims them in place instead of growing the tree.
//!
//! ## Module Layout
//!
//! - `tree`: the `TreeIndex` type, lifecycle and the public operations
//! - `leaf`: leaf page accessors, in-leaf searches, placement, leaf splits
//! - `interior`: node page accessors, descent searches, separator
//!   insertion, node splits
//! - `scan`: the lazy `RangeScan` iterator behind every range query

mod interior;
mod leaf;
mod scan;
mod tree;

pub use scan::RangeScan;
pub use tree::{TreeIndex, TreeIndexOptions};
