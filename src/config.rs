//! # Configuration Constants
//!
//! Centralizes the tunable values for bucktree. Interdependent values are
//! documented here and checked at compile time so they cannot drift apart.

/// Default width of a key in bytes. Shorter keys are zero-padded.
pub const DEFAULT_KEY_SIZE: usize = 32;

/// Default width of a document id in bytes. Shorter ids are zero-padded.
pub const DEFAULT_DOC_ID_SIZE: usize = 32;

/// Default number of records/entries per page.
pub const DEFAULT_NODE_CAPACITY: usize = 10;

/// Smallest capacity for which the split size math produces two non-empty
/// halves plus a separator.
pub const MIN_NODE_CAPACITY: usize = 3;

/// Default entry count for the one-level decode caches (keyed by page offset).
pub const DEFAULT_SINGLE_CACHE_CAPACITY: usize = 100;

/// Default entry count for the two-level decode caches (page offset + slot).
pub const DEFAULT_TWO_LEVEL_CACHE_CAPACITY: usize = 150;

/// A full cache evicts `capacity / CACHE_EVICTION_DIVISOR` of its least
/// frequently used entries, but always at least one.
pub const CACHE_EVICTION_DIVISOR: usize = 10;

/// Inline capacity of the descent path stack. Trees deeper than this spill
/// to the heap; with capacity 10 that takes more than 10^8 records.
pub const MAX_TREE_DEPTH: usize = 8;

const _: () = assert!(MIN_NODE_CAPACITY >= 3);
const _: () = assert!(DEFAULT_NODE_CAPACITY >= MIN_NODE_CAPACITY);
const _: () = assert!(CACHE_EVICTION_DIVISOR > 0);
