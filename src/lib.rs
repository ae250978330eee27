//! # bucktree - Embedded B+Tree Document Index
//!
//! bucktree is an embedded, single-writer document index built on an on-disk
//! B+tree. It maps fixed-width keys to document ids and value locations, and
//! keeps the variable-length payloads in a companion append-only value store.
//!
//! ## Quick Start
//!
//! ```ignore
//! use bucktree::{RecordStatus, TreeIndex, TreeIndexOptions};
//!
//! let mut index = TreeIndex::create(
//!     "./data",
//!     "by_title",
//!     TreeIndexOptions::default().node_capacity(64),
//! )?;
//!
//! index.insert(b"doc-1", b"aardvark", 0, 0, RecordStatus::Live)?;
//! let entry = index.get(b"aardvark")?;
//!
//! for record in index.all(None, 0)? {
//!     let record = record?;
//!     println!("{:?}", record.key);
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │   Public API (TreeIndex, RangeScan)  │
//! ├──────────────────────────────────────┤
//! │  B+Tree Engine (descent, split,      │
//! │  tombstones, leaf linked-list scans) │
//! ├───────────────────┬──────────────────┤
//! │   Decode Cache    │  Record Codec    │
//! ├───────────────────┴──────────────────┤
//! │  Paged Tree File  │  Value Storage   │
//! └──────────────────────────────────────┘
//! ```
//!
//! ## File Layout
//!
//! Each index owns two files in its directory:
//!
//! ```text
//! <dir>/
//! ├── <name>_buck    # header, root flag, then leaf/node pages
//! └── <name>_stor    # append-only value payloads, addressed (start, size)
//! ```
//!
//! All data records live in leaf pages that form a doubly-linked list in key
//! order, so ordered scans never touch interior nodes. Pages never move once
//! written; splits append the new half at end-of-file and rewrite only the
//! surviving half in place.
//!
//! ## Concurrency Contract
//!
//! The engine is strictly single-writer and performs no internal locking.
//! Every operation, including scans, takes `&mut self`, which makes the
//! serialization requirement compile-time checked within one process. Callers
//! that share an index across threads must wrap it in their own lock.
//!
//! ## Module Overview
//!
//! - [`btree`]: tree engine, public operations, range scans
//! - [`storage`]: tree file, value store, on-disk headers
//! - [`cache`]: LFU decode caches, invalidated on every page mutation
//! - [`record`]: fixed-width leaf/node record codec
//! - [`format`]: per-index layout parameters and derived sizes

pub mod btree;
pub mod cache;
pub mod config;
pub mod error;
pub mod format;
pub mod record;
pub mod storage;

pub use btree::{RangeScan, TreeIndex, TreeIndexOptions};
pub use error::{IndexError, Result};
pub use format::TreeFormat;
pub use record::{Record, RecordStatus};
