//! Error types for bucktree.
//!
//! Lookup misses (`ElemNotFound`, `DocIdNotFound`, `TryReindex`) are ordinary
//! recoverable conditions returned to the caller. Structural problems
//! (`Corrupted`, `Format`, `NodeCapacity`) are fatal at create/open time.
//! I/O errors propagate unchanged; the engine performs no internal retries.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using [`IndexError`].
pub type Result<T> = std::result::Result<T, IndexError>;

/// Errors surfaced by index operations.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Index constructed with a node capacity the split math cannot support.
    #[error("node capacity must be at least 3, got {0}")]
    NodeCapacity(usize),

    /// Inconsistent layout parameters or an input wider than its field.
    #[error("invalid format: {0}")]
    Format(String),

    /// `create` refused to overwrite existing index files.
    #[error("index already exists: {}", .0.display())]
    AlreadyExists(PathBuf),

    /// `open` found no index files at the given path.
    #[error("index does not exist: {}", .0.display())]
    DoesNotExist(PathBuf),

    /// Unreadable header, bad magic/version/checksum, or an invalid flag byte.
    #[error("index corrupted: {0}")]
    Corrupted(String),

    /// No live record with the requested key.
    #[error("element not found")]
    ElemNotFound,

    /// The key exists, but no live record carries the expected document id.
    #[error("doc id not found")]
    DocIdNotFound,

    /// Update/delete could not locate the (key, doc id) pair in the key's
    /// leaf neighbourhood; the caller should delete and reinsert the document.
    #[error("record not found near its expected leaf, reindex required")]
    TryReindex,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
