//! Tree diffing and history helpers for the gitstrata engine.
//!
//! Recursive tree walks, path-level diffs with rename/copy detection,
//! glob pathspec filtering, and merge-base discovery. Content-level
//! merging is out of scope; callers bring their own merger.

pub mod merge_base;
pub mod pathspec;
pub mod rename;
pub mod tree;
pub mod walk;

pub use merge_base::merge_base;
pub use pathspec::Pathspec;
pub use tree::{diff_trees, DiffEntry, DiffOptions};
pub use walk::{walk, WalkEntry};

use strata_hash::ObjectId;

/// Errors produced by diff operations.
#[derive(Debug, thiserror::Error)]
pub enum DiffError {
    #[error("object {0} is not a {1}")]
    WrongType(ObjectId, &'static str),

    #[error("object not found: {0}")]
    MissingObject(ObjectId),

    #[error("invalid pathspec pattern '{0}': {1}")]
    BadPattern(String, String),

    #[error(transparent)]
    Store(#[from] strata_odb::StoreError),

    #[error(transparent)]
    Object(#[from] strata_object::ObjectError),
}

/// How a path changed between two trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Deleted,
    Modified,
    Renamed,
    Copied,
    TypeChanged,
}
