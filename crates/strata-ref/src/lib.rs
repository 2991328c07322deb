//! The reference system: named pointers into the object graph.
//!
//! Refs are rows in the local SQL surface, namespaced exactly as git does
//! (`refs/heads/*`, `refs/tags/*`, `refs/remotes/<remote>/*`,
//! `refs/worktrees/*`, plus `HEAD`). Direct refs update through
//! compare-and-swap; symbolic refs point at other refs by name.

pub mod branch;
pub mod name;
pub mod store;
pub mod tag;
pub mod worktree;

pub use branch::Branches;
pub use name::validate_name;
pub use store::RefStore;
pub use tag::Tags;
pub use worktree::{WorktreeEntry, Worktrees};

use strata_hash::ObjectId;

/// Errors produced by reference operations.
#[derive(Debug, thiserror::Error)]
pub enum RefError {
    #[error("ref not found: {0}")]
    RefNotFound(String),

    #[error("invalid ref name '{name}': {reason}")]
    InvalidRefName { name: String, reason: String },

    #[error("ref {name} changed underneath the update (expected {expected})")]
    RefLockConflict { name: String, expected: String },

    #[error("ref {0} already exists")]
    AlreadyExists(String),

    #[error("non-fast-forward update of {0} rejected")]
    NonFastForward(String),

    #[error("branch {0} is checked out; refusing to {1} it")]
    BranchInUse(String, &'static str),

    #[error("branch {0} is not fully merged")]
    NotMerged(String),

    #[error("worktree at {0} is locked{1}")]
    WorktreeLocked(String, String),

    #[error("branch {branch} is already checked out in worktree {path}")]
    BranchInWorktree { branch: String, path: String },

    #[error("annotated tag chain deeper than {0}")]
    TagChainTooDeep(usize),

    #[error(transparent)]
    Store(#[from] strata_odb::StoreError),

    #[error(transparent)]
    Sql(#[from] sqlx::Error),

    #[error(transparent)]
    Object(#[from] strata_object::ObjectError),

    #[error(transparent)]
    Hash(#[from] strata_hash::HashError),
}

/// Whether a ref holds an id or names another ref.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    Direct,
    Symbolic,
}

impl RefKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Symbolic => "symbolic",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "direct" => Some(Self::Direct),
            "symbolic" => Some(Self::Symbolic),
            _ => None,
        }
    }
}

/// A stored reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub name: String,
    pub kind: RefKind,
    /// Hex id for direct refs, a ref name for symbolic ones.
    pub target: String,
}

impl Reference {
    /// The id of a direct ref.
    pub fn direct_target(&self) -> Option<ObjectId> {
        match self.kind {
            RefKind::Direct => ObjectId::from_hex(&self.target).ok(),
            RefKind::Symbolic => None,
        }
    }
}

/// Branch tracking state: where a branch follows, and how far apart they are.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tracking {
    pub remote: String,
    pub remote_branch: String,
    pub ahead: u64,
    pub behind: u64,
}
