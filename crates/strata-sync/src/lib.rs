//! Mirror/sync orchestration.
//!
//! Reconciles local refs with a remote in either or both directions,
//! fetching the missing object closure in one round and applying a
//! per-ref conflict strategy to diverged histories.

pub mod mirror;
pub mod remote;
pub mod state;

pub use mirror::{Mirror, MirrorOptions, RefSyncResult, SyncReport};
pub use remote::{HttpRemote, MirrorRemote};
pub use state::MirrorState;

/// How a sync moves refs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDirection {
    Pull,
    Push,
    Bidirectional,
}

/// What to do with a diverged ref.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictStrategy {
    /// Remote wins on pull; diverged refs are skipped on push.
    ForceRemote,
    /// Local wins on push; diverged refs are skipped on pull.
    ForceLocal,
    /// Leave diverged refs alone in both directions.
    Skip,
    /// Raise on the first diverged ref.
    Error,
}

impl ConflictStrategy {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ForceRemote => "force-remote",
            Self::ForceLocal => "force-local",
            Self::Skip => "skip",
            Self::Error => "error",
        }
    }
}

/// Errors produced by mirror operations.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("ref {0} has diverged and the conflict strategy is 'error'")]
    Diverged(String),

    #[error("mirror state is malformed: {0}")]
    MalformedState(String),

    #[error(transparent)]
    Client(#[from] strata_client::ClientError),

    #[error(transparent)]
    Transport(#[from] strata_transport::TransportError),

    #[error(transparent)]
    Store(#[from] strata_odb::StoreError),

    #[error(transparent)]
    Ref(#[from] strata_ref::RefError),

    #[error(transparent)]
    Diff(#[from] strata_diff::DiffError),

    #[error(transparent)]
    Protocol(#[from] strata_protocol::ProtocolError),
}
