//! Tiered object storage for the gitstrata engine.
//!
//! Objects live in one of three tiers: hot rows in the local SQL surface,
//! warm packfiles in the cloud backing store, and cold columnar files in the
//! backing store fronted by an in-memory bloom + exact cache. Writes land in
//! a bounded buffer that flushes to cold files; blobs above the chunk size
//! are split into ordered chunks, and many small blobs are bin-packed into
//! super-chunks. An object-location index maps every id to its tier.

pub mod backend;
pub mod cache;
pub mod chunk;
pub mod cold;
pub mod db;
pub mod gc;
pub mod hot;
pub mod index;
pub mod lock;
pub mod store;
pub mod superchunk;
pub mod warm;

pub use backend::{BackingMeta, Etag, MemoryStore, ObjectStore};
pub use gc::{GcOptions, GcReport};
pub use index::{Location, LocationIndex, Tier};
pub use lock::{LockHandle, LockManager};
pub use store::{StoreConfig, TieredStore};

use strata_hash::ObjectId;

/// Errors produced by the tiered store and its tiers.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("backing store error: {0}")]
    Backing(String),

    #[error("corrupt artifact {artifact}: {reason}")]
    Corruption { artifact: String, reason: String },

    #[error("object not found: {0}")]
    NotFound(ObjectId),

    #[error("lock on {0} unavailable")]
    LockUnavailable(String),

    #[error(transparent)]
    Sql(#[from] sqlx::Error),

    #[error(transparent)]
    Object(#[from] strata_object::ObjectError),

    #[error(transparent)]
    Pack(#[from] strata_pack::PackError),

    #[error(transparent)]
    Hash(#[from] strata_hash::HashError),

    #[error("manifest for {0} is malformed: {1}")]
    MalformedManifest(String, String),
}

/// Milliseconds since the Unix epoch.
pub(crate) fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
