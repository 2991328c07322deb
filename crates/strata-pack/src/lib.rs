//! Packfile codec for the gitstrata engine.
//!
//! A pack is `"PACK" <be32 version> <be32 count>` followed by entries and a
//! trailing SHA-1 over everything before it. Entries are either full objects
//! (zlib body) or deltas against a base named by in-pack offset (OFS) or by
//! object id (REF).

pub mod delta;
pub mod entry;
pub mod index;
pub mod parse;
pub mod resolve;
pub mod write;

pub use entry::{EntryHeader, EntryKind};
pub use parse::{PackReader, RawEntry};
pub use resolve::{resolve, ResolvedEntry, Resolution};
pub use write::PackWriter;

use strata_hash::ObjectId;

/// Pack signature bytes.
pub const PACK_SIGNATURE: &[u8; 4] = b"PACK";
/// Version written by this implementation.
pub const PACK_VERSION: u32 = 2;
/// Fixed header size: signature + version + object count.
pub const PACK_HEADER_LEN: usize = 12;

/// Errors produced by pack parsing, resolution, and writing.
#[derive(Debug, thiserror::Error)]
pub enum PackError {
    #[error("malformed pack: {0}")]
    MalformedPack(String),

    #[error("unsupported pack version {0}")]
    UnsupportedVersion(u32),

    #[error("corrupt pack entry at offset {offset}: {reason}")]
    CorruptEntry { offset: u64, reason: String },

    #[error("malformed delta at offset {offset}: {reason}")]
    MalformedDelta { offset: u64, reason: String },

    #[error("delta copy out of bounds: offset {offset} + size {size} > base length {base_len}")]
    DeltaOutOfBounds {
        offset: usize,
        size: usize,
        base_len: usize,
    },

    #[error("thin pack references missing base {0}")]
    ThinPackMissingBase(ObjectId),

    #[error("pack checksum mismatch: expected {expected}, computed {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error(transparent)]
    Object(#[from] strata_object::ObjectError),

    #[error(transparent)]
    Hash(#[from] strata_hash::HashError),
}
