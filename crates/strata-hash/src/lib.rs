//! Content addressing for the gitstrata engine.
//!
//! Provides the `ObjectId` type (SHA-1 by default, SHA-256 recognized), the
//! hex codec, and streaming hash computation over git's canonical
//! `"<type> <size>\0<content>"` framing.

mod algo;
pub mod hex;
mod oid;

pub mod hasher;

pub use algo::HashAlgorithm;
pub use oid::ObjectId;

/// Errors produced by hashing and object-id operations.
#[derive(Debug, thiserror::Error)]
pub enum HashError {
    #[error("invalid hex digit '{character}' at position {position}")]
    InvalidHex { position: usize, character: char },

    #[error("hex string has length {actual}, expected {expected}")]
    InvalidHexLength { expected: usize, actual: usize },

    #[error("digest has length {actual}, expected {expected}")]
    InvalidDigestLength { expected: usize, actual: usize },

    #[error("SHA-1 collision attack detected")]
    Sha1Collision,
}
