//! Client-side protocol operations: ref discovery, clone, fetch, push.

pub mod clone;
pub mod discovery;
pub mod fetch;
pub mod push;

pub use clone::clone;
pub use discovery::{parse_advertisement, RemoteRefs};
pub use fetch::{fetch, FetchOptions, FetchOutcome};
pub use push::{push, PushOutcome, PushUpdate};

/// Errors produced by client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("malformed ref advertisement: {0}")]
    MalformedAdvertisement(String),

    #[error("remote rejected push of {name}: {reason}")]
    PushRejected { name: String, reason: String },

    #[error(transparent)]
    Transport(#[from] strata_transport::TransportError),

    #[error(transparent)]
    Protocol(#[from] strata_protocol::ProtocolError),

    #[error(transparent)]
    Store(#[from] strata_odb::StoreError),

    #[error(transparent)]
    Ref(#[from] strata_ref::RefError),

    #[error(transparent)]
    Pack(#[from] strata_pack::PackError),

    #[error(transparent)]
    Hash(#[from] strata_hash::HashError),
}
