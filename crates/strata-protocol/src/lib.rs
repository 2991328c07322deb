//! The git smart protocol, server side and shared framing.
//!
//! Pkt-line framing, side-band multiplexing, capability handling, the
//! hardened negotiation context, ref advertisement, and the upload-pack
//! and receive-pack engines that the HTTP layer drives.

pub mod advertise;
pub mod capability;
pub mod negotiation;
pub mod pktline;
pub mod receive_pack;
pub mod sideband;
pub mod upload_pack;

pub use capability::Capabilities;
pub use negotiation::{NegotiationContext, NegotiationLimits};
pub use pktline::{PktLine, PktReader, PktWriter, MAX_PKT_DATA_LEN};
pub use sideband::Band;

/// Zero-id line used on the wire for "no object".
pub const ZERO_SHA_HEX: &str = "0000000000000000000000000000000000000000";

/// Errors produced by protocol parsing and the request engines.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed pkt-line: {0}")]
    MalformedPktLine(String),

    #[error("unexpected end of stream: {0}")]
    Truncated(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("remote error: {0}")]
    Remote(String),

    #[error("invalid object id on the wire: {0:?}")]
    InvalidSha(String),

    #[error("invalid capability: {0}")]
    InvalidCapability(String),

    #[error("ref name exceeds limit: {0} bytes")]
    RefLineTooLong(usize),

    #[error("negotiation limit exceeded: {0}")]
    LimitExceeded(&'static str),

    #[error("negotiation timed out")]
    Timeout,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Pack(#[from] strata_pack::PackError),

    #[error(transparent)]
    Store(#[from] strata_odb::StoreError),

    #[error(transparent)]
    Ref(#[from] strata_ref::RefError),

    #[error(transparent)]
    Object(#[from] strata_object::ObjectError),

    #[error(transparent)]
    Hash(#[from] strata_hash::HashError),
}
