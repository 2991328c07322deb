//! Git object model for the gitstrata engine.
//!
//! Codecs for the four object types, the `"<type> <size>\0"` header framing,
//! identity lines, and the zlib wrapping used for stored object bodies.

pub mod header;
pub mod ident;
pub mod zlib;

mod commit;
mod tag;
mod tree;

pub use commit::Commit;
pub use ident::Ident;
pub use tag::Tag;
pub use tree::{EntryMode, Tree, TreeEntry};

use bstr::BString;
use strata_hash::{HashAlgorithm, HashError, ObjectId};

/// Errors produced by object parsing and serialization.
#[derive(Debug, thiserror::Error)]
pub enum ObjectError {
    #[error("unknown object type: {0}")]
    UnknownType(BString),

    #[error("malformed object header: {0}")]
    MalformedHeader(String),

    #[error("object body truncated: header claims {expected} bytes, found {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("malformed tree entry at byte {offset}: {reason}")]
    MalformedTreeEntry { offset: usize, reason: String },

    #[error("commit is missing its '{0}' header")]
    MissingCommitHeader(&'static str),

    #[error("tag is missing its '{0}' header")]
    MissingTagHeader(&'static str),

    #[error("malformed entry mode: {0}")]
    MalformedMode(String),

    #[error("malformed identity line: {0}")]
    MalformedIdent(String),

    #[error("invalid zlib stream: {0}")]
    ZlibInvalidHeader(String),

    #[error("zlib inflate failed: {0}")]
    ZlibInflate(String),

    #[error(transparent)]
    Hash(#[from] HashError),
}

/// The four git object types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Blob,
    Tree,
    Commit,
    Tag,
}

impl ObjectType {
    pub fn from_bytes(s: &[u8]) -> Result<Self, ObjectError> {
        match s {
            b"blob" => Ok(Self::Blob),
            b"tree" => Ok(Self::Tree),
            b"commit" => Ok(Self::Commit),
            b"tag" => Ok(Self::Tag),
            other => Err(ObjectError::UnknownType(BString::from(other))),
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Blob => "blob",
            Self::Tree => "tree",
            Self::Commit => "commit",
            Self::Tag => "tag",
        }
    }

    /// The 3-bit type code used in pack entry headers.
    pub const fn pack_code(&self) -> u8 {
        match self {
            Self::Commit => 1,
            Self::Tree => 2,
            Self::Blob => 3,
            Self::Tag => 4,
        }
    }

    pub fn from_pack_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Commit),
            2 => Some(Self::Tree),
            3 => Some(Self::Blob),
            4 => Some(Self::Tag),
            _ => None,
        }
    }
}

impl std::fmt::Display for ObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ObjectType {
    type Err = ObjectError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_bytes(s.as_bytes())
    }
}

/// A parsed git object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Object {
    Blob(Vec<u8>),
    Tree(Tree),
    Commit(Commit),
    Tag(Tag),
}

impl Object {
    /// Parse from framed bytes (`"<type> <size>\0<body>"`).
    pub fn parse(data: &[u8]) -> Result<Self, ObjectError> {
        let (obj_type, size, header_len) = header::parse(data)?;
        let body = &data[header_len..];
        if body.len() < size {
            return Err(ObjectError::Truncated {
                expected: size,
                actual: body.len(),
            });
        }
        Self::parse_body(obj_type, &body[..size])
    }

    /// Parse a bare body with a known type.
    pub fn parse_body(obj_type: ObjectType, body: &[u8]) -> Result<Self, ObjectError> {
        match obj_type {
            ObjectType::Blob => Ok(Self::Blob(body.to_vec())),
            ObjectType::Tree => Ok(Self::Tree(Tree::parse(body)?)),
            ObjectType::Commit => Ok(Self::Commit(Commit::parse(body)?)),
            ObjectType::Tag => Ok(Self::Tag(Tag::parse(body)?)),
        }
    }

    pub fn object_type(&self) -> ObjectType {
        match self {
            Self::Blob(_) => ObjectType::Blob,
            Self::Tree(_) => ObjectType::Tree,
            Self::Commit(_) => ObjectType::Commit,
            Self::Tag(_) => ObjectType::Tag,
        }
    }

    /// Serialize the bare body (no header).
    pub fn to_body(&self) -> Vec<u8> {
        match self {
            Self::Blob(data) => data.clone(),
            Self::Tree(t) => t.to_bytes(),
            Self::Commit(c) => c.to_bytes(),
            Self::Tag(t) => t.to_bytes(),
        }
    }

    /// Serialize with the `"<type> <size>\0"` header prepended.
    pub fn to_framed(&self) -> Vec<u8> {
        let body = self.to_body();
        let mut out = header::write(self.object_type(), body.len());
        out.extend_from_slice(&body);
        out
    }

    /// The content address of this object.
    pub fn id(&self, algo: HashAlgorithm) -> Result<ObjectId, HashError> {
        strata_hash::hasher::Hasher::hash_object(algo, self.object_type().as_str(), &self.to_body())
    }
}
