use crate::ObjectId;

/// Hash algorithms understood by the engine.
///
/// SHA-1 is the storage format. SHA-256 is recognized so that
/// `object-format` capability negotiation can name it, but repositories
/// are not required to use it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HashAlgorithm {
    #[default]
    Sha1,
    Sha256,
}

impl HashAlgorithm {
    /// Digest length in bytes.
    pub const fn digest_len(&self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Sha256 => 32,
        }
    }

    /// Length of the lowercase hex rendering.
    pub const fn hex_len(&self) -> usize {
        self.digest_len() * 2
    }

    /// The all-zeros id used on the wire for "no object".
    pub const fn zero_id(&self) -> ObjectId {
        match self {
            Self::Sha1 => ObjectId::ZERO_SHA1,
            Self::Sha256 => ObjectId::ZERO_SHA256,
        }
    }

    /// Algorithm for a given hex length (40 or 64), if any.
    pub fn from_hex_len(len: usize) -> Option<Self> {
        match len {
            40 => Some(Self::Sha1),
            64 => Some(Self::Sha256),
            _ => None,
        }
    }

    /// Algorithm for a raw digest length (20 or 32), if any.
    pub fn from_digest_len(len: usize) -> Option<Self> {
        match len {
            20 => Some(Self::Sha1),
            32 => Some(Self::Sha256),
            _ => None,
        }
    }

    /// Name as it appears in the `object-format` capability.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
        }
    }

    /// Parse an `object-format` capability value.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "sha1" => Some(Self::Sha1),
            "sha256" => Some(Self::Sha256),
            _ => None,
        }
    }
}

impl std::fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
