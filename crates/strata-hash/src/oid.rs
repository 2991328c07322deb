use std::fmt;
use std::str::FromStr;

use crate::hex;
use crate::{HashAlgorithm, HashError};

/// A content address: the hash of an object's framed bytes.
///
/// Carries the raw digest inline, one variant per supported algorithm.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectId {
    Sha1([u8; 20]),
    Sha256([u8; 32]),
}

impl ObjectId {
    /// The SHA-1 all-zeros id (`0…0`, "no object" on the wire).
    pub const ZERO_SHA1: Self = Self::Sha1([0u8; 20]);
    /// The SHA-256 all-zeros id.
    pub const ZERO_SHA256: Self = Self::Sha256([0u8; 32]);

    /// Build from a raw digest; the algorithm is inferred from the length.
    pub fn from_digest(bytes: &[u8]) -> Result<Self, HashError> {
        match HashAlgorithm::from_digest_len(bytes.len()) {
            Some(HashAlgorithm::Sha1) => {
                let mut d = [0u8; 20];
                d.copy_from_slice(bytes);
                Ok(Self::Sha1(d))
            }
            Some(HashAlgorithm::Sha256) => {
                let mut d = [0u8; 32];
                d.copy_from_slice(bytes);
                Ok(Self::Sha256(d))
            }
            None => Err(HashError::InvalidDigestLength {
                expected: 20,
                actual: bytes.len(),
            }),
        }
    }

    /// Parse a 40- or 64-digit hex string, case-insensitively.
    pub fn from_hex(s: &str) -> Result<Self, HashError> {
        match HashAlgorithm::from_hex_len(s.len()) {
            Some(HashAlgorithm::Sha1) => {
                let mut d = [0u8; 20];
                hex::decode_into(s, &mut d)?;
                Ok(Self::Sha1(d))
            }
            Some(HashAlgorithm::Sha256) => {
                let mut d = [0u8; 32];
                hex::decode_into(s, &mut d)?;
                Ok(Self::Sha256(d))
            }
            None => Err(HashError::InvalidHexLength {
                expected: 40,
                actual: s.len(),
            }),
        }
    }

    /// The raw digest bytes.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Sha1(d) => d,
            Self::Sha256(d) => d,
        }
    }

    /// The algorithm this id was produced with.
    pub fn algorithm(&self) -> HashAlgorithm {
        match self {
            Self::Sha1(_) => HashAlgorithm::Sha1,
            Self::Sha256(_) => HashAlgorithm::Sha256,
        }
    }

    /// Lowercase hex rendering.
    pub fn to_hex(&self) -> String {
        hex::encode(self.as_bytes())
    }

    /// True for the all-zeros "no object" id.
    pub fn is_zero(&self) -> bool {
        self.as_bytes().iter().all(|&b| b == 0)
    }

    /// The first 8 hex digits, for log lines.
    pub fn short(&self) -> String {
        let mut s = self.to_hex();
        s.truncate(8);
        s
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.short())
    }
}

impl FromStr for ObjectId {
    type Err = HashError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_BLOB: &str = "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391";

    #[test]
    fn hex_roundtrip() {
        let id = ObjectId::from_hex(EMPTY_BLOB).unwrap();
        assert_eq!(id.to_hex(), EMPTY_BLOB);
        assert_eq!(id.algorithm(), HashAlgorithm::Sha1);
        let parsed: ObjectId = EMPTY_BLOB.parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn sha256_recognized() {
        let hex64 = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
        let id = ObjectId::from_hex(hex64).unwrap();
        assert_eq!(id.algorithm(), HashAlgorithm::Sha256);
        assert_eq!(id.to_hex(), hex64);
    }

    #[test]
    fn digest_roundtrip() {
        let id = ObjectId::from_hex(EMPTY_BLOB).unwrap();
        assert_eq!(ObjectId::from_digest(id.as_bytes()).unwrap(), id);
    }

    #[test]
    fn rejects_odd_lengths() {
        assert!(ObjectId::from_hex("abcdef").is_err());
        assert!(ObjectId::from_digest(&[0u8; 19]).is_err());
    }

    #[test]
    fn case_insensitive_parse() {
        let upper = EMPTY_BLOB.to_ascii_uppercase();
        assert_eq!(
            ObjectId::from_hex(&upper).unwrap(),
            ObjectId::from_hex(EMPTY_BLOB).unwrap()
        );
    }

    #[test]
    fn zero_detection() {
        assert!(ObjectId::ZERO_SHA1.is_zero());
        assert!(!ObjectId::from_hex(EMPTY_BLOB).unwrap().is_zero());
    }

    #[test]
    fn short_and_debug() {
        let id = ObjectId::from_hex(EMPTY_BLOB).unwrap();
        assert_eq!(id.short(), "e69de29b");
        assert_eq!(format!("{id:?}"), "ObjectId(e69de29b)");
    }

    #[test]
    fn ordering_is_bytewise() {
        let a = ObjectId::from_hex("0000000000000000000000000000000000000001").unwrap();
        let b = ObjectId::from_hex("0000000000000000000000000000000000000002").unwrap();
        assert!(a < b);
    }
}
