//! Streaming hash computation over git's object framing.

use crate::{HashAlgorithm, HashError, ObjectId};

enum Inner {
    Sha1(Box<sha1_checked::Sha1>),
    Sha256(sha2::Sha256),
}

/// Incremental hasher producing an [`ObjectId`].
///
/// SHA-1 runs with collision detection; a detected collision attack
/// surfaces as [`HashError::Sha1Collision`] at finalization.
pub struct Hasher {
    inner: Inner,
}

impl Hasher {
    pub fn new(algo: HashAlgorithm) -> Self {
        use digest::Digest;
        let inner = match algo {
            HashAlgorithm::Sha1 => Inner::Sha1(Box::new(sha1_checked::Sha1::new())),
            HashAlgorithm::Sha256 => Inner::Sha256(sha2::Sha256::new()),
        };
        Self { inner }
    }

    /// Feed bytes into the digest.
    pub fn update(&mut self, data: &[u8]) {
        use digest::Digest;
        match &mut self.inner {
            Inner::Sha1(h) => h.update(data),
            Inner::Sha256(h) => h.update(data),
        }
    }

    /// Finish and return the id.
    pub fn finalize(self) -> Result<ObjectId, HashError> {
        match self.inner {
            Inner::Sha1(h) => {
                let digest = h.try_finalize();
                if digest.has_collision() {
                    return Err(HashError::Sha1Collision);
                }
                let mut d = [0u8; 20];
                d.copy_from_slice(digest.hash().as_slice());
                Ok(ObjectId::Sha1(d))
            }
            Inner::Sha256(h) => {
                use digest::Digest;
                let mut d = [0u8; 32];
                d.copy_from_slice(h.finalize().as_slice());
                Ok(ObjectId::Sha256(d))
            }
        }
    }

    /// Hash a flat byte slice in one call.
    pub fn digest(algo: HashAlgorithm, data: &[u8]) -> Result<ObjectId, HashError> {
        let mut h = Self::new(algo);
        h.update(data);
        h.finalize()
    }

    /// Hash an object as git does: `"<type> <size>\0"` then the payload.
    pub fn hash_object(
        algo: HashAlgorithm,
        obj_type: &str,
        payload: &[u8],
    ) -> Result<ObjectId, HashError> {
        let mut h = Self::new(algo);
        h.update(obj_type.as_bytes());
        h.update(b" ");
        h.update(payload.len().to_string().as_bytes());
        h.update(b"\0");
        h.update(payload);
        h.finalize()
    }
}

impl std::io::Write for Hasher {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_blob_vector() {
        // `echo hello | git hash-object --stdin`
        let id = Hasher::hash_object(HashAlgorithm::Sha1, "blob", b"hello\n").unwrap();
        assert_eq!(id.to_hex(), "ce013625030ba8dba906f756967f9e9ca394464a");
    }

    #[test]
    fn empty_blob_vector() {
        let id = Hasher::hash_object(HashAlgorithm::Sha1, "blob", b"").unwrap();
        assert_eq!(id.to_hex(), "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391");
    }

    #[test]
    fn empty_tree_vector() {
        let id = Hasher::hash_object(HashAlgorithm::Sha1, "tree", b"").unwrap();
        assert_eq!(id.to_hex(), "4b825dc642cb6eb9a060e54bf8d69288fbee4904");
    }

    #[test]
    fn incremental_matches_oneshot() {
        let mut h = Hasher::new(HashAlgorithm::Sha1);
        h.update(b"blob 6\0");
        h.update(b"hel");
        h.update(b"lo\n");
        let incremental = h.finalize().unwrap();
        let oneshot = Hasher::digest(HashAlgorithm::Sha1, b"blob 6\0hello\n").unwrap();
        assert_eq!(incremental, oneshot);
    }

    #[test]
    fn write_impl_feeds_digest() {
        use std::io::Write;
        let mut h = Hasher::new(HashAlgorithm::Sha1);
        h.write_all(b"blob 6\0hello\n").unwrap();
        let id = h.finalize().unwrap();
        assert_eq!(id.to_hex(), "ce013625030ba8dba906f756967f9e9ca394464a");
    }

    #[test]
    fn sha256_digest_len() {
        let id = Hasher::hash_object(HashAlgorithm::Sha256, "blob", b"x").unwrap();
        assert_eq!(id.as_bytes().len(), 32);
    }
}
