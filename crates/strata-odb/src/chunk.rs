//! Chunked storage for blobs larger than the chunk size.
//!
//! A logical blob B becomes `ceil(|B| / chunk_size)` ordered chunk objects
//! plus a metadata record; concatenating the chunks in order reproduces B
//! exactly. Chunk keys are derived from the blob's sha and ordinal, so they
//! are stable across retries.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strata_hash::ObjectId;
use strata_object::ObjectType;
use tracing::debug;

use crate::backend::ObjectStore;
use crate::StoreError;

/// Metadata record stored at `__chunked_blob__<sha>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkedBlobMeta {
    pub total_size: u64,
    pub chunk_count: u32,
    pub chunk_keys: Vec<String>,
    pub obj_type: String,
}

/// Chunked-blob reads and writes against the backing store.
pub struct ChunkedBlobs {
    backing: Arc<dyn ObjectStore>,
}

impl ChunkedBlobs {
    pub fn new(backing: Arc<dyn ObjectStore>) -> Self {
        Self { backing }
    }

    fn meta_key(sha: &ObjectId) -> String {
        format!("__chunked_blob__{}", sha.to_hex())
    }

    fn chunk_key(sha: &ObjectId, ordinal: u32) -> String {
        format!("__chunked_blob__{}:{ordinal}", sha.to_hex())
    }

    /// Split and store `content`. Chunks land before the metadata record,
    /// so a crashed write leaves no readable half-blob.
    pub async fn put(
        &self,
        sha: &ObjectId,
        obj_type: ObjectType,
        content: &[u8],
        chunk_size: usize,
    ) -> Result<u32, StoreError> {
        let chunk_size = chunk_size.max(1);
        let mut chunk_keys = Vec::new();
        for (ordinal, piece) in content.chunks(chunk_size).enumerate() {
            let key = Self::chunk_key(sha, ordinal as u32);
            self.backing.put(&key, piece).await?;
            chunk_keys.push(key);
        }
        let meta = ChunkedBlobMeta {
            total_size: content.len() as u64,
            chunk_count: chunk_keys.len() as u32,
            chunk_keys,
            obj_type: obj_type.as_str().to_string(),
        };
        let body = serde_json::to_vec(&meta)
            .map_err(|e| StoreError::Backing(format!("chunk meta encode: {e}")))?;
        self.backing.put(&Self::meta_key(sha), &body).await?;
        debug!(sha = %sha, chunks = meta.chunk_count, bytes = meta.total_size, "stored chunked blob");
        Ok(meta.chunk_count)
    }

    pub async fn meta(&self, sha: &ObjectId) -> Result<Option<ChunkedBlobMeta>, StoreError> {
        let Some(body) = self.backing.get(&Self::meta_key(sha)).await? else {
            return Ok(None);
        };
        let meta: ChunkedBlobMeta =
            serde_json::from_slice(&body).map_err(|e| StoreError::Corruption {
                artifact: Self::meta_key(sha),
                reason: format!("malformed chunk metadata: {e}"),
            })?;
        Ok(Some(meta))
    }

    /// Reassemble a chunked blob in chunk order.
    pub async fn get(&self, sha: &ObjectId) -> Result<Option<(ObjectType, Vec<u8>)>, StoreError> {
        let Some(meta) = self.meta(sha).await? else {
            return Ok(None);
        };
        let obj_type = ObjectType::from_bytes(meta.obj_type.as_bytes())?;
        let mut content = Vec::with_capacity(meta.total_size as usize);
        for key in &meta.chunk_keys {
            let piece = self
                .backing
                .get(key)
                .await?
                .ok_or_else(|| StoreError::Corruption {
                    artifact: key.clone(),
                    reason: "chunk missing from backing store".into(),
                })?;
            content.extend_from_slice(&piece);
        }
        if content.len() as u64 != meta.total_size {
            return Err(StoreError::Corruption {
                artifact: Self::meta_key(sha),
                reason: format!(
                    "reassembled {} bytes, metadata claims {}",
                    content.len(),
                    meta.total_size
                ),
            });
        }
        Ok(Some((obj_type, content)))
    }

    pub async fn contains(&self, sha: &ObjectId) -> Result<bool, StoreError> {
        Ok(self.backing.head(&Self::meta_key(sha)).await?.is_some())
    }

    /// Remove the metadata and every chunk.
    pub async fn delete(&self, sha: &ObjectId) -> Result<bool, StoreError> {
        let Some(meta) = self.meta(sha).await? else {
            return Ok(false);
        };
        self.backing.delete(&Self::meta_key(sha)).await?;
        for key in &meta.chunk_keys {
            self.backing.delete(key).await?;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryStore;
    use strata_hash::{hasher::Hasher, HashAlgorithm};

    fn chunks() -> (ChunkedBlobs, Arc<MemoryStore>) {
        let backing = Arc::new(MemoryStore::new());
        (ChunkedBlobs::new(backing.clone()), backing)
    }

    fn blob_sha(content: &[u8]) -> ObjectId {
        Hasher::hash_object(HashAlgorithm::Sha1, "blob", content).unwrap()
    }

    #[tokio::test]
    async fn split_and_reassemble() {
        let (chunked, _) = chunks();
        let content: Vec<u8> = (0..=255u8).cycle().take(2500).collect();
        let sha = blob_sha(&content);

        let count = chunked
            .put(&sha, ObjectType::Blob, &content, 1000)
            .await
            .unwrap();
        assert_eq!(count, 3); // 1000 + 1000 + 500

        let (ty, reassembled) = chunked.get(&sha).await.unwrap().unwrap();
        assert_eq!(ty, ObjectType::Blob);
        assert_eq!(reassembled, content);
    }

    #[tokio::test]
    async fn exact_multiple_has_no_short_tail() {
        let (chunked, _) = chunks();
        let content = vec![7u8; 3000];
        let sha = blob_sha(&content);
        let count = chunked
            .put(&sha, ObjectType::Blob, &content, 1000)
            .await
            .unwrap();
        assert_eq!(count, 3);
        let meta = chunked.meta(&sha).await.unwrap().unwrap();
        assert_eq!(meta.chunk_count, 3);
        let (_, reassembled) = chunked.get(&sha).await.unwrap().unwrap();
        assert_eq!(reassembled.len(), 3000);
    }

    #[tokio::test]
    async fn missing_chunk_is_corruption() {
        let (chunked, backing) = chunks();
        let content = vec![1u8; 2000];
        let sha = blob_sha(&content);
        chunked
            .put(&sha, ObjectType::Blob, &content, 1000)
            .await
            .unwrap();

        backing
            .delete(&format!("__chunked_blob__{}:1", sha.to_hex()))
            .await
            .unwrap();
        assert!(matches!(
            chunked.get(&sha).await.unwrap_err(),
            StoreError::Corruption { .. }
        ));
    }

    #[tokio::test]
    async fn delete_removes_all_keys() {
        let (chunked, backing) = chunks();
        let content = vec![2u8; 2000];
        let sha = blob_sha(&content);
        chunked
            .put(&sha, ObjectType::Blob, &content, 1000)
            .await
            .unwrap();

        assert!(chunked.delete(&sha).await.unwrap());
        assert!(!chunked.contains(&sha).await.unwrap());
        assert!(backing.list("__chunked_blob__").await.unwrap().is_empty());
        assert!(!chunked.delete(&sha).await.unwrap());
    }
}
