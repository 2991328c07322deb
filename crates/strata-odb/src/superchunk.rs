//! Super-chunk compaction: many small blobs, one backing-store object.
//!
//! Blobs below the compaction threshold are bin-packed largest-first into
//! super-chunks of at most `max_chunk_bytes`. Each super-chunk is a small
//! JSON header, a NUL, then concatenated bodies; every blob gets an index
//! entry recording its chunk, offset, and size. Deletion only marks the
//! index entry — space comes back when a full compaction rewrites the
//! surviving blobs into fresh super-chunks.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strata_hash::{hasher::Hasher, HashAlgorithm, ObjectId};
use strata_object::ObjectType;
use tracing::{debug, info};

use crate::backend::ObjectStore;
use crate::StoreError;

const HEADER_VERSION: u32 = 1;

/// Header serialized in front of the packed bodies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuperChunkHeader {
    pub version: u32,
    pub blob_count: u32,
    pub total_size: u64,
}

/// Per-blob index entry at `__compaction_idx__<sha>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionEntry {
    pub sha: String,
    pub super_chunk_id: String,
    pub offset_in_data: u64,
    pub size: u64,
    pub obj_type: String,
    #[serde(default)]
    pub deleted: bool,
}

/// A small blob queued for packing.
#[derive(Debug, Clone)]
pub struct SmallBlob {
    pub sha: ObjectId,
    pub obj_type: ObjectType,
    pub content: Vec<u8>,
}

/// Where a packed blob landed.
#[derive(Debug, Clone)]
pub struct PackedBlobRef {
    pub sha: ObjectId,
    pub super_chunk_id: String,
    pub offset_in_data: u64,
    pub size: u64,
}

/// Packs, reads, and rewrites super-chunks.
pub struct SuperChunkStore {
    backing: Arc<dyn ObjectStore>,
    max_chunk_bytes: usize,
}

impl SuperChunkStore {
    pub fn new(backing: Arc<dyn ObjectStore>, max_chunk_bytes: usize) -> Self {
        Self {
            backing,
            max_chunk_bytes: max_chunk_bytes.max(1),
        }
    }

    fn chunk_key(id: &str) -> String {
        format!("__super_chunk__{id}")
    }

    fn meta_key(id: &str) -> String {
        format!("__super_chunk__{id}:meta")
    }

    fn index_key(sha: &ObjectId) -> String {
        format!("__compaction_idx__{}", sha.to_hex())
    }

    /// Bin-pack `blobs` (largest-first) into super-chunks and write them.
    /// Returns one placement record per blob.
    pub async fn pack(&self, mut blobs: Vec<SmallBlob>) -> Result<Vec<PackedBlobRef>, StoreError> {
        if blobs.is_empty() {
            return Ok(Vec::new());
        }
        blobs.sort_by(|a, b| b.content.len().cmp(&a.content.len()));

        // First-fit over open bins.
        let mut bins: Vec<(Vec<SmallBlob>, usize)> = Vec::new();
        for blob in blobs {
            let len = blob.content.len();
            match bins
                .iter_mut()
                .find(|(_, used)| used + len <= self.max_chunk_bytes)
            {
                Some((bin, used)) => {
                    bin.push(blob);
                    *used += len;
                }
                None => bins.push((vec![blob], len)),
            }
        }

        let mut placements = Vec::new();
        for (bin, _) in bins {
            placements.extend(self.write_chunk(bin).await?);
        }
        Ok(placements)
    }

    async fn write_chunk(&self, blobs: Vec<SmallBlob>) -> Result<Vec<PackedBlobRef>, StoreError> {
        let total_size: u64 = blobs.iter().map(|b| b.content.len() as u64).sum();
        let header = SuperChunkHeader {
            version: HEADER_VERSION,
            blob_count: blobs.len() as u32,
            total_size,
        };
        let header_json = serde_json::to_vec(&header)
            .map_err(|e| StoreError::Backing(format!("super-chunk header encode: {e}")))?;

        let mut image = header_json;
        image.push(0);
        let data_start = image.len();
        let mut offsets = Vec::with_capacity(blobs.len());
        for blob in &blobs {
            offsets.push((image.len() - data_start) as u64);
            image.extend_from_slice(&blob.content);
        }

        let digest = Hasher::digest(HashAlgorithm::Sha1, &image)?;
        let chunk_id = format!("sc-{}", digest.to_hex());
        self.backing.put(&Self::chunk_key(&chunk_id), &image).await?;
        self.backing
            .put(&Self::meta_key(&chunk_id), &serde_json::to_vec(&header).unwrap_or_default())
            .await?;

        let mut placements = Vec::with_capacity(blobs.len());
        for (blob, offset) in blobs.iter().zip(offsets) {
            let entry = CompactionEntry {
                sha: blob.sha.to_hex(),
                super_chunk_id: chunk_id.clone(),
                offset_in_data: offset,
                size: blob.content.len() as u64,
                obj_type: blob.obj_type.as_str().to_string(),
                deleted: false,
            };
            let body = serde_json::to_vec(&entry)
                .map_err(|e| StoreError::Backing(format!("compaction entry encode: {e}")))?;
            self.backing.put(&Self::index_key(&blob.sha), &body).await?;
            placements.push(PackedBlobRef {
                sha: blob.sha,
                super_chunk_id: chunk_id.clone(),
                offset_in_data: offset,
                size: blob.content.len() as u64,
            });
        }
        debug!(chunk_id, blobs = header.blob_count, bytes = total_size, "packed super-chunk");
        Ok(placements)
    }

    pub async fn index_entry(
        &self,
        sha: &ObjectId,
    ) -> Result<Option<CompactionEntry>, StoreError> {
        let Some(body) = self.backing.get(&Self::index_key(sha)).await? else {
            return Ok(None);
        };
        let entry: CompactionEntry =
            serde_json::from_slice(&body).map_err(|e| StoreError::Corruption {
                artifact: Self::index_key(sha),
                reason: format!("malformed compaction entry: {e}"),
            })?;
        Ok(Some(entry))
    }

    /// Extract one blob through its index entry.
    pub async fn get(&self, sha: &ObjectId) -> Result<Option<(ObjectType, Vec<u8>)>, StoreError> {
        let Some(entry) = self.index_entry(sha).await? else {
            return Ok(None);
        };
        if entry.deleted {
            return Ok(None);
        }
        let chunk_key = Self::chunk_key(&entry.super_chunk_id);
        let Some(image) = self.backing.get(&chunk_key).await? else {
            return Err(StoreError::Corruption {
                artifact: chunk_key,
                reason: "super-chunk missing but index entry survives".into(),
            });
        };
        let data_start = image
            .iter()
            .position(|&b| b == 0)
            .map(|p| p + 1)
            .ok_or_else(|| StoreError::Corruption {
                artifact: chunk_key.clone(),
                reason: "missing header terminator".into(),
            })?;
        let start = data_start + entry.offset_in_data as usize;
        let end = start + entry.size as usize;
        if end > image.len() {
            return Err(StoreError::Corruption {
                artifact: chunk_key,
                reason: format!("entry spans {start}..{end} beyond {} bytes", image.len()),
            });
        }
        let obj_type = ObjectType::from_bytes(entry.obj_type.as_bytes())?;
        let content = image[start..end].to_vec();
        let actual = Hasher::hash_object(HashAlgorithm::Sha1, obj_type.as_str(), &content)?;
        if actual != *sha {
            return Err(StoreError::Corruption {
                artifact: chunk_key,
                reason: format!("entry for {sha} hashes to {actual}"),
            });
        }
        Ok(Some((obj_type, content)))
    }

    /// Soft-delete: flip the index entry; bytes stay until full compaction.
    pub async fn mark_deleted(&self, sha: &ObjectId) -> Result<bool, StoreError> {
        let Some(mut entry) = self.index_entry(sha).await? else {
            return Ok(false);
        };
        if entry.deleted {
            return Ok(true);
        }
        entry.deleted = true;
        let body = serde_json::to_vec(&entry)
            .map_err(|e| StoreError::Backing(format!("compaction entry encode: {e}")))?;
        self.backing.put(&Self::index_key(sha), &body).await?;
        Ok(true)
    }

    /// Rewrite live blobs into fresh super-chunks and drop the old ones.
    /// Returns `(chunks_removed, blobs_rewritten)`.
    pub async fn compact(&self) -> Result<(usize, usize), StoreError> {
        let chunk_keys = self.backing.list("__super_chunk__").await?;
        let old_ids: Vec<String> = chunk_keys
            .iter()
            .filter(|k| !k.ends_with(":meta"))
            .filter_map(|k| k.strip_prefix("__super_chunk__").map(String::from))
            .collect();
        if old_ids.is_empty() {
            return Ok((0, 0));
        }

        let mut live = Vec::new();
        for key in self.backing.list("__compaction_idx__").await? {
            let Some(body) = self.backing.get(&key).await? else {
                continue;
            };
            let entry: CompactionEntry =
                serde_json::from_slice(&body).map_err(|e| StoreError::Corruption {
                    artifact: key.clone(),
                    reason: format!("malformed compaction entry: {e}"),
                })?;
            if entry.deleted {
                self.backing.delete(&key).await?;
                continue;
            }
            let sha = ObjectId::from_hex(&entry.sha)?;
            if let Some((obj_type, content)) = self.get(&sha).await? {
                live.push(SmallBlob {
                    sha,
                    obj_type,
                    content,
                });
            }
        }

        let rewritten = live.len();
        self.pack(live).await?;

        // Drop chunks that no live index entry references any more.
        let mut referenced = std::collections::HashSet::new();
        for key in self.backing.list("__compaction_idx__").await? {
            if let Some(body) = self.backing.get(&key).await? {
                if let Ok(entry) = serde_json::from_slice::<CompactionEntry>(&body) {
                    referenced.insert(entry.super_chunk_id);
                }
            }
        }
        let mut removed = 0;
        for id in old_ids {
            if !referenced.contains(&id) {
                self.backing.delete(&Self::chunk_key(&id)).await?;
                self.backing.delete(&Self::meta_key(&id)).await?;
                removed += 1;
            }
        }
        info!(removed, rewritten, "super-chunk compaction finished");
        Ok((removed, rewritten))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryStore;

    fn blob(content: &[u8]) -> SmallBlob {
        SmallBlob {
            sha: Hasher::hash_object(HashAlgorithm::Sha1, "blob", content).unwrap(),
            obj_type: ObjectType::Blob,
            content: content.to_vec(),
        }
    }

    fn store() -> SuperChunkStore {
        SuperChunkStore::new(Arc::new(MemoryStore::new()), 1 << 21)
    }

    #[tokio::test]
    async fn pack_and_extract() {
        let sc = store();
        let blobs = vec![blob(b"aa"), blob(b"bbbb"), blob(b"cccccc")];
        let placements = sc.pack(blobs.clone()).await.unwrap();
        assert_eq!(placements.len(), 3);
        let distinct: std::collections::HashSet<_> =
            placements.iter().map(|p| p.super_chunk_id.clone()).collect();
        assert_eq!(distinct.len(), 1);

        for b in &blobs {
            let (ty, content) = sc.get(&b.sha).await.unwrap().unwrap();
            assert_eq!(ty, ObjectType::Blob);
            assert_eq!(content, b.content);
        }
    }

    #[tokio::test]
    async fn bins_split_at_capacity() {
        let sc = SuperChunkStore::new(Arc::new(MemoryStore::new()), 10);
        let blobs = vec![blob(b"123456"), blob(b"abcdef"), blob(b"xy")];
        let placements = sc.pack(blobs.clone()).await.unwrap();
        // 6 + 2 fit one bin, the other 6 needs its own.
        let distinct: std::collections::HashSet<_> =
            placements.iter().map(|p| p.super_chunk_id.clone()).collect();
        assert_eq!(distinct.len(), 2);
        for b in &blobs {
            assert!(sc.get(&b.sha).await.unwrap().is_some());
        }
    }

    #[tokio::test]
    async fn delete_marks_then_compaction_reclaims() {
        let backing = Arc::new(MemoryStore::new());
        let sc = SuperChunkStore::new(backing.clone(), 1 << 21);
        let keep = blob(b"keep me around");
        let drop_me = blob(b"drop me");
        sc.pack(vec![keep.clone(), drop_me.clone()]).await.unwrap();

        assert!(sc.mark_deleted(&drop_me.sha).await.unwrap());
        assert!(sc.get(&drop_me.sha).await.unwrap().is_none());
        // Bytes are still there until compaction runs.
        assert_eq!(
            backing
                .list("__super_chunk__")
                .await
                .unwrap()
                .iter()
                .filter(|k| !k.ends_with(":meta"))
                .count(),
            1
        );

        let (removed, rewritten) = sc.compact().await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(rewritten, 1);
        let (_, content) = sc.get(&keep.sha).await.unwrap().unwrap();
        assert_eq!(content, b"keep me around");
        assert!(sc.get(&drop_me.sha).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_pack_is_noop() {
        let sc = store();
        assert!(sc.pack(Vec::new()).await.unwrap().is_empty());
        assert_eq!(sc.compact().await.unwrap(), (0, 0));
    }
}
