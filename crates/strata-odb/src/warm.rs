//! Warm tier: packfiles in the backing store behind pack indexes.
//!
//! Every pack is uploaded through a staging path, then promoted: the
//! manifest's `status` flips from `staging` to `complete` only after the
//! pack and its index are durable. Readers ignore staging packs, so a
//! crashed upload never serves partial data.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strata_hash::ObjectId;
use strata_object::ObjectType;
use strata_pack::entry::EntryKind;
use strata_pack::write::WrittenEntry;
use strata_pack::{index as pack_index, PackReader};
use tracing::{debug, warn};

use crate::backend::ObjectStore;
use crate::{now_ms, StoreError};

/// Manifest stored next to each pack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackManifest {
    pub pack_id: String,
    pub object_count: u32,
    pub pack_bytes: u64,
    pub status: PackStatus,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackStatus {
    Staging,
    Complete,
}

/// Warm-tier pack operations.
pub struct WarmTier {
    backing: Arc<dyn ObjectStore>,
    prefix: String,
}

impl WarmTier {
    pub fn new(backing: Arc<dyn ObjectStore>, prefix: impl Into<String>) -> Self {
        Self {
            backing,
            prefix: prefix.into(),
        }
    }

    fn pack_key(&self, pack_id: &str) -> String {
        format!("{}packs/{pack_id}.pack", self.prefix)
    }

    fn idx_key(&self, pack_id: &str) -> String {
        format!("{}packs/{pack_id}.idx", self.prefix)
    }

    fn manifest_key(&self, pack_id: &str) -> String {
        format!("{}packs/{pack_id}.manifest", self.prefix)
    }

    fn staging_key(&self, pack_id: &str, suffix: &str) -> String {
        format!("{}staging/{pack_id}.{suffix}", self.prefix)
    }

    /// Store a verified pack with its index, staging first.
    ///
    /// `entries` are the written-entry records from pack construction; the
    /// pack id is the pack's trailing checksum, which makes re-uploading
    /// the same pack idempotent.
    pub async fn store_pack(
        &self,
        pack_bytes: &[u8],
        entries: &[WrittenEntry],
    ) -> Result<String, StoreError> {
        let reader = PackReader::new(pack_bytes)?;
        let checksum = reader.checksum();
        let pack_id = format!("pk-{}", checksum.to_hex());
        let idx = pack_index::build(entries, checksum)?;

        let manifest = PackManifest {
            pack_id: pack_id.clone(),
            object_count: reader.object_count,
            pack_bytes: pack_bytes.len() as u64,
            status: PackStatus::Staging,
            created_at: now_ms(),
        };
        let staging_manifest = serde_json::to_vec(&manifest)
            .map_err(|e| StoreError::Backing(format!("manifest encode: {e}")))?;

        self.backing
            .put(&self.staging_key(&pack_id, "pack"), pack_bytes)
            .await?;
        self.backing
            .put(&self.staging_key(&pack_id, "idx"), &idx)
            .await?;
        self.backing
            .put(&self.staging_key(&pack_id, "manifest"), &staging_manifest)
            .await?;

        // Promote: durable copies first, completed manifest last.
        self.backing.put(&self.pack_key(&pack_id), pack_bytes).await?;
        self.backing.put(&self.idx_key(&pack_id), &idx).await?;
        let complete = PackManifest {
            status: PackStatus::Complete,
            ..manifest
        };
        let body = serde_json::to_vec(&complete)
            .map_err(|e| StoreError::Backing(format!("manifest encode: {e}")))?;
        self.backing.put(&self.manifest_key(&pack_id), &body).await?;

        for suffix in ["pack", "idx", "manifest"] {
            self.backing.delete(&self.staging_key(&pack_id, suffix)).await?;
        }
        debug!(pack_id, objects = complete.object_count, "stored warm pack");
        Ok(pack_id)
    }

    pub async fn manifest(&self, pack_id: &str) -> Result<Option<PackManifest>, StoreError> {
        let Some(body) = self.backing.get(&self.manifest_key(pack_id)).await? else {
            return Ok(None);
        };
        let manifest: PackManifest =
            serde_json::from_slice(&body).map_err(|e| {
                StoreError::MalformedManifest(pack_id.to_string(), e.to_string())
            })?;
        Ok(Some(manifest))
    }

    /// Read one object from a pack: index lookup, then an offset slice.
    pub async fn get(
        &self,
        pack_id: &str,
        sha: &ObjectId,
    ) -> Result<Option<(ObjectType, Vec<u8>)>, StoreError> {
        match self.manifest(pack_id).await? {
            Some(manifest) if manifest.status == PackStatus::Complete => {}
            Some(_) => {
                warn!(pack_id, "ignoring staging pack");
                return Ok(None);
            }
            None => return Ok(None),
        }

        let Some(idx) = self.backing.get(&self.idx_key(pack_id)).await? else {
            return Ok(None);
        };
        let Some((offset, _crc)) = pack_index::lookup(&idx, sha)? else {
            return Ok(None);
        };

        let Some(pack_bytes) = self.backing.get(&self.pack_key(pack_id)).await? else {
            return Err(StoreError::Corruption {
                artifact: self.pack_key(pack_id),
                reason: "index present but pack missing".into(),
            });
        };
        let reader = PackReader::new(&pack_bytes)?;
        let entry = reader.entry_at(offset)?;
        match entry.kind {
            EntryKind::Base(obj_type) => Ok(Some((obj_type, entry.payload))),
            // Warm packs are written from fully resolved objects; a delta
            // here means the container predates this store.
            _ => Err(StoreError::Corruption {
                artifact: self.pack_key(pack_id),
                reason: format!("delta entry at offset {offset} in warm pack"),
            }),
        }
    }

    /// Delete a pack and its sidecars.
    pub async fn delete_pack(&self, pack_id: &str) -> Result<(), StoreError> {
        self.backing.delete(&self.pack_key(pack_id)).await?;
        self.backing.delete(&self.idx_key(pack_id)).await?;
        self.backing.delete(&self.manifest_key(pack_id)).await?;
        Ok(())
    }

    /// Complete pack ids currently stored.
    pub async fn list_packs(&self) -> Result<Vec<String>, StoreError> {
        let keys = self
            .backing
            .list(&format!("{}packs/", self.prefix))
            .await?;
        Ok(keys
            .into_iter()
            .filter_map(|k| {
                k.strip_prefix(&format!("{}packs/", self.prefix))
                    .and_then(|rest| rest.strip_suffix(".manifest"))
                    .map(String::from)
            })
            .collect())
    }
}
