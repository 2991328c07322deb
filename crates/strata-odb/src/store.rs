//! The tiered store facade: one `put`/`get` surface over all tiers.
//!
//! Writes are content-addressed and idempotent. Small objects gather in the
//! write buffer until the flush policy trips, then land in a cold columnar
//! file (or a super-chunk when enough of them are tiny). Oversized blobs
//! are chunked immediately. Reads walk buffer → hot → warm → cold, guided
//! by the location index, and promote small warm/cold hits into hot rows.

use std::collections::HashSet;
use std::sync::Arc;

use sqlx::SqlitePool;
use strata_hash::{hasher::Hasher, HashAlgorithm, ObjectId};
use strata_object::{Object, ObjectType};
use strata_pack::write::WrittenEntry;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::backend::ObjectStore;
use crate::cache::{Bloom, BufferedObject, CachedPresence, ExactCache, WriteBuffer};
use crate::chunk::ChunkedBlobs;
use crate::cold::{ColdRow, ColdTier};
use crate::hot::HotTier;
use crate::index::{Location, LocationIndex, Tier};
use crate::lock::LockManager;
use crate::superchunk::{SmallBlob, SuperChunkStore};
use crate::warm::WarmTier;
use crate::{db, StoreError};

/// Location-index container marker for chunked blobs.
const CHUNKED_MARKER: &str = "__chunked__";

/// Tuning knobs; defaults match the engine's documented limits.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Blobs above this size are chunked at write time (2 MiB).
    pub chunk_size: usize,
    /// Blobs below this size are candidates for super-chunk packing (64 KiB).
    pub compaction_threshold: usize,
    /// Minimum number of tiny blobs in one flush before packing them.
    pub min_blobs_for_compaction: usize,
    /// Flush when the buffer holds this many objects…
    pub flush_max_objects: usize,
    /// …or this many bytes.
    pub flush_max_bytes: usize,
    /// Backing-store key prefix for this repository.
    pub prefix: String,
    pub exact_cache_capacity: usize,
    pub bloom_bits: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            chunk_size: 2 * 1024 * 1024,
            compaction_threshold: 64 * 1024,
            min_blobs_for_compaction: 10,
            flush_max_objects: 256,
            flush_max_bytes: 8 * 1024 * 1024,
            prefix: String::new(),
            exact_cache_capacity: 4096,
            bloom_bits: 1 << 20,
        }
    }
}

struct MemState {
    bloom: Bloom,
    exact: ExactCache,
    buffer: WriteBuffer,
}

/// The tiered object store for one repository.
pub struct TieredStore {
    index: LocationIndex,
    hot: HotTier,
    warm: WarmTier,
    cold: ColdTier,
    chunks: ChunkedBlobs,
    superchunks: SuperChunkStore,
    locks: LockManager,
    state: Mutex<MemState>,
    config: StoreConfig,
}

impl TieredStore {
    pub async fn open(
        backing: Arc<dyn ObjectStore>,
        pool: SqlitePool,
        config: StoreConfig,
    ) -> Result<Self, StoreError> {
        db::init_schema(&pool).await?;
        Ok(Self {
            index: LocationIndex::new(pool.clone()),
            hot: HotTier::new(pool),
            warm: WarmTier::new(backing.clone(), config.prefix.clone()),
            cold: ColdTier::new(backing.clone(), format!("{}cold/", config.prefix)),
            chunks: ChunkedBlobs::new(backing.clone()),
            superchunks: SuperChunkStore::new(backing.clone(), config.chunk_size),
            locks: LockManager::new(backing, config.prefix.clone()),
            state: Mutex::new(MemState {
                bloom: Bloom::new(config.bloom_bits, 3),
                exact: ExactCache::new(config.exact_cache_capacity),
                buffer: WriteBuffer::new(),
            }),
            config,
        })
    }

    pub fn index(&self) -> &LocationIndex {
        &self.index
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Write an object. Returns its content address.
    ///
    /// Writing the same content twice returns the same id and stores it
    /// once, regardless of which tier already holds it.
    pub async fn put(&self, obj_type: ObjectType, content: &[u8]) -> Result<ObjectId, StoreError> {
        let sha = Hasher::hash_object(HashAlgorithm::Sha1, obj_type.as_str(), content)?;

        {
            let mut state = self.state.lock().await;
            if state.buffer.contains(&sha) || state.exact.get(&sha).is_some() {
                return Ok(sha);
            }
        }
        if self.index.lookup(&sha).await?.is_some() {
            let mut state = self.state.lock().await;
            state.exact.insert(
                sha,
                CachedPresence {
                    obj_type,
                    size: content.len() as u64,
                },
            );
            return Ok(sha);
        }

        if content.len() > self.config.chunk_size {
            self.chunks
                .put(&sha, obj_type, content, self.config.chunk_size)
                .await?;
            self.index
                .record(&Location {
                    sha,
                    tier: Tier::Cold,
                    pack_id: Some(CHUNKED_MARKER.to_string()),
                    offset: None,
                    size: content.len() as u64,
                    obj_type: Some(obj_type),
                    created_at: 0,
                    updated_at: 0,
                })
                .await?;
            let mut state = self.state.lock().await;
            state.bloom.insert(&sha);
            state.exact.insert(
                sha,
                CachedPresence {
                    obj_type,
                    size: content.len() as u64,
                },
            );
            return Ok(sha);
        }

        let should_flush = {
            let mut state = self.state.lock().await;
            state.bloom.insert(&sha);
            state.buffer.push(BufferedObject {
                sha,
                obj_type,
                content: content.to_vec(),
            });
            state.buffer.len() >= self.config.flush_max_objects
                || state.buffer.bytes() >= self.config.flush_max_bytes
        };
        if should_flush {
            self.flush().await?;
        }
        Ok(sha)
    }

    /// Write a parsed object.
    pub async fn put_object(&self, obj: &Object) -> Result<ObjectId, StoreError> {
        self.put(obj.object_type(), &obj.to_body()).await
    }

    /// Read an object from whichever tier holds it.
    pub async fn get(&self, sha: &ObjectId) -> Result<Option<(ObjectType, Vec<u8>)>, StoreError> {
        {
            let state = self.state.lock().await;
            if let Some(buffered) = state.buffer.get(sha) {
                return Ok(Some((buffered.obj_type, buffered.content.clone())));
            }
        }

        if let Some(hit) = self.hot.get(sha).await? {
            return Ok(Some(hit));
        }

        let Some(loc) = self.index.lookup(sha).await? else {
            return Ok(None);
        };

        let hit = match loc.tier {
            Tier::Hot => None, // row vanished under the index
            Tier::Warm => match &loc.pack_id {
                Some(pack_id) => self.warm.get(pack_id, sha).await?,
                None => None,
            },
            Tier::Cold => match loc.pack_id.as_deref() {
                Some(CHUNKED_MARKER) => self.chunks.get(sha).await?,
                Some(id) if id.starts_with("sc-") => self.superchunks.get(sha).await?,
                Some(file_id) => self.cold.get(file_id, sha).await?,
                None => None,
            },
        };

        match hit {
            Some((obj_type, content)) => {
                self.promote(sha, obj_type, &content, loc.tier).await?;
                Ok(Some((obj_type, content)))
            }
            None => {
                // The index pointed at an artifact that no longer holds the
                // object. Repair the stale row rather than serve a miss forever.
                warn!(sha = %sha, tier = loc.tier.as_str(), "index entry stale, repairing");
                self.index.delete(sha).await?;
                let mut state = self.state.lock().await;
                state.exact.remove(sha);
                Ok(None)
            }
        }
    }

    /// Read and parse.
    pub async fn get_object(&self, sha: &ObjectId) -> Result<Option<Object>, StoreError> {
        match self.get(sha).await? {
            Some((obj_type, content)) => Ok(Some(Object::parse_body(obj_type, &content)?)),
            None => Ok(None),
        }
    }

    pub async fn contains(&self, sha: &ObjectId) -> Result<bool, StoreError> {
        {
            let mut state = self.state.lock().await;
            if state.buffer.contains(sha) || state.exact.get(sha).is_some() {
                return Ok(true);
            }
        }
        // The bloom only covers writes through this handle; other instances
        // may have written the object, so the index is authoritative.
        Ok(self.index.lookup(sha).await?.is_some())
    }

    /// Which of `shas` the store does not hold.
    pub async fn missing(&self, shas: &[ObjectId]) -> Result<Vec<ObjectId>, StoreError> {
        let mut unknown = Vec::new();
        {
            let state = self.state.lock().await;
            for sha in shas {
                if !state.buffer.contains(sha) {
                    unknown.push(*sha);
                }
            }
        }
        let (_, missing) = self.index.batch_lookup(&unknown).await?;
        Ok(missing)
    }

    /// Small warm/cold hits graduate into hot rows; larger ones just get
    /// their index freshness bumped.
    async fn promote(
        &self,
        sha: &ObjectId,
        obj_type: ObjectType,
        content: &[u8],
        from: Tier,
    ) -> Result<(), StoreError> {
        {
            let mut state = self.state.lock().await;
            state.exact.insert(
                *sha,
                CachedPresence {
                    obj_type,
                    size: content.len() as u64,
                },
            );
        }
        if from != Tier::Hot && content.len() < self.config.compaction_threshold {
            self.hot.put(sha, obj_type, content).await?;
            self.index.update_tier(sha, Tier::Hot, None, None).await?;
            debug!(sha = %sha, from = from.as_str(), "promoted to hot");
        }
        Ok(())
    }

    /// Flush the write buffer into cold storage.
    ///
    /// Returns the cold file id when one was written. Buffered objects stay
    /// readable throughout; the buffer is trimmed only after the flush is
    /// durable and indexed. Concurrent flushes are serialized by lock; a
    /// losing contender returns `Ok(None)` untouched.
    pub async fn flush(&self) -> Result<Option<String>, StoreError> {
        let snapshot: Vec<BufferedObject> = {
            let state = self.state.lock().await;
            if state.buffer.is_empty() {
                return Ok(None);
            }
            state.buffer.snapshot()
        };

        let Some(lock) = self.locks.acquire("store-flush", 60_000).await? else {
            return Ok(None);
        };
        let result = self.flush_snapshot(&snapshot).await;
        self.locks.release(lock).await?;
        result
    }

    async fn flush_snapshot(
        &self,
        snapshot: &[BufferedObject],
    ) -> Result<Option<String>, StoreError> {
        let (tiny, regular): (Vec<&BufferedObject>, Vec<&BufferedObject>) = snapshot
            .iter()
            .partition(|o| o.content.len() < self.config.compaction_threshold);

        let mut placements: Vec<(ObjectId, Location)> = Vec::new();

        let pack_tiny = tiny.len() >= self.config.min_blobs_for_compaction;
        if pack_tiny {
            let blobs: Vec<SmallBlob> = tiny
                .iter()
                .map(|o| SmallBlob {
                    sha: o.sha,
                    obj_type: o.obj_type,
                    content: o.content.clone(),
                })
                .collect();
            for placed in self.superchunks.pack(blobs).await? {
                let obj_type = tiny
                    .iter()
                    .find(|o| o.sha == placed.sha)
                    .map(|o| o.obj_type);
                placements.push((
                    placed.sha,
                    Location {
                        sha: placed.sha,
                        tier: Tier::Cold,
                        pack_id: Some(placed.super_chunk_id),
                        offset: Some(placed.offset_in_data),
                        size: placed.size,
                        obj_type,
                        created_at: 0,
                        updated_at: 0,
                    },
                ));
            }
        }

        let cold_bound: Vec<&BufferedObject> = if pack_tiny {
            regular
        } else {
            snapshot.iter().collect()
        };
        let rows: Vec<ColdRow> = cold_bound
            .iter()
            .map(|o| ColdRow {
                sha: o.sha,
                obj_type: o.obj_type,
                content: o.content.clone(),
            })
            .collect();

        let file_id = if rows.is_empty() {
            None
        } else {
            let file_id = self.cold.write_file(&rows).await?;
            for row in &rows {
                placements.push((
                    row.sha,
                    Location {
                        sha: row.sha,
                        tier: Tier::Cold,
                        pack_id: Some(file_id.clone()),
                        offset: None,
                        size: row.content.len() as u64,
                        obj_type: Some(row.obj_type),
                        created_at: 0,
                        updated_at: 0,
                    },
                ));
            }
            Some(file_id)
        };

        for (_, loc) in &placements {
            self.index.record(loc).await?;
        }

        // Durable and indexed: clear the flushed entries and refresh the
        // exact cache in one critical section.
        let flushed: HashSet<ObjectId> = snapshot.iter().map(|o| o.sha).collect();
        {
            let mut state = self.state.lock().await;
            state.buffer.remove_flushed(&flushed);
            for obj in snapshot {
                state.exact.insert(
                    obj.sha,
                    CachedPresence {
                        obj_type: obj.obj_type,
                        size: obj.content.len() as u64,
                    },
                );
            }
        }
        info!(
            objects = snapshot.len(),
            superchunked = if pack_tiny { tiny.len() } else { 0 },
            file_id = file_id.as_deref().unwrap_or("-"),
            "flushed write buffer"
        );
        Ok(file_id)
    }

    /// Store a complete pack in the warm tier and index every entry.
    pub async fn store_pack(
        &self,
        pack_bytes: &[u8],
        entries: &[WrittenEntry],
    ) -> Result<String, StoreError> {
        let pack_id = self.warm.store_pack(pack_bytes, entries).await?;
        for entry in entries {
            // Skip ids another tier already holds; first placement wins.
            if self.index.lookup(&entry.id).await?.is_none() {
                self.index
                    .record(&Location {
                        sha: entry.id,
                        tier: Tier::Warm,
                        pack_id: Some(pack_id.clone()),
                        offset: Some(entry.offset),
                        size: 0,
                        obj_type: None,
                        created_at: 0,
                        updated_at: 0,
                    })
                    .await?;
            }
        }
        let mut state = self.state.lock().await;
        for entry in entries {
            state.bloom.insert(&entry.id);
        }
        Ok(pack_id)
    }

    /// Merge undersized cold files. Serialized by the compaction lock.
    pub async fn compact_cold(&self, target_bytes: u64) -> Result<usize, StoreError> {
        let Some(lock) = self.locks.acquire("store-compact", 120_000).await? else {
            return Err(StoreError::LockUnavailable("store-compact".into()));
        };
        let result = self.compact_cold_locked(target_bytes).await;
        self.locks.release(lock).await?;
        result
    }

    async fn compact_cold_locked(&self, target_bytes: u64) -> Result<usize, StoreError> {
        let cold_locs = self.index.by_tier(Tier::Cold).await?;
        let mut file_ids: Vec<String> = cold_locs
            .iter()
            .filter_map(|l| l.pack_id.clone())
            .filter(|id| id.starts_with("cf-"))
            .collect();
        file_ids.sort();
        file_ids.dedup();

        let merges = self.cold.compact(&file_ids, target_bytes).await?;
        let merged_count = merges.len();
        for (new_id, sources) in merges {
            for source in sources {
                for loc in self.index.by_pack(&source).await? {
                    self.index
                        .update_tier(&loc.sha, Tier::Cold, Some(&new_id), None)
                        .await?;
                }
                self.cold.delete_file(&source).await?;
            }
        }
        Ok(merged_count)
    }

    /// Rewrite super-chunks, reclaiming space from soft-deleted blobs.
    pub async fn compact_superchunks(&self) -> Result<(usize, usize), StoreError> {
        let Some(lock) = self.locks.acquire("store-compact", 120_000).await? else {
            return Err(StoreError::LockUnavailable("store-compact".into()));
        };
        let result = self.superchunks.compact().await;
        self.locks.release(lock).await?;
        result
    }

    /// Remove an object from its tier. Returns the bytes its row accounted
    /// for, or `None` when the store did not hold it.
    pub async fn delete_object(&self, sha: &ObjectId) -> Result<Option<u64>, StoreError> {
        let Some(loc) = self.index.lookup(sha).await? else {
            return Ok(None);
        };
        match loc.tier {
            Tier::Hot => {
                self.hot.delete(sha).await?;
            }
            Tier::Warm => {
                // Pack bytes are reclaimed when the pack itself is rewritten;
                // dropping the index entry retires the object.
            }
            Tier::Cold => match loc.pack_id.as_deref() {
                Some(CHUNKED_MARKER) => {
                    self.chunks.delete(sha).await?;
                }
                Some(id) if id.starts_with("sc-") => {
                    self.superchunks.mark_deleted(sha).await?;
                }
                _ => {
                    // Cold-file rows die with the next compaction rewrite.
                }
            },
        }
        self.index.delete(sha).await?;
        let mut state = self.state.lock().await;
        state.exact.remove(sha);
        Ok(Some(loc.size))
    }
}

