//! Distributed locks over conditional writes.
//!
//! A lock is a JSON file at `locks/<resource>.lock`. Acquisition creates it
//! with `put_if_none_match`; reclaiming an expired lock replaces it with
//! `put_if_match` on the ETag that was read. Either race loser gets `None`
//! and backs off. Holders must refresh before `expires_at` or lose the lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strata_hash::{hasher::Hasher, HashAlgorithm};
use tracing::{debug, warn};

use crate::backend::{Etag, ObjectStore};
use crate::{now_ms, StoreError};

static LOCK_SEQ: AtomicU64 = AtomicU64::new(0);

/// On-store lock record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockFile {
    pub lock_id: String,
    pub resource: String,
    pub acquired_at: i64,
    pub expires_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub holder: Option<String>,
}

/// Proof of ownership returned by `acquire`.
#[derive(Debug, Clone)]
pub struct LockHandle {
    pub lock_id: String,
    pub resource: String,
    pub expires_at: i64,
    pub etag: Etag,
}

/// Lock acquisition and maintenance against the backing store.
pub struct LockManager {
    backing: Arc<dyn ObjectStore>,
    prefix: String,
    holder: Option<String>,
}

impl LockManager {
    pub fn new(backing: Arc<dyn ObjectStore>, prefix: impl Into<String>) -> Self {
        Self {
            backing,
            prefix: prefix.into(),
            holder: None,
        }
    }

    /// Identify this process in lock files (diagnostics only).
    pub fn with_holder(mut self, holder: impl Into<String>) -> Self {
        self.holder = Some(holder.into());
        self
    }

    fn key(&self, resource: &str) -> String {
        format!("{}locks/{resource}.lock", self.prefix)
    }

    fn fresh_lock_id(resource: &str) -> String {
        let seq = LOCK_SEQ.fetch_add(1, Ordering::Relaxed);
        let seed = format!("{resource}:{}:{seq}", now_ms());
        Hasher::digest(HashAlgorithm::Sha1, seed.as_bytes())
            .map(|d| d.short())
            .unwrap_or_else(|_| format!("{seq:08x}"))
    }

    /// Try to take the lock. `None` means someone else holds it.
    pub async fn acquire(
        &self,
        resource: &str,
        ttl_ms: i64,
    ) -> Result<Option<LockHandle>, StoreError> {
        let key = self.key(resource);
        let now = now_ms();

        match self.backing.get_with_etag(&key).await? {
            None => {
                let lock = LockFile {
                    lock_id: Self::fresh_lock_id(resource),
                    resource: resource.to_string(),
                    acquired_at: now,
                    expires_at: now + ttl_ms,
                    holder: self.holder.clone(),
                };
                let body = encode(&lock)?;
                let Some(etag) = self.backing.put_if_none_match(&key, &body).await? else {
                    return Ok(None); // lost the create race
                };
                // Ownership check: confirm our id landed.
                match self.backing.get_with_etag(&key).await? {
                    Some((current, current_etag)) if current_etag == etag => {
                        let current: LockFile = decode(&current, &key)?;
                        if current.lock_id != lock.lock_id {
                            return Ok(None);
                        }
                        debug!(resource, lock_id = lock.lock_id, "lock acquired");
                        Ok(Some(LockHandle {
                            lock_id: lock.lock_id,
                            resource: resource.to_string(),
                            expires_at: lock.expires_at,
                            etag,
                        }))
                    }
                    _ => Ok(None),
                }
            }
            Some((body, etag)) => {
                let current: LockFile = decode(&body, &key)?;
                if current.expires_at > now {
                    return Ok(None); // held and live
                }
                // Expired: reclaim with a CAS on the exact version we read.
                let lock = LockFile {
                    lock_id: Self::fresh_lock_id(resource),
                    resource: resource.to_string(),
                    acquired_at: now,
                    expires_at: now + ttl_ms,
                    holder: self.holder.clone(),
                };
                let body = encode(&lock)?;
                match self.backing.put_if_match(&key, &body, &etag).await? {
                    Some(new_etag) => {
                        debug!(resource, lock_id = lock.lock_id, "expired lock reclaimed");
                        Ok(Some(LockHandle {
                            lock_id: lock.lock_id,
                            resource: resource.to_string(),
                            expires_at: lock.expires_at,
                            etag: new_etag,
                        }))
                    }
                    None => Ok(None),
                }
            }
        }
    }

    /// Extend the TTL. `false` means ownership was already lost.
    pub async fn refresh(&self, handle: &mut LockHandle, ttl_ms: i64) -> Result<bool, StoreError> {
        let key = self.key(&handle.resource);
        let now = now_ms();
        let lock = LockFile {
            lock_id: handle.lock_id.clone(),
            resource: handle.resource.clone(),
            acquired_at: now,
            expires_at: now + ttl_ms,
            holder: self.holder.clone(),
        };
        let body = encode(&lock)?;
        match self.backing.put_if_match(&key, &body, &handle.etag).await? {
            Some(etag) => {
                handle.etag = etag;
                handle.expires_at = lock.expires_at;
                Ok(true)
            }
            None => {
                warn!(resource = handle.resource, "lock refresh lost ownership");
                Ok(false)
            }
        }
    }

    /// Release if still owned; releasing a lost lock is a no-op.
    pub async fn release(&self, handle: LockHandle) -> Result<(), StoreError> {
        let key = self.key(&handle.resource);
        if let Some(body) = self.backing.get(&key).await? {
            let current: LockFile = decode(&body, &key)?;
            if current.lock_id == handle.lock_id {
                self.backing.delete(&key).await?;
            }
        }
        Ok(())
    }

    /// Delete every expired lock file. Returns how many were removed.
    pub async fn sweep_expired(&self) -> Result<usize, StoreError> {
        let now = now_ms();
        let mut removed = 0;
        for key in self.backing.list(&format!("{}locks/", self.prefix)).await? {
            let Some(body) = self.backing.get(&key).await? else {
                continue;
            };
            let lock: LockFile = decode(&body, &key)?;
            if lock.expires_at <= now {
                self.backing.delete(&key).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn encode(lock: &LockFile) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(lock).map_err(|e| StoreError::Backing(format!("lock encode: {e}")))
}

fn decode(body: &[u8], key: &str) -> Result<LockFile, StoreError> {
    serde_json::from_slice(body).map_err(|e| StoreError::Corruption {
        artifact: key.to_string(),
        reason: format!("malformed lock file: {e}"),
    })
}
