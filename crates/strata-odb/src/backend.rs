//! The cloud backing store interface and an in-memory implementation.
//!
//! Conditional writes carry R2-style semantics: `put_if_none_match` only
//! creates, `put_if_match` only replaces the exact ETag it was given. Both
//! return `None` on a lost race instead of an error so callers can retry or
//! back off.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::StoreError;

/// Opaque version tag for conditional writes.
pub type Etag = String;

/// Metadata returned by `head`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackingMeta {
    pub size: u64,
    pub etag: Etag,
}

/// A flat key/value object store with conditional writes and prefix listing.
///
/// Production deployments bind this to a cloud bucket; [`MemoryStore`]
/// serves tests and embedded use.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Unconditional write. Returns the new ETag.
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<Etag, StoreError>;

    /// Create-only write. `None` when the key already exists.
    async fn put_if_none_match(&self, key: &str, bytes: &[u8]) -> Result<Option<Etag>, StoreError>;

    /// Replace-only write gated on `etag`. `None` when the tag no longer matches.
    async fn put_if_match(
        &self,
        key: &str,
        bytes: &[u8],
        etag: &str,
    ) -> Result<Option<Etag>, StoreError>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    async fn get_with_etag(&self, key: &str) -> Result<Option<(Vec<u8>, Etag)>, StoreError>;

    /// Read `len` bytes starting at `offset`; short when the object ends first.
    async fn get_range(
        &self,
        key: &str,
        offset: u64,
        len: u64,
    ) -> Result<Option<Vec<u8>>, StoreError>;

    async fn head(&self, key: &str) -> Result<Option<BackingMeta>, StoreError>;

    /// Delete is idempotent; deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// All keys under `prefix`, byte-ordered.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

/// In-memory [`ObjectStore`] with real conditional-write semantics.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<String, (Vec<u8>, Etag)>>,
    generation: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_etag(&self) -> Etag {
        format!("g{:016x}", self.generation.fetch_add(1, Ordering::Relaxed))
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<Etag, StoreError> {
        let etag = self.next_etag();
        let mut objects = self.objects.lock().map_err(poisoned)?;
        objects.insert(key.to_string(), (bytes.to_vec(), etag.clone()));
        Ok(etag)
    }

    async fn put_if_none_match(&self, key: &str, bytes: &[u8]) -> Result<Option<Etag>, StoreError> {
        let etag = self.next_etag();
        let mut objects = self.objects.lock().map_err(poisoned)?;
        if objects.contains_key(key) {
            return Ok(None);
        }
        objects.insert(key.to_string(), (bytes.to_vec(), etag.clone()));
        Ok(Some(etag))
    }

    async fn put_if_match(
        &self,
        key: &str,
        bytes: &[u8],
        etag: &str,
    ) -> Result<Option<Etag>, StoreError> {
        let new_etag = self.next_etag();
        let mut objects = self.objects.lock().map_err(poisoned)?;
        match objects.get(key) {
            Some((_, current)) if current == etag => {
                objects.insert(key.to_string(), (bytes.to_vec(), new_etag.clone()));
                Ok(Some(new_etag))
            }
            _ => Ok(None),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let objects = self.objects.lock().map_err(poisoned)?;
        Ok(objects.get(key).map(|(bytes, _)| bytes.clone()))
    }

    async fn get_with_etag(&self, key: &str) -> Result<Option<(Vec<u8>, Etag)>, StoreError> {
        let objects = self.objects.lock().map_err(poisoned)?;
        Ok(objects.get(key).cloned())
    }

    async fn get_range(
        &self,
        key: &str,
        offset: u64,
        len: u64,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        let objects = self.objects.lock().map_err(poisoned)?;
        Ok(objects.get(key).map(|(bytes, _)| {
            let start = (offset as usize).min(bytes.len());
            let end = (start + len as usize).min(bytes.len());
            bytes[start..end].to_vec()
        }))
    }

    async fn head(&self, key: &str) -> Result<Option<BackingMeta>, StoreError> {
        let objects = self.objects.lock().map_err(poisoned)?;
        Ok(objects.get(key).map(|(bytes, etag)| BackingMeta {
            size: bytes.len() as u64,
            etag: etag.clone(),
        }))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut objects = self.objects.lock().map_err(poisoned)?;
        objects.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let objects = self.objects.lock().map_err(poisoned)?;
        let mut keys: Vec<String> = objects
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> StoreError {
    StoreError::Backing("memory store mutex poisoned".into())
}
