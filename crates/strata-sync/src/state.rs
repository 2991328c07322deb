//! Persisted mirror state, for idempotent re-syncs across restarts.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strata_odb::{ObjectStore, StoreError};

use crate::SyncError;

/// Snapshot of the last completed sync.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MirrorState {
    pub last_sync_ts: Option<i64>,
    pub last_remote_refs: HashMap<String, String>,
    pub last_local_refs: HashMap<String, String>,
}

impl MirrorState {
    fn key(mirror_name: &str) -> String {
        format!("mirror/{mirror_name}.state")
    }

    /// Load the saved state, or a fresh one when none exists.
    pub async fn load(
        backing: &Arc<dyn ObjectStore>,
        mirror_name: &str,
    ) -> Result<Self, SyncError> {
        match backing.get(&Self::key(mirror_name)).await? {
            None => Ok(Self::default()),
            Some(body) => serde_json::from_slice(&body)
                .map_err(|e| SyncError::MalformedState(e.to_string())),
        }
    }

    pub async fn save(
        &self,
        backing: &Arc<dyn ObjectStore>,
        mirror_name: &str,
    ) -> Result<(), SyncError> {
        let body = serde_json::to_vec(self)
            .map_err(|e| SyncError::Store(StoreError::Backing(e.to_string())))?;
        backing.put(&Self::key(mirror_name), &body).await?;
        Ok(())
    }
}
