//! The mirror engine: classify refs, fetch once, apply a strategy.

use std::sync::Arc;

use strata_client::push::PushUpdate;
use strata_diff::merge_base::is_ancestor;
use strata_diff::Pathspec;
use strata_hash::ObjectId;
use strata_odb::{ObjectStore, TieredStore};
use strata_ref::RefStore;
use tracing::{debug, info};

use crate::remote::MirrorRemote;
use crate::state::MirrorState;
use crate::{ConflictStrategy, SyncDirection, SyncError};

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Mirror configuration.
#[derive(Debug, Clone)]
pub struct MirrorOptions {
    pub direction: SyncDirection,
    pub strategy: ConflictStrategy,
    /// Ref name globs; empty includes everything.
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl Default for MirrorOptions {
    fn default() -> Self {
        Self {
            direction: SyncDirection::Pull,
            strategy: ConflictStrategy::Skip,
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }
}

/// Per-ref outcome of a sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefSyncResult {
    pub ref_name: String,
    pub prev: Option<ObjectId>,
    pub new: Option<ObjectId>,
    pub updated: bool,
    pub fast_forward: bool,
    pub conflict: bool,
    pub resolution: Option<String>,
}

/// Whole-sync outcome.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub success: bool,
    pub refs_updated: usize,
    pub refs_skipped: usize,
    pub objects_fetched: usize,
    pub per_ref: Vec<RefSyncResult>,
}

/// A mirror of one remote.
pub struct Mirror<'a, R: MirrorRemote> {
    store: &'a TieredStore,
    refs: &'a RefStore,
    remote: &'a R,
    options: MirrorOptions,
    filter: Pathspec,
}

impl<'a, R: MirrorRemote> Mirror<'a, R> {
    pub fn new(
        store: &'a TieredStore,
        refs: &'a RefStore,
        remote: &'a R,
        options: MirrorOptions,
    ) -> Result<Self, SyncError> {
        let mut patterns: Vec<String> = options.include.clone();
        patterns.extend(options.exclude.iter().map(|p| format!("!{p}")));
        let filter = Pathspec::new(&patterns)?;
        Ok(Self {
            store,
            refs,
            remote,
            options,
            filter,
        })
    }

    /// Run one sync cycle in the configured direction.
    pub async fn sync(&self) -> Result<SyncReport, SyncError> {
        let mut report = match self.options.direction {
            SyncDirection::Pull => self.pull().await?,
            SyncDirection::Push => self.push().await?,
            SyncDirection::Bidirectional => {
                let mut pulled = self.pull().await?;
                let pushed = self.push().await?;
                pulled.refs_updated += pushed.refs_updated;
                pulled.refs_skipped += pushed.refs_skipped;
                pulled.objects_fetched += pushed.objects_fetched;
                pulled.per_ref.extend(pushed.per_ref);
                pulled
            }
        };
        report.success = true;
        info!(
            updated = report.refs_updated,
            skipped = report.refs_skipped,
            objects = report.objects_fetched,
            "mirror sync finished"
        );
        Ok(report)
    }

    /// Sync, then persist the ref snapshot so the next cycle (possibly in
    /// another process) starts from what this one saw.
    pub async fn sync_and_record(
        &self,
        state_store: &Arc<dyn ObjectStore>,
        mirror_name: &str,
    ) -> Result<SyncReport, SyncError> {
        let report = self.sync().await?;

        let mut state = MirrorState::load(state_store, mirror_name).await?;
        state.last_sync_ts = Some(now_ms());
        state.last_remote_refs = self
            .remote
            .discover()
            .await?
            .into_iter()
            .map(|(name, id)| (name, id.to_hex()))
            .collect();
        state.last_local_refs = self
            .refs
            .list(Some("refs/"))
            .await?
            .into_iter()
            .map(|(name, id)| (name, id.to_hex()))
            .collect();
        state.save(state_store, mirror_name).await?;
        Ok(report)
    }

    async fn pull(&self) -> Result<SyncReport, SyncError> {
        let remote_refs: Vec<(String, ObjectId)> = self
            .remote
            .discover()
            .await?
            .into_iter()
            .filter(|(name, _)| self.filter.matches(name))
            .collect();

        // One fetch round for everything we lack.
        let mut wants = Vec::new();
        for (_, id) in &remote_refs {
            if !self.store.contains(id).await? {
                wants.push(*id);
            }
        }
        let objects_fetched = self.remote.fetch_missing(self.store, &wants).await?;

        let mut report = SyncReport {
            objects_fetched,
            ..SyncReport::default()
        };
        for (name, remote_id) in remote_refs {
            let result = self.reconcile_pull(&name, remote_id).await?;
            if result.updated {
                report.refs_updated += 1;
            } else {
                report.refs_skipped += 1;
            }
            report.per_ref.push(result);
        }
        Ok(report)
    }

    async fn reconcile_pull(
        &self,
        name: &str,
        remote_id: ObjectId,
    ) -> Result<RefSyncResult, SyncError> {
        let local = self.refs.resolve(name).await?;
        let mut result = RefSyncResult {
            ref_name: name.to_string(),
            prev: local,
            new: Some(remote_id),
            updated: false,
            fast_forward: false,
            conflict: false,
            resolution: None,
        };

        match local {
            None => {
                self.refs.set_ref(name, &remote_id, None).await?;
                result.updated = true;
                debug!(name, "new ref");
            }
            Some(local_id) if local_id == remote_id => {
                result.new = Some(local_id);
            }
            Some(local_id) => {
                let fast_forward = is_ancestor(self.store, &local_id, &remote_id).await?;
                result.fast_forward = fast_forward;
                if fast_forward {
                    self.refs
                        .set_ref(name, &remote_id, Some(&local_id))
                        .await?;
                    result.updated = true;
                } else {
                    result.conflict = true;
                    match self.options.strategy {
                        ConflictStrategy::ForceRemote => {
                            self.refs
                                .set_ref(name, &remote_id, Some(&local_id))
                                .await?;
                            result.updated = true;
                            result.resolution = Some("force-remote".into());
                        }
                        ConflictStrategy::ForceLocal | ConflictStrategy::Skip => {
                            result.resolution = Some(self.options.strategy.as_str().into());
                        }
                        ConflictStrategy::Error => {
                            return Err(SyncError::Diverged(name.to_string()))
                        }
                    }
                }
            }
        }
        Ok(result)
    }

    async fn push(&self) -> Result<SyncReport, SyncError> {
        let remote_refs = self.remote.discover().await?;
        let remote_of = |name: &str| -> Option<ObjectId> {
            remote_refs
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, id)| *id)
        };

        let local_refs: Vec<(String, ObjectId)> = self
            .refs
            .list(Some("refs/heads/"))
            .await?
            .into_iter()
            .filter(|(name, _)| self.filter.matches(name))
            .collect();

        let mut report = SyncReport::default();
        let mut updates = Vec::new();
        let mut pending: Vec<RefSyncResult> = Vec::new();

        for (name, local_id) in local_refs {
            let remote_id = remote_of(&name);
            let mut result = RefSyncResult {
                ref_name: name.clone(),
                prev: remote_id,
                new: Some(local_id),
                updated: false,
                fast_forward: false,
                conflict: false,
                resolution: None,
            };
            match remote_id {
                Some(remote_id) if remote_id == local_id => {
                    report.refs_skipped += 1;
                    result.new = Some(remote_id);
                    report.per_ref.push(result);
                    continue;
                }
                Some(remote_id) => {
                    // Diverged unless the remote tip is behind us. The remote
                    // history was fetched on pull; if we lack it, treat as
                    // diverged.
                    let fast_forward = self.store.contains(&remote_id).await?
                        && is_ancestor(self.store, &remote_id, &local_id).await?;
                    result.fast_forward = fast_forward;
                    if !fast_forward {
                        result.conflict = true;
                        match self.options.strategy {
                            ConflictStrategy::ForceLocal => {
                                result.resolution = Some("force-local".into());
                            }
                            ConflictStrategy::ForceRemote | ConflictStrategy::Skip => {
                                result.resolution = Some(self.options.strategy.as_str().into());
                                report.refs_skipped += 1;
                                report.per_ref.push(result);
                                continue;
                            }
                            ConflictStrategy::Error => {
                                return Err(SyncError::Diverged(name));
                            }
                        }
                    }
                }
                None => {}
            }
            updates.push(PushUpdate {
                ref_name: name.clone(),
                new: Some(local_id),
                force: result.conflict,
            });
            pending.push(result);
        }

        if !updates.is_empty() {
            let outcomes = self.remote.push_refs(self.store, &updates).await?;
            for mut result in pending {
                let accepted = outcomes
                    .iter()
                    .find(|o| o.ref_name == result.ref_name)
                    .map(|o| o.accepted)
                    .unwrap_or(false);
                result.updated = accepted;
                if accepted {
                    report.refs_updated += 1;
                } else {
                    report.refs_skipped += 1;
                }
                report.per_ref.push(result);
            }
        }
        Ok(report)
    }
}
