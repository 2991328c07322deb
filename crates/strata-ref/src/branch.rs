//! Branch operations over the ref store.

use std::collections::HashSet;

use strata_hash::ObjectId;
use strata_object::Object;
use strata_odb::TieredStore;
use tracing::debug;

use crate::name::{short_name, validate_name};
use crate::store::RefStore;
use crate::{RefError, Tracking};

/// Safety bound on ancestry walks (merged checks, ahead/behind).
const MAX_WALK: usize = 100_000;

/// Branch-level operations; reads commits through the tiered store.
pub struct Branches<'a> {
    refs: &'a RefStore,
    store: &'a TieredStore,
}

impl<'a> Branches<'a> {
    pub fn new(refs: &'a RefStore, store: &'a TieredStore) -> Self {
        Self { refs, store }
    }

    /// The short name of the branch `HEAD` is attached to.
    pub async fn current(&self) -> Result<Option<String>, RefError> {
        Ok(self
            .refs
            .get_symbolic("HEAD")
            .await?
            .map(|full| short_name(&full).to_string()))
    }

    /// All branches with their tips.
    pub async fn list(&self) -> Result<Vec<(String, ObjectId)>, RefError> {
        Ok(self
            .refs
            .list(Some("refs/heads/"))
            .await?
            .into_iter()
            .map(|(name, id)| (short_name(&name).to_string(), id))
            .collect())
    }

    /// Create a branch at `start_point` (default: `HEAD`).
    pub async fn create(
        &self,
        name: &str,
        start_point: Option<&str>,
        force: bool,
        checkout: bool,
    ) -> Result<ObjectId, RefError> {
        validate_name(name)?;
        let full = format!("refs/heads/{name}");

        if !force && self.refs.read(&full).await?.is_some() {
            return Err(RefError::AlreadyExists(full));
        }

        let target = self.resolve_start_point(start_point).await?;
        self.refs.set_ref(&full, &target, None).await?;
        if checkout {
            self.refs.set_head_branch(&full).await?;
        }
        debug!(branch = name, target = %target, "branch created");
        Ok(target)
    }

    /// Start-point resolution, most specific first: a full hex id, then
    /// `refs/heads/<x>`, then `refs/remotes/<x>`, then the name as a full
    /// ref. No start point means the current `HEAD`.
    async fn resolve_start_point(&self, start_point: Option<&str>) -> Result<ObjectId, RefError> {
        let spec = match start_point {
            None => {
                return self
                    .refs
                    .resolve("HEAD")
                    .await?
                    .ok_or_else(|| RefError::RefNotFound("HEAD".into()));
            }
            Some(s) => s,
        };

        if spec.len() == 40 || spec.len() == 64 {
            if let Ok(id) = ObjectId::from_hex(spec) {
                return Ok(id);
            }
        }
        if let Some(id) = self.refs.resolve(&format!("refs/heads/{spec}")).await? {
            return Ok(id);
        }
        if let Some(id) = self.refs.resolve(&format!("refs/remotes/{spec}")).await? {
            return Ok(id);
        }
        if let Some(id) = self.refs.resolve(spec).await? {
            return Ok(id);
        }
        Err(RefError::RefNotFound(spec.to_string()))
    }

    /// Delete a branch (or a remote-tracking branch when `remote` is given).
    pub async fn delete(
        &self,
        name: &str,
        force: bool,
        check_merged: bool,
        remote: Option<&str>,
    ) -> Result<(), RefError> {
        let full = match remote {
            Some(remote) => format!("refs/remotes/{remote}/{name}"),
            None => format!("refs/heads/{name}"),
        };

        if remote.is_none() {
            if let Some(current) = self.refs.get_symbolic("HEAD").await? {
                if current == full {
                    return Err(RefError::BranchInUse(name.to_string(), "delete"));
                }
            }
        }

        let tip = self
            .refs
            .resolve(&full)
            .await?
            .ok_or_else(|| RefError::RefNotFound(full.clone()))?;

        if check_merged && !force && !self.is_merged(&tip).await? {
            return Err(RefError::NotMerged(name.to_string()));
        }

        self.refs.delete_ref(&full, None).await?;
        sqlx::query("DELETE FROM branch_tracking WHERE branch = ?")
            .bind(name)
            .execute(self.refs.pool())
            .await?;
        Ok(())
    }

    /// Whether `tip` is reachable from the default branch (the branch HEAD
    /// is attached to). An actual ancestry walk, not a tip comparison.
    async fn is_merged(&self, tip: &ObjectId) -> Result<bool, RefError> {
        let Some(default_ref) = self.refs.get_symbolic("HEAD").await? else {
            return Ok(false);
        };
        let Some(default_tip) = self.refs.resolve(&default_ref).await? else {
            return Ok(false);
        };
        let ancestors = self.ancestors(&default_tip).await?;
        Ok(ancestors.contains(tip))
    }

    /// Rename a branch, carrying tracking info and `HEAD` along.
    pub async fn rename(
        &self,
        old: Option<&str>,
        new: &str,
        force: bool,
    ) -> Result<(), RefError> {
        validate_name(new)?;
        let old = match old {
            Some(o) => o.to_string(),
            None => self
                .current()
                .await?
                .ok_or_else(|| RefError::RefNotFound("HEAD".into()))?,
        };
        let old_full = format!("refs/heads/{old}");
        let new_full = format!("refs/heads/{new}");

        let tip = self
            .refs
            .resolve(&old_full)
            .await?
            .ok_or_else(|| RefError::RefNotFound(old_full.clone()))?;
        if !force && self.refs.read(&new_full).await?.is_some() {
            return Err(RefError::AlreadyExists(new_full));
        }

        self.refs.set_ref(&new_full, &tip, None).await?;
        sqlx::query("UPDATE branch_tracking SET branch = ? WHERE branch = ?")
            .bind(new)
            .bind(&old)
            .execute(self.refs.pool())
            .await?;

        if self.refs.get_symbolic("HEAD").await?.as_deref() == Some(old_full.as_str()) {
            self.refs.set_head_branch(&new_full).await?;
        }
        self.refs.delete_ref(&old_full, None).await?;
        Ok(())
    }

    /// Checkout: move `HEAD` to a branch, creating it first if asked, or
    /// detach at an id.
    #[allow(clippy::too_many_arguments)]
    pub async fn checkout(
        &self,
        name: Option<&str>,
        sha: Option<ObjectId>,
        create: bool,
        detach: bool,
        track: Option<(&str, &str)>,
        start_point: Option<&str>,
    ) -> Result<(), RefError> {
        if detach {
            let target = match sha {
                Some(sha) => sha,
                None => self.resolve_start_point(start_point.or(name)).await?,
            };
            self.refs.set_head_detached(&target).await?;
            return Ok(());
        }

        let name = name.ok_or_else(|| RefError::RefNotFound("<branch>".into()))?;
        if create {
            self.create(name, start_point, false, false).await?;
        }
        let full = format!("refs/heads/{name}");
        if self.refs.read(&full).await?.is_none() {
            return Err(RefError::RefNotFound(full));
        }
        self.refs.set_head_branch(&full).await?;
        if let Some((remote, remote_branch)) = track {
            self.set_tracking(name, remote, remote_branch).await?;
        }
        Ok(())
    }

    pub async fn set_tracking(
        &self,
        branch: &str,
        remote: &str,
        remote_branch: &str,
    ) -> Result<(), RefError> {
        sqlx::query(
            "INSERT INTO branch_tracking (branch, remote, remote_branch) VALUES (?, ?, ?)
             ON CONFLICT(branch) DO UPDATE SET
                remote = excluded.remote, remote_branch = excluded.remote_branch",
        )
        .bind(branch)
        .bind(remote)
        .bind(remote_branch)
        .execute(self.refs.pool())
        .await?;
        Ok(())
    }

    pub async fn tracking(&self, branch: &str) -> Result<Option<Tracking>, RefError> {
        use sqlx::Row;
        let row = sqlx::query(
            "SELECT remote, remote_branch, ahead, behind FROM branch_tracking WHERE branch = ?",
        )
        .bind(branch)
        .fetch_optional(self.refs.pool())
        .await?;
        Ok(row.map(|row| Tracking {
            remote: row.get("remote"),
            remote_branch: row.get("remote_branch"),
            ahead: row.get::<i64, _>("ahead") as u64,
            behind: row.get::<i64, _>("behind") as u64,
        }))
    }

    /// Recompute ahead/behind for a branch against its tracking ref by
    /// walking both ancestries.
    pub async fn refresh_tracking(&self, branch: &str) -> Result<Option<Tracking>, RefError> {
        let Some(tracking) = self.tracking(branch).await? else {
            return Ok(None);
        };
        let local_tip = self.refs.resolve(&format!("refs/heads/{branch}")).await?;
        let remote_tip = self
            .refs
            .resolve(&format!(
                "refs/remotes/{}/{}",
                tracking.remote, tracking.remote_branch
            ))
            .await?;

        let (ahead, behind) = match (local_tip, remote_tip) {
            (Some(local), Some(remote)) => {
                let local_set = self.ancestors(&local).await?;
                let remote_set = self.ancestors(&remote).await?;
                (
                    local_set.difference(&remote_set).count() as u64,
                    remote_set.difference(&local_set).count() as u64,
                )
            }
            (Some(local), None) => (self.ancestors(&local).await?.len() as u64, 0),
            _ => (0, 0),
        };

        sqlx::query("UPDATE branch_tracking SET ahead = ?, behind = ? WHERE branch = ?")
            .bind(ahead as i64)
            .bind(behind as i64)
            .bind(branch)
            .execute(self.refs.pool())
            .await?;
        Ok(Some(Tracking {
            ahead,
            behind,
            ..tracking
        }))
    }

    /// The commit plus every ancestor of it, bounded by `MAX_WALK`.
    async fn ancestors(&self, tip: &ObjectId) -> Result<HashSet<ObjectId>, RefError> {
        let mut seen = HashSet::new();
        let mut queue = vec![*tip];
        while let Some(id) = queue.pop() {
            if seen.len() >= MAX_WALK || !seen.insert(id) {
                continue;
            }
            if let Some(Object::Commit(commit)) = self.store.get_object(&id).await? {
                queue.extend(commit.parents);
            }
        }
        Ok(seen)
    }
}
