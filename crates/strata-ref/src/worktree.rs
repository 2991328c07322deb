//! Linked worktrees: independent HEADs sharing one object store.
//!
//! Each worktree owns `refs/worktrees/<normalized-path>/HEAD` plus a row in
//! the side table. A branch may be checked out in at most one live worktree
//! unless the caller forces it.

use sqlx::Row;
use strata_hash::ObjectId;

use crate::store::RefStore;
use crate::RefError;

/// One linked worktree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeEntry {
    pub path: String,
    /// Attached branch ref, or `None` when detached.
    pub head_ref: Option<String>,
    pub head_sha: ObjectId,
    pub locked: bool,
    pub lock_reason: Option<String>,
}

/// Worktree registry over the ref store's tables.
pub struct Worktrees<'a> {
    refs: &'a RefStore,
}

impl<'a> Worktrees<'a> {
    pub fn new(refs: &'a RefStore) -> Self {
        Self { refs }
    }

    /// Collapse a path into the ref-namespace component for this worktree.
    pub fn normalize_path(path: &str) -> String {
        path.trim_matches('/')
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                    c
                } else {
                    '-'
                }
            })
            .collect()
    }

    fn head_ref_name(path: &str) -> String {
        format!("refs/worktrees/{}/HEAD", Self::normalize_path(path))
    }

    /// Register a worktree with its HEAD attached to `branch` (or detached
    /// at `detach_at`).
    pub async fn add(
        &self,
        path: &str,
        branch: Option<&str>,
        detach_at: Option<ObjectId>,
        force: bool,
    ) -> Result<WorktreeEntry, RefError> {
        let (head_ref, head_sha) = match (branch, detach_at) {
            (Some(branch), _) => {
                let full = format!("refs/heads/{branch}");
                let sha = self
                    .refs
                    .resolve(&full)
                    .await?
                    .ok_or_else(|| RefError::RefNotFound(full.clone()))?;
                if !force {
                    if let Some(existing) = self.find_by_branch(&full).await? {
                        return Err(RefError::BranchInWorktree {
                            branch: branch.to_string(),
                            path: existing.path,
                        });
                    }
                }
                (Some(full), sha)
            }
            (None, Some(sha)) => (None, sha),
            (None, None) => {
                return Err(RefError::RefNotFound("worktree needs a branch or an id".into()))
            }
        };

        let head_name = Self::head_ref_name(path);
        match &head_ref {
            Some(branch_ref) => self.refs.set_symbolic(&head_name, branch_ref).await?,
            None => self.refs.set_ref(&head_name, &head_sha, None).await?,
        }

        sqlx::query(
            "INSERT INTO worktrees (path, head_ref, head_sha, locked, lock_reason)
             VALUES (?, ?, ?, 0, NULL)
             ON CONFLICT(path) DO UPDATE SET
                head_ref = excluded.head_ref, head_sha = excluded.head_sha",
        )
        .bind(path)
        .bind(head_ref.as_deref())
        .bind(head_sha.to_hex())
        .execute(self.refs.pool())
        .await?;

        Ok(WorktreeEntry {
            path: path.to_string(),
            head_ref,
            head_sha,
            locked: false,
            lock_reason: None,
        })
    }

    pub async fn list(&self) -> Result<Vec<WorktreeEntry>, RefError> {
        let rows = sqlx::query(
            "SELECT path, head_ref, head_sha, locked, lock_reason FROM worktrees ORDER BY path",
        )
        .fetch_all(self.refs.pool())
        .await?;
        rows.into_iter()
            .map(|row| {
                let sha_hex: String = row.get("head_sha");
                Ok(WorktreeEntry {
                    path: row.get("path"),
                    head_ref: row.get("head_ref"),
                    head_sha: ObjectId::from_hex(&sha_hex)?,
                    locked: row.get::<i64, _>("locked") != 0,
                    lock_reason: row.get("lock_reason"),
                })
            })
            .collect()
    }

    pub async fn find(&self, path: &str) -> Result<Option<WorktreeEntry>, RefError> {
        Ok(self.list().await?.into_iter().find(|w| w.path == path))
    }

    async fn find_by_branch(&self, branch_ref: &str) -> Result<Option<WorktreeEntry>, RefError> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .find(|w| w.head_ref.as_deref() == Some(branch_ref)))
    }

    pub async fn lock(&self, path: &str, reason: Option<&str>) -> Result<(), RefError> {
        let result = sqlx::query("UPDATE worktrees SET locked = 1, lock_reason = ? WHERE path = ?")
            .bind(reason)
            .bind(path)
            .execute(self.refs.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(RefError::RefNotFound(format!("worktree {path}")));
        }
        Ok(())
    }

    pub async fn unlock(&self, path: &str) -> Result<(), RefError> {
        sqlx::query("UPDATE worktrees SET locked = 0, lock_reason = NULL WHERE path = ?")
            .bind(path)
            .execute(self.refs.pool())
            .await?;
        Ok(())
    }

    /// Re-register a worktree under a new path.
    pub async fn relocate(&self, from: &str, to: &str) -> Result<(), RefError> {
        let entry = self
            .find(from)
            .await?
            .ok_or_else(|| RefError::RefNotFound(format!("worktree {from}")))?;
        if entry.locked {
            let reason = entry
                .lock_reason
                .map(|r| format!(": {r}"))
                .unwrap_or_default();
            return Err(RefError::WorktreeLocked(from.to_string(), reason));
        }

        // New head ref first, then the row, then drop the old ref.
        let new_head = Self::head_ref_name(to);
        match &entry.head_ref {
            Some(branch_ref) => self.refs.set_symbolic(&new_head, branch_ref).await?,
            None => self.refs.set_ref(&new_head, &entry.head_sha, None).await?,
        }
        sqlx::query("UPDATE worktrees SET path = ? WHERE path = ?")
            .bind(to)
            .bind(from)
            .execute(self.refs.pool())
            .await?;
        self.refs
            .delete_ref(&Self::head_ref_name(from), None)
            .await?;
        Ok(())
    }

    /// Remove a worktree registration. Locked worktrees need `force`.
    pub async fn remove(&self, path: &str, force: bool) -> Result<bool, RefError> {
        let Some(entry) = self.find(path).await? else {
            return Ok(false);
        };
        if entry.locked && !force {
            let reason = entry
                .lock_reason
                .map(|r| format!(": {r}"))
                .unwrap_or_default();
            return Err(RefError::WorktreeLocked(path.to_string(), reason));
        }
        self.refs.delete_ref(&Self::head_ref_name(path), None).await?;
        sqlx::query("DELETE FROM worktrees WHERE path = ?")
            .bind(path)
            .execute(self.refs.pool())
            .await?;
        Ok(true)
    }

    /// Drop registrations whose branch ref has disappeared. Returns the
    /// paths pruned.
    pub async fn prune(&self) -> Result<Vec<String>, RefError> {
        let mut pruned = Vec::new();
        for entry in self.list().await? {
            if entry.locked {
                continue;
            }
            if let Some(branch_ref) = &entry.head_ref {
                if self.refs.read(branch_ref).await?.is_none() {
                    self.remove(&entry.path, false).await?;
                    pruned.push(entry.path);
                }
            }
        }
        Ok(pruned)
    }
}
