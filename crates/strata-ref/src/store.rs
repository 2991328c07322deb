//! SQL-backed reference storage with CAS updates.

use sqlx::{Row, SqlitePool};
use strata_hash::ObjectId;
use tracing::debug;

use crate::{RefError, RefKind, Reference};

/// Longest symbolic chain `resolve` will follow.
const MAX_SYMBOLIC_DEPTH: usize = 10;

/// The reference store for one repository.
#[derive(Clone)]
pub struct RefStore {
    pool: SqlitePool,
}

impl RefStore {
    pub async fn open(pool: SqlitePool) -> Result<Self, RefError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS refs (
                name   TEXT PRIMARY KEY,
                kind   TEXT NOT NULL,
                target TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS branch_tracking (
                branch        TEXT PRIMARY KEY,
                remote        TEXT NOT NULL,
                remote_branch TEXT NOT NULL,
                ahead         INTEGER NOT NULL DEFAULT 0,
                behind        INTEGER NOT NULL DEFAULT 0
            )",
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS worktrees (
                path        TEXT PRIMARY KEY,
                head_ref    TEXT,
                head_sha    TEXT NOT NULL,
                locked      INTEGER NOT NULL DEFAULT 0,
                lock_reason TEXT
            )",
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Read one ref row.
    pub async fn read(&self, name: &str) -> Result<Option<Reference>, RefError> {
        let row = sqlx::query("SELECT name, kind, target FROM refs WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| {
            let kind_str: String = row.get("kind");
            let kind = RefKind::from_str(&kind_str).ok_or_else(|| RefError::InvalidRefName {
                name: name.to_string(),
                reason: format!("stored with unknown kind {kind_str:?}"),
            })?;
            Ok(Reference {
                name: row.get("name"),
                kind,
                target: row.get("target"),
            })
        })
        .transpose()
    }

    /// Set a direct ref with compare-and-swap semantics.
    ///
    /// `expected_prev` of `None` writes unconditionally. The zero id as the
    /// expectation means "must not exist yet"; any other id must match the
    /// current value exactly or the update fails with `RefLockConflict`.
    pub async fn set_ref(
        &self,
        name: &str,
        new_sha: &ObjectId,
        expected_prev: Option<&ObjectId>,
    ) -> Result<(), RefError> {
        match expected_prev {
            None => {
                sqlx::query(
                    "INSERT INTO refs (name, kind, target) VALUES (?, 'direct', ?)
                     ON CONFLICT(name) DO UPDATE SET kind = 'direct', target = excluded.target",
                )
                .bind(name)
                .bind(new_sha.to_hex())
                .execute(&self.pool)
                .await?;
            }
            Some(prev) if prev.is_zero() => {
                let result = sqlx::query(
                    "INSERT INTO refs (name, kind, target) VALUES (?, 'direct', ?)
                     ON CONFLICT(name) DO NOTHING",
                )
                .bind(name)
                .bind(new_sha.to_hex())
                .execute(&self.pool)
                .await?;
                if result.rows_affected() == 0 {
                    return Err(RefError::RefLockConflict {
                        name: name.to_string(),
                        expected: prev.to_hex(),
                    });
                }
            }
            Some(prev) => {
                let result = sqlx::query(
                    "UPDATE refs SET target = ? WHERE name = ? AND kind = 'direct' AND target = ?",
                )
                .bind(new_sha.to_hex())
                .bind(name)
                .bind(prev.to_hex())
                .execute(&self.pool)
                .await?;
                if result.rows_affected() == 0 {
                    return Err(RefError::RefLockConflict {
                        name: name.to_string(),
                        expected: prev.to_hex(),
                    });
                }
            }
        }
        debug!(name, target = %new_sha, "ref updated");
        Ok(())
    }

    /// Delete a ref, optionally gated on its current value.
    pub async fn delete_ref(
        &self,
        name: &str,
        expected_prev: Option<&ObjectId>,
    ) -> Result<bool, RefError> {
        let result = match expected_prev {
            None => {
                sqlx::query("DELETE FROM refs WHERE name = ?")
                    .bind(name)
                    .execute(&self.pool)
                    .await?
            }
            Some(prev) => {
                let result = sqlx::query("DELETE FROM refs WHERE name = ? AND target = ?")
                    .bind(name)
                    .bind(prev.to_hex())
                    .execute(&self.pool)
                    .await?;
                if result.rows_affected() == 0 && self.read(name).await?.is_some() {
                    return Err(RefError::RefLockConflict {
                        name: name.to_string(),
                        expected: prev.to_hex(),
                    });
                }
                result
            }
        };
        Ok(result.rows_affected() > 0)
    }

    /// Point a symbolic ref at another ref by name.
    pub async fn set_symbolic(&self, name: &str, target: &str) -> Result<(), RefError> {
        sqlx::query(
            "INSERT INTO refs (name, kind, target) VALUES (?, 'symbolic', ?)
             ON CONFLICT(name) DO UPDATE SET kind = 'symbolic', target = excluded.target",
        )
        .bind(name)
        .bind(target)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// The target name of a symbolic ref, if it is one.
    pub async fn get_symbolic(&self, name: &str) -> Result<Option<String>, RefError> {
        Ok(self
            .read(name)
            .await?
            .filter(|r| r.kind == RefKind::Symbolic)
            .map(|r| r.target))
    }

    /// Follow symbolic chains to an id.
    pub async fn resolve(&self, name: &str) -> Result<Option<ObjectId>, RefError> {
        let mut current = name.to_string();
        for _ in 0..MAX_SYMBOLIC_DEPTH {
            match self.read(&current).await? {
                None => return Ok(None),
                Some(r) => match r.kind {
                    RefKind::Direct => return Ok(Some(ObjectId::from_hex(&r.target)?)),
                    RefKind::Symbolic => current = r.target,
                },
            }
        }
        Err(RefError::InvalidRefName {
            name: name.to_string(),
            reason: format!("symbolic chain deeper than {MAX_SYMBOLIC_DEPTH}"),
        })
    }

    /// List direct-resolvable refs under a prefix, byte-ordered by name.
    pub async fn list(&self, prefix: Option<&str>) -> Result<Vec<(String, ObjectId)>, RefError> {
        let pattern = format!("{}%", prefix.unwrap_or(""));
        let rows = sqlx::query(
            "SELECT name, kind, target FROM refs WHERE name LIKE ? ORDER BY name",
        )
        .bind(pattern)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.get("name");
            let kind: String = row.get("kind");
            let target: String = row.get("target");
            let id = if kind == "direct" {
                ObjectId::from_hex(&target).ok()
            } else {
                self.resolve(&target).await?
            };
            if let Some(id) = id {
                out.push((name, id));
            }
        }
        Ok(out)
    }

    /// What `HEAD` points at: a branch name, or a detached id.
    pub async fn head(&self) -> Result<Option<Reference>, RefError> {
        self.read("HEAD").await
    }

    /// Attach `HEAD` to a branch.
    pub async fn set_head_branch(&self, branch_ref: &str) -> Result<(), RefError> {
        self.set_symbolic("HEAD", branch_ref).await
    }

    /// Detach `HEAD` at an id.
    pub async fn set_head_detached(&self, sha: &ObjectId) -> Result<(), RefError> {
        self.set_ref("HEAD", sha, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> RefStore {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        RefStore::open(pool).await.unwrap()
    }

    fn sha(n: u8) -> ObjectId {
        let mut d = [0u8; 20];
        d[0] = n;
        ObjectId::Sha1(d)
    }

    #[tokio::test]
    async fn unconditional_set_and_resolve() {
        let refs = store().await;
        refs.set_ref("refs/heads/main", &sha(1), None).await.unwrap();
        assert_eq!(refs.resolve("refs/heads/main").await.unwrap(), Some(sha(1)));
        refs.set_ref("refs/heads/main", &sha(2), None).await.unwrap();
        assert_eq!(refs.resolve("refs/heads/main").await.unwrap(), Some(sha(2)));
    }

    #[tokio::test]
    async fn cas_success_and_conflict() {
        let refs = store().await;
        refs.set_ref("refs/heads/main", &sha(1), None).await.unwrap();
        refs.set_ref("refs/heads/main", &sha(2), Some(&sha(1)))
            .await
            .unwrap();
        let err = refs
            .set_ref("refs/heads/main", &sha(3), Some(&sha(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, RefError::RefLockConflict { .. }));
        assert_eq!(refs.resolve("refs/heads/main").await.unwrap(), Some(sha(2)));
    }

    #[tokio::test]
    async fn zero_expectation_means_create() {
        let refs = store().await;
        refs.set_ref("refs/heads/new", &sha(1), Some(&ObjectId::ZERO_SHA1))
            .await
            .unwrap();
        let err = refs
            .set_ref("refs/heads/new", &sha(2), Some(&ObjectId::ZERO_SHA1))
            .await
            .unwrap_err();
        assert!(matches!(err, RefError::RefLockConflict { .. }));
    }

    #[tokio::test]
    async fn symbolic_head_resolves_through_branch() {
        let refs = store().await;
        refs.set_ref("refs/heads/main", &sha(5), None).await.unwrap();
        refs.set_head_branch("refs/heads/main").await.unwrap();

        assert_eq!(
            refs.get_symbolic("HEAD").await.unwrap().as_deref(),
            Some("refs/heads/main")
        );
        assert_eq!(refs.resolve("HEAD").await.unwrap(), Some(sha(5)));

        refs.set_head_detached(&sha(9)).await.unwrap();
        assert!(refs.get_symbolic("HEAD").await.unwrap().is_none());
        assert_eq!(refs.resolve("HEAD").await.unwrap(), Some(sha(9)));
    }

    #[tokio::test]
    async fn list_is_byte_ordered_and_prefixed() {
        let refs = store().await;
        refs.set_ref("refs/heads/zeta", &sha(1), None).await.unwrap();
        refs.set_ref("refs/heads/alpha", &sha(2), None).await.unwrap();
        refs.set_ref("refs/tags/v1", &sha(3), None).await.unwrap();

        let heads = refs.list(Some("refs/heads/")).await.unwrap();
        let names: Vec<&str> = heads.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["refs/heads/alpha", "refs/heads/zeta"]);

        let all = refs.list(Some("refs/")).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn delete_with_and_without_expectation() {
        let refs = store().await;
        refs.set_ref("refs/heads/gone", &sha(1), None).await.unwrap();
        let err = refs
            .delete_ref("refs/heads/gone", Some(&sha(2)))
            .await
            .unwrap_err();
        assert!(matches!(err, RefError::RefLockConflict { .. }));

        assert!(refs.delete_ref("refs/heads/gone", Some(&sha(1))).await.unwrap());
        assert!(!refs.delete_ref("refs/heads/gone", None).await.unwrap());
    }

    #[tokio::test]
    async fn symbolic_cycle_errors_out() {
        let refs = store().await;
        refs.set_symbolic("refs/loop/a", "refs/loop/b").await.unwrap();
        refs.set_symbolic("refs/loop/b", "refs/loop/a").await.unwrap();
        assert!(refs.resolve("refs/loop/a").await.is_err());
    }
}
