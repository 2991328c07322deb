//! The repository handle.
//!
//! A `Repo` is an explicit capability object: the tiered object store, the
//! ref store, and the engine configuration, composed once and borrowed by
//! wire handlers and orchestration. There is no global state; a handle's
//! lifetime is bounded by the session that opened it.

mod config;

pub use config::EngineConfig;

use std::sync::Arc;

use sqlx::SqlitePool;
use strata_hash::ObjectId;
use strata_object::Object;
use strata_odb::gc::{collect, GcOptions, GcReport};
use strata_odb::{ObjectStore, TieredStore};
use strata_ref::{Branches, RefStore, Tags, Worktrees};
use tracing::info;

/// Errors produced at the repository boundary.
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Store(#[from] strata_odb::StoreError),

    #[error(transparent)]
    Ref(#[from] strata_ref::RefError),

    #[error(transparent)]
    Sql(#[from] sqlx::Error),
}

/// One open repository.
pub struct Repo {
    pub store: TieredStore,
    pub refs: RefStore,
    pub config: EngineConfig,
}

impl Repo {
    /// Open (or create) a repository over a backing store and SQL pool.
    pub async fn open(
        backing: Arc<dyn ObjectStore>,
        pool: SqlitePool,
        config: EngineConfig,
    ) -> Result<Self, RepoError> {
        let store = TieredStore::open(backing, pool.clone(), config.store_config()).await?;
        let refs = RefStore::open(pool).await?;
        Ok(Self {
            store,
            refs,
            config,
        })
    }

    /// Branch operations bound to this repository.
    pub fn branches(&self) -> Branches<'_> {
        Branches::new(&self.refs, &self.store)
    }

    /// Tag operations bound to this repository.
    pub fn tags(&self) -> Tags<'_> {
        Tags::new(&self.refs, &self.store)
    }

    /// Worktree operations bound to this repository.
    pub fn worktrees(&self) -> Worktrees<'_> {
        Worktrees::new(&self.refs)
    }

    /// Every GC root: the target of each resolvable ref plus HEAD.
    pub async fn gc_roots(&self) -> Result<Vec<ObjectId>, RepoError> {
        let mut roots: Vec<ObjectId> = self
            .refs
            .list(Some("refs/"))
            .await?
            .into_iter()
            .map(|(_, id)| id)
            .collect();
        if let Some(head) = self.refs.resolve("HEAD").await? {
            roots.push(head);
        }
        Ok(roots)
    }

    /// Run one garbage-collection cycle with this repo's grace period.
    pub async fn gc(&self, mut options: GcOptions) -> Result<GcReport, RepoError> {
        if options.grace_period_ms == strata_odb::gc::DEFAULT_GRACE_PERIOD_MS {
            options.grace_period_ms = self.config.grace_period_ms;
        }
        let roots = self.gc_roots().await?;
        let report = collect(&self.store, &roots, &options).await?;
        info!(
            deleted = report.deleted_count,
            freed = report.freed_bytes,
            "repository gc"
        );
        Ok(report)
    }

    /// Convenience: read and parse an object.
    pub async fn object(&self, id: &ObjectId) -> Result<Option<Object>, RepoError> {
        Ok(self.store.get_object(id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bstr::BString;
    use strata_object::{Commit, Ident, ObjectType};
    use strata_odb::MemoryStore;

    async fn open_repo() -> Repo {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        Repo::open(
            Arc::new(MemoryStore::new()),
            pool,
            EngineConfig::default(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn open_and_compose() {
        let repo = open_repo().await;
        let blob = repo.store.put(ObjectType::Blob, b"hello\n").await.unwrap();
        assert_eq!(blob.to_hex(), "ce013625030ba8dba906f756967f9e9ca394464a");
        assert!(repo.object(&blob).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn gc_uses_ref_roots() {
        let repo = open_repo().await;
        let tree = repo.store.put(ObjectType::Tree, b"").await.unwrap();
        let commit = repo
            .store
            .put_object(&Object::Commit(Commit {
                tree,
                parents: Vec::new(),
                author: Ident::new("R", "r@example.com", 1),
                committer: Ident::new("R", "r@example.com", 1),
                gpgsig: None,
                message: BString::from("kept\n"),
            }))
            .await
            .unwrap();
        repo.refs.set_ref("refs/heads/main", &commit, None).await.unwrap();
        let orphan = repo.store.put(ObjectType::Blob, b"orphan\n").await.unwrap();
        repo.store.flush().await.unwrap();

        let report = repo
            .gc(GcOptions {
                grace_period_ms: 0,
                ..GcOptions::default()
            })
            .await
            .unwrap();
        assert_eq!(report.deleted_count, 1);
        assert!(repo.store.get(&commit).await.unwrap().is_some());
        assert!(repo.store.get(&orphan).await.unwrap().is_none());
    }
}
