//! Mirror behavior against an in-process remote that speaks the real
//! wire engines (upload-pack/receive-pack) over a second repository.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use bstr::BString;
use strata_client::push::PushUpdate;
use strata_client::PushOutcome;
use strata_hash::ObjectId;
use strata_object::{Commit, Ident, Object, ObjectType};
use strata_odb::db::open_in_memory;
use strata_odb::{MemoryStore, StoreConfig, TieredStore};
use strata_protocol::receive_pack::unpack_objects;
use strata_protocol::upload_pack::enumerate_closure;
use strata_ref::RefStore;
use strata_sync::{ConflictStrategy, Mirror, MirrorOptions, MirrorRemote, SyncDirection, SyncError};

struct Repo {
    store: TieredStore,
    refs: RefStore,
}

async fn repo() -> Repo {
    let pool = open_in_memory().await.unwrap();
    let store = TieredStore::open(
        Arc::new(MemoryStore::new()),
        pool.clone(),
        StoreConfig::default(),
    )
    .await
    .unwrap();
    let refs = RefStore::open(pool).await.unwrap();
    Repo { store, refs }
}

async fn commit(store: &TieredStore, parents: Vec<ObjectId>, msg: &str) -> ObjectId {
    let tree = store.put(ObjectType::Tree, b"").await.unwrap();
    store
        .put_object(&Object::Commit(Commit {
            tree,
            parents,
            author: Ident::new("M", "m@example.com", 1),
            committer: Ident::new("M", "m@example.com", 1),
            gpgsig: None,
            message: BString::from(msg),
        }))
        .await
        .unwrap()
}

/// In-process remote: the "other repository", reached through the same
/// object enumeration and unpack paths the wire engines use.
struct LoopbackRemote {
    remote: Repo,
}

#[async_trait]
impl MirrorRemote for LoopbackRemote {
    async fn discover(&self) -> Result<Vec<(String, ObjectId)>, SyncError> {
        Ok(self.remote.refs.list(Some("refs/")).await?)
    }

    async fn fetch_missing(
        &self,
        store: &TieredStore,
        wants: &[ObjectId],
    ) -> Result<usize, SyncError> {
        if wants.is_empty() {
            return Ok(0);
        }
        let objects =
            enumerate_closure(&self.remote.store, wants, &HashSet::new()).await?;
        let mut writer = strata_pack::PackWriter::new(objects.len() as u32);
        for (_, ty, data) in &objects {
            writer.add_object(*ty, data).unwrap();
        }
        let (pack, _) = writer.finish().unwrap();
        Ok(unpack_objects(store, &pack).await?)
    }

    async fn push_refs(
        &self,
        store: &TieredStore,
        updates: &[PushUpdate],
    ) -> Result<Vec<PushOutcome>, SyncError> {
        let mut outcomes = Vec::new();
        for update in updates {
            let Some(new) = update.new else {
                self.remote.refs.delete_ref(&update.ref_name, None).await?;
                outcomes.push(PushOutcome {
                    ref_name: update.ref_name.clone(),
                    accepted: true,
                    reason: None,
                });
                continue;
            };
            // Ship the closure the remote lacks, then move the ref.
            let objects = enumerate_closure(store, &[new], &HashSet::new()).await?;
            for (_, ty, data) in &objects {
                self.remote.store.put(*ty, data).await?;
            }
            self.remote.refs.set_ref(&update.ref_name, &new, None).await?;
            outcomes.push(PushOutcome {
                ref_name: update.ref_name.clone(),
                accepted: true,
                reason: None,
            });
        }
        Ok(outcomes)
    }
}

#[tokio::test]
async fn pull_new_refs_and_idempotent_second_pull() {
    let local = repo().await;
    let remote_repo = repo().await;
    let tip = commit(&remote_repo.store, vec![], "remote work\n").await;
    remote_repo
        .refs
        .set_ref("refs/heads/main", &tip, None)
        .await
        .unwrap();
    let remote = LoopbackRemote { remote: remote_repo };

    let mirror = Mirror::new(
        &local.store,
        &local.refs,
        &remote,
        MirrorOptions::default(),
    )
    .unwrap();

    let first = mirror.sync().await.unwrap();
    assert!(first.success);
    assert_eq!(first.refs_updated, 1);
    assert!(first.objects_fetched > 0);
    assert_eq!(
        local.refs.resolve("refs/heads/main").await.unwrap(),
        Some(tip)
    );

    // Nothing changed remotely: the second pull is a no-op.
    let second = mirror.sync().await.unwrap();
    assert_eq!(second.refs_updated, 0);
    assert_eq!(second.objects_fetched, 0);
    assert_eq!(second.refs_skipped, 1);
}

#[tokio::test]
async fn pull_fast_forward() {
    let local = repo().await;
    let remote_repo = repo().await;
    let base = commit(&remote_repo.store, vec![], "base\n").await;
    remote_repo
        .refs
        .set_ref("refs/heads/main", &base, None)
        .await
        .unwrap();
    let remote = LoopbackRemote { remote: remote_repo };

    let mirror = Mirror::new(&local.store, &local.refs, &remote, MirrorOptions::default()).unwrap();
    mirror.sync().await.unwrap();

    // Remote advances.
    let newer = commit(&remote.remote.store, vec![base], "newer\n").await;
    remote
        .remote
        .refs
        .set_ref("refs/heads/main", &newer, None)
        .await
        .unwrap();

    let report = mirror.sync().await.unwrap();
    assert_eq!(report.refs_updated, 1);
    let result = &report.per_ref[0];
    assert!(result.fast_forward);
    assert!(!result.conflict);
    assert_eq!(
        local.refs.resolve("refs/heads/main").await.unwrap(),
        Some(newer)
    );
}

#[tokio::test]
async fn diverged_force_remote_overwrites_local() {
    let local = repo().await;
    let remote_repo = repo().await;

    // Shared base, then both sides diverge.
    let base = commit(&remote_repo.store, vec![], "base\n").await;
    remote_repo
        .refs
        .set_ref("refs/heads/main", &base, None)
        .await
        .unwrap();
    let remote = LoopbackRemote { remote: remote_repo };
    let mirror = Mirror::new(
        &local.store,
        &local.refs,
        &remote,
        MirrorOptions {
            strategy: ConflictStrategy::ForceRemote,
            ..MirrorOptions::default()
        },
    )
    .unwrap();
    mirror.sync().await.unwrap();

    let local_tip = commit(&local.store, vec![base], "local divergence\n").await;
    local
        .refs
        .set_ref("refs/heads/main", &local_tip, None)
        .await
        .unwrap();
    let remote_tip = commit(&remote.remote.store, vec![base], "remote divergence\n").await;
    remote
        .remote
        .refs
        .set_ref("refs/heads/main", &remote_tip, None)
        .await
        .unwrap();

    let report = mirror.sync().await.unwrap();
    let result = &report.per_ref[0];
    assert_eq!(result.prev, Some(local_tip));
    assert_eq!(result.new, Some(remote_tip));
    assert!(result.updated);
    assert!(result.conflict);
    assert!(!result.fast_forward);
    assert_eq!(result.resolution.as_deref(), Some("force-remote"));
    assert_eq!(
        local.refs.resolve("refs/heads/main").await.unwrap(),
        Some(remote_tip)
    );
}

#[tokio::test]
async fn diverged_skip_leaves_local() {
    let local = repo().await;
    let remote_repo = repo().await;
    let base = commit(&remote_repo.store, vec![], "base\n").await;
    remote_repo
        .refs
        .set_ref("refs/heads/main", &base, None)
        .await
        .unwrap();
    let remote = LoopbackRemote { remote: remote_repo };
    let mirror = Mirror::new(
        &local.store,
        &local.refs,
        &remote,
        MirrorOptions {
            strategy: ConflictStrategy::Skip,
            ..MirrorOptions::default()
        },
    )
    .unwrap();
    mirror.sync().await.unwrap();

    let local_tip = commit(&local.store, vec![base], "mine\n").await;
    local.refs.set_ref("refs/heads/main", &local_tip, None).await.unwrap();
    let remote_tip = commit(&remote.remote.store, vec![base], "theirs\n").await;
    remote
        .remote
        .refs
        .set_ref("refs/heads/main", &remote_tip, None)
        .await
        .unwrap();

    let report = mirror.sync().await.unwrap();
    assert_eq!(report.refs_updated, 0);
    assert_eq!(
        local.refs.resolve("refs/heads/main").await.unwrap(),
        Some(local_tip)
    );
}

#[tokio::test]
async fn diverged_error_strategy_raises() {
    let local = repo().await;
    let remote_repo = repo().await;
    let base = commit(&remote_repo.store, vec![], "base\n").await;
    remote_repo.refs.set_ref("refs/heads/main", &base, None).await.unwrap();
    let remote = LoopbackRemote { remote: remote_repo };
    let mirror = Mirror::new(
        &local.store,
        &local.refs,
        &remote,
        MirrorOptions {
            strategy: ConflictStrategy::Error,
            ..MirrorOptions::default()
        },
    )
    .unwrap();
    mirror.sync().await.unwrap();

    let local_tip = commit(&local.store, vec![base], "mine\n").await;
    local.refs.set_ref("refs/heads/main", &local_tip, None).await.unwrap();
    let remote_tip = commit(&remote.remote.store, vec![base], "theirs\n").await;
    remote.remote.refs.set_ref("refs/heads/main", &remote_tip, None).await.unwrap();

    assert!(matches!(
        mirror.sync().await.unwrap_err(),
        SyncError::Diverged(_)
    ));
}

#[tokio::test]
async fn push_direction_sends_local_branches() {
    let local = repo().await;
    let remote_repo = repo().await;
    let tip = commit(&local.store, vec![], "to publish\n").await;
    local.refs.set_ref("refs/heads/main", &tip, None).await.unwrap();
    let remote = LoopbackRemote { remote: remote_repo };

    let mirror = Mirror::new(
        &local.store,
        &local.refs,
        &remote,
        MirrorOptions {
            direction: SyncDirection::Push,
            ..MirrorOptions::default()
        },
    )
    .unwrap();
    let report = mirror.sync().await.unwrap();
    assert_eq!(report.refs_updated, 1);
    assert_eq!(
        remote.remote.refs.resolve("refs/heads/main").await.unwrap(),
        Some(tip)
    );
    assert!(remote.remote.store.contains(&tip).await.unwrap());
}

#[tokio::test]
async fn sync_and_record_persists_ref_snapshot() {
    let local = repo().await;
    let remote_repo = repo().await;
    let tip = commit(&remote_repo.store, vec![], "snapshot me\n").await;
    remote_repo
        .refs
        .set_ref("refs/heads/main", &tip, None)
        .await
        .unwrap();
    let remote = LoopbackRemote { remote: remote_repo };

    let state_store: Arc<dyn strata_odb::ObjectStore> = Arc::new(MemoryStore::new());
    let mirror = Mirror::new(&local.store, &local.refs, &remote, MirrorOptions::default()).unwrap();
    mirror.sync_and_record(&state_store, "origin").await.unwrap();

    let state = strata_sync::MirrorState::load(&state_store, "origin")
        .await
        .unwrap();
    assert!(state.last_sync_ts.is_some());
    assert_eq!(
        state.last_remote_refs.get("refs/heads/main"),
        Some(&tip.to_hex())
    );
    assert_eq!(
        state.last_local_refs.get("refs/heads/main"),
        Some(&tip.to_hex())
    );
}

#[tokio::test]
async fn include_exclude_patterns_filter_refs() {
    let local = repo().await;
    let remote_repo = repo().await;
    let tip = commit(&remote_repo.store, vec![], "x\n").await;
    remote_repo.refs.set_ref("refs/heads/main", &tip, None).await.unwrap();
    remote_repo.refs.set_ref("refs/heads/wip", &tip, None).await.unwrap();
    remote_repo.refs.set_ref("refs/tags/v1", &tip, None).await.unwrap();
    let remote = LoopbackRemote { remote: remote_repo };

    let mirror = Mirror::new(
        &local.store,
        &local.refs,
        &remote,
        MirrorOptions {
            include: vec!["refs/heads/**".into()],
            exclude: vec!["refs/heads/wip".into()],
            ..MirrorOptions::default()
        },
    )
    .unwrap();
    let report = mirror.sync().await.unwrap();
    assert_eq!(report.refs_updated, 1);
    assert!(local.refs.read("refs/heads/main").await.unwrap().is_some());
    assert!(local.refs.read("refs/heads/wip").await.unwrap().is_none());
    assert!(local.refs.read("refs/tags/v1").await.unwrap().is_none());
}
