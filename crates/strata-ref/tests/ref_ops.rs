//! Branch, tag, and worktree behavior against a live store.

use std::sync::Arc;

use bstr::BString;
use strata_hash::ObjectId;
use strata_object::{Commit, Ident, Object, ObjectType};
use strata_odb::db::open_in_memory;
use strata_odb::{MemoryStore, StoreConfig, TieredStore};
use strata_ref::{Branches, RefError, RefStore, Tags, Worktrees};

struct Fixture {
    refs: RefStore,
    store: TieredStore,
}

async fn fixture() -> Fixture {
    let pool = open_in_memory().await.unwrap();
    let store = TieredStore::open(
        Arc::new(MemoryStore::new()),
        pool.clone(),
        StoreConfig::default(),
    )
    .await
    .unwrap();
    let refs = RefStore::open(pool).await.unwrap();
    Fixture { refs, store }
}

async fn commit(store: &TieredStore, parents: Vec<ObjectId>, msg: &str) -> ObjectId {
    let tree = store.put(ObjectType::Tree, b"").await.unwrap();
    store
        .put_object(&Object::Commit(Commit {
            tree,
            parents,
            author: Ident::new("T", "t@example.com", 1),
            committer: Ident::new("T", "t@example.com", 1),
            gpgsig: None,
            message: BString::from(msg),
        }))
        .await
        .unwrap()
}

#[tokio::test]
async fn branch_create_checkout_delete() {
    let fx = fixture().await;
    let c1 = commit(&fx.store, vec![], "one").await;
    fx.refs.set_ref("refs/heads/main", &c1, None).await.unwrap();
    fx.refs.set_head_branch("refs/heads/main").await.unwrap();

    let branches = Branches::new(&fx.refs, &fx.store);
    let tip = branches.create("topic", None, false, true).await.unwrap();
    assert_eq!(tip, c1);
    assert_eq!(branches.current().await.unwrap().as_deref(), Some("topic"));

    // The checked-out branch refuses deletion.
    let err = branches.delete("topic", false, false, None).await.unwrap_err();
    assert!(matches!(err, RefError::BranchInUse(..)));

    branches
        .checkout(Some("main"), None, false, false, None, None)
        .await
        .unwrap();
    branches.delete("topic", false, false, None).await.unwrap();
    assert_eq!(branches.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn create_rejects_duplicates_and_bad_names() {
    let fx = fixture().await;
    let c1 = commit(&fx.store, vec![], "one").await;
    fx.refs.set_ref("refs/heads/main", &c1, None).await.unwrap();
    fx.refs.set_head_branch("refs/heads/main").await.unwrap();

    let branches = Branches::new(&fx.refs, &fx.store);
    branches.create("dup", None, false, false).await.unwrap();
    assert!(matches!(
        branches.create("dup", None, false, false).await.unwrap_err(),
        RefError::AlreadyExists(_)
    ));
    branches.create("dup", None, true, false).await.unwrap(); // force wins

    assert!(matches!(
        branches.create("bad..name", None, false, false).await.unwrap_err(),
        RefError::InvalidRefName { .. }
    ));
}

#[tokio::test]
async fn start_point_resolution_order() {
    let fx = fixture().await;
    let c1 = commit(&fx.store, vec![], "one").await;
    let c2 = commit(&fx.store, vec![c1], "two").await;
    fx.refs.set_ref("refs/heads/main", &c1, None).await.unwrap();
    fx.refs
        .set_ref("refs/remotes/origin/feat", &c2, None)
        .await
        .unwrap();
    fx.refs.set_head_branch("refs/heads/main").await.unwrap();

    let branches = Branches::new(&fx.refs, &fx.store);
    // Hex wins over everything.
    let tip = branches
        .create("a", Some(&c2.to_hex()), false, false)
        .await
        .unwrap();
    assert_eq!(tip, c2);
    // Local branch next.
    let tip = branches.create("b", Some("main"), false, false).await.unwrap();
    assert_eq!(tip, c1);
    // Remote-tracking ref next.
    let tip = branches
        .create("c", Some("origin/feat"), false, false)
        .await
        .unwrap();
    assert_eq!(tip, c2);
    // Unknown fails.
    assert!(branches.create("d", Some("nope"), false, false).await.is_err());
}

#[tokio::test]
async fn merged_check_walks_ancestry() {
    let fx = fixture().await;
    let c1 = commit(&fx.store, vec![], "base").await;
    let c2 = commit(&fx.store, vec![c1], "main tip").await;
    let stray = commit(&fx.store, vec![c1], "diverged").await;

    fx.refs.set_ref("refs/heads/main", &c2, None).await.unwrap();
    fx.refs.set_head_branch("refs/heads/main").await.unwrap();
    fx.refs.set_ref("refs/heads/merged", &c1, None).await.unwrap();
    fx.refs
        .set_ref("refs/heads/unmerged", &stray, None)
        .await
        .unwrap();

    let branches = Branches::new(&fx.refs, &fx.store);
    // An ancestor of main deletes cleanly.
    branches.delete("merged", false, true, None).await.unwrap();
    // A diverged tip does not, unless forced.
    assert!(matches!(
        branches.delete("unmerged", false, true, None).await.unwrap_err(),
        RefError::NotMerged(_)
    ));
    branches.delete("unmerged", true, true, None).await.unwrap();
}

#[tokio::test]
async fn rename_carries_head_and_tracking() {
    let fx = fixture().await;
    let c1 = commit(&fx.store, vec![], "one").await;
    fx.refs.set_ref("refs/heads/old", &c1, None).await.unwrap();
    fx.refs.set_head_branch("refs/heads/old").await.unwrap();

    let branches = Branches::new(&fx.refs, &fx.store);
    branches.set_tracking("old", "origin", "old").await.unwrap();
    branches.rename(None, "new", false).await.unwrap();

    assert_eq!(branches.current().await.unwrap().as_deref(), Some("new"));
    assert!(fx.refs.read("refs/heads/old").await.unwrap().is_none());
    assert_eq!(fx.refs.resolve("refs/heads/new").await.unwrap(), Some(c1));
    assert!(branches.tracking("new").await.unwrap().is_some());
}

#[tokio::test]
async fn detached_checkout() {
    let fx = fixture().await;
    let c1 = commit(&fx.store, vec![], "one").await;
    fx.refs.set_ref("refs/heads/main", &c1, None).await.unwrap();
    fx.refs.set_head_branch("refs/heads/main").await.unwrap();

    let branches = Branches::new(&fx.refs, &fx.store);
    branches
        .checkout(None, Some(c1), false, true, None, None)
        .await
        .unwrap();
    assert!(fx.refs.get_symbolic("HEAD").await.unwrap().is_none());
    assert_eq!(fx.refs.resolve("HEAD").await.unwrap(), Some(c1));
}

#[tokio::test]
async fn ahead_behind_refresh() {
    let fx = fixture().await;
    let base = commit(&fx.store, vec![], "base").await;
    let local = commit(&fx.store, vec![base], "local work").await;
    fx.refs.set_ref("refs/heads/dev", &local, None).await.unwrap();
    fx.refs
        .set_ref("refs/remotes/origin/dev", &base, None)
        .await
        .unwrap();

    let branches = Branches::new(&fx.refs, &fx.store);
    branches.set_tracking("dev", "origin", "dev").await.unwrap();
    let tracking = branches.refresh_tracking("dev").await.unwrap().unwrap();
    assert_eq!(tracking.ahead, 1);
    assert_eq!(tracking.behind, 0);
}

#[tokio::test]
async fn annotated_tag_roundtrip_and_peel() {
    let fx = fixture().await;
    let c1 = commit(&fx.store, vec![], "release").await;
    let tags = Tags::new(&fx.refs, &fx.store);

    let tag_id = tags
        .create_annotated(
            "v1.0.0",
            &c1,
            Ident::new("Rel", "rel@example.com", 5),
            "first release\n",
            None,
            false,
        )
        .await
        .unwrap();
    assert_ne!(tag_id, c1); // the ref points at the tag object

    assert_eq!(
        fx.refs.resolve("refs/tags/v1.0.0").await.unwrap(),
        Some(tag_id)
    );
    assert_eq!(tags.resolve_to_commit("v1.0.0").await.unwrap(), Some(c1));
}

#[tokio::test]
async fn tag_chain_peels_through_tags() {
    let fx = fixture().await;
    let c1 = commit(&fx.store, vec![], "x").await;
    let tags = Tags::new(&fx.refs, &fx.store);
    let inner = tags
        .create_annotated("inner", &c1, Ident::new("T", "t@e", 1), "inner\n", None, false)
        .await
        .unwrap();
    tags.create_annotated("outer", &inner, Ident::new("T", "t@e", 2), "outer\n", None, false)
        .await
        .unwrap();

    assert_eq!(tags.resolve_to_commit("outer").await.unwrap(), Some(c1));
}

#[tokio::test]
async fn lightweight_tag_points_at_target() {
    let fx = fixture().await;
    let c1 = commit(&fx.store, vec![], "x").await;
    let tags = Tags::new(&fx.refs, &fx.store);
    tags.create_lightweight("lw", &c1, false).await.unwrap();
    assert_eq!(fx.refs.resolve("refs/tags/lw").await.unwrap(), Some(c1));
    assert_eq!(tags.resolve_to_commit("lw").await.unwrap(), Some(c1));
    assert!(tags.delete("lw").await.unwrap());
}

#[tokio::test]
async fn worktree_exclusive_branch_checkout() {
    let fx = fixture().await;
    let c1 = commit(&fx.store, vec![], "x").await;
    fx.refs.set_ref("refs/heads/main", &c1, None).await.unwrap();

    let worktrees = Worktrees::new(&fx.refs);
    worktrees.add("/srv/wt/one", Some("main"), None, false).await.unwrap();

    let err = worktrees
        .add("/srv/wt/two", Some("main"), None, false)
        .await
        .unwrap_err();
    assert!(matches!(err, RefError::BranchInWorktree { .. }));

    // Forced double-checkout is allowed.
    worktrees.add("/srv/wt/two", Some("main"), None, true).await.unwrap();
    assert_eq!(worktrees.list().await.unwrap().len(), 2);
}

#[tokio::test]
async fn worktree_lock_move_prune() {
    let fx = fixture().await;
    let c1 = commit(&fx.store, vec![], "x").await;
    fx.refs.set_ref("refs/heads/dev", &c1, None).await.unwrap();

    let worktrees = Worktrees::new(&fx.refs);
    worktrees.add("/srv/wt/dev", Some("dev"), None, false).await.unwrap();

    worktrees.lock("/srv/wt/dev", Some("backup running")).await.unwrap();
    assert!(matches!(
        worktrees.relocate("/srv/wt/dev", "/srv/wt/dev2").await.unwrap_err(),
        RefError::WorktreeLocked(..)
    ));
    worktrees.unlock("/srv/wt/dev").await.unwrap();
    worktrees.relocate("/srv/wt/dev", "/srv/wt/dev2").await.unwrap();
    assert!(worktrees.find("/srv/wt/dev2").await.unwrap().is_some());

    // Branch disappears; prune drops the registration.
    fx.refs.delete_ref("refs/heads/dev", None).await.unwrap();
    let pruned = worktrees.prune().await.unwrap();
    assert_eq!(pruned, vec!["/srv/wt/dev2".to_string()]);
    assert!(worktrees.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn detached_worktree() {
    let fx = fixture().await;
    let c1 = commit(&fx.store, vec![], "x").await;
    let worktrees = Worktrees::new(&fx.refs);
    let entry = worktrees.add("/srv/wt/det", None, Some(c1), false).await.unwrap();
    assert!(entry.head_ref.is_none());
    assert_eq!(entry.head_sha, c1);
    assert!(worktrees.remove("/srv/wt/det", false).await.unwrap());
}
