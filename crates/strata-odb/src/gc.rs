//! Mark-and-sweep garbage collection.
//!
//! Mark walks the object graph from the given roots (ref targets) with a
//! visited set, so tag-to-tag chains and shared subtrees terminate. Sweep
//! consults the location index: unreachable objects older than the grace
//! period are deleted through their tier, up to an optional per-cycle cap.

use std::collections::HashSet;
use std::time::Instant;

use strata_hash::ObjectId;
use strata_object::Object;
use tracing::{info, warn};

use crate::store::TieredStore;
use crate::{now_ms, StoreError};

/// Two weeks, the default object grace period.
pub const DEFAULT_GRACE_PERIOD_MS: i64 = 14 * 24 * 60 * 60 * 1000;

#[derive(Debug, Clone)]
pub struct GcOptions {
    /// Minimum age before an unreferenced object may be deleted.
    pub grace_period_ms: i64,
    /// Upper bound on deletions per cycle.
    pub max_delete_count: Option<usize>,
    /// Report without mutating.
    pub dry_run: bool,
}

impl Default for GcOptions {
    fn default() -> Self {
        Self {
            grace_period_ms: DEFAULT_GRACE_PERIOD_MS,
            max_delete_count: None,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcReport {
    pub deleted_count: usize,
    pub freed_bytes: u64,
    pub unreferenced_count: usize,
    pub skipped_grace: usize,
    pub skipped_max: usize,
    pub total_scanned: usize,
    pub scanned_hot: usize,
    pub scanned_warm: usize,
    pub scanned_cold: usize,
    pub reachable_count: usize,
    pub duration_ms: u64,
}

/// Run one mark-and-sweep cycle over `store`, treating `roots` as live.
pub async fn collect(
    store: &TieredStore,
    roots: &[ObjectId],
    opts: &GcOptions,
) -> Result<GcReport, StoreError> {
    let started = Instant::now();
    let reachable = mark(store, roots).await?;

    let mut report = GcReport {
        reachable_count: reachable.len(),
        ..Default::default()
    };

    let now = now_ms();
    for loc in store.index().all().await? {
        report.total_scanned += 1;
        match loc.tier {
            crate::index::Tier::Hot => report.scanned_hot += 1,
            crate::index::Tier::Warm => report.scanned_warm += 1,
            crate::index::Tier::Cold => report.scanned_cold += 1,
        }
        if reachable.contains(&loc.sha) {
            continue;
        }
        report.unreferenced_count += 1;

        if now - loc.created_at < opts.grace_period_ms {
            report.skipped_grace += 1;
            continue;
        }
        if let Some(max) = opts.max_delete_count {
            if report.deleted_count >= max {
                report.skipped_max += 1;
                continue;
            }
        }
        if opts.dry_run {
            report.deleted_count += 1;
            report.freed_bytes += loc.size;
            continue;
        }
        if let Some(freed) = store.delete_object(&loc.sha).await? {
            report.deleted_count += 1;
            report.freed_bytes += freed;
        }
    }

    report.duration_ms = started.elapsed().as_millis() as u64;
    info!(
        deleted = report.deleted_count,
        freed = report.freed_bytes,
        reachable = report.reachable_count,
        scanned = report.total_scanned,
        dry_run = opts.dry_run,
        "gc cycle finished"
    );
    Ok(report)
}

/// Walk the object graph from `roots`, returning every reachable id.
pub async fn mark(
    store: &TieredStore,
    roots: &[ObjectId],
) -> Result<HashSet<ObjectId>, StoreError> {
    let mut visited: HashSet<ObjectId> = HashSet::new();
    let mut queue: Vec<ObjectId> = roots.iter().copied().filter(|r| !r.is_zero()).collect();

    while let Some(sha) = queue.pop() {
        if !visited.insert(sha) {
            continue;
        }
        let Some(object) = store.get_object(&sha).await? else {
            warn!(sha = %sha, "reachable object missing during mark");
            continue;
        };
        match object {
            Object::Commit(commit) => {
                queue.push(commit.tree);
                queue.extend(commit.parents);
            }
            Object::Tree(tree) => {
                queue.extend(tree.entries.iter().map(|e| e.id));
            }
            Object::Tag(tag) => queue.push(tag.target),
            Object::Blob(_) => {}
        }
    }
    Ok(visited)
}
