//! Merge-base discovery by bidirectional BFS.
//!
//! Two frontiers expand in lockstep from the two tips; the first commit
//! seen from both sides is a merge base. Ties break toward the commit
//! discovered earlier in the combined expansion order.

use std::collections::{HashSet, VecDeque};

use strata_hash::ObjectId;
use strata_object::Object;
use strata_odb::TieredStore;

use crate::DiffError;

/// Find a merge base of `a` and `b`, if their histories meet.
pub async fn merge_base(
    store: &TieredStore,
    a: &ObjectId,
    b: &ObjectId,
) -> Result<Option<ObjectId>, DiffError> {
    if a == b {
        return Ok(Some(*a));
    }

    let mut queue_a: VecDeque<ObjectId> = VecDeque::from([*a]);
    let mut queue_b: VecDeque<ObjectId> = VecDeque::from([*b]);
    let mut seen_a: HashSet<ObjectId> = HashSet::new();
    let mut seen_b: HashSet<ObjectId> = HashSet::new();

    // Alternate one step per side so the combined order is breadth-first
    // over both histories; the first dual-colored commit wins.
    while !queue_a.is_empty() || !queue_b.is_empty() {
        if let Some(found) =
            step(store, &mut queue_a, &mut seen_a, &seen_b).await?
        {
            return Ok(Some(found));
        }
        if let Some(found) =
            step(store, &mut queue_b, &mut seen_b, &seen_a).await?
        {
            return Ok(Some(found));
        }
    }
    Ok(None)
}

async fn step(
    store: &TieredStore,
    queue: &mut VecDeque<ObjectId>,
    seen: &mut HashSet<ObjectId>,
    other: &HashSet<ObjectId>,
) -> Result<Option<ObjectId>, DiffError> {
    let Some(id) = queue.pop_front() else {
        return Ok(None);
    };
    if !seen.insert(id) {
        return Ok(None);
    }
    if other.contains(&id) {
        return Ok(Some(id));
    }
    if let Some(Object::Commit(commit)) = store.get_object(&id).await? {
        for parent in commit.parents {
            if !seen.contains(&parent) {
                queue.push_back(parent);
            }
        }
    }
    Ok(None)
}

/// Whether `ancestor` is reachable from `descendant`.
pub async fn is_ancestor(
    store: &TieredStore,
    ancestor: &ObjectId,
    descendant: &ObjectId,
) -> Result<bool, DiffError> {
    if ancestor == descendant {
        return Ok(true);
    }
    let mut seen = HashSet::new();
    let mut queue = vec![*descendant];
    while let Some(id) = queue.pop() {
        if !seen.insert(id) {
            continue;
        }
        if id == *ancestor {
            return Ok(true);
        }
        if let Some(Object::Commit(commit)) = store.get_object(&id).await? {
            queue.extend(commit.parents);
        }
    }
    Ok(false)
}
