//! Rename and copy detection over a path-level diff.
//!
//! Exact id matches pair immediately at similarity 100. Remaining pairs are
//! scored positionally: the count of bytes equal at the same offset divided
//! by the longer length, as a rounded percentage. Pairing is greedy,
//! best-candidate-per-deletion, bounded by `max_rename_size`.

use std::collections::BTreeMap;

use strata_hash::ObjectId;
use strata_object::EntryMode;
use strata_odb::TieredStore;
use tracing::debug;

use crate::tree::{DiffEntry, DiffOptions};
use crate::{ChangeKind, DiffError};

/// Positional similarity of two byte strings, as a percentage.
pub fn similarity(a: &[u8], b: &[u8]) -> u8 {
    let max = a.len().max(b.len());
    if max == 0 {
        return 100;
    }
    let equal = a
        .iter()
        .zip(b.iter())
        .filter(|(x, y)| x == y)
        .count();
    ((equal as f64 / max as f64) * 100.0).round() as u8
}

/// Fold matching deleted/added pairs into renames, and (optionally) match
/// added entries against surviving old paths as copies.
pub async fn detect(
    store: &TieredStore,
    entries: &mut Vec<DiffEntry>,
    old_paths: &BTreeMap<String, (EntryMode, ObjectId)>,
    opts: &DiffOptions,
) -> Result<(), DiffError> {
    let deleted: Vec<usize> = positions(entries, ChangeKind::Deleted);
    let added: Vec<usize> = positions(entries, ChangeKind::Added);
    if added.is_empty() {
        return Ok(());
    }

    let mut claimed_added = vec![false; entries.len()];
    let mut claimed_deleted = vec![false; entries.len()];
    let mut pairs: Vec<(usize, usize, u8)> = Vec::new();

    for &del in &deleted {
        let Some(del_id) = entries[del].old_id else {
            continue;
        };
        let mut best: Option<(usize, u8)> = None;
        for &add in &added {
            if claimed_added[add] {
                continue;
            }
            let Some(add_id) = entries[add].new_id else {
                continue;
            };
            let score = if del_id == add_id {
                100
            } else {
                match score_pair(store, &del_id, &add_id, opts).await? {
                    Some(score) => score,
                    None => continue,
                }
            };
            if score >= opts.rename_threshold && best.map_or(true, |(_, b)| score > b) {
                best = Some((add, score));
                if score == 100 {
                    break;
                }
            }
        }
        if let Some((add, score)) = best {
            claimed_added[add] = true;
            claimed_deleted[del] = true;
            pairs.push((del, add, score));
        }
    }

    for (del, add, score) in &pairs {
        let old = entries[*del].clone();
        let new = &mut entries[*add];
        new.kind = ChangeKind::Renamed;
        new.old_path = old.old_path;
        new.old_mode = old.old_mode;
        new.old_id = old.old_id;
        new.similarity = Some(*score);
    }
    // Drop the deletions that became the old half of a rename.
    let mut index = 0;
    entries.retain(|_| {
        let keep = !claimed_deleted[index];
        index += 1;
        keep
    });

    if opts.detect_copies {
        detect_copies(store, entries, old_paths, opts).await?;
    }
    debug!(renames = pairs.len(), "rename detection finished");
    Ok(())
}

/// Copies: an added entry similar to a path that still exists on both sides.
async fn detect_copies(
    store: &TieredStore,
    entries: &mut [DiffEntry],
    old_paths: &BTreeMap<String, (EntryMode, ObjectId)>,
    opts: &DiffOptions,
) -> Result<(), DiffError> {
    for entry in entries.iter_mut() {
        if entry.kind != ChangeKind::Added {
            continue;
        }
        let Some(add_id) = entry.new_id else {
            continue;
        };
        let mut best: Option<(&str, &ObjectId, u8)> = None;
        for (path, (_, old_id)) in old_paths {
            let score = if *old_id == add_id {
                100
            } else {
                match score_pair(store, old_id, &add_id, opts).await? {
                    Some(score) => score,
                    None => continue,
                }
            };
            if score >= opts.rename_threshold
                && best.map_or(true, |(_, _, b)| score > b)
            {
                best = Some((path, old_id, score));
                if score == 100 {
                    break;
                }
            }
        }
        if let Some((path, old_id, score)) = best {
            entry.kind = ChangeKind::Copied;
            entry.old_path = Some(path.to_string());
            entry.old_id = Some(*old_id);
            entry.similarity = Some(score);
        }
    }
    Ok(())
}

/// Content similarity for a candidate pair, or `None` when either side is
/// unavailable or over the size bound.
async fn score_pair(
    store: &TieredStore,
    old_id: &ObjectId,
    new_id: &ObjectId,
    opts: &DiffOptions,
) -> Result<Option<u8>, DiffError> {
    let Some((_, old_content)) = store.get(old_id).await? else {
        return Ok(None);
    };
    let Some((_, new_content)) = store.get(new_id).await? else {
        return Ok(None);
    };
    if old_content.len() > opts.max_rename_size || new_content.len() > opts.max_rename_size {
        return Ok(None);
    }
    Ok(Some(similarity(&old_content, &new_content)))
}

fn positions(entries: &[DiffEntry], kind: ChangeKind) -> Vec<usize> {
    entries
        .iter()
        .enumerate()
        .filter(|(_, e)| e.kind == kind)
        .map(|(i, _)| i)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_scores_100() {
        assert_eq!(similarity(b"same", b"same"), 100);
        assert_eq!(similarity(b"", b""), 100);
    }

    #[test]
    fn disjoint_scores_0() {
        assert_eq!(similarity(b"aaaa", b"bbbb"), 0);
    }

    #[test]
    fn positional_partial_match() {
        // 3 of 4 positions equal.
        assert_eq!(similarity(b"abcd", b"abxd"), 75);
        // Shorter against longer divides by the longer length.
        assert_eq!(similarity(b"ab", b"abcd"), 50);
    }

    #[test]
    fn rounding() {
        // 1 of 3 equal = 33.33… rounds to 33; 2 of 3 = 66.67 rounds to 67.
        assert_eq!(similarity(b"axx", b"ayy"), 33);
        assert_eq!(similarity(b"abx", b"aby"), 67);
    }
}
