//! Path-level diff between two trees.

use std::collections::BTreeMap;

use strata_hash::ObjectId;
use strata_object::EntryMode;
use strata_odb::TieredStore;

use crate::pathspec::Pathspec;
use crate::rename;
use crate::walk::leaf_entries;
use crate::{ChangeKind, DiffError};

/// Bytes of a blob examined for the null-byte binary heuristic.
const BINARY_SNIFF_LEN: usize = 8000;

/// One changed path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffEntry {
    pub kind: ChangeKind,
    pub old_path: Option<String>,
    pub new_path: Option<String>,
    pub old_mode: Option<EntryMode>,
    pub new_mode: Option<EntryMode>,
    pub old_id: Option<ObjectId>,
    pub new_id: Option<ObjectId>,
    /// 0–100 for renames and copies.
    pub similarity: Option<u8>,
    /// Set when binary detection ran.
    pub binary: Option<bool>,
}

impl DiffEntry {
    /// The path to show for this entry (new side when present).
    pub fn path(&self) -> &str {
        self.new_path
            .as_deref()
            .or(self.old_path.as_deref())
            .unwrap_or("")
    }
}

/// Diff tuning.
#[derive(Debug, Clone)]
pub struct DiffOptions {
    pub detect_renames: bool,
    pub detect_copies: bool,
    /// Minimum similarity (percent) for a rename/copy pair.
    pub rename_threshold: u8,
    /// Blobs above this size are excluded from similarity scoring.
    pub max_rename_size: usize,
    /// Run the null-byte binary sniff on changed blobs.
    pub detect_binary: bool,
    pub pathspec: Option<Pathspec>,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            detect_renames: true,
            detect_copies: false,
            rename_threshold: 50,
            max_rename_size: 1 << 20,
            detect_binary: false,
            pathspec: None,
        }
    }
}

/// Diff two trees by path.
///
/// Either side may be `None` for an empty tree (initial commit, deletion of
/// everything). Mode changes that cross the file/symlink/submodule line
/// report as `TypeChanged`; same-category changes report as `Modified`.
pub async fn diff_trees(
    store: &TieredStore,
    old_tree: Option<&ObjectId>,
    new_tree: Option<&ObjectId>,
    opts: &DiffOptions,
) -> Result<Vec<DiffEntry>, DiffError> {
    let old_paths = side(store, old_tree).await?;
    let new_paths = side(store, new_tree).await?;

    let mut entries = Vec::new();
    for (path, (mode, id)) in &old_paths {
        if let Some(spec) = &opts.pathspec {
            if !spec.matches(path) {
                continue;
            }
        }
        match new_paths.get(path) {
            None => entries.push(DiffEntry {
                kind: ChangeKind::Deleted,
                old_path: Some(path.clone()),
                new_path: None,
                old_mode: Some(*mode),
                new_mode: None,
                old_id: Some(*id),
                new_id: None,
                similarity: None,
                binary: None,
            }),
            Some((new_mode, new_id)) => {
                if (mode, id) == (new_mode, new_id) {
                    continue;
                }
                let kind = if mode.category() != new_mode.category() {
                    ChangeKind::TypeChanged
                } else {
                    ChangeKind::Modified
                };
                entries.push(DiffEntry {
                    kind,
                    old_path: Some(path.clone()),
                    new_path: Some(path.clone()),
                    old_mode: Some(*mode),
                    new_mode: Some(*new_mode),
                    old_id: Some(*id),
                    new_id: Some(*new_id),
                    similarity: None,
                    binary: None,
                });
            }
        }
    }
    for (path, (mode, id)) in &new_paths {
        if let Some(spec) = &opts.pathspec {
            if !spec.matches(path) {
                continue;
            }
        }
        if !old_paths.contains_key(path) {
            entries.push(DiffEntry {
                kind: ChangeKind::Added,
                old_path: None,
                new_path: Some(path.clone()),
                old_mode: None,
                new_mode: Some(*mode),
                old_id: None,
                new_id: Some(*id),
                similarity: None,
                binary: None,
            });
        }
    }

    if opts.detect_renames {
        rename::detect(store, &mut entries, &old_paths, opts).await?;
    }
    if opts.detect_binary {
        sniff_binary(store, &mut entries).await?;
    }

    entries.sort_by(|a, b| a.path().cmp(b.path()));
    Ok(entries)
}

async fn side(
    store: &TieredStore,
    tree: Option<&ObjectId>,
) -> Result<BTreeMap<String, (EntryMode, ObjectId)>, DiffError> {
    let mut map = BTreeMap::new();
    if let Some(tree) = tree {
        for entry in leaf_entries(store, tree).await? {
            map.insert(entry.path, (entry.mode, entry.id));
        }
    }
    Ok(map)
}

async fn sniff_binary(store: &TieredStore, entries: &mut [DiffEntry]) -> Result<(), DiffError> {
    for entry in entries.iter_mut() {
        let id = entry.new_id.or(entry.old_id);
        let mode = entry.new_mode.or(entry.old_mode);
        if !mode.is_some_and(|m| m.is_file()) {
            continue;
        }
        if let Some(id) = id {
            if let Some((_, content)) = store.get(&id).await? {
                let window = &content[..content.len().min(BINARY_SNIFF_LEN)];
                entry.binary = Some(window.contains(&0));
            }
        }
    }
    Ok(())
}
