//! Recursive tree walking through the tiered store.

use strata_hash::ObjectId;
use strata_object::{EntryMode, Object};
use strata_odb::TieredStore;

use crate::DiffError;

/// One entry produced by a walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEntry {
    pub mode: EntryMode,
    pub name: String,
    /// Slash-joined path from the walk root.
    pub path: String,
    pub id: ObjectId,
}

/// Walk a tree. With `recursive`, descends into subtrees and reports both
/// the subtree entries and their contents; otherwise reports one level.
pub async fn walk(
    store: &TieredStore,
    tree_id: &ObjectId,
    prefix: &str,
    recursive: bool,
) -> Result<Vec<WalkEntry>, DiffError> {
    let mut out = Vec::new();
    let mut stack: Vec<(ObjectId, String)> = vec![(*tree_id, prefix.to_string())];

    while let Some((id, prefix)) = stack.pop() {
        let tree = match store.get_object(&id).await? {
            Some(Object::Tree(tree)) => tree,
            Some(_) => return Err(DiffError::WrongType(id, "tree")),
            None => return Err(DiffError::MissingObject(id)),
        };
        for entry in &tree.entries {
            let name = String::from_utf8_lossy(&entry.name).into_owned();
            let path = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{prefix}/{name}")
            };
            if entry.mode.is_dir() && recursive {
                stack.push((entry.id, path.clone()));
            }
            out.push(WalkEntry {
                mode: entry.mode,
                name,
                path,
                id: entry.id,
            });
        }
    }
    out.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(out)
}

/// The leaf (non-directory) entries of a tree, keyed by path.
pub async fn leaf_entries(
    store: &TieredStore,
    tree_id: &ObjectId,
) -> Result<Vec<WalkEntry>, DiffError> {
    Ok(walk(store, tree_id, "", true)
        .await?
        .into_iter()
        .filter(|e| !e.mode.is_dir())
        .collect())
}
