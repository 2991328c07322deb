use std::cmp::Ordering;

use bstr::{BStr, BString, ByteSlice};
use strata_hash::ObjectId;

use crate::ObjectError;

/// Mode of a tree entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryMode {
    /// `100644`
    File,
    /// `100755`
    Executable,
    /// `120000`
    Symlink,
    /// `160000`
    Submodule,
    /// `040000`
    Directory,
}

impl EntryMode {
    /// Parse the octal ASCII token that leads a tree entry.
    pub fn from_bytes(s: &[u8]) -> Result<Self, ObjectError> {
        match s {
            b"100644" => Ok(Self::File),
            b"100755" => Ok(Self::Executable),
            b"120000" => Ok(Self::Symlink),
            b"160000" => Ok(Self::Submodule),
            b"40000" | b"040000" => Ok(Self::Directory),
            other => Err(ObjectError::MalformedMode(
                String::from_utf8_lossy(other).into_owned(),
            )),
        }
    }

    /// Canonical serialized token (directories drop the leading zero, as git does).
    pub const fn as_bytes(&self) -> &'static [u8] {
        match self {
            Self::File => b"100644",
            Self::Executable => b"100755",
            Self::Symlink => b"120000",
            Self::Submodule => b"160000",
            Self::Directory => b"40000",
        }
    }

    pub const fn is_dir(&self) -> bool {
        matches!(self, Self::Directory)
    }

    pub const fn is_file(&self) -> bool {
        matches!(self, Self::File | Self::Executable)
    }

    /// Coarse category used by type-change detection: file, symlink, or submodule.
    pub const fn category(&self) -> u8 {
        match self {
            Self::File | Self::Executable => 0,
            Self::Symlink => 1,
            Self::Submodule => 2,
            Self::Directory => 3,
        }
    }
}

/// One `(mode, name, id)` row of a tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub mode: EntryMode,
    pub name: BString,
    pub id: ObjectId,
}

impl TreeEntry {
    /// Git's tree ordering: byte-wise on names, with directories compared
    /// as if their name carried a trailing `/`.
    pub fn canonical_cmp(a: &TreeEntry, b: &TreeEntry) -> Ordering {
        ordered_name_cmp(&a.name, a.mode.is_dir(), &b.name, b.mode.is_dir())
    }
}

fn ordered_name_cmp(n1: &[u8], dir1: bool, n2: &[u8], dir2: bool) -> Ordering {
    let common = n1.len().min(n2.len());
    match n1[..common].cmp(&n2[..common]) {
        Ordering::Equal => {}
        other => return other,
    }
    let next = |name: &[u8], dir: bool| -> u8 {
        if name.len() > common {
            name[common]
        } else if dir {
            b'/'
        } else {
            0
        }
    };
    next(n1, dir1).cmp(&next(n2, dir2))
}

/// A tree object: an ordered directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Tree {
    pub entries: Vec<TreeEntry>,
}

impl Tree {
    pub fn new(entries: Vec<TreeEntry>) -> Self {
        Self { entries }
    }

    /// Parse a tree body: repeated `"<mode> <name>\0<raw-id>"`.
    pub fn parse(body: &[u8]) -> Result<Self, ObjectError> {
        let mut entries = Vec::new();
        let mut pos = 0;

        while pos < body.len() {
            let space = body[pos..]
                .iter()
                .position(|&b| b == b' ')
                .map(|p| p + pos)
                .ok_or(ObjectError::MalformedTreeEntry {
                    offset: pos,
                    reason: "missing space after mode".into(),
                })?;
            let mode = EntryMode::from_bytes(&body[pos..space])?;

            let name_start = space + 1;
            let nul = body[name_start..]
                .iter()
                .position(|&b| b == 0)
                .map(|p| p + name_start)
                .ok_or(ObjectError::MalformedTreeEntry {
                    offset: name_start,
                    reason: "missing NUL after name".into(),
                })?;
            let name = BString::from(&body[name_start..nul]);
            if name.is_empty() {
                return Err(ObjectError::MalformedTreeEntry {
                    offset: name_start,
                    reason: "empty entry name".into(),
                });
            }

            let id_start = nul + 1;
            let id_end = id_start + 20;
            if id_end > body.len() {
                return Err(ObjectError::MalformedTreeEntry {
                    offset: id_start,
                    reason: "truncated object id".into(),
                });
            }
            let id = ObjectId::from_digest(&body[id_start..id_end])?;

            entries.push(TreeEntry { mode, name, id });
            pos = id_end;
        }

        Ok(Self { entries })
    }

    /// Serialize in canonical order. Two logically equal trees always
    /// produce identical bytes regardless of input entry order.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut sorted: Vec<&TreeEntry> = self.entries.iter().collect();
        sorted.sort_by(|a, b| TreeEntry::canonical_cmp(a, b));

        let mut out = Vec::new();
        for entry in sorted {
            out.extend_from_slice(entry.mode.as_bytes());
            out.push(b' ');
            out.extend_from_slice(&entry.name);
            out.push(0);
            out.extend_from_slice(entry.id.as_bytes());
        }
        out
    }

    pub fn find(&self, name: &BStr) -> Option<&TreeEntry> {
        self.entries.iter().find(|e| e.name.as_bstr() == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u8) -> ObjectId {
        let mut d = [0u8; 20];
        d[19] = n;
        ObjectId::Sha1(d)
    }

    fn entry(mode: EntryMode, name: &str, n: u8) -> TreeEntry {
        TreeEntry {
            mode,
            name: BString::from(name),
            id: id(n),
        }
    }

    #[test]
    fn mode_tokens() {
        assert_eq!(EntryMode::from_bytes(b"100644").unwrap(), EntryMode::File);
        assert_eq!(EntryMode::from_bytes(b"40000").unwrap(), EntryMode::Directory);
        assert_eq!(EntryMode::from_bytes(b"040000").unwrap(), EntryMode::Directory);
        assert!(EntryMode::from_bytes(b"100645").is_err());
    }

    #[test]
    fn empty_tree_is_zero_bytes() {
        let tree = Tree::default();
        assert!(tree.to_bytes().is_empty());
        assert!(Tree::parse(b"").unwrap().is_empty());
    }

    #[test]
    fn directory_sorts_with_virtual_slash() {
        // "a" (dir) serializes between "a.txt" and "b.txt": '/' > '.'.
        let tree = Tree::new(vec![
            entry(EntryMode::File, "b.txt", 1),
            entry(EntryMode::File, "a.txt", 2),
            entry(EntryMode::Directory, "a", 3),
        ]);
        let parsed = Tree::parse(&tree.to_bytes()).unwrap();
        let names: Vec<_> = parsed.entries.iter().map(|e| e.name.to_string()).collect();
        assert_eq!(names, ["a.txt", "a", "b.txt"]);
    }

    #[test]
    fn serialization_is_order_independent() {
        let a = Tree::new(vec![
            entry(EntryMode::File, "x", 1),
            entry(EntryMode::Directory, "lib", 2),
            entry(EntryMode::Symlink, "link", 3),
        ]);
        let mut shuffled = a.clone();
        shuffled.entries.reverse();
        assert_eq!(a.to_bytes(), shuffled.to_bytes());
    }

    #[test]
    fn parse_roundtrip() {
        let tree = Tree::new(vec![
            entry(EntryMode::File, "README.md", 1),
            entry(EntryMode::Executable, "run.sh", 2),
            entry(EntryMode::Submodule, "vendor", 3),
        ]);
        let parsed = Tree::parse(&tree.to_bytes()).unwrap();
        assert_eq!(parsed.len(), 3);
        assert!(parsed.find(bstr::BStr::new("run.sh")).is_some());
        assert!(parsed.find(bstr::BStr::new("missing")).is_none());
    }

    #[test]
    fn rejects_truncated_id() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"100644 f\0");
        bytes.extend_from_slice(&[0u8; 10]);
        assert!(Tree::parse(&bytes).is_err());
    }

    #[test]
    fn rejects_empty_name() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"100644 \0");
        bytes.extend_from_slice(&[0u8; 20]);
        assert!(Tree::parse(&bytes).is_err());
    }
}
