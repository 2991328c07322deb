use bstr::{BStr, BString};
use strata_hash::ObjectId;

use crate::ident::Ident;
use crate::ObjectError;

/// A commit object.
///
/// Headers appear in serialization order: `tree`, `parent`*, `author`,
/// `committer`, optional `gpgsig`, then a blank line and the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub tree: ObjectId,
    pub parents: Vec<ObjectId>,
    pub author: Ident,
    pub committer: Ident,
    /// Multi-line GPG signature, continuation lines unfolded.
    pub gpgsig: Option<BString>,
    pub message: BString,
}

impl Commit {
    /// Parse a commit body (no frame header).
    pub fn parse(body: &[u8]) -> Result<Self, ObjectError> {
        let mut tree = None;
        let mut parents = Vec::new();
        let mut author = None;
        let mut committer = None;
        let mut gpgsig = None;

        let mut pos = 0;
        while pos < body.len() {
            if body[pos] == b'\n' {
                pos += 1;
                break;
            }
            let eol = line_end(body, pos);
            let line = &body[pos..eol];

            let space = line.iter().position(|&b| b == b' ');
            let (key, value) = match space {
                Some(s) => (&line[..s], &line[s + 1..]),
                None => (line, &[][..]),
            };

            match key {
                b"tree" => tree = Some(parse_oid(value)?),
                b"parent" => parents.push(parse_oid(value)?),
                b"author" => author = Some(Ident::parse(BStr::new(value))?),
                b"committer" => committer = Some(Ident::parse(BStr::new(value))?),
                b"gpgsig" => {
                    let (sig, next) = unfold_continuation(body, value, eol);
                    gpgsig = Some(sig);
                    pos = next;
                    continue;
                }
                _ => {
                    // Unknown headers (encoding, mergetag, …) are skipped,
                    // including their continuation lines.
                    let (_, next) = unfold_continuation(body, value, eol);
                    pos = next;
                    continue;
                }
            }
            pos = eol + 1;
        }

        Ok(Self {
            tree: tree.ok_or(ObjectError::MissingCommitHeader("tree"))?,
            parents,
            author: author.ok_or(ObjectError::MissingCommitHeader("author"))?,
            committer: committer.ok_or(ObjectError::MissingCommitHeader("committer"))?,
            gpgsig,
            message: BString::from(&body[pos.min(body.len())..]),
        })
    }

    /// Serialize a commit body in canonical header order.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"tree ");
        out.extend_from_slice(self.tree.to_hex().as_bytes());
        out.push(b'\n');
        for parent in &self.parents {
            out.extend_from_slice(b"parent ");
            out.extend_from_slice(parent.to_hex().as_bytes());
            out.push(b'\n');
        }
        out.extend_from_slice(b"author ");
        out.extend_from_slice(&self.author.to_bytes());
        out.push(b'\n');
        out.extend_from_slice(b"committer ");
        out.extend_from_slice(&self.committer.to_bytes());
        out.push(b'\n');
        if let Some(sig) = &self.gpgsig {
            out.extend_from_slice(b"gpgsig ");
            for (i, line) in sig.split(|&b| b == b'\n').enumerate() {
                if i > 0 {
                    out.extend_from_slice(b"\n ");
                }
                out.extend_from_slice(line);
            }
            out.push(b'\n');
        }
        out.push(b'\n');
        out.extend_from_slice(&self.message);
        out
    }
}

fn parse_oid(value: &[u8]) -> Result<ObjectId, ObjectError> {
    let hex = std::str::from_utf8(value)
        .map_err(|_| ObjectError::MalformedHeader("non-UTF8 object id".into()))?;
    Ok(ObjectId::from_hex(hex)?)
}

fn line_end(body: &[u8], pos: usize) -> usize {
    body[pos..]
        .iter()
        .position(|&b| b == b'\n')
        .map(|p| p + pos)
        .unwrap_or(body.len())
}

/// Collect a header value plus any continuation lines (leading space).
/// Returns the unfolded value and the position after the last line.
fn unfold_continuation(body: &[u8], first: &[u8], mut line_end_pos: usize) -> (BString, usize) {
    let mut value = BString::from(first);
    let mut next = line_end_pos + 1;
    while next < body.len() && body[next] == b' ' {
        value.push(b'\n');
        line_end_pos = line_end(body, next);
        value.extend_from_slice(&body[next + 1..line_end_pos]);
        next = line_end_pos + 1;
    }
    (value, next)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TREE: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";
    const PARENT: &str = "ce013625030ba8dba906f756967f9e9ca394464a";

    fn sample() -> Commit {
        Commit {
            tree: ObjectId::from_hex(TREE).unwrap(),
            parents: vec![ObjectId::from_hex(PARENT).unwrap()],
            author: Ident::new("Ada", "ada@example.com", 1_700_000_000),
            committer: Ident::new("Bob", "bob@example.com", 1_700_000_100),
            gpgsig: None,
            message: BString::from("add widget\n\nlonger body\n"),
        }
    }

    #[test]
    fn roundtrip() {
        let commit = sample();
        let parsed = Commit::parse(&commit.to_bytes()).unwrap();
        assert_eq!(parsed, commit);
    }

    #[test]
    fn root_commit_has_no_parents() {
        let mut commit = sample();
        commit.parents.clear();
        let parsed = Commit::parse(&commit.to_bytes()).unwrap();
        assert!(parsed.parents.is_empty());
    }

    #[test]
    fn merge_commit_keeps_parent_order() {
        let mut commit = sample();
        commit.parents = vec![
            ObjectId::from_hex(PARENT).unwrap(),
            ObjectId::from_hex(TREE).unwrap(),
        ];
        let parsed = Commit::parse(&commit.to_bytes()).unwrap();
        assert_eq!(parsed.parents, commit.parents);
    }

    #[test]
    fn gpgsig_unfolds_and_refolds() {
        let mut commit = sample();
        commit.gpgsig = Some(BString::from(
            "-----BEGIN PGP SIGNATURE-----\nabcdef\n-----END PGP SIGNATURE-----",
        ));
        let bytes = commit.to_bytes();
        let parsed = Commit::parse(&bytes).unwrap();
        assert_eq!(parsed.gpgsig, commit.gpgsig);
        assert_eq!(parsed.to_bytes(), bytes);
    }

    #[test]
    fn unknown_headers_are_skipped() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(format!("tree {TREE}\n").as_bytes());
        bytes.extend_from_slice(b"author A <a@b> 1 +0000\n");
        bytes.extend_from_slice(b"committer A <a@b> 1 +0000\n");
        bytes.extend_from_slice(b"encoding ISO-8859-1\n");
        bytes.extend_from_slice(b"\nmsg");
        let parsed = Commit::parse(&bytes).unwrap();
        assert_eq!(parsed.message, "msg");
    }

    #[test]
    fn missing_tree_rejected() {
        let body = b"author A <a@b> 1 +0000\ncommitter A <a@b> 1 +0000\n\nmsg";
        assert!(matches!(
            Commit::parse(body).unwrap_err(),
            ObjectError::MissingCommitHeader("tree")
        ));
    }

    #[test]
    fn empty_message() {
        let mut commit = sample();
        commit.message = BString::from("");
        let parsed = Commit::parse(&commit.to_bytes()).unwrap();
        assert!(parsed.message.is_empty());
    }
}
