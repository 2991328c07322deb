//! Queue-based delta resolution.
//!
//! Entries are categorized once: full objects seed a ready queue, deltas
//! wait indexed by the offset or id of their base. Each resolved object
//! drains the waiters registered under its offset and id, so the whole
//! pass is O(n) in pack entries. REF-delta bases that live outside the
//! pack (thin packs) are satisfied from a caller-provided base map; ids
//! still unsatisfied after propagation are reported for the caller to
//! fetch and retry.

use std::collections::HashMap;
use std::collections::VecDeque;

use strata_hash::{hasher::Hasher, HashAlgorithm, ObjectId};
use strata_object::ObjectType;
use tracing::debug;

use crate::delta::apply_delta;
use crate::entry::EntryKind;
use crate::parse::RawEntry;
use crate::PackError;

/// A fully reconstructed object from a pack.
#[derive(Debug, Clone)]
pub struct ResolvedEntry {
    pub id: ObjectId,
    pub obj_type: ObjectType,
    pub data: Vec<u8>,
    /// Offset of the originating entry, for index construction.
    pub offset: u64,
}

/// Outcome of one resolution pass.
pub struct Resolution {
    /// Objects reconstructed so far, in resolution order.
    pub objects: Vec<ResolvedEntry>,
    /// Base ids needed from outside the pack before the rest can resolve.
    pub missing_bases: Vec<ObjectId>,
}

impl Resolution {
    pub fn is_complete(&self) -> bool {
        self.missing_bases.is_empty()
    }
}

/// Resolve pack entries against themselves plus `known_bases`.
///
/// When `missing_bases` is non-empty the caller fetches those objects,
/// extends `known_bases`, and calls again; the loop converges in at most
/// the delta-chain depth through external bases. A missing base the
/// caller cannot supply is a [`PackError::ThinPackMissingBase`].
pub fn resolve(
    entries: &[RawEntry],
    known_bases: &HashMap<ObjectId, (ObjectType, Vec<u8>)>,
) -> Result<Resolution, PackError> {
    let mut ready: VecDeque<ResolvedEntry> = VecDeque::new();
    let mut by_offset: HashMap<u64, Vec<&RawEntry>> = HashMap::new();
    let mut by_id: HashMap<ObjectId, Vec<&RawEntry>> = HashMap::new();
    let mut waiting = 0usize;

    for entry in entries {
        match &entry.kind {
            EntryKind::Base(obj_type) => {
                let id =
                    Hasher::hash_object(HashAlgorithm::Sha1, obj_type.as_str(), &entry.payload)?;
                ready.push_back(ResolvedEntry {
                    id,
                    obj_type: *obj_type,
                    data: entry.payload.clone(),
                    offset: entry.offset,
                });
            }
            EntryKind::OfsDelta { base_offset } => {
                by_offset.entry(*base_offset).or_default().push(entry);
                waiting += 1;
            }
            EntryKind::RefDelta { base_id } => {
                if let Some((obj_type, data)) = known_bases.get(base_id) {
                    let target = apply_delta(data, &entry.payload)?;
                    let id =
                        Hasher::hash_object(HashAlgorithm::Sha1, obj_type.as_str(), &target)?;
                    ready.push_back(ResolvedEntry {
                        id,
                        obj_type: *obj_type,
                        data: target,
                        offset: entry.offset,
                    });
                } else {
                    by_id.entry(*base_id).or_default().push(entry);
                    waiting += 1;
                }
            }
        }
    }

    let mut objects = Vec::with_capacity(entries.len());
    while let Some(resolved) = ready.pop_front() {
        let mut waiters = by_offset.remove(&resolved.offset).unwrap_or_default();
        waiters.extend(by_id.remove(&resolved.id).unwrap_or_default());

        for waiter in waiters {
            waiting -= 1;
            let target = apply_delta(&resolved.data, &waiter.payload)?;
            let id = Hasher::hash_object(
                HashAlgorithm::Sha1,
                resolved.obj_type.as_str(),
                &target,
            )?;
            ready.push_back(ResolvedEntry {
                id,
                obj_type: resolved.obj_type,
                data: target,
                offset: waiter.offset,
            });
        }
        objects.push(resolved);
    }

    let missing_bases: Vec<ObjectId> = by_id.keys().copied().collect();

    // An offset waiter left over once nothing external is pending can never
    // resolve: its base is in this pack and the offset points at nothing.
    // (Behind a pending external base it will resolve on the retry pass.)
    if missing_bases.is_empty() {
        if let Some((&offset, _)) = by_offset.iter().next() {
            return Err(PackError::CorruptEntry {
                offset,
                reason: "ofs-delta base never resolved".into(),
            });
        }
    }
    if !missing_bases.is_empty() {
        debug!(
            waiting,
            missing = missing_bases.len(),
            "thin pack: deltas waiting on external bases"
        );
    }
    Ok(Resolution {
        objects,
        missing_bases,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::{compute_delta, encode_copy, encode_insert, write_varint};
    use crate::parse::PackReader;
    use crate::write::PackWriter;

    fn resolve_pack(pack: &[u8]) -> Resolution {
        let reader = PackReader::new(pack).unwrap();
        let entries = reader.entries().unwrap();
        resolve(&entries, &HashMap::new()).unwrap()
    }

    #[test]
    fn ofs_delta_copy_plus_insert() {
        // Blob "abcdef" followed by an OFS delta that copies bytes 0..4
        // and inserts "XY" — resolves to "abcdXY".
        let mut writer = PackWriter::new(2);
        let base_offset = writer.position();
        writer.add_object(ObjectType::Blob, b"abcdef").unwrap();

        let mut delta = write_varint(6);
        delta.extend_from_slice(&write_varint(6));
        delta.extend_from_slice(&encode_copy(0, 4));
        delta.extend_from_slice(&encode_insert(b"XY"));
        writer.add_ofs_delta(base_offset, &delta).unwrap();
        let (pack, _) = writer.finish().unwrap();

        let resolution = resolve_pack(&pack);
        assert!(resolution.is_complete());
        assert_eq!(resolution.objects.len(), 2);
        let target = &resolution.objects[1];
        assert_eq!(target.data, b"abcdXY");
        assert_eq!(target.obj_type, ObjectType::Blob);
    }

    #[test]
    fn ref_delta_within_pack() {
        let base = b"base object content".to_vec();
        let base_id =
            Hasher::hash_object(HashAlgorithm::Sha1, "blob", &base).unwrap();
        let target = b"base object content, extended".to_vec();

        let mut writer = PackWriter::new(2);
        writer.add_object(ObjectType::Blob, &base).unwrap();
        writer
            .add_ref_delta(base_id, &compute_delta(&base, &target))
            .unwrap();
        let (pack, _) = writer.finish().unwrap();

        let resolution = resolve_pack(&pack);
        assert!(resolution.is_complete());
        assert_eq!(resolution.objects[1].data, target);
    }

    #[test]
    fn delta_chain_resolves_transitively() {
        let v1 = b"version one of the file".to_vec();
        let v2 = b"version two of the file".to_vec();
        let v3 = b"version three of the file".to_vec();

        let mut writer = PackWriter::new(3);
        let off1 = writer.position();
        writer.add_object(ObjectType::Blob, &v1).unwrap();
        let off2 = writer.position();
        writer.add_ofs_delta(off1, &compute_delta(&v1, &v2)).unwrap();
        writer.add_ofs_delta(off2, &compute_delta(&v2, &v3)).unwrap();
        let (pack, _) = writer.finish().unwrap();

        let resolution = resolve_pack(&pack);
        assert_eq!(resolution.objects.len(), 3);
        assert_eq!(resolution.objects[2].data, v3);
    }

    #[test]
    fn thin_pack_reports_missing_then_completes() {
        let external = b"object that lives in the store already".to_vec();
        let external_id =
            Hasher::hash_object(HashAlgorithm::Sha1, "blob", &external).unwrap();
        let target = b"object that lives in the store already, plus more".to_vec();

        let mut writer = PackWriter::new(1);
        writer
            .add_ref_delta(external_id, &compute_delta(&external, &target))
            .unwrap();
        let (pack, _) = writer.finish().unwrap();

        let reader = PackReader::new(&pack).unwrap();
        let entries = reader.entries().unwrap();

        let first = resolve(&entries, &HashMap::new()).unwrap();
        assert_eq!(first.missing_bases, vec![external_id]);
        assert!(first.objects.is_empty());

        let mut bases = HashMap::new();
        bases.insert(external_id, (ObjectType::Blob, external));
        let second = resolve(&entries, &bases).unwrap();
        assert!(second.is_complete());
        assert_eq!(second.objects[0].data, target);
    }

    #[test]
    fn delta_type_follows_base() {
        let base_commit = b"tree 4b825dc642cb6eb9a060e54bf8d69288fbee4904\nauthor A <a@b> 1 +0000\ncommitter A <a@b> 1 +0000\n\nx".to_vec();
        let target = {
            let mut t = base_commit.clone();
            t.push(b'!');
            t
        };
        let mut writer = PackWriter::new(2);
        let off = writer.position();
        writer.add_object(ObjectType::Commit, &base_commit).unwrap();
        writer
            .add_ofs_delta(off, &compute_delta(&base_commit, &target))
            .unwrap();
        let (pack, _) = writer.finish().unwrap();

        let resolution = resolve_pack(&pack);
        assert_eq!(resolution.objects[1].obj_type, ObjectType::Commit);
    }
}
