//! Pack index (`.idx` version 2) construction and lookup.
//!
//! Stored next to each warm-tier pack so a single object can be sliced out
//! by offset without scanning. Layout: magic, version, 256-entry fanout,
//! sorted ids, CRC32s, 31-bit offsets with an 8-byte spill table, then the
//! pack checksum and the index's own checksum.

use strata_hash::{hasher::Hasher, HashAlgorithm, ObjectId};

use crate::write::WrittenEntry;
use crate::PackError;

const IDX_MAGIC: [u8; 4] = [0xff, 0x74, 0x4f, 0x63];
const IDX_VERSION: u32 = 2;

/// Build index bytes for the entries of a finished pack.
pub fn build(entries: &[WrittenEntry], pack_checksum: ObjectId) -> Result<Vec<u8>, PackError> {
    let mut sorted: Vec<&WrittenEntry> = entries.iter().collect();
    sorted.sort_by(|a, b| a.id.as_bytes().cmp(b.id.as_bytes()));

    let mut out = Vec::with_capacity(1024 + sorted.len() * 28);
    out.extend_from_slice(&IDX_MAGIC);
    out.extend_from_slice(&IDX_VERSION.to_be_bytes());

    // Cumulative fanout: entry N = count of ids whose first byte is <= N.
    let mut fanout = [0u32; 256];
    for entry in &sorted {
        fanout[entry.id.as_bytes()[0] as usize] += 1;
    }
    let mut cumulative = 0u32;
    for slot in fanout.iter_mut() {
        cumulative += *slot;
        *slot = cumulative;
        out.extend_from_slice(&slot.to_be_bytes());
    }

    for entry in &sorted {
        out.extend_from_slice(entry.id.as_bytes());
    }
    for entry in &sorted {
        out.extend_from_slice(&entry.crc32.to_be_bytes());
    }

    // 31-bit offsets; larger ones spill into the trailing 8-byte table.
    let mut spill: Vec<u64> = Vec::new();
    for entry in &sorted {
        if entry.offset < (1 << 31) {
            out.extend_from_slice(&(entry.offset as u32).to_be_bytes());
        } else {
            let slot = 0x8000_0000u32 | spill.len() as u32;
            out.extend_from_slice(&slot.to_be_bytes());
            spill.push(entry.offset);
        }
    }
    for offset in spill {
        out.extend_from_slice(&offset.to_be_bytes());
    }

    out.extend_from_slice(pack_checksum.as_bytes());
    let own = Hasher::digest(HashAlgorithm::Sha1, &out)?;
    out.extend_from_slice(own.as_bytes());
    Ok(out)
}

/// Find the pack offset and CRC32 for `id` in index bytes.
pub fn lookup(idx: &[u8], id: &ObjectId) -> Result<Option<(u64, u32)>, PackError> {
    let malformed = |reason: &str| PackError::MalformedPack(format!("bad pack index: {reason}"));

    if idx.len() < 8 + 256 * 4 + 40 || idx[..4] != IDX_MAGIC {
        return Err(malformed("missing magic or truncated"));
    }
    let version = u32::from_be_bytes([idx[4], idx[5], idx[6], idx[7]]);
    if version != IDX_VERSION {
        return Err(malformed(&format!("unsupported version {version}")));
    }

    let fanout_at = |i: usize| -> u32 {
        let base = 8 + i * 4;
        u32::from_be_bytes([idx[base], idx[base + 1], idx[base + 2], idx[base + 3]])
    };
    let total = fanout_at(255) as usize;
    let first = id.as_bytes()[0] as usize;
    let lo = if first == 0 { 0 } else { fanout_at(first - 1) as usize };
    let hi = fanout_at(first) as usize;

    let ids_base = 8 + 256 * 4;
    let crcs_base = ids_base + total * 20;
    let offsets_base = crcs_base + total * 4;
    let spill_base = offsets_base + total * 4;
    if idx.len() < spill_base + 40 {
        return Err(malformed("tables truncated"));
    }

    // Binary search within the fanout bucket.
    let (mut lo, mut hi) = (lo, hi);
    while lo < hi {
        let mid = (lo + hi) / 2;
        let at = ids_base + mid * 20;
        match idx[at..at + 20].cmp(id.as_bytes()) {
            std::cmp::Ordering::Less => lo = mid + 1,
            std::cmp::Ordering::Greater => hi = mid,
            std::cmp::Ordering::Equal => {
                let crc_at = crcs_base + mid * 4;
                let crc = u32::from_be_bytes([
                    idx[crc_at],
                    idx[crc_at + 1],
                    idx[crc_at + 2],
                    idx[crc_at + 3],
                ]);
                let off_at = offsets_base + mid * 4;
                let slot = u32::from_be_bytes([
                    idx[off_at],
                    idx[off_at + 1],
                    idx[off_at + 2],
                    idx[off_at + 3],
                ]);
                let offset = if slot & 0x8000_0000 == 0 {
                    slot as u64
                } else {
                    let spill_at = spill_base + (slot & 0x7fff_ffff) as usize * 8;
                    if idx.len() < spill_at + 8 + 40 {
                        return Err(malformed("spill table truncated"));
                    }
                    u64::from_be_bytes([
                        idx[spill_at],
                        idx[spill_at + 1],
                        idx[spill_at + 2],
                        idx[spill_at + 3],
                        idx[spill_at + 4],
                        idx[spill_at + 5],
                        idx[spill_at + 6],
                        idx[spill_at + 7],
                    ])
                };
                return Ok(Some((offset, crc)));
            }
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::write::PackWriter;
    use strata_object::ObjectType;

    #[test]
    fn build_and_lookup() {
        let mut writer = PackWriter::new(3);
        let a = writer.add_object(ObjectType::Blob, b"alpha").unwrap();
        let b = writer.add_object(ObjectType::Blob, b"beta").unwrap();
        let c = writer.add_object(ObjectType::Tree, b"").unwrap();
        let (pack, entries) = writer.finish().unwrap();

        let checksum = ObjectId::from_digest(&pack[pack.len() - 20..]).unwrap();
        let idx = build(&entries, checksum).unwrap();

        for (id, expected) in [(a, &entries[0]), (b, &entries[1]), (c, &entries[2])] {
            let (offset, crc) = lookup(&idx, &id).unwrap().unwrap();
            assert_eq!(offset, expected.offset);
            assert_eq!(crc, expected.crc32);
        }
    }

    #[test]
    fn lookup_absent_id() {
        let mut writer = PackWriter::new(1);
        writer.add_object(ObjectType::Blob, b"only").unwrap();
        let (pack, entries) = writer.finish().unwrap();
        let checksum = ObjectId::from_digest(&pack[pack.len() - 20..]).unwrap();
        let idx = build(&entries, checksum).unwrap();

        let absent = ObjectId::from_hex("ffffffffffffffffffffffffffffffffffffffff").unwrap();
        assert!(lookup(&idx, &absent).unwrap().is_none());
    }

    #[test]
    fn empty_index() {
        let idx = build(&[], ObjectId::ZERO_SHA1).unwrap();
        let id = ObjectId::from_hex("0000000000000000000000000000000000000001").unwrap();
        assert!(lookup(&idx, &id).unwrap().is_none());
    }

    #[test]
    fn large_offsets_spill() {
        let entries = vec![WrittenEntry {
            id: ObjectId::from_hex("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa").unwrap(),
            offset: (1u64 << 33) + 17,
            crc32: 42,
        }];
        let idx = build(&entries, ObjectId::ZERO_SHA1).unwrap();
        let (offset, crc) = lookup(&idx, &entries[0].id).unwrap().unwrap();
        assert_eq!(offset, (1u64 << 33) + 17);
        assert_eq!(crc, 42);
    }

    #[test]
    fn garbage_rejected() {
        assert!(lookup(b"not an index", &ObjectId::ZERO_SHA1).is_err());
    }
}
