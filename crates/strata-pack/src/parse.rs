//! Whole-pack parsing: header validation, entry iteration, trailer check.

use std::io::Read;

use flate2::read::ZlibDecoder;
use strata_hash::{hasher::Hasher, HashAlgorithm, ObjectId};

use crate::entry::{self, EntryKind};
use crate::{PackError, PACK_HEADER_LEN, PACK_SIGNATURE};

/// One entry as it appears on disk, payload already inflated.
#[derive(Debug, Clone)]
pub struct RawEntry {
    /// Absolute offset of the entry header within the pack.
    pub offset: u64,
    pub kind: EntryKind,
    /// Inflated payload: a full object body, or a delta stream.
    pub payload: Vec<u8>,
}

/// A parsed pack held in memory.
#[derive(Debug)]
pub struct PackReader<'a> {
    data: &'a [u8],
    pub version: u32,
    pub object_count: u32,
}

impl<'a> PackReader<'a> {
    /// Validate the fixed header and trailer of `data`.
    ///
    /// Versions 2 and 3 are accepted. The trailing SHA-1 is verified
    /// before any entry is parsed; a mismatch quarantines the pack.
    pub fn new(data: &'a [u8]) -> Result<Self, PackError> {
        if data.len() < PACK_HEADER_LEN + 20 {
            return Err(PackError::MalformedPack(format!(
                "pack too short: {} bytes",
                data.len()
            )));
        }
        if &data[..4] != PACK_SIGNATURE {
            return Err(PackError::MalformedPack("bad signature".into()));
        }
        let version = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        if !(2..=3).contains(&version) {
            return Err(PackError::UnsupportedVersion(version));
        }
        let object_count = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);

        let body_end = data.len() - 20;
        let expected = ObjectId::from_digest(&data[body_end..])?;
        let actual = Hasher::digest(HashAlgorithm::Sha1, &data[..body_end])?;
        if expected != actual {
            return Err(PackError::ChecksumMismatch {
                expected: expected.to_hex(),
                actual: actual.to_hex(),
            });
        }

        Ok(Self {
            data,
            version,
            object_count,
        })
    }

    /// The pack's trailing checksum, which doubles as its identity.
    pub fn checksum(&self) -> ObjectId {
        // new() verified length and digest shape already.
        ObjectId::from_digest(&self.data[self.data.len() - 20..]).unwrap_or(ObjectId::ZERO_SHA1)
    }

    /// Inflate every entry in file order.
    pub fn entries(&self) -> Result<Vec<RawEntry>, PackError> {
        let mut entries = Vec::with_capacity(self.object_count as usize);
        let body_end = self.data.len() - 20;
        let mut pos = PACK_HEADER_LEN;

        for _ in 0..self.object_count {
            if pos >= body_end {
                return Err(PackError::MalformedPack(format!(
                    "pack claims {} objects but data ends after {}",
                    self.object_count,
                    entries.len()
                )));
            }
            let offset = pos as u64;
            let header = entry::decode(&self.data[pos..body_end], offset)?;
            pos += header.header_len;

            let (payload, consumed) =
                inflate_entry(&self.data[pos..body_end], header.inflated_size, offset)?;
            pos += consumed;

            entries.push(RawEntry {
                offset,
                kind: header.kind,
                payload,
            });
        }
        Ok(entries)
    }

    /// Inflate the single entry that starts at `offset`. Used by the warm
    /// tier, which slices one object out of a stored pack by offset.
    pub fn entry_at(&self, offset: u64) -> Result<RawEntry, PackError> {
        let body_end = self.data.len() - 20;
        let pos = offset as usize;
        if pos < PACK_HEADER_LEN || pos >= body_end {
            return Err(PackError::CorruptEntry {
                offset,
                reason: "offset outside pack body".into(),
            });
        }
        let header = entry::decode(&self.data[pos..body_end], offset)?;
        let data_start = pos + header.header_len;
        let (payload, _) =
            inflate_entry(&self.data[data_start..body_end], header.inflated_size, offset)?;
        Ok(RawEntry {
            offset,
            kind: header.kind,
            payload,
        })
    }
}

/// Inflate one zlib stream, returning the payload and compressed length.
fn inflate_entry(
    data: &[u8],
    expected_len: usize,
    entry_offset: u64,
) -> Result<(Vec<u8>, usize), PackError> {
    let mut decoder = ZlibDecoder::new(data);
    let mut payload = Vec::with_capacity(expected_len);
    decoder
        .read_to_end(&mut payload)
        .map_err(|e| PackError::CorruptEntry {
            offset: entry_offset,
            reason: format!("zlib inflate failed: {e}"),
        })?;
    if payload.len() != expected_len {
        return Err(PackError::CorruptEntry {
            offset: entry_offset,
            reason: format!(
                "inflated to {} bytes, header claims {expected_len}",
                payload.len()
            ),
        });
    }
    Ok((payload, decoder.total_in() as usize))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::write::PackWriter;
    use strata_object::ObjectType;

    #[test]
    fn empty_pack_is_valid() {
        let (pack, _) = PackWriter::new(0).finish().unwrap();
        let reader = PackReader::new(&pack).unwrap();
        assert_eq!(reader.object_count, 0);
        assert!(reader.entries().unwrap().is_empty());
    }

    #[test]
    fn single_blob_roundtrip() {
        let mut writer = PackWriter::new(1);
        writer.add_object(ObjectType::Blob, b"hello\n").unwrap();
        let (pack, _) = writer.finish().unwrap();

        let reader = PackReader::new(&pack).unwrap();
        let entries = reader.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, EntryKind::Base(ObjectType::Blob));
        assert_eq!(entries[0].payload, b"hello\n");
    }

    #[test]
    fn bad_signature_rejected() {
        let (mut pack, _) = PackWriter::new(0).finish().unwrap();
        pack[0] = b'K';
        assert!(matches!(
            PackReader::new(&pack).unwrap_err(),
            PackError::MalformedPack(_)
        ));
    }

    #[test]
    fn bad_version_rejected() {
        let (mut pack, _) = PackWriter::new(0).finish().unwrap();
        pack[7] = 9;
        // Re-seal the trailer so only the version is wrong.
        let body_end = pack.len() - 20;
        let digest = Hasher::digest(HashAlgorithm::Sha1, &pack[..body_end]).unwrap();
        pack[body_end..].copy_from_slice(digest.as_bytes());
        assert!(matches!(
            PackReader::new(&pack).unwrap_err(),
            PackError::UnsupportedVersion(9)
        ));
    }

    #[test]
    fn corrupted_byte_fails_checksum() {
        let mut writer = PackWriter::new(1);
        writer.add_object(ObjectType::Blob, b"content").unwrap();
        let (mut pack, _) = writer.finish().unwrap();
        let mid = pack.len() / 2;
        pack[mid] ^= 0xff;
        assert!(matches!(
            PackReader::new(&pack).unwrap_err(),
            PackError::ChecksumMismatch { .. }
        ));
    }

    #[test]
    fn entry_at_slices_single_object() {
        let mut writer = PackWriter::new(2);
        writer.add_object(ObjectType::Blob, b"first").unwrap();
        let second_offset = writer.position();
        writer.add_object(ObjectType::Blob, b"second").unwrap();
        let (pack, _) = writer.finish().unwrap();

        let reader = PackReader::new(&pack).unwrap();
        let entry = reader.entry_at(second_offset).unwrap();
        assert_eq!(entry.payload, b"second");
    }
}
