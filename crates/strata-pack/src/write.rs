//! In-memory pack generation for wire responses and warm-tier uploads.

use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use strata_hash::{hasher::Hasher, HashAlgorithm, ObjectId};
use strata_object::ObjectType;

use crate::entry::{self, OFS_DELTA_CODE, REF_DELTA_CODE};
use crate::{PackError, PACK_SIGNATURE, PACK_VERSION};

/// Entry metadata recorded while writing, feeding index construction.
#[derive(Debug, Clone)]
pub struct WrittenEntry {
    pub id: ObjectId,
    pub offset: u64,
    pub crc32: u32,
}

/// Builds a pack in memory.
///
/// The object count must be known up front because the wire format puts it
/// in the fixed header. Index entries are recorded for full objects; delta
/// entries index under their resolved id, which only the caller knows.
pub struct PackWriter {
    buf: Vec<u8>,
    declared: u32,
    written: u32,
    entries: Vec<WrittenEntry>,
}

impl PackWriter {
    pub fn new(object_count: u32) -> Self {
        let mut buf = Vec::with_capacity(1024);
        buf.extend_from_slice(PACK_SIGNATURE);
        buf.extend_from_slice(&PACK_VERSION.to_be_bytes());
        buf.extend_from_slice(&object_count.to_be_bytes());
        Self {
            buf,
            declared: object_count,
            written: 0,
            entries: Vec::with_capacity(object_count as usize),
        }
    }

    /// Current byte position; the offset the next entry will start at.
    pub fn position(&self) -> u64 {
        self.buf.len() as u64
    }

    /// Append a full object.
    pub fn add_object(&mut self, obj_type: ObjectType, body: &[u8]) -> Result<ObjectId, PackError> {
        let id = Hasher::hash_object(HashAlgorithm::Sha1, obj_type.as_str(), body)?;
        let offset = self.position();
        let header = entry::encode(obj_type.pack_code(), body.len() as u64);
        let compressed = deflate(body)?;

        let mut crc = crc32fast::Hasher::new();
        crc.update(&header);
        crc.update(&compressed);

        self.buf.extend_from_slice(&header);
        self.buf.extend_from_slice(&compressed);
        self.written += 1;
        self.entries.push(WrittenEntry {
            id,
            offset,
            crc32: crc.finalize(),
        });
        Ok(id)
    }

    /// Append an OFS delta against the entry that starts at `base_offset`.
    pub fn add_ofs_delta(&mut self, base_offset: u64, delta: &[u8]) -> Result<(), PackError> {
        let offset = self.position();
        if base_offset >= offset {
            return Err(PackError::MalformedPack(format!(
                "ofs-delta base offset {base_offset} is not before entry at {offset}"
            )));
        }
        let mut header = entry::encode(OFS_DELTA_CODE, delta.len() as u64);
        header.extend_from_slice(&entry::encode_ofs_distance(offset - base_offset));
        self.buf.extend_from_slice(&header);
        self.buf.extend_from_slice(&deflate(delta)?);
        self.written += 1;
        Ok(())
    }

    /// Append a REF delta against `base_id` (which may live outside the pack).
    pub fn add_ref_delta(&mut self, base_id: ObjectId, delta: &[u8]) -> Result<(), PackError> {
        let mut header = entry::encode(REF_DELTA_CODE, delta.len() as u64);
        header.extend_from_slice(base_id.as_bytes());
        self.buf.extend_from_slice(&header);
        self.buf.extend_from_slice(&deflate(delta)?);
        self.written += 1;
        Ok(())
    }

    /// Seal the pack: verify the declared count and append the trailer.
    pub fn finish(self) -> Result<(Vec<u8>, Vec<WrittenEntry>), PackError> {
        if self.written != self.declared {
            return Err(PackError::MalformedPack(format!(
                "declared {} objects, wrote {}",
                self.declared, self.written
            )));
        }
        let mut buf = self.buf;
        let checksum = Hasher::digest(HashAlgorithm::Sha1, &buf)?;
        buf.extend_from_slice(checksum.as_bytes());
        Ok((buf, self.entries))
    }
}

fn deflate(data: &[u8]) -> Result<Vec<u8>, PackError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .and_then(|_| encoder.finish())
        .map_err(|e| PackError::MalformedPack(format!("deflate failed: {e}")))
}
