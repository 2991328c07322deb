//! Cold tier: columnar object files in the backing store.
//!
//! A cold file holds `(sha, type, size, bytes)` rows plus a file-level
//! bloom section and the min/max sha of its rows, so readers can skip
//! files without downloading them. Entries are keyed by sha, never by
//! position, which keeps reads correct across compaction rewrites.

use std::sync::Arc;

use strata_hash::{hasher::Hasher, HashAlgorithm, ObjectId};
use strata_object::ObjectType;
use tracing::{debug, info, warn};

use crate::backend::ObjectStore;
use crate::cache::Bloom;
use crate::StoreError;

const COLD_MAGIC: &[u8; 4] = b"GSC1";
const BLOOM_BITS_PER_ROW: usize = 16;

/// One row of a cold file.
#[derive(Debug, Clone)]
pub struct ColdRow {
    pub sha: ObjectId,
    pub obj_type: ObjectType,
    pub content: Vec<u8>,
}

/// Serialize rows into a cold file image.
pub fn encode_file(rows: &[ColdRow]) -> Vec<u8> {
    let mut sorted: Vec<&ColdRow> = rows.iter().collect();
    sorted.sort_by(|a, b| a.sha.as_bytes().cmp(b.sha.as_bytes()));

    let mut bloom = Bloom::new((rows.len().max(1)) * BLOOM_BITS_PER_ROW, 3);
    for row in &sorted {
        bloom.insert(&row.sha);
    }
    let bloom_bytes = bloom.to_bytes();

    let zero = [0u8; 20];
    let min_sha = sorted.first().map(|r| r.sha.as_bytes()).unwrap_or(&zero);
    let max_sha = sorted.last().map(|r| r.sha.as_bytes()).unwrap_or(&zero);

    let mut out = Vec::new();
    out.extend_from_slice(COLD_MAGIC);
    out.extend_from_slice(&(sorted.len() as u32).to_be_bytes());
    out.extend_from_slice(min_sha);
    out.extend_from_slice(max_sha);
    out.extend_from_slice(&(bloom_bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(&bloom_bytes);
    for row in sorted {
        out.extend_from_slice(row.sha.as_bytes());
        out.push(row.obj_type.pack_code());
        out.extend_from_slice(&(row.content.len() as u32).to_be_bytes());
        out.extend_from_slice(&row.content);
    }
    out
}

/// The decoded header of a cold file.
struct ColdHeader {
    row_count: u32,
    bloom: Option<Bloom>,
    rows_at: usize,
}

fn decode_header(data: &[u8], artifact: &str) -> Result<ColdHeader, StoreError> {
    let corrupt = |reason: &str| StoreError::Corruption {
        artifact: artifact.to_string(),
        reason: reason.to_string(),
    };
    if data.len() < 4 + 4 + 40 + 4 || &data[..4] != COLD_MAGIC {
        return Err(corrupt("missing magic or truncated header"));
    }
    let row_count = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
    let bloom_len =
        u32::from_be_bytes([data[48], data[49], data[50], data[51]]) as usize;
    let bloom_start = 52;
    let rows_at = bloom_start + bloom_len;
    if rows_at > data.len() {
        return Err(corrupt("bloom section truncated"));
    }
    Ok(ColdHeader {
        row_count,
        bloom: Bloom::from_bytes(&data[bloom_start..rows_at]),
        rows_at,
    })
}

/// Scan a cold file image for one sha.
pub fn find_in_file(
    data: &[u8],
    sha: &ObjectId,
    artifact: &str,
) -> Result<Option<(ObjectType, Vec<u8>)>, StoreError> {
    let corrupt = |reason: String| StoreError::Corruption {
        artifact: artifact.to_string(),
        reason,
    };
    let header = decode_header(data, artifact)?;
    if let Some(bloom) = &header.bloom {
        if !bloom.may_contain(sha) {
            return Ok(None);
        }
    }

    let mut pos = header.rows_at;
    for _ in 0..header.row_count {
        if pos + 25 > data.len() {
            return Err(corrupt("row header truncated".into()));
        }
        let row_sha = &data[pos..pos + 20];
        let type_code = data[pos + 20];
        let len = u32::from_be_bytes([
            data[pos + 21],
            data[pos + 22],
            data[pos + 23],
            data[pos + 24],
        ]) as usize;
        let body_at = pos + 25;
        if body_at + len > data.len() {
            return Err(corrupt("row body truncated".into()));
        }
        if row_sha == sha.as_bytes() {
            let obj_type = ObjectType::from_pack_code(type_code)
                .ok_or_else(|| corrupt(format!("bad type code {type_code}")))?;
            let content = data[body_at..body_at + len].to_vec();
            // Never return wrong bytes: re-derive the address before serving.
            let actual =
                Hasher::hash_object(HashAlgorithm::Sha1, obj_type.as_str(), &content)?;
            if actual != *sha {
                return Err(corrupt(format!(
                    "row for {sha} hashes to {actual}"
                )));
            }
            return Ok(Some((obj_type, content)));
        }
        pos = body_at + len;
    }
    Ok(None)
}

/// Parse every row out of a cold file (compaction input).
pub fn decode_rows(data: &[u8], artifact: &str) -> Result<Vec<ColdRow>, StoreError> {
    let corrupt = |reason: &str| StoreError::Corruption {
        artifact: artifact.to_string(),
        reason: reason.to_string(),
    };
    let header = decode_header(data, artifact)?;
    let mut rows = Vec::with_capacity(header.row_count as usize);
    let mut pos = header.rows_at;
    for _ in 0..header.row_count {
        if pos + 25 > data.len() {
            return Err(corrupt("row header truncated"));
        }
        let sha = ObjectId::from_digest(&data[pos..pos + 20])?;
        let obj_type = ObjectType::from_pack_code(data[pos + 20])
            .ok_or_else(|| corrupt("bad type code"))?;
        let len = u32::from_be_bytes([
            data[pos + 21],
            data[pos + 22],
            data[pos + 23],
            data[pos + 24],
        ]) as usize;
        let body_at = pos + 25;
        if body_at + len > data.len() {
            return Err(corrupt("row body truncated"));
        }
        rows.push(ColdRow {
            sha,
            obj_type,
            content: data[body_at..body_at + len].to_vec(),
        });
        pos = body_at + len;
    }
    Ok(rows)
}

/// Cold-tier access through the backing store.
pub struct ColdTier {
    backing: Arc<dyn ObjectStore>,
    prefix: String,
}

impl ColdTier {
    pub fn new(backing: Arc<dyn ObjectStore>, prefix: impl Into<String>) -> Self {
        Self {
            backing,
            prefix: prefix.into(),
        }
    }

    fn key(&self, file_id: &str) -> String {
        format!("{}{file_id}", self.prefix)
    }

    /// Write rows as a new cold file. The file id is the digest of its
    /// contents, so identical flushes are idempotent.
    pub async fn write_file(&self, rows: &[ColdRow]) -> Result<String, StoreError> {
        let image = encode_file(rows);
        let digest = Hasher::digest(HashAlgorithm::Sha1, &image)?;
        let file_id = format!("cf-{}", digest.to_hex());
        self.backing.put(&self.key(&file_id), &image).await?;
        debug!(file_id, rows = rows.len(), bytes = image.len(), "wrote cold file");
        Ok(file_id)
    }

    /// Read one object out of a cold file.
    pub async fn get(
        &self,
        file_id: &str,
        sha: &ObjectId,
    ) -> Result<Option<(ObjectType, Vec<u8>)>, StoreError> {
        let Some(image) = self.backing.get(&self.key(file_id)).await? else {
            warn!(file_id, "cold file missing from backing store");
            return Ok(None);
        };
        find_in_file(&image, sha, file_id)
    }

    pub async fn delete_file(&self, file_id: &str) -> Result<(), StoreError> {
        self.backing.delete(&self.key(file_id)).await
    }

    /// Merge small cold files whose combined size stays under `target_bytes`
    /// into one file. Returns `(new_file_id, merged_file_ids)` per merge.
    pub async fn compact(
        &self,
        file_ids: &[String],
        target_bytes: u64,
    ) -> Result<Vec<(String, Vec<String>)>, StoreError> {
        let mut merges = Vec::new();
        let mut group: Vec<(String, Vec<ColdRow>)> = Vec::new();
        let mut group_bytes = 0u64;

        for file_id in file_ids {
            let Some(image) = self.backing.get(&self.key(file_id)).await? else {
                continue;
            };
            let size = image.len() as u64;
            if size >= target_bytes {
                continue;
            }
            if group_bytes + size > target_bytes && group.len() >= 2 {
                merges.push(self.merge_group(std::mem::take(&mut group)).await?);
                group_bytes = 0;
            }
            group_bytes += size;
            let rows = decode_rows(&image, file_id)?;
            group.push((file_id.clone(), rows));
        }
        if group.len() >= 2 {
            merges.push(self.merge_group(group).await?);
        }
        Ok(merges)
    }

    async fn merge_group(
        &self,
        group: Vec<(String, Vec<ColdRow>)>,
    ) -> Result<(String, Vec<String>), StoreError> {
        let sources: Vec<String> = group.iter().map(|(id, _)| id.clone()).collect();
        let rows: Vec<ColdRow> = group.into_iter().flat_map(|(_, rows)| rows).collect();
        let new_id = self.write_file(&rows).await?;
        info!(?sources, new_id, rows = rows.len(), "compacted cold files");
        Ok((new_id, sources))
    }
}
