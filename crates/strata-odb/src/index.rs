//! The object-location index: sha → (tier, pack, offset, size, type).

use std::collections::HashMap;

use sqlx::{Row, SqlitePool};
use strata_hash::ObjectId;
use strata_object::ObjectType;

use crate::{now_ms, StoreError};

/// Which tier holds an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Hot,
    Warm,
    Cold,
}

impl Tier {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Hot => "hot",
            Self::Warm => "warm",
            Self::Cold => "cold",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "hot" => Some(Self::Hot),
            "warm" => Some(Self::Warm),
            "cold" => Some(Self::Cold),
            _ => None,
        }
    }
}

/// One index row.
#[derive(Debug, Clone)]
pub struct Location {
    pub sha: ObjectId,
    pub tier: Tier,
    /// Warm: pack id. Cold: cold-file id, or the chunked/super-chunk marker.
    pub pack_id: Option<String>,
    pub offset: Option<u64>,
    pub size: u64,
    pub obj_type: Option<ObjectType>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Per-tier aggregate for `stats_by_tier`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TierStats {
    pub objects: u64,
    pub bytes: u64,
}

/// SQL-backed location index. All upserts are row-atomic.
#[derive(Clone)]
pub struct LocationIndex {
    pool: SqlitePool,
}

impl LocationIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Record or replace the location of an object.
    pub async fn record(&self, loc: &Location) -> Result<(), StoreError> {
        let now = now_ms();
        sqlx::query(
            "INSERT INTO object_index (sha, tier, pack_id, offset, size, obj_type, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(sha) DO UPDATE SET
                tier = excluded.tier,
                pack_id = excluded.pack_id,
                offset = excluded.offset,
                size = excluded.size,
                obj_type = excluded.obj_type,
                updated_at = excluded.updated_at",
        )
        .bind(loc.sha.to_hex())
        .bind(loc.tier.as_str())
        .bind(loc.pack_id.as_deref())
        .bind(loc.offset.map(|o| o as i64))
        .bind(loc.size as i64)
        .bind(loc.obj_type.map(|t| t.as_str()))
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn lookup(&self, sha: &ObjectId) -> Result<Option<Location>, StoreError> {
        let row = sqlx::query(
            "SELECT sha, tier, pack_id, offset, size, obj_type, created_at, updated_at
             FROM object_index WHERE sha = ?",
        )
        .bind(sha.to_hex())
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_location).transpose()
    }

    /// Partition `shas` into found locations and missing ids.
    pub async fn batch_lookup(
        &self,
        shas: &[ObjectId],
    ) -> Result<(Vec<Location>, Vec<ObjectId>), StoreError> {
        let mut found = Vec::new();
        let mut missing = Vec::new();
        for sha in shas {
            match self.lookup(sha).await? {
                Some(loc) => found.push(loc),
                None => missing.push(*sha),
            }
        }
        Ok((found, missing))
    }

    /// Move an object to another tier, optionally renaming its container.
    pub async fn update_tier(
        &self,
        sha: &ObjectId,
        tier: Tier,
        pack_id: Option<&str>,
        offset: Option<u64>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE object_index SET tier = ?, pack_id = ?, offset = ?, updated_at = ? WHERE sha = ?",
        )
        .bind(tier.as_str())
        .bind(pack_id)
        .bind(offset.map(|o| o as i64))
        .bind(now_ms())
        .bind(sha.to_hex())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete(&self, sha: &ObjectId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM object_index WHERE sha = ?")
            .bind(sha.to_hex())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn stats_by_tier(&self) -> Result<HashMap<Tier, TierStats>, StoreError> {
        let rows = sqlx::query(
            "SELECT tier, COUNT(*) AS objects, COALESCE(SUM(size), 0) AS bytes
             FROM object_index GROUP BY tier",
        )
        .fetch_all(&self.pool)
        .await?;
        let mut stats = HashMap::new();
        for row in rows {
            let tier_str: String = row.get("tier");
            if let Some(tier) = Tier::from_str(&tier_str) {
                stats.insert(
                    tier,
                    TierStats {
                        objects: row.get::<i64, _>("objects") as u64,
                        bytes: row.get::<i64, _>("bytes") as u64,
                    },
                );
            }
        }
        Ok(stats)
    }

    pub async fn by_tier(&self, tier: Tier) -> Result<Vec<Location>, StoreError> {
        let rows = sqlx::query(
            "SELECT sha, tier, pack_id, offset, size, obj_type, created_at, updated_at
             FROM object_index WHERE tier = ? ORDER BY sha",
        )
        .bind(tier.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_location).collect()
    }

    /// Entries of one container, sorted by offset.
    pub async fn by_pack(&self, pack_id: &str) -> Result<Vec<Location>, StoreError> {
        let rows = sqlx::query(
            "SELECT sha, tier, pack_id, offset, size, obj_type, created_at, updated_at
             FROM object_index WHERE pack_id = ? ORDER BY offset",
        )
        .bind(pack_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_location).collect()
    }

    /// Every row; the garbage collector's sweep input.
    pub async fn all(&self) -> Result<Vec<Location>, StoreError> {
        let rows = sqlx::query(
            "SELECT sha, tier, pack_id, offset, size, obj_type, created_at, updated_at
             FROM object_index ORDER BY sha",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_location).collect()
    }
}

fn row_to_location(row: sqlx::sqlite::SqliteRow) -> Result<Location, StoreError> {
    let sha_hex: String = row.get("sha");
    let tier_str: String = row.get("tier");
    let sha = ObjectId::from_hex(&sha_hex)?;
    let tier = Tier::from_str(&tier_str).ok_or_else(|| StoreError::Corruption {
        artifact: format!("object_index:{sha_hex}"),
        reason: format!("unknown tier {tier_str:?}"),
    })?;
    let obj_type: Option<String> = row.get("obj_type");
    let obj_type = match obj_type {
        Some(t) => Some(ObjectType::from_bytes(t.as_bytes())?),
        None => None,
    };
    Ok(Location {
        sha,
        tier,
        pack_id: row.get("pack_id"),
        offset: row.get::<Option<i64>, _>("offset").map(|o| o as u64),
        size: row.get::<i64, _>("size") as u64,
        obj_type,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}
