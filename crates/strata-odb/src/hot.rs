//! Hot tier: whole objects as rows in the local SQL surface.

use sqlx::{Row, SqlitePool};
use strata_hash::ObjectId;
use strata_object::ObjectType;

use crate::{now_ms, StoreError};

/// Row-per-object storage for small, frequently read objects.
#[derive(Clone)]
pub struct HotTier {
    pool: SqlitePool,
}

impl HotTier {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert an object; a second insert of the same sha is a no-op.
    pub async fn put(
        &self,
        sha: &ObjectId,
        obj_type: ObjectType,
        content: &[u8],
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO objects_hot (sha, obj_type, size, content, created_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(sha) DO NOTHING",
        )
        .bind(sha.to_hex())
        .bind(obj_type.as_str())
        .bind(content.len() as i64)
        .bind(content)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, sha: &ObjectId) -> Result<Option<(ObjectType, Vec<u8>)>, StoreError> {
        let row = sqlx::query("SELECT obj_type, content FROM objects_hot WHERE sha = ?")
            .bind(sha.to_hex())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let type_str: String = row.get("obj_type");
                let obj_type = ObjectType::from_bytes(type_str.as_bytes())?;
                Ok(Some((obj_type, row.get("content"))))
            }
            None => Ok(None),
        }
    }

    pub async fn contains(&self, sha: &ObjectId) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM objects_hot WHERE sha = ? LIMIT 1")
            .bind(sha.to_hex())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    pub async fn delete(&self, sha: &ObjectId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM objects_hot WHERE sha = ?")
            .bind(sha.to_hex())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
