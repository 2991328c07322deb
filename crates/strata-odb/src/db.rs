//! Schema for the local transactional SQL surface.

use sqlx::SqlitePool;

use crate::StoreError;

/// Create the storage tables if they do not exist.
pub async fn init_schema(pool: &SqlitePool) -> Result<(), StoreError> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS objects_hot (
            sha        TEXT PRIMARY KEY,
            obj_type   TEXT NOT NULL,
            size       INTEGER NOT NULL,
            content    BLOB NOT NULL,
            created_at INTEGER NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS object_index (
            sha        TEXT PRIMARY KEY,
            tier       TEXT NOT NULL,
            pack_id    TEXT,
            offset     INTEGER,
            size       INTEGER NOT NULL,
            obj_type   TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_object_index_tier ON object_index (tier)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_object_index_pack ON object_index (pack_id, offset)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Open an in-memory database with the schema applied. Test helper.
pub async fn open_in_memory() -> Result<SqlitePool, StoreError> {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    init_schema(&pool).await?;
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn schema_is_idempotent() {
        let pool = open_in_memory().await.unwrap();
        init_schema(&pool).await.unwrap();
    }
}
