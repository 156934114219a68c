use alertwatch_common::StoreResult;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{info, warn};

use crate::db;

/// Locks not refreshed for this long are assumed to belong to a crashed
/// process. Live holders refresh well inside this window.
pub const STALE_LOCK_MINUTES: i64 = 30;

/// Watermarks, backfill cursors and the run lock.
#[derive(Clone)]
pub struct PgIngestState {
    pool: PgPool,
}

impl PgIngestState {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn watermark(&self, name: &str) -> StoreResult<Option<DateTime<Utc>>> {
        let row = sqlx::query_as::<_, (Option<DateTime<Utc>>,)>(
            "SELECT watermark FROM ingest_state WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(db)?;
        Ok(row.and_then(|r| r.0))
    }

    /// Move the watermark forward. Never moves it back.
    pub async fn advance_watermark(&self, name: &str, to: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO ingest_state (name, watermark, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (name) DO UPDATE
            SET watermark = GREATEST(COALESCE(ingest_state.watermark, EXCLUDED.watermark), EXCLUDED.watermark),
                updated_at = now()
            "#,
        )
        .bind(name)
        .bind(to)
        .execute(&self.pool)
        .await
        .map_err(db)?;
        Ok(())
    }

    pub async fn cursor(&self, name: &str) -> StoreResult<Option<serde_json::Value>> {
        let row = sqlx::query_as::<_, (Option<serde_json::Value>,)>(
            "SELECT cursor FROM ingest_state WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(db)?;
        Ok(row.and_then(|r| r.0))
    }

    pub async fn save_cursor(&self, name: &str, cursor: &serde_json::Value) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO ingest_state (name, cursor, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (name) DO UPDATE SET cursor = EXCLUDED.cursor, updated_at = now()
            "#,
        )
        .bind(name)
        .bind(cursor)
        .execute(&self.pool)
        .await
        .map_err(db)?;
        Ok(())
    }

    pub async fn clear_cursor(&self, name: &str) -> StoreResult<()> {
        sqlx::query("UPDATE ingest_state SET cursor = NULL, updated_at = now() WHERE name = $1")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(db)?;
        Ok(())
    }

    /// Atomically take the named lock. Stale locks are cleared first.
    /// Returns false if another live holder has it.
    pub async fn try_acquire_lock(&self, name: &str, holder: &str) -> StoreResult<bool> {
        let reaped = sqlx::query(
            "DELETE FROM run_locks WHERE name = $1 AND acquired_at < now() - make_interval(mins => $2)",
        )
        .bind(name)
        .bind(STALE_LOCK_MINUTES as i32)
        .execute(&self.pool)
        .await
        .map_err(db)?;
        if reaped.rows_affected() > 0 {
            warn!(name, "Cleared stale run lock");
        }

        let result = sqlx::query(
            "INSERT INTO run_locks (name, holder, acquired_at) VALUES ($1, $2, now()) ON CONFLICT (name) DO NOTHING",
        )
        .bind(name)
        .bind(holder)
        .execute(&self.pool)
        .await
        .map_err(db)?;

        let acquired = result.rows_affected() == 1;
        if acquired {
            info!(name, holder, "Acquired run lock");
        }
        Ok(acquired)
    }

    /// Keep a held lock from going stale. False if `holder` no longer has it.
    pub async fn refresh_lock(&self, name: &str, holder: &str) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE run_locks SET acquired_at = now() WHERE name = $1 AND holder = $2",
        )
        .bind(name)
        .bind(holder)
        .execute(&self.pool)
        .await
        .map_err(db)?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn release_lock(&self, name: &str, holder: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM run_locks WHERE name = $1 AND holder = $2")
            .bind(name)
            .bind(holder)
            .execute(&self.pool)
            .await
            .map_err(db)?;
        Ok(())
    }
}
