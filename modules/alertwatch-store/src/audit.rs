use alertwatch_common::{AuditEntry, StoreResult};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db;

/// Append-only audit trail. Rows are never updated or deleted.
#[derive(Clone)]
pub struct PgAuditLog {
    pool: PgPool,
}

impl PgAuditLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn append(&self, entry: &AuditEntry) -> StoreResult<i64> {
        let seq = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO alert_audit (alert_id, actor, action, payload, at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING seq
            "#,
        )
        .bind(entry.alert_id)
        .bind(&entry.actor)
        .bind(&entry.action)
        .bind(&entry.payload)
        .bind(entry.at)
        .fetch_one(&self.pool)
        .await
        .map_err(db)?;
        Ok(seq)
    }

    /// Entries for one alert, oldest first.
    pub async fn for_alert(&self, alert_id: Uuid) -> StoreResult<Vec<AuditEntry>> {
        let rows = sqlx::query_as::<_, (Uuid, String, String, serde_json::Value, DateTime<Utc>)>(
            "SELECT alert_id, actor, action, payload, at FROM alert_audit WHERE alert_id = $1 ORDER BY seq",
        )
        .bind(alert_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;

        Ok(rows
            .into_iter()
            .map(|(alert_id, actor, action, payload, at)| AuditEntry {
                alert_id,
                actor,
                action,
                payload,
                at,
            })
            .collect())
    }
}
