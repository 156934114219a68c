//! Postgres persistence for alerts, ingest state and the audit log.

pub mod alerts;
pub mod audit;
pub mod state;

pub use alerts::PgAlertStore;
pub use audit::PgAuditLog;
pub use state::PgIngestState;

use alertwatch_common::StoreError;
use sqlx::PgPool;

/// Run the embedded SQL migrations.
pub async fn migrate(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub(crate) fn db(err: sqlx::Error) -> StoreError {
    StoreError::Database(err.to_string())
}
