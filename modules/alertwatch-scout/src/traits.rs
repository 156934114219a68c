// Trait abstractions for the pipeline's external collaborators.
//
// AlertSource: paged candidate discovery (GOV.UK in production).
// AlertStore: the alert repository; identifier-unique, transactional.
// AuditLog: append-only record of who changed what.
// IngestState: watermarks, backfill cursors and the cross-process run lock.
//
// These enable deterministic testing with the mocks in `testing`: no network,
// no database.

use alertwatch_common::{
    Alert, AlertContent, AlertStatus, AuditEntry, Classification, EnrichmentStatus, StoreResult,
    WorkflowState,
};
use alertwatch_store::{PgAlertStore, PgAuditLog, PgIngestState};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::source::{PageQuery, SourceError, SourcePage};

// ---------------------------------------------------------------------------
// AlertSource
// ---------------------------------------------------------------------------

#[async_trait]
pub trait AlertSource: Send + Sync {
    /// Fetch and enrich one page of candidates.
    async fn fetch_page(&self, query: &PageQuery) -> std::result::Result<SourcePage, SourceError>;
}

// ---------------------------------------------------------------------------
// AlertStore
// ---------------------------------------------------------------------------

#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn find_by_external_id(&self, external_id: &str) -> StoreResult<Option<Alert>>;

    async fn get(&self, id: Uuid) -> StoreResult<Alert>;

    /// Insert, failing with `DuplicateIdentity` if the identifier exists.
    async fn insert(&self, alert: &Alert) -> StoreResult<Alert>;

    /// Overwrite content and classification only.
    async fn update_content_fields(
        &self,
        id: Uuid,
        content: &AlertContent,
        classification: &Classification,
        enrichment: EnrichmentStatus,
        note: Option<&str>,
    ) -> StoreResult<Alert>;

    /// Write reviewer state, failing with `VersionConflict` on a stale version.
    async fn update_workflow_fields(
        &self,
        id: Uuid,
        expected_version: i64,
        workflow: &WorkflowState,
        note: Option<&str>,
    ) -> StoreResult<Alert>;

    async fn list_by_status(&self, status: AlertStatus) -> StoreResult<Vec<Alert>>;

    async fn list_pending_notifications(&self, limit: i64) -> StoreResult<Vec<Alert>>;

    /// Set the notified flag. Returns false if it was already set.
    async fn mark_notified(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<bool>;

    async fn list_created_since(&self, since: DateTime<Utc>) -> StoreResult<Vec<Alert>>;
}

#[async_trait]
impl AlertStore for PgAlertStore {
    async fn find_by_external_id(&self, external_id: &str) -> StoreResult<Option<Alert>> {
        self.find_by_external_id(external_id).await
    }

    async fn get(&self, id: Uuid) -> StoreResult<Alert> {
        self.get(id).await
    }

    async fn insert(&self, alert: &Alert) -> StoreResult<Alert> {
        self.insert(alert).await
    }

    async fn update_content_fields(
        &self,
        id: Uuid,
        content: &AlertContent,
        classification: &Classification,
        enrichment: EnrichmentStatus,
        note: Option<&str>,
    ) -> StoreResult<Alert> {
        self.update_content_fields(id, content, classification, enrichment, note)
            .await
    }

    async fn update_workflow_fields(
        &self,
        id: Uuid,
        expected_version: i64,
        workflow: &WorkflowState,
        note: Option<&str>,
    ) -> StoreResult<Alert> {
        self.update_workflow_fields(id, expected_version, workflow, note)
            .await
    }

    async fn list_by_status(&self, status: AlertStatus) -> StoreResult<Vec<Alert>> {
        self.list_by_status(status).await
    }

    async fn list_pending_notifications(&self, limit: i64) -> StoreResult<Vec<Alert>> {
        self.list_pending_notifications(limit).await
    }

    async fn mark_notified(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<bool> {
        self.mark_notified(id, at).await
    }

    async fn list_created_since(&self, since: DateTime<Utc>) -> StoreResult<Vec<Alert>> {
        self.list_created_since(since).await
    }
}

// ---------------------------------------------------------------------------
// AuditLog
// ---------------------------------------------------------------------------

#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append(&self, entry: &AuditEntry) -> Result<()>;
}

#[async_trait]
impl AuditLog for PgAuditLog {
    async fn append(&self, entry: &AuditEntry) -> Result<()> {
        self.append(entry).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// IngestState
// ---------------------------------------------------------------------------

#[async_trait]
pub trait IngestState: Send + Sync {
    async fn watermark(&self, job: &str) -> Result<Option<DateTime<Utc>>>;

    /// Move the watermark forward; never backwards.
    async fn advance_watermark(&self, job: &str, to: DateTime<Utc>) -> Result<()>;

    async fn cursor(&self, job: &str) -> Result<Option<serde_json::Value>>;

    async fn save_cursor(&self, job: &str, cursor: serde_json::Value) -> Result<()>;

    async fn clear_cursor(&self, job: &str) -> Result<()>;

    /// Atomically take the named lock. False if someone else holds it.
    async fn try_acquire_lock(&self, name: &str, holder: &str) -> Result<bool>;

    /// Keep a held lock from going stale. False if `holder` lost it.
    async fn refresh_lock(&self, name: &str, holder: &str) -> Result<bool>;

    async fn release_lock(&self, name: &str, holder: &str) -> Result<()>;
}

#[async_trait]
impl IngestState for PgIngestState {
    async fn watermark(&self, job: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self.watermark(job).await?)
    }

    async fn advance_watermark(&self, job: &str, to: DateTime<Utc>) -> Result<()> {
        Ok(self.advance_watermark(job, to).await?)
    }

    async fn cursor(&self, job: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.cursor(job).await?)
    }

    async fn save_cursor(&self, job: &str, cursor: serde_json::Value) -> Result<()> {
        Ok(self.save_cursor(job, &cursor).await?)
    }

    async fn clear_cursor(&self, job: &str) -> Result<()> {
        Ok(self.clear_cursor(job).await?)
    }

    async fn try_acquire_lock(&self, name: &str, holder: &str) -> Result<bool> {
        Ok(self.try_acquire_lock(name, holder).await?)
    }

    async fn refresh_lock(&self, name: &str, holder: &str) -> Result<bool> {
        Ok(self.refresh_lock(name, holder).await?)
    }

    async fn release_lock(&self, name: &str, holder: &str) -> Result<()> {
        Ok(self.release_lock(name, holder).await?)
    }
}
