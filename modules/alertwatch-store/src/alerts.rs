use alertwatch_common::{
    Alert, AlertCategory, AlertContent, AlertStatus, Classification, EnrichmentStatus, Priority,
    ProductDetails, Relevance, Severity, StoreError, StoreResult, WorkflowFields, WorkflowState,
};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::db;

/// Alert repository. Lookups are by external identifier; the unique
/// constraint on that column is what keeps one row per publication.
#[derive(Clone)]
pub struct PgAlertStore {
    pool: PgPool,
}

impl PgAlertStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_external_id(&self, external_id: &str) -> StoreResult<Option<Alert>> {
        let row = sqlx::query("SELECT * FROM alerts WHERE external_id = $1")
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;
        row.as_ref().map(alert_from_row).transpose()
    }

    pub async fn get(&self, id: Uuid) -> StoreResult<Alert> {
        let row = sqlx::query("SELECT * FROM alerts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        alert_from_row(&row)
    }

    /// Insert a new alert. Loses the race cleanly: if another writer already
    /// holds the external identifier this returns `DuplicateIdentity` and
    /// writes nothing.
    pub async fn insert(&self, alert: &Alert) -> StoreResult<Alert> {
        let c = &alert.content;
        let k = &alert.classification;
        let w = &alert.workflow;
        let row = sqlx::query(
            r#"
            INSERT INTO alerts (
                id, external_id, reference,
                title, url, description, document_type, message_type, alert_type, tags,
                published_at, issued_at, govuk_reference, product,
                relevance, relevance_reason, severity, priority, category, needs_manual_review,
                enrichment,
                status, workflow_fields, final_relevance, completed_at, closed_at,
                time_to_first_review_hours, time_to_completion_hours,
                notified, notified_at, backfilled, notes, version, created_at, updated_at
            )
            VALUES (
                $1, $2, $3,
                $4, $5, $6, $7, $8, $9, $10,
                $11, $12, $13, $14,
                $15, $16, $17, $18, $19, $20,
                $21,
                $22, $23, $24, $25, $26,
                $27, $28,
                $29, $30, $31, $32, 1, $33, $33
            )
            ON CONFLICT (external_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(alert.id)
        .bind(&alert.external_id)
        .bind(&alert.reference)
        .bind(&c.title)
        .bind(&c.url)
        .bind(&c.description)
        .bind(&c.document_type)
        .bind(&c.message_type)
        .bind(&c.alert_type)
        .bind(&c.tags)
        .bind(c.published_at)
        .bind(c.issued_at)
        .bind(&c.govuk_reference)
        .bind(Json(&c.product))
        .bind(k.relevance.as_str())
        .bind(&k.reason)
        .bind(k.severity.as_str())
        .bind(k.priority.as_str())
        .bind(k.category.as_str())
        .bind(k.needs_manual_review)
        .bind(alert.enrichment.as_str())
        .bind(w.status.as_str())
        .bind(Json(&w.fields))
        .bind(w.final_relevance.map(|r| r.as_str()))
        .bind(w.completed_at)
        .bind(w.closed_at)
        .bind(w.time_to_first_review_hours)
        .bind(w.time_to_completion_hours)
        .bind(alert.notified)
        .bind(alert.notified_at)
        .bind(alert.backfilled)
        .bind(Json(&alert.notes))
        .bind(alert.created_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(db)?;

        match row {
            Some(row) => alert_from_row(&row),
            None => Err(StoreError::DuplicateIdentity {
                external_id: alert.external_id.clone(),
            }),
        }
    }

    /// Overwrite content and classification. Workflow columns are not in the
    /// statement, so reviewer work cannot be clobbered from here.
    pub async fn update_content_fields(
        &self,
        id: Uuid,
        content: &AlertContent,
        classification: &Classification,
        enrichment: EnrichmentStatus,
        note: Option<&str>,
    ) -> StoreResult<Alert> {
        let row = sqlx::query(
            r#"
            UPDATE alerts SET
                title = $2, url = $3, description = $4, document_type = $5,
                message_type = $6, alert_type = $7, tags = $8,
                published_at = $9, issued_at = $10, govuk_reference = $11, product = $12,
                relevance = $13, relevance_reason = $14, severity = $15, priority = $16,
                category = $17, needs_manual_review = $18, enrichment = $19,
                notes = CASE WHEN $20::text IS NULL THEN notes
                             ELSE notes || jsonb_build_array($20::text) END,
                version = version + 1,
                updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&content.title)
        .bind(&content.url)
        .bind(&content.description)
        .bind(&content.document_type)
        .bind(&content.message_type)
        .bind(&content.alert_type)
        .bind(&content.tags)
        .bind(content.published_at)
        .bind(content.issued_at)
        .bind(&content.govuk_reference)
        .bind(Json(&content.product))
        .bind(classification.relevance.as_str())
        .bind(&classification.reason)
        .bind(classification.severity.as_str())
        .bind(classification.priority.as_str())
        .bind(classification.category.as_str())
        .bind(classification.needs_manual_review)
        .bind(enrichment.as_str())
        .bind(note)
        .fetch_optional(&self.pool)
        .await
        .map_err(db)?
        .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        alert_from_row(&row)
    }

    /// Write reviewer state if the row is still at `expected_version`.
    pub async fn update_workflow_fields(
        &self,
        id: Uuid,
        expected_version: i64,
        workflow: &WorkflowState,
        note: Option<&str>,
    ) -> StoreResult<Alert> {
        let row = sqlx::query(
            r#"
            UPDATE alerts SET
                status = $3, workflow_fields = $4, final_relevance = $5,
                completed_at = $6, closed_at = $7,
                time_to_first_review_hours = $8, time_to_completion_hours = $9,
                notes = CASE WHEN $10::text IS NULL THEN notes
                             ELSE notes || jsonb_build_array($10::text) END,
                version = version + 1,
                updated_at = now()
            WHERE id = $1 AND version = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(expected_version)
        .bind(workflow.status.as_str())
        .bind(Json(&workflow.fields))
        .bind(workflow.final_relevance.map(|r| r.as_str()))
        .bind(workflow.completed_at)
        .bind(workflow.closed_at)
        .bind(workflow.time_to_first_review_hours)
        .bind(workflow.time_to_completion_hours)
        .bind(note)
        .fetch_optional(&self.pool)
        .await
        .map_err(db)?;

        match row {
            Some(row) => alert_from_row(&row),
            None => {
                // Distinguish a stale version from a missing row.
                self.get(id).await?;
                Err(StoreError::VersionConflict {
                    id,
                    expected: expected_version,
                })
            }
        }
    }

    pub async fn list_by_status(&self, status: AlertStatus) -> StoreResult<Vec<Alert>> {
        let rows = sqlx::query("SELECT * FROM alerts WHERE status = $1 ORDER BY published_at DESC")
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(db)?;
        rows.iter().map(alert_from_row).collect()
    }

    /// Relevant, live alerts still waiting for their one notification.
    /// A reviewer's relevance decision overrides the classifier's.
    pub async fn list_pending_notifications(&self, limit: i64) -> StoreResult<Vec<Alert>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM alerts
            WHERE notified = false
              AND backfilled = false
              AND status <> 'Closed'
              AND COALESCE(final_relevance, relevance) = 'Relevant'
            ORDER BY created_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;
        rows.iter().map(alert_from_row).collect()
    }

    /// Flip the notified flag. Returns false if it was already set, so at most
    /// one caller ever observes the transition.
    pub async fn mark_notified(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE alerts
            SET notified = true, notified_at = $2, updated_at = now()
            WHERE id = $1 AND notified = false
            "#,
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(db)?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn list_created_since(&self, since: DateTime<Utc>) -> StoreResult<Vec<Alert>> {
        let rows = sqlx::query("SELECT * FROM alerts WHERE created_at >= $1 ORDER BY created_at")
            .bind(since)
            .fetch_all(&self.pool)
            .await
            .map_err(db)?;
        rows.iter().map(alert_from_row).collect()
    }
}

fn alert_from_row(row: &PgRow) -> StoreResult<Alert> {
    let get = |e: sqlx::Error| StoreError::Decode(e.to_string());

    let status: String = row.try_get("status").map_err(get)?;
    let status = AlertStatus::parse(&status)
        .ok_or_else(|| StoreError::Decode(format!("unknown status {status}")))?;
    let final_relevance: Option<String> = row.try_get("final_relevance").map_err(get)?;
    let Json(fields): Json<WorkflowFields> = row.try_get("workflow_fields").map_err(get)?;
    let Json(product): Json<ProductDetails> = row.try_get("product").map_err(get)?;
    let Json(notes): Json<Vec<String>> = row.try_get("notes").map_err(get)?;

    Ok(Alert {
        id: row.try_get("id").map_err(get)?,
        external_id: row.try_get("external_id").map_err(get)?,
        reference: row.try_get("reference").map_err(get)?,
        content: AlertContent {
            title: row.try_get("title").map_err(get)?,
            url: row.try_get("url").map_err(get)?,
            description: row.try_get("description").map_err(get)?,
            document_type: row.try_get("document_type").map_err(get)?,
            message_type: row.try_get("message_type").map_err(get)?,
            alert_type: row.try_get("alert_type").map_err(get)?,
            tags: row.try_get("tags").map_err(get)?,
            published_at: row.try_get("published_at").map_err(get)?,
            issued_at: row.try_get("issued_at").map_err(get)?,
            govuk_reference: row.try_get("govuk_reference").map_err(get)?,
            product,
        },
        classification: Classification {
            relevance: Relevance::from_str_loose(&row.try_get::<String, _>("relevance").map_err(get)?),
            reason: row.try_get("relevance_reason").map_err(get)?,
            severity: Severity::from_str_loose(&row.try_get::<String, _>("severity").map_err(get)?),
            priority: Priority::from_str_loose(&row.try_get::<String, _>("priority").map_err(get)?),
            category: AlertCategory::from_str_loose(
                &row.try_get::<String, _>("category").map_err(get)?,
            ),
            needs_manual_review: row.try_get("needs_manual_review").map_err(get)?,
        },
        enrichment: EnrichmentStatus::from_str_loose(
            &row.try_get::<String, _>("enrichment").map_err(get)?,
        ),
        workflow: WorkflowState {
            status,
            fields,
            final_relevance: final_relevance.as_deref().map(Relevance::from_str_loose),
            completed_at: row.try_get("completed_at").map_err(get)?,
            closed_at: row.try_get("closed_at").map_err(get)?,
            time_to_first_review_hours: row.try_get("time_to_first_review_hours").map_err(get)?,
            time_to_completion_hours: row.try_get("time_to_completion_hours").map_err(get)?,
        },
        notified: row.try_get("notified").map_err(get)?,
        notified_at: row.try_get("notified_at").map_err(get)?,
        backfilled: row.try_get("backfilled").map_err(get)?,
        notes,
        version: row.try_get("version").map_err(get)?,
        created_at: row.try_get("created_at").map_err(get)?,
        updated_at: row.try_get("updated_at").map_err(get)?,
    })
}
