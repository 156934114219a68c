//! Deduplication / upsert gate.
//!
//! One logical alert per external identifier. Re-ingestion may rewrite the
//! content and classification columns of an existing alert, and nothing else:
//! status and checklist answers belong to the reviewer.

use std::sync::Arc;

use alertwatch_common::{
    alert_reference, Alert, AlertContent, AlertStatus, AuditEntry, CandidateRecord,
    EnrichmentStatus, IngestOrigin, Relevance, StoreError, StoreResult, WorkflowState,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::traits::{AlertStore, AuditLog};
use crate::triage::{classify, product, RuleSet};

/// Note on alerts inserted without tags because their content lookup failed.
pub const HELD_OPEN_NOTE: &str =
    "Content lookup failed on first sight; held open until tags are available";

#[derive(Debug, Clone)]
pub enum Reconciled {
    Inserted(Alert),
    Updated(Alert),
    Unchanged,
}

pub struct DedupGate {
    store: Arc<dyn AlertStore>,
    audit: Arc<dyn AuditLog>,
    rules: RuleSet,
}

impl DedupGate {
    pub fn new(store: Arc<dyn AlertStore>, audit: Arc<dyn AuditLog>, rules: RuleSet) -> Self {
        Self { store, audit, rules }
    }

    /// Insert, update or skip one candidate. Safe to call repeatedly with the
    /// same identifier, including from overlapping poll and backfill windows.
    pub async fn reconcile(
        &self,
        candidate: &CandidateRecord,
        origin: IngestOrigin,
        now: DateTime<Utc>,
    ) -> StoreResult<Reconciled> {
        if let Some(existing) = self.store.find_by_external_id(&candidate.external_id).await? {
            return self.update(existing, candidate, origin, now).await;
        }

        match self.insert(candidate, origin, now).await {
            Err(StoreError::DuplicateIdentity { external_id }) => {
                // Lost the race to a concurrent writer. One retry, as an update.
                debug!(%external_id, "Insert raced, reconciling as update");
                let existing = self
                    .store
                    .find_by_external_id(&external_id)
                    .await?
                    .ok_or_else(|| StoreError::NotFound(external_id.clone()))?;
                self.update(existing, candidate, origin, now).await
            }
            other => other,
        }
    }

    async fn insert(
        &self,
        candidate: &CandidateRecord,
        origin: IngestOrigin,
        now: DateTime<Utc>,
    ) -> StoreResult<Reconciled> {
        let classification = classify(&self.rules, candidate);

        // Not-relevant alerts are closed on arrival and never notified. A
        // zero-tag candidate whose content lookup failed was never really
        // triaged, so it stays open until a later sighting fills its tags.
        let unclassified = is_unclassified(candidate);
        let mut workflow = match classification.relevance {
            Relevance::NotRelevant if !unclassified => WorkflowState::new(AlertStatus::Closed),
            _ => WorkflowState::new(AlertStatus::New),
        };
        if workflow.status == AlertStatus::Closed {
            workflow.closed_at = Some(now);
        }
        let notes = if unclassified {
            vec![HELD_OPEN_NOTE.to_string()]
        } else {
            Vec::new()
        };

        let alert = Alert {
            id: Uuid::new_v4(),
            external_id: candidate.external_id.clone(),
            reference: alert_reference(&candidate.external_id),
            content: content_from(candidate),
            classification,
            enrichment: candidate.enrichment,
            workflow,
            notified: false,
            notified_at: None,
            backfilled: origin == IngestOrigin::Backfill,
            notes,
            version: 1,
            created_at: now,
            updated_at: now,
        };

        let stored = self.store.insert(&alert).await?;
        info!(
            external_id = %stored.external_id,
            reference = %stored.reference,
            relevance = %stored.classification.relevance,
            priority = %stored.classification.priority,
            status = %stored.status(),
            %origin,
            "Alert inserted"
        );
        self.record(
            &stored,
            origin,
            "ingest_insert",
            json!({
                "relevance": stored.classification.relevance,
                "reason": stored.classification.reason,
                "status": stored.status(),
                "needs_manual_review": stored.classification.needs_manual_review,
            }),
            now,
        )
        .await;
        Ok(Reconciled::Inserted(stored))
    }

    async fn update(
        &self,
        existing: Alert,
        candidate: &CandidateRecord,
        origin: IngestOrigin,
        now: DateTime<Utc>,
    ) -> StoreResult<Reconciled> {
        let partial = candidate.enrichment == EnrichmentStatus::Partial;
        let merged = merge_partial(candidate, &existing);

        let mut content = content_from(&merged);
        if partial && merged.body.is_none() {
            content.product = existing.content.product.clone();
        }
        let enrichment = if partial && existing.enrichment != EnrichmentStatus::Partial {
            existing.enrichment
        } else {
            candidate.enrichment
        };

        let mut classification = classify(&self.rules, &merged);
        let mut note = None;
        let previous = existing.classification.relevance;
        if classification.relevance != previous {
            if previous == Relevance::Relevant && existing.notified {
                // Already announced: keep it open for a human to judge.
                note = Some(format!(
                    "Re-ingestion classified this alert {} ({}); kept Relevant because it was already notified",
                    classification.relevance, classification.reason
                ));
                classification.relevance = Relevance::Relevant;
                classification.reason = existing.classification.reason.clone();
            } else {
                note = Some(format!(
                    "Relevance changed from {} to {} on re-ingestion: {}",
                    previous, classification.relevance, classification.reason
                ));
            }
        }

        if content == existing.content
            && classification == existing.classification
            && enrichment == existing.enrichment
        {
            return Ok(Reconciled::Unchanged);
        }

        let changed = changed_fields(&existing.content, &content);
        let updated = self
            .store
            .update_content_fields(existing.id, &content, &classification, enrichment, note.as_deref())
            .await?;

        info!(
            external_id = %updated.external_id,
            changed = ?changed,
            status = %updated.status(),
            %origin,
            "Alert content updated"
        );
        if let Some(note) = &note {
            warn!(external_id = %updated.external_id, note = %note, "Relevance flip needs review");
        }
        self.record(
            &updated,
            origin,
            "ingest_update",
            json!({ "changed": changed, "note": note }),
            now,
        )
        .await;
        Ok(Reconciled::Updated(updated))
    }

    async fn record(
        &self,
        alert: &Alert,
        origin: IngestOrigin,
        action: &str,
        payload: serde_json::Value,
        now: DateTime<Utc>,
    ) {
        let entry = AuditEntry {
            alert_id: alert.id,
            actor: format!("ingest:{origin}"),
            action: action.to_string(),
            payload,
            at: now,
        };
        if let Err(e) = self.audit.append(&entry).await {
            warn!(alert_id = %alert.id, error = %e, "Failed to append audit entry");
        }
    }
}

/// Content columns as derived from a candidate.
pub fn content_from(candidate: &CandidateRecord) -> AlertContent {
    AlertContent {
        title: candidate.title.clone(),
        url: candidate.url.clone(),
        description: candidate.description.clone(),
        document_type: candidate.document_type.clone(),
        message_type: candidate.message_type.clone(),
        alert_type: candidate.alert_type.clone(),
        tags: candidate.tags.clone(),
        published_at: candidate.published_at,
        issued_at: candidate.issued_at,
        govuk_reference: product::regulator_reference(&candidate.title),
        product: product::extract(
            &candidate.title,
            candidate.description.as_deref(),
            candidate.body.as_deref(),
        ),
    }
}

/// No tags to triage on, and only because enrichment failed.
pub fn is_unclassified(candidate: &CandidateRecord) -> bool {
    candidate.enrichment == EnrichmentStatus::Partial && candidate.tags.is_empty()
}

/// A partially enriched repeat must not erase what an earlier lookup found.
fn merge_partial(candidate: &CandidateRecord, existing: &Alert) -> CandidateRecord {
    let mut merged = candidate.clone();
    if candidate.enrichment != EnrichmentStatus::Partial {
        return merged;
    }
    let stored = &existing.content;
    if merged.tags.is_empty() {
        merged.tags = stored.tags.clone();
    }
    merged.message_type = merged.message_type.take().or_else(|| stored.message_type.clone());
    merged.alert_type = merged.alert_type.take().or_else(|| stored.alert_type.clone());
    merged.issued_at = merged.issued_at.or(stored.issued_at);
    merged
}

fn changed_fields(old: &AlertContent, new: &AlertContent) -> Vec<&'static str> {
    let mut changed = Vec::new();
    if old.title != new.title {
        changed.push("title");
    }
    if old.url != new.url {
        changed.push("url");
    }
    if old.description != new.description {
        changed.push("description");
    }
    if old.document_type != new.document_type {
        changed.push("document_type");
    }
    if old.message_type != new.message_type || old.alert_type != new.alert_type {
        changed.push("category_fields");
    }
    if old.tags != new.tags {
        changed.push("tags");
    }
    if old.published_at != new.published_at || old.issued_at != new.issued_at {
        changed.push("timestamps");
    }
    if old.product != new.product || old.govuk_reference != new.govuk_reference {
        changed.push("product");
    }
    changed
}
