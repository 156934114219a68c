//! Entry point for the review surface.
//!
//! Reviewers never write status directly. They submit a `ReviewAction` with
//! the version they read; the lifecycle decides the next state and the store
//! rejects the write if someone else got there first.

use std::sync::Arc;

use alertwatch_common::{
    apply, missing_fields, required_fields, Alert, AuditEntry, ReviewAction, StoreError,
    TransitionError,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::traits::{AlertStore, AuditLog};

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ReviewError {
    /// True when the caller should re-read the alert and resubmit.
    pub fn is_conflict(&self) -> bool {
        matches!(self, ReviewError::Store(StoreError::VersionConflict { .. }))
    }
}

/// Checklist view for one alert: which fields apply now and which are open.
#[derive(Debug, Clone, Serialize)]
pub struct Checklist {
    pub alert_id: Uuid,
    pub version: i64,
    pub status: String,
    pub required: Vec<&'static str>,
    pub missing: Vec<&'static str>,
}

pub struct ReviewService {
    store: Arc<dyn AlertStore>,
    audit: Arc<dyn AuditLog>,
}

impl ReviewService {
    pub fn new(store: Arc<dyn AlertStore>, audit: Arc<dyn AuditLog>) -> Self {
        Self { store, audit }
    }

    /// Apply one reviewer action against the version the reviewer read.
    pub async fn apply(
        &self,
        id: Uuid,
        expected_version: i64,
        action: &ReviewAction,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<Alert, ReviewError> {
        let current = self.store.get(id).await?;
        if current.version != expected_version {
            return Err(StoreError::VersionConflict {
                id,
                expected: expected_version,
            }
            .into());
        }

        let transition = apply(&current.workflow, action, current.created_at, now)?;
        let updated = self
            .store
            .update_workflow_fields(id, expected_version, &transition.state, transition.note.as_deref())
            .await?;

        info!(
            alert_id = %id,
            actor,
            action = action.name(),
            from = %transition.from,
            to = %transition.to,
            "Review action applied"
        );

        let entry = AuditEntry {
            alert_id: id,
            actor: actor.to_string(),
            action: action.name().to_string(),
            payload: json!({
                "action": action,
                "from": transition.from,
                "to": transition.to,
                "note": transition.note,
            }),
            at: now,
        };
        if let Err(e) = self.audit.append(&entry).await {
            warn!(alert_id = %id, error = %e, "Failed to append audit entry");
        }

        Ok(updated)
    }

    pub async fn checklist(&self, id: Uuid) -> Result<Checklist, ReviewError> {
        let alert = self.store.get(id).await?;
        let fields = &alert.workflow.fields;
        Ok(Checklist {
            alert_id: alert.id,
            version: alert.version,
            status: alert.status().to_string(),
            required: required_fields(fields).iter().map(|f| f.name()).collect(),
            missing: missing_fields(fields).iter().map(|f| f.name()).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::{DedupGate, Reconciled};
    use crate::testing::{candidate, MockAlertStore};
    use crate::triage::RuleSet;
    use alertwatch_common::config::TriageConfig;
    use alertwatch_common::lifecycle::record;
    use alertwatch_common::{AlertStatus, Field, FieldValue, IngestOrigin};
    use chrono::{NaiveDate, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 4, 12, 0, 0).unwrap()
    }

    async fn seeded(store: &Arc<MockAlertStore>) -> Alert {
        let gate = DedupGate::new(
            store.clone(),
            store.clone(),
            RuleSet::from_config(&TriageConfig::default()),
        );
        match gate
            .reconcile(&candidate("review-1", &["General practice"]), IngestOrigin::Poll, now())
            .await
            .unwrap()
        {
            Reconciled::Inserted(alert) => alert,
            other => panic!("expected insert, got {other:?}"),
        }
    }

    fn date(d: u32) -> FieldValue {
        FieldValue::Date(NaiveDate::from_ymd_opt(2025, 3, d).unwrap())
    }

    #[tokio::test]
    async fn full_review_to_completion() {
        let store = Arc::new(MockAlertStore::new());
        let alert = seeded(&store).await;
        let service = ReviewService::new(store.clone(), store.clone());

        let a = service
            .apply(alert.id, alert.version, &ReviewAction::MarkReviewed, "reviewer", now())
            .await
            .unwrap();
        assert_eq!(a.status(), AlertStatus::UnderReview);

        let a = service
            .apply(
                a.id,
                a.version,
                &record([
                    (Field::RecordSearchCompleted, FieldValue::Bool(true)),
                    (Field::RecordSearchDate, date(4)),
                    (Field::AffectedCount, FieldValue::Count(0)),
                    (Field::EmergencySupplyAffected, FieldValue::Bool(false)),
                    (Field::TeamNotified, FieldValue::Bool(false)),
                ]),
                "reviewer",
                now(),
            )
            .await
            .unwrap();
        assert_eq!(a.status(), AlertStatus::InProgress);

        let checklist = service.checklist(a.id).await.unwrap();
        assert!(checklist.missing.is_empty(), "{:?}", checklist.missing);

        let done = service
            .apply(
                a.id,
                a.version,
                &ReviewAction::Advance { to: AlertStatus::Completed },
                "reviewer",
                now(),
            )
            .await
            .unwrap();
        assert_eq!(done.status(), AlertStatus::Completed);
        assert!(done.workflow.completed_at.is_some());

        let actions: Vec<String> = store
            .audit_entries()
            .into_iter()
            .filter(|e| e.actor == "reviewer")
            .map(|e| e.action)
            .collect();
        assert_eq!(actions, vec!["mark_reviewed", "record", "advance"]);
    }

    #[tokio::test]
    async fn stale_version_is_a_conflict() {
        let store = Arc::new(MockAlertStore::new());
        let alert = seeded(&store).await;
        let service = ReviewService::new(store.clone(), store.clone());

        service
            .apply(alert.id, alert.version, &ReviewAction::MarkReviewed, "a", now())
            .await
            .unwrap();
        let err = service
            .apply(alert.id, alert.version, &ReviewAction::MarkReviewed, "b", now())
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn incomplete_completion_names_missing_fields() {
        let store = Arc::new(MockAlertStore::new());
        let alert = seeded(&store).await;
        let service = ReviewService::new(store.clone(), store.clone());

        let a = service
            .apply(
                alert.id,
                alert.version,
                &record([
                    (Field::FirstReviewedAt, FieldValue::Timestamp(now())),
                    (Field::RecordSearchCompleted, FieldValue::Bool(true)),
                    (Field::RecordSearchDate, date(4)),
                    (Field::AffectedCount, FieldValue::Count(3)),
                    (Field::EmergencySupplyAffected, FieldValue::Bool(false)),
                    (Field::TeamNotified, FieldValue::Bool(false)),
                    (Field::MedicationStopped, FieldValue::Bool(true)),
                ]),
                "reviewer",
                now(),
            )
            .await
            .unwrap();

        let err = service
            .apply(
                a.id,
                a.version,
                &ReviewAction::Advance { to: AlertStatus::Completed },
                "reviewer",
                now(),
            )
            .await
            .unwrap_err();
        let ReviewError::Transition(e) = err else {
            panic!("expected transition error");
        };
        assert!(e.missing().contains(&"medication_stopped_date"));

        let stored = store.get(a.id).await.unwrap();
        assert_eq!(stored.status(), AlertStatus::InProgress);
        assert_eq!(stored.version, a.version);
    }
}
