//! Overdue detection and the periodic digests built on it.

use std::fmt;
use std::sync::Arc;

use alertwatch_common::{Alert, AlertStatus, Relevance, StoreResult};
use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use crate::notify::{Digest, NotifyBackend};
use crate::traits::AlertStore;

const OVERDUE_COLOUR: &str = "FF8C00";
const SUMMARY_COLOUR: &str = "0078D7";

/// Statuses that still count against a response deadline.
const OPEN_STATUSES: [AlertStatus; 3] = [
    AlertStatus::New,
    AlertStatus::UnderReview,
    AlertStatus::ActionRequired,
];

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DailySummary {
    pub created: usize,
    pub relevant: usize,
    pub auto_closed: usize,
    pub pending_review: usize,
    pub overdue: usize,
}

impl fmt::Display for DailySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "last 24h: {} new ({} relevant, {} auto-closed); {} pending review, {} overdue",
            self.created, self.relevant, self.auto_closed, self.pending_review, self.overdue
        )
    }
}

pub struct Reports {
    store: Arc<dyn AlertStore>,
    backend: Arc<dyn NotifyBackend>,
}

impl Reports {
    pub fn new(store: Arc<dyn AlertStore>, backend: Arc<dyn NotifyBackend>) -> Self {
        Self { store, backend }
    }

    /// Open alerts past their priority window, most urgent first.
    pub async fn overdue(&self, now: DateTime<Utc>) -> StoreResult<Vec<Alert>> {
        let mut overdue = Vec::new();
        for status in OPEN_STATUSES {
            overdue.extend(
                self.store
                    .list_by_status(status)
                    .await?
                    .into_iter()
                    .filter(|a| a.is_overdue(now)),
            );
        }
        overdue.sort_by(|a, b| {
            b.classification
                .priority
                .cmp(&a.classification.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(overdue)
    }

    /// Send the overdue digest if anything is overdue. Returns the count.
    pub async fn send_overdue_digest(&self, now: DateTime<Utc>) -> anyhow::Result<usize> {
        let overdue = self.overdue(now).await?;
        if overdue.is_empty() {
            return Ok(0);
        }
        warn!(count = overdue.len(), "Alerts past their response window");

        let facts = overdue
            .iter()
            .map(|a| {
                (
                    a.reference.clone(),
                    format!(
                        "{} | {} | open {} | {}",
                        a.classification.priority,
                        a.status(),
                        describe_age(now - a.created_at),
                        a.content.title
                    ),
                )
            })
            .collect();
        self.backend
            .send_digest(&Digest {
                title: format!("{} overdue MHRA alert(s)", overdue.len()),
                summary: "These alerts have passed their response deadline.".into(),
                colour: OVERDUE_COLOUR,
                facts,
            })
            .await?;
        Ok(overdue.len())
    }

    pub async fn daily_summary(&self, now: DateTime<Utc>) -> StoreResult<DailySummary> {
        let created = self.store.list_created_since(now - Duration::hours(24)).await?;
        let relevant = created
            .iter()
            .filter(|a| a.effective_relevance() == Relevance::Relevant)
            .count();
        let auto_closed = created
            .iter()
            .filter(|a| a.status() == AlertStatus::Closed && a.workflow.final_relevance.is_none())
            .count();

        let mut pending_review = 0;
        for status in [AlertStatus::New, AlertStatus::UnderReview] {
            pending_review += self.store.list_by_status(status).await?.len();
        }

        Ok(DailySummary {
            created: created.len(),
            relevant,
            auto_closed,
            pending_review,
            overdue: self.overdue(now).await?.len(),
        })
    }

    pub async fn send_daily_summary(&self, now: DateTime<Utc>) -> anyhow::Result<DailySummary> {
        let summary = self.daily_summary(now).await?;
        info!(%summary, "Daily summary");
        self.backend
            .send_digest(&Digest {
                title: format!("MHRA alerts daily summary {}", now.format("%d/%m/%Y")),
                summary: summary.to_string(),
                colour: SUMMARY_COLOUR,
                facts: vec![
                    ("New in last 24h".into(), summary.created.to_string()),
                    ("Relevant".into(), summary.relevant.to_string()),
                    ("Auto-closed".into(), summary.auto_closed.to_string()),
                    ("Pending review".into(), summary.pending_review.to_string()),
                    ("Overdue".into(), summary.overdue.to_string()),
                ],
            })
            .await?;
        Ok(summary)
    }

    /// Best effort: a failure here is only logged.
    pub async fn report_error(&self, context: &str, error: &anyhow::Error) {
        if let Err(e) = self.backend.send_error(context, &format!("{error:#}")).await {
            warn!(context, error = %e, "Failed to send error notification");
        }
    }
}

fn describe_age(age: Duration) -> String {
    if age.num_hours() >= 48 {
        format!("{}d", age.num_days())
    } else {
        format!("{}h", age.num_hours())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{alert_fixture, MockAlertStore, RecordingBackend};
    use alertwatch_common::Priority;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap()
    }

    fn aged(id: &str, priority: Priority, status: AlertStatus, hours: i64) -> Alert {
        let mut alert = alert_fixture(id);
        alert.classification.priority = priority;
        alert.workflow.status = status;
        alert.created_at = now() - Duration::hours(hours);
        alert
    }

    #[tokio::test]
    async fn overdue_respects_priority_windows() {
        let store = Arc::new(MockAlertStore::new());
        store.seed(aged("p1-late", Priority::P1Immediate, AlertStatus::New, 5));
        store.seed(aged("p1-fresh", Priority::P1Immediate, AlertStatus::New, 3));
        store.seed(aged("p2-late", Priority::P2Within48h, AlertStatus::ActionRequired, 49));
        store.seed(aged("p3-fresh", Priority::P3WithinWeek, AlertStatus::UnderReview, 100));
        store.seed(aged("p4-old", Priority::P4Routine, AlertStatus::New, 10_000));
        store.seed(aged("p1-working", Priority::P1Immediate, AlertStatus::InProgress, 50));

        let reports = Reports::new(store.clone(), Arc::new(RecordingBackend::new()));
        let overdue: Vec<String> = reports
            .overdue(now())
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.external_id)
            .collect();
        assert_eq!(overdue, vec!["p1-late", "p2-late"]);
    }

    #[tokio::test]
    async fn overdue_digest_only_sent_when_needed() {
        let store = Arc::new(MockAlertStore::new());
        let backend = Arc::new(RecordingBackend::new());
        let reports = Reports::new(store.clone(), backend.clone());

        assert_eq!(reports.send_overdue_digest(now()).await.unwrap(), 0);
        assert!(backend.digests().is_empty());

        store.seed(aged("late", Priority::P1Immediate, AlertStatus::New, 6));
        assert_eq!(reports.send_overdue_digest(now()).await.unwrap(), 1);
        let digests = backend.digests();
        assert_eq!(digests.len(), 1);
        assert!(digests[0].facts[0].1.contains("P1-Immediate"));
    }

    #[tokio::test]
    async fn daily_summary_counts_last_day() {
        let store = Arc::new(MockAlertStore::new());
        store.seed(aged("new-relevant", Priority::P3WithinWeek, AlertStatus::New, 2));
        let mut closed = aged("closed", Priority::P4Routine, AlertStatus::Closed, 3);
        closed.classification.relevance = Relevance::NotRelevant;
        store.seed(closed);
        store.seed(aged("yesterday", Priority::P3WithinWeek, AlertStatus::UnderReview, 30));

        let backend = Arc::new(RecordingBackend::new());
        let summary = Reports::new(store.clone(), backend.clone())
            .send_daily_summary(now())
            .await
            .unwrap();
        assert_eq!(
            summary,
            DailySummary {
                created: 2,
                relevant: 1,
                auto_closed: 1,
                pending_review: 2,
                overdue: 0,
            }
        );
        assert_eq!(backend.digests().len(), 1);
    }

    #[tokio::test]
    async fn error_reports_are_best_effort() {
        let backend = Arc::new(RecordingBackend::new().failing_first(1));
        let reports = Reports::new(Arc::new(MockAlertStore::new()), backend.clone());
        reports.report_error("poll", &anyhow::anyhow!("search down")).await;
        reports.report_error("poll", &anyhow::anyhow!("search down")).await;
        assert_eq!(backend.errors().len(), 1);
    }
}
