use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use alertwatch_common::config::NotifyConfig;
use alertwatch_common::{Alert, StoreResult};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, warn};

use super::backend::{AlertSummary, NotifyBackend};
use crate::infra::retry::RetryPolicy;
use crate::traits::AlertStore;

/// Upper bound on alerts delivered per flush.
const FLUSH_BATCH: i64 = 200;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushStats {
    pub sent: u32,
    /// Delivery failed after every retry; the alert stays queued.
    pub failed: u32,
    /// Someone else marked it first.
    pub skipped: u32,
}

impl fmt::Display for FlushStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "notifications sent={} failed={} skipped={}",
            self.sent, self.failed, self.skipped
        )
    }
}

enum Outcome {
    Sent,
    Failed,
    Skipped,
}

/// Delivers each relevant alert at most once.
///
/// The notified flag is only set after the sink accepts the card. A delivery
/// that exhausts its retries leaves the alert unflagged, and the next cycle's
/// flush picks it up again.
pub struct Notifier {
    store: Arc<dyn AlertStore>,
    backend: Arc<dyn NotifyBackend>,
    config: NotifyConfig,
    retry: RetryPolicy,
}

impl Notifier {
    pub fn new(
        store: Arc<dyn AlertStore>,
        backend: Arc<dyn NotifyBackend>,
        config: NotifyConfig,
    ) -> Self {
        let retry = RetryPolicy::new(
            config.max_attempts,
            Duration::from_secs(config.retry_base_secs),
        );
        Self {
            store,
            backend,
            config,
            retry,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Send every queued alert.
    pub async fn flush_pending(&self, now: DateTime<Utc>) -> StoreResult<FlushStats> {
        let pending = self.store.list_pending_notifications(FLUSH_BATCH).await?;
        if pending.is_empty() {
            return Ok(FlushStats::default());
        }
        debug!(count = pending.len(), "Flushing pending notifications");

        let outcomes: Vec<Outcome> = stream::iter(pending)
            .map(|alert| async move { self.deliver(&alert, now).await })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut stats = FlushStats::default();
        for outcome in outcomes {
            match outcome {
                Outcome::Sent => stats.sent += 1,
                Outcome::Failed => stats.failed += 1,
                Outcome::Skipped => stats.skipped += 1,
            }
        }
        if stats.sent > 0 || stats.failed > 0 {
            info!(%stats, "Notification flush complete");
        }
        Ok(stats)
    }

    async fn deliver(&self, alert: &Alert, now: DateTime<Utc>) -> Outcome {
        if !alert.awaiting_notification() {
            return Outcome::Skipped;
        }

        // Resolved per send so a hand-over takes effect mid-run.
        let approver = self.config.approver_at(now);
        let summary = AlertSummary::from_alert(alert, &self.config.dashboard_url, approver);

        let sent = self
            .retry
            .run("notify_alert", |_: &anyhow::Error| true, || self.backend.send_alert(&summary))
            .await;

        if let Err(e) = sent {
            warn!(
                alert_id = %alert.id,
                reference = %alert.reference,
                attempts = e.attempts,
                error = %e.error,
                "Notification delivery failed, alert stays queued"
            );
            return Outcome::Failed;
        }

        match self.store.mark_notified(alert.id, now).await {
            Ok(true) => {
                info!(alert_id = %alert.id, reference = %alert.reference, "Alert notified");
                Outcome::Sent
            }
            Ok(false) => Outcome::Skipped,
            Err(e) => {
                // Delivered but not recorded; the next flush sends it again.
                error!(alert_id = %alert.id, error = %e, "Failed to record notification");
                Outcome::Failed
            }
        }
    }
}
