use alertwatch_common::AppConfig;
use async_trait::async_trait;
use tracing::warn;

use super::backend::{AlertSummary, Digest, NotifyBackend};
use super::teams::TeamsWebhook;

/// Routes alert cards and digests to separate channels.
pub struct NotifyRouter {
    alerts_backend: Box<dyn NotifyBackend>,
    /// Digests and error cards.
    digest_backend: Box<dyn NotifyBackend>,
}

impl NotifyRouter {
    pub fn new(alerts_backend: Box<dyn NotifyBackend>, digest_backend: Box<dyn NotifyBackend>) -> Self {
        Self {
            alerts_backend,
            digest_backend,
        }
    }

    /// `None` when no webhook is configured. The digest channel falls back to
    /// the alerts webhook.
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Option<Self>> {
        let Some(default_url) = config.teams_webhook_url.clone() else {
            return Ok(None);
        };
        let digest_url = config
            .teams_digest_webhook_url
            .clone()
            .unwrap_or_else(|| default_url.clone());

        Ok(Some(Self::new(
            Box::new(TeamsWebhook::new(default_url)?),
            Box::new(TeamsWebhook::new(digest_url)?),
        )))
    }
}

#[async_trait]
impl NotifyBackend for NotifyRouter {
    /// Propagated: the notifier needs the failure to keep the alert queued.
    async fn send_alert(&self, summary: &AlertSummary) -> anyhow::Result<()> {
        self.alerts_backend.send_alert(summary).await
    }

    async fn send_digest(&self, digest: &Digest) -> anyhow::Result<()> {
        if let Err(e) = self.digest_backend.send_digest(digest).await {
            warn!(error = %e, title = %digest.title, "Failed to send digest notification");
        }
        Ok(())
    }

    async fn send_error(&self, context: &str, message: &str) -> anyhow::Result<()> {
        if let Err(e) = self.digest_backend.send_error(context, message).await {
            warn!(error = %e, context, "Failed to send error notification");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{summary_fixture, RecordingBackend};
    use std::sync::Arc;

    struct Shared(Arc<RecordingBackend>);

    #[async_trait]
    impl NotifyBackend for Shared {
        async fn send_alert(&self, summary: &AlertSummary) -> anyhow::Result<()> {
            self.0.send_alert(summary).await
        }
        async fn send_digest(&self, digest: &Digest) -> anyhow::Result<()> {
            self.0.send_digest(digest).await
        }
        async fn send_error(&self, context: &str, message: &str) -> anyhow::Result<()> {
            self.0.send_error(context, message).await
        }
    }

    #[tokio::test]
    async fn alert_failures_propagate_digest_failures_do_not() {
        let alerts = Arc::new(RecordingBackend::new().failing_first(1));
        let digests = Arc::new(RecordingBackend::new().failing_first(2));
        let router = NotifyRouter::new(Box::new(Shared(alerts.clone())), Box::new(Shared(digests.clone())));

        assert!(router.send_alert(&summary_fixture()).await.is_err());
        assert!(router.send_alert(&summary_fixture()).await.is_ok());

        let digest = Digest {
            title: "Overdue".into(),
            summary: "none".into(),
            colour: "FF0000",
            facts: vec![],
        };
        assert!(router.send_digest(&digest).await.is_ok());
        assert!(router.send_error("poll", "boom").await.is_ok());

        assert_eq!(alerts.alerts().len(), 1);
        assert!(digests.digests().is_empty());
    }

    #[test]
    fn no_webhook_means_no_router() {
        let config = AppConfig {
            database_url: "postgres://localhost/test".into(),
            teams_webhook_url: None,
            teams_digest_webhook_url: Some("https://example.org/hook".into()),
        };
        assert!(NotifyRouter::from_config(&config).unwrap().is_none());
    }
}
