use async_trait::async_trait;

use super::backend::{AlertSummary, Digest, NotifyBackend};

/// Used when no webhook is configured. Every send succeeds, so alerts are
/// still marked notified and do not pile up in the queue.
pub struct NoopBackend;

#[async_trait]
impl NotifyBackend for NoopBackend {
    async fn send_alert(&self, _summary: &AlertSummary) -> anyhow::Result<()> {
        Ok(())
    }

    async fn send_digest(&self, _digest: &Digest) -> anyhow::Result<()> {
        Ok(())
    }

    async fn send_error(&self, _context: &str, _message: &str) -> anyhow::Result<()> {
        Ok(())
    }
}
