use alertwatch_common::{Alert, AlertCategory, Priority, Severity};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Everything the sink is told about one newly relevant alert.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertSummary {
    pub alert_id: Uuid,
    pub reference: String,
    pub title: String,
    pub category: AlertCategory,
    pub severity: Severity,
    pub priority: Priority,
    pub tags: Vec<String>,
    pub published_at: DateTime<Utc>,
    pub issued_at: Option<DateTime<Utc>>,
    pub url: String,
    /// Link to the tracking record on the review dashboard.
    pub tracking_url: String,
    pub assigned_reviewer: Option<String>,
    pub product_name: Option<String>,
    pub batch_numbers: Option<String>,
}

impl AlertSummary {
    pub fn from_alert(alert: &Alert, dashboard_url: &str, approver: Option<&str>) -> Self {
        Self {
            alert_id: alert.id,
            reference: alert.reference.clone(),
            title: alert.content.title.clone(),
            category: alert.classification.category,
            severity: alert.classification.severity,
            priority: alert.classification.priority,
            tags: alert.content.tags.clone(),
            published_at: alert.content.published_at,
            issued_at: alert.content.issued_at,
            url: alert.content.url.clone(),
            tracking_url: format!("{}/alerts/{}", dashboard_url.trim_end_matches('/'), alert.id),
            assigned_reviewer: approver.map(str::to_string),
            product_name: alert.content.product.product_name.clone(),
            batch_numbers: alert.content.product.batch_numbers.clone(),
        }
    }
}

/// A periodic report: overdue list or daily summary.
#[derive(Debug, Clone, PartialEq)]
pub struct Digest {
    pub title: String,
    pub summary: String,
    pub colour: &'static str,
    /// Label/value rows.
    pub facts: Vec<(String, String)>,
}

/// Pluggable outbound notification sink.
#[async_trait]
pub trait NotifyBackend: Send + Sync {
    /// Deliver one alert card. An error means the alert stays queued.
    async fn send_alert(&self, summary: &AlertSummary) -> anyhow::Result<()>;

    async fn send_digest(&self, digest: &Digest) -> anyhow::Result<()>;

    /// Report a failed cycle.
    async fn send_error(&self, context: &str, message: &str) -> anyhow::Result<()>;
}
