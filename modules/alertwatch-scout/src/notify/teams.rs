use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::warn;

use super::backend::{AlertSummary, Digest, NotifyBackend};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const ERROR_COLOUR: &str = "FF0000";

/// Microsoft Teams incoming webhook, posting legacy MessageCards.
pub struct TeamsWebhook {
    webhook_url: String,
    http: reqwest::Client,
}

impl TeamsWebhook {
    pub fn new(webhook_url: String) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { webhook_url, http })
    }

    async fn post(&self, payload: Value) -> anyhow::Result<()> {
        let resp = self
            .http
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "Teams webhook returned non-success");
            anyhow::bail!("Teams webhook returned {status}");
        }

        Ok(())
    }
}

fn fact(name: &str, value: impl Into<String>) -> Value {
    json!({ "name": name, "value": value.into() })
}

pub fn alert_card(summary: &AlertSummary) -> Value {
    let tags = if summary.tags.is_empty() {
        "None listed".to_string()
    } else {
        summary.tags.join(", ")
    };

    let mut facts = vec![
        fact("Reference", summary.reference.as_str()),
        fact("Category", summary.category.as_str()),
        fact("Severity", summary.severity.as_str()),
        fact("Priority", summary.priority.as_str()),
        fact("Specialties", tags),
        fact("Published", summary.published_at.format("%d/%m/%Y").to_string()),
    ];
    if let Some(issued) = summary.issued_at {
        facts.push(fact("Issued", issued.format("%d/%m/%Y").to_string()));
    }
    facts.push(fact(
        "Assigned reviewer",
        summary.assigned_reviewer.as_deref().unwrap_or("Unassigned"),
    ));
    if let Some(product) = &summary.product_name {
        facts.push(fact("Product", product.as_str()));
    }
    if let Some(batches) = &summary.batch_numbers {
        facts.push(fact("Batches", batches.as_str()));
    }

    json!({
        "@type": "MessageCard",
        "@context": "http://schema.org/extensions",
        "themeColor": summary.priority.colour(),
        "summary": format!("New MHRA alert: {}", summary.title),
        "sections": [{
            "activityTitle": format!("New MHRA alert: {}", summary.title),
            "activitySubtitle": summary.priority.as_str(),
            "facts": facts,
            "markdown": true,
        }],
        "potentialAction": [
            {
                "@type": "OpenUri",
                "name": "View on GOV.UK",
                "targets": [{ "os": "default", "uri": summary.url }],
            },
            {
                "@type": "OpenUri",
                "name": "Open Dashboard",
                "targets": [{ "os": "default", "uri": summary.tracking_url }],
            },
        ],
    })
}

pub fn digest_card(digest: &Digest) -> Value {
    let facts: Vec<Value> = digest
        .facts
        .iter()
        .map(|(name, value)| fact(name, value.as_str()))
        .collect();
    json!({
        "@type": "MessageCard",
        "@context": "http://schema.org/extensions",
        "themeColor": digest.colour,
        "summary": digest.title,
        "sections": [{
            "activityTitle": digest.title,
            "text": digest.summary,
            "facts": facts,
            "markdown": true,
        }],
    })
}

pub fn error_card(context: &str, message: &str) -> Value {
    json!({
        "@type": "MessageCard",
        "@context": "http://schema.org/extensions",
        "themeColor": ERROR_COLOUR,
        "summary": format!("Alert monitor error: {context}"),
        "sections": [{
            "activityTitle": format!("Alert monitor error: {context}"),
            "text": message,
            "markdown": false,
        }],
    })
}

#[async_trait]
impl NotifyBackend for TeamsWebhook {
    async fn send_alert(&self, summary: &AlertSummary) -> anyhow::Result<()> {
        self.post(alert_card(summary)).await
    }

    async fn send_digest(&self, digest: &Digest) -> anyhow::Result<()> {
        self.post(digest_card(digest)).await
    }

    async fn send_error(&self, context: &str, message: &str) -> anyhow::Result<()> {
        self.post(error_card(context, message)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::summary_fixture;

    #[test]
    fn alert_card_carries_priority_colour_and_links() {
        let summary = summary_fixture();
        let card = alert_card(&summary);

        assert_eq!(card["themeColor"], summary.priority.colour());
        let actions = card["potentialAction"].as_array().unwrap();
        assert_eq!(actions[0]["targets"][0]["uri"], summary.url.as_str());
        assert_eq!(actions[1]["targets"][0]["uri"], summary.tracking_url.as_str());

        let facts = card["sections"][0]["facts"].as_array().unwrap();
        let names: Vec<&str> = facts.iter().filter_map(|f| f["name"].as_str()).collect();
        assert!(names.contains(&"Priority"));
        assert!(names.contains(&"Assigned reviewer"));
        assert!(!names.contains(&"Issued"));
    }

    #[test]
    fn digest_card_lists_facts() {
        let card = digest_card(&Digest {
            title: "Daily summary".into(),
            summary: "2 new alerts".into(),
            colour: "0078D7",
            facts: vec![("Relevant".into(), "1".into())],
        });
        assert_eq!(card["sections"][0]["facts"][0]["value"], "1");
    }
}
