use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;

use crate::types::AlertCategory;

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

/// Secrets and deployment values, read from the environment. Everything
/// tunable lives in [`FileConfig`].
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    /// Incoming-webhook URL for alert cards. Absent means notifications are
    /// logged and dropped.
    pub teams_webhook_url: Option<String>,
    /// Separate sink for digests and error cards.
    pub teams_digest_webhook_url: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            teams_webhook_url: non_empty_env("TEAMS_WEBHOOK_URL"),
            teams_digest_webhook_url: non_empty_env("TEAMS_WEBHOOK_URL_DIGEST"),
        };

        config.log_redacted();
        Ok(config)
    }

    /// Log which secrets are present without printing them.
    pub fn log_redacted(&self) {
        tracing::info!(
            database_url = %redact_url(&self.database_url),
            teams_webhook = self.teams_webhook_url.is_some(),
            teams_digest_webhook = self.teams_digest_webhook_url.is_some(),
            "Loaded environment config"
        );
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn redact_url(url: &str) -> String {
    match url.split_once('@') {
        Some((_, host)) => format!("***@{host}"),
        None => "***".to_string(),
    }
}

// ---------------------------------------------------------------------------
// TOML file
// ---------------------------------------------------------------------------

/// TOML-backed configuration. Every section defaults, so an empty file is valid.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub source: SourceConfig,
    pub triage: TriageConfig,
    pub schedule: ScheduleConfig,
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceConfig {
    pub search_url: String,
    pub content_url: String,
    pub organisation: String,
    /// Document types polled incrementally.
    pub document_types: Vec<String>,
    /// Document types swept by a backfill.
    pub backfill_document_types: Vec<String>,
    pub page_size: u32,
    pub request_timeout_secs: u64,
    pub max_attempts: u32,
    pub retry_base_secs: u64,
    pub enrichment_concurrency: usize,
    /// How far behind the watermark each poll re-reads.
    pub lookback_days: i64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            search_url: "https://www.gov.uk/api/search.json".to_string(),
            content_url: "https://www.gov.uk/api/content".to_string(),
            organisation: "medicines-and-healthcare-products-regulatory-agency".to_string(),
            document_types: vec![
                "medical_safety_alert".to_string(),
                "drug_safety_update".to_string(),
            ],
            backfill_document_types: vec![
                "medical_safety_alert".to_string(),
                "drug_safety_update".to_string(),
                "press_release".to_string(),
                "guidance".to_string(),
                "notice".to_string(),
            ],
            page_size: 100,
            request_timeout_secs: 30,
            max_attempts: 3,
            retry_base_secs: 4,
            enrichment_concurrency: 5,
            lookback_days: 7,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TriageConfig {
    /// Specialty tags that make an alert relevant.
    pub target_audience: Vec<String>,
    /// Categories escalated whenever the audience also matches.
    pub always_escalate: Vec<AlertCategory>,
    /// Categories carrying their own deadline; these get P2 at minimum.
    pub time_bound: Vec<AlertCategory>,
    pub allow_list: Vec<String>,
    pub deny_list: Vec<String>,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            target_audience: vec![
                "General practice".to_string(),
                "Dispensing GP practices".to_string(),
            ],
            always_escalate: vec![
                AlertCategory::NationalPatientSafetyAlert,
                AlertCategory::MedicinesRecall,
            ],
            time_bound: vec![AlertCategory::SeriousShortageProtocol],
            allow_list: Vec::new(),
            deny_list: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScheduleConfig {
    pub poll_interval_hours: u64,
    pub overdue_check_minutes: u64,
    /// UTC hour at which the daily summary goes out.
    pub daily_summary_hour: u32,
    pub backfill_years: i64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            poll_interval_hours: 4,
            overdue_check_minutes: 60,
            daily_summary_hour: 9,
            backfill_years: 8,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NotifyConfig {
    pub max_attempts: u32,
    pub retry_base_secs: u64,
    pub concurrency: usize,
    pub dashboard_url: String,
    /// Reviewer rota, each entry taking over from its `from` date.
    pub approvers: Vec<ApproverConfig>,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_base_secs: 2,
            concurrency: 4,
            dashboard_url: "http://localhost:3000".to_string(),
            approvers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ApproverConfig {
    pub name: String,
    pub from: NaiveDate,
}

impl NotifyConfig {
    /// Reviewer on duty at `now`: the latest rota entry whose start date has passed.
    pub fn approver_at(&self, now: DateTime<Utc>) -> Option<&str> {
        let today = now.date_naive();
        self.approvers
            .iter()
            .filter(|a| a.from <= today)
            .max_by_key(|a| a.from)
            .map(|a| a.name.as_str())
    }
}

/// Load and parse a TOML config file.
pub fn load_config(path: &Path) -> Result<FileConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: FileConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    Ok(config)
}
