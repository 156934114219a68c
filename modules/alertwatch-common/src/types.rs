use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::workflow::WorkflowState;

// --- Candidate records ---

/// How far a candidate got through content-API enrichment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentStatus {
    /// The search result already carried structured tags.
    NotNeeded,
    Enriched,
    /// The content lookup failed; only search-level fields are present.
    Partial,
}

impl EnrichmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotNeeded => "not_needed",
            Self::Enriched => "enriched",
            Self::Partial => "partial",
        }
    }

    pub fn from_str_loose(s: &str) -> Self {
        match s {
            "enriched" => Self::Enriched,
            "partial" => Self::Partial,
            _ => Self::NotNeeded,
        }
    }
}

/// A normalized publication fetched from the discovery source. Never mutated
/// after the source hands it over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub external_id: String,
    pub url: String,
    pub title: String,
    pub description: Option<String>,
    pub document_type: String,
    pub message_type: Option<String>,
    pub alert_type: Option<String>,
    /// Specialty labels, deduplicated and sorted.
    pub tags: Vec<String>,
    pub published_at: DateTime<Utc>,
    pub issued_at: Option<DateTime<Utc>>,
    pub body: Option<String>,
    pub enrichment: EnrichmentStatus,
}

/// Sort and deduplicate a tag list. Order carries no meaning, so two lists
/// with the same members compare equal after normalization.
pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = tags
        .into_iter()
        .map(|t| t.as_ref().trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}

/// Comparison key for a specialty label. GOV.UK mixes slugs
/// (`general-practice`) with display labels (`General practice`).
pub fn tag_key(tag: &str) -> String {
    tag.trim()
        .to_lowercase()
        .replace(['-', '_'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

// --- Classification enums ---

/// Ordered so that `Critical` compares greatest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Unspecified,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unspecified => "Unspecified",
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
            Self::Critical => "Critical",
        }
    }

    pub fn from_str_loose(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "critical" => Self::Critical,
            "high" => Self::High,
            "medium" => Self::Medium,
            "low" => Self::Low,
            _ => Self::Unspecified,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response urgency. Ordered so that `P1Immediate` compares greatest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    P4Routine,
    P3WithinWeek,
    P2Within48h,
    P1Immediate,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::P1Immediate => "P1-Immediate",
            Self::P2Within48h => "P2-Within-48h",
            Self::P3WithinWeek => "P3-Within-1-week",
            Self::P4Routine => "P4-Routine",
        }
    }

    pub fn from_str_loose(s: &str) -> Self {
        match s.get(..2) {
            Some("P1") => Self::P1Immediate,
            Some("P2") => Self::P2Within48h,
            Some("P3") => Self::P3WithinWeek,
            _ => Self::P4Routine,
        }
    }

    /// How long an open alert may sit before it counts as overdue.
    pub fn response_window(&self) -> Option<chrono::Duration> {
        match self {
            Self::P1Immediate => Some(chrono::Duration::hours(4)),
            Self::P2Within48h => Some(chrono::Duration::hours(48)),
            Self::P3WithinWeek => Some(chrono::Duration::days(7)),
            Self::P4Routine => None,
        }
    }

    /// Card colour used by the webhook sink.
    pub fn colour(&self) -> &'static str {
        match self {
            Self::P1Immediate => "FF0000",
            Self::P2Within48h => "FF8C00",
            Self::P3WithinWeek => "FFD700",
            Self::P4Routine => "32CD32",
        }
    }
}

impl From<Severity> for Priority {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Critical => Self::P1Immediate,
            Severity::High => Self::P2Within48h,
            Severity::Medium => Self::P3WithinWeek,
            Severity::Low | Severity::Unspecified => Self::P4Routine,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Relevance {
    Relevant,
    NotRelevant,
}

impl Relevance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Relevant => "Relevant",
            Self::NotRelevant => "Not-Relevant",
        }
    }

    pub fn from_str_loose(s: &str) -> Self {
        match s {
            "Relevant" | "relevant" => Self::Relevant,
            _ => Self::NotRelevant,
        }
    }
}

impl fmt::Display for Relevance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message category of a publication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertCategory {
    #[serde(rename = "National Patient Safety Alert")]
    NationalPatientSafetyAlert,
    #[serde(rename = "Medicines Recall")]
    MedicinesRecall,
    #[serde(rename = "Medical Device Alert")]
    MedicalDeviceAlert,
    #[serde(rename = "MHRA Safety Roundup")]
    SafetyRoundup,
    #[serde(rename = "Drug Safety Update")]
    DrugSafetyUpdate,
    #[serde(rename = "Medicine Supply Alert")]
    MedicineSupplyAlert,
    #[serde(rename = "Serious Shortage Protocol")]
    SeriousShortageProtocol,
    #[serde(rename = "Unclassified")]
    Unclassified,
}

impl AlertCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NationalPatientSafetyAlert => "National Patient Safety Alert",
            Self::MedicinesRecall => "Medicines Recall",
            Self::MedicalDeviceAlert => "Medical Device Alert",
            Self::SafetyRoundup => "MHRA Safety Roundup",
            Self::DrugSafetyUpdate => "Drug Safety Update",
            Self::MedicineSupplyAlert => "Medicine Supply Alert",
            Self::SeriousShortageProtocol => "Serious Shortage Protocol",
            Self::Unclassified => "Unclassified",
        }
    }

    pub fn from_str_loose(s: &str) -> Self {
        match s {
            "National Patient Safety Alert" => Self::NationalPatientSafetyAlert,
            "Medicines Recall" => Self::MedicinesRecall,
            "Medical Device Alert" => Self::MedicalDeviceAlert,
            "MHRA Safety Roundup" => Self::SafetyRoundup,
            "Drug Safety Update" => Self::DrugSafetyUpdate,
            "Medicine Supply Alert" => Self::MedicineSupplyAlert,
            "Serious Shortage Protocol" => Self::SeriousShortageProtocol,
            _ => Self::Unclassified,
        }
    }
}

impl fmt::Display for AlertCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Workflow status. `Completed` and `Closed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertStatus {
    New,
    UnderReview,
    ActionRequired,
    InProgress,
    Completed,
    Closed,
}

impl AlertStatus {
    pub const OPEN: [AlertStatus; 4] = [
        AlertStatus::New,
        AlertStatus::UnderReview,
        AlertStatus::ActionRequired,
        AlertStatus::InProgress,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "New",
            Self::UnderReview => "Under-Review",
            Self::ActionRequired => "Action-Required",
            Self::InProgress => "In-Progress",
            Self::Completed => "Completed",
            Self::Closed => "Closed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "New" => Some(Self::New),
            "Under-Review" => Some(Self::UnderReview),
            "Action-Required" => Some(Self::ActionRequired),
            "In-Progress" => Some(Self::InProgress),
            "Completed" => Some(Self::Completed),
            "Closed" => Some(Self::Closed),
            _ => None,
        }
    }

    /// Position along the forward path. Both terminal states share the top rank.
    pub fn rank(&self) -> u8 {
        match self {
            Self::New => 0,
            Self::UnderReview => 1,
            Self::ActionRequired => 2,
            Self::InProgress => 3,
            Self::Completed | Self::Closed => 4,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Closed)
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Alert aggregate ---

/// Fields lifted from the publication text by pattern matching.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProductDetails {
    pub product_name: Option<String>,
    pub batch_numbers: Option<String>,
    pub expiry_dates: Option<String>,
    pub therapeutic_area: Option<String>,
    /// Suggested query for the practice record system.
    pub search_terms: Option<String>,
}

/// Everything re-ingestion is allowed to overwrite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertContent {
    pub title: String,
    pub url: String,
    pub description: Option<String>,
    pub document_type: String,
    pub message_type: Option<String>,
    pub alert_type: Option<String>,
    pub tags: Vec<String>,
    pub published_at: DateTime<Utc>,
    pub issued_at: Option<DateTime<Utc>>,
    /// Regulator reference printed in the title, e.g. `NatPSA/2025/001`.
    pub govuk_reference: Option<String>,
    pub product: ProductDetails,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub relevance: Relevance,
    pub reason: String,
    pub severity: Severity,
    pub priority: Priority,
    pub category: AlertCategory,
    /// Set when the verdict rests on missing metadata.
    pub needs_manual_review: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub external_id: String,
    /// Short human reference, `MHRA-` plus eight hex digits.
    pub reference: String,
    pub content: AlertContent,
    pub classification: Classification,
    pub enrichment: EnrichmentStatus,
    pub workflow: WorkflowState,
    pub notified: bool,
    pub notified_at: Option<DateTime<Utc>>,
    pub backfilled: bool,
    pub notes: Vec<String>,
    /// Optimistic concurrency token, bumped on every write.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Alert {
    /// Relevance as the reviewer sees it: an explicit reviewer decision wins
    /// over the classifier.
    pub fn effective_relevance(&self) -> Relevance {
        self.workflow
            .final_relevance
            .unwrap_or(self.classification.relevance)
    }

    pub fn status(&self) -> AlertStatus {
        self.workflow.status
    }

    /// Open alerts past their priority window at `now`.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        if !matches!(
            self.workflow.status,
            AlertStatus::New | AlertStatus::UnderReview | AlertStatus::ActionRequired
        ) {
            return false;
        }
        match self.classification.priority.response_window() {
            Some(window) => now - self.created_at > window,
            None => false,
        }
    }

    /// Whether this alert is waiting for its one outbound notification.
    pub fn awaiting_notification(&self) -> bool {
        !self.notified
            && !self.backfilled
            && self.workflow.status != AlertStatus::Closed
            && self.effective_relevance() == Relevance::Relevant
    }
}

/// Short, stable reference derived from the external identifier.
pub fn alert_reference(external_id: &str) -> String {
    let digest = Sha256::digest(external_id.as_bytes());
    format!("MHRA-{}", hex::encode_upper(&digest[..4]))
}

/// Which ingestion path produced a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestOrigin {
    Poll,
    Backfill,
}

impl fmt::Display for IngestOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Poll => write!(f, "poll"),
            Self::Backfill => write!(f, "backfill"),
        }
    }
}

/// One row of the append-only audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub alert_id: Uuid,
    pub actor: String,
    pub action: String,
    pub payload: serde_json::Value,
    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_orders_critical_highest() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Low > Severity::Unspecified);
    }

    #[test]
    fn priority_mapping_is_monotonic() {
        let severities = [
            Severity::Unspecified,
            Severity::Low,
            Severity::Medium,
            Severity::High,
            Severity::Critical,
        ];
        for pair in severities.windows(2) {
            assert!(Priority::from(pair[0]) <= Priority::from(pair[1]));
        }
        assert_eq!(Priority::from(Severity::Critical), Priority::P1Immediate);
        assert_eq!(Priority::from(Severity::Unspecified), Priority::P4Routine);
    }

    #[test]
    fn status_strings_round_trip_through_parse() {
        for status in [
            AlertStatus::New,
            AlertStatus::UnderReview,
            AlertStatus::ActionRequired,
            AlertStatus::InProgress,
            AlertStatus::Completed,
            AlertStatus::Closed,
        ] {
            assert_eq!(AlertStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(AlertStatus::parse("Pending"), None);
    }

    #[test]
    fn tags_are_sorted_and_unique() {
        let tags = normalize_tags(["Pharmacy", " General practice", "Pharmacy", ""]);
        assert_eq!(tags, vec!["General practice", "Pharmacy"]);
    }

    #[test]
    fn tag_key_matches_slugs_and_labels() {
        assert_eq!(tag_key("general-practice"), tag_key("General practice"));
        assert_eq!(tag_key("Dispensing GP practices"), "dispensing gp practices");
    }

    #[test]
    fn reference_is_stable_and_short() {
        let a = alert_reference("5f1c0e2a-0000-4000-8000-000000000001");
        let b = alert_reference("5f1c0e2a-0000-4000-8000-000000000001");
        assert_eq!(a, b);
        assert!(a.starts_with("MHRA-"));
        assert_eq!(a.len(), 13);
        assert!(a[5..].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
        assert_ne!(a, alert_reference("another-id"));
    }

    #[test]
    fn priority_prefix_parse() {
        assert_eq!(Priority::from_str_loose("P2-Within-48h"), Priority::P2Within48h);
        assert_eq!(Priority::from_str_loose("P2-Within 48h"), Priority::P2Within48h);
        assert_eq!(Priority::from_str_loose("???"), Priority::P4Routine);
    }
}
