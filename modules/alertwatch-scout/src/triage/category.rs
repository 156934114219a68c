use std::sync::LazyLock;

use alertwatch_common::{AlertCategory, Severity};
use regex::Regex;

static RE_RECALL_CLASS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bclass\s*([1-4])\b").unwrap());
static RE_NATPSA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)national\s+patient\s+safety\s+alert|\bnatpsa\b").unwrap()
});
static RE_SSP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)serious\s+shortage\s+protocol|\bssp\b").unwrap());
static RE_RECALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)medicines?\s+(recall|defect)|\brecall\b|\bdefective medicines?\b").unwrap()
});
static RE_DEVICE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)field\s+safety\s+notice|\bfsn\b|device\s+safety\s+information|\bdsi\b|medical\s+device|device[-_\s]safety",
    )
    .unwrap()
});
static RE_ROUNDUP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)safety\s+roundup").unwrap());
static RE_DSU: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)drug\s+safety\s+update|drug_safety_update|\bdsu\b").unwrap());
static RE_SUPPLY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bsupply\b|\bshortages?\b|\bmsn\b|\bsda\b|supply\s+disruption").unwrap()
});

/// Text fields consulted for category and class detection.
#[derive(Debug, Clone, Copy)]
pub struct CategorySignals<'a> {
    pub title: &'a str,
    pub document_type: &'a str,
    pub message_type: Option<&'a str>,
    pub alert_type: Option<&'a str>,
}

impl CategorySignals<'_> {
    fn any(&self, re: &Regex) -> bool {
        re.is_match(self.title)
            || self.message_type.is_some_and(|m| re.is_match(m))
            || self.alert_type.is_some_and(|a| re.is_match(a))
    }
}

/// Resolve the message category. Checks run most-specific first: a shortage
/// protocol mentions "shortage", and a NatPSA may concern a recall.
pub fn detect_category(signals: &CategorySignals<'_>) -> AlertCategory {
    if signals.any(&RE_NATPSA) {
        return AlertCategory::NationalPatientSafetyAlert;
    }
    if signals.any(&RE_SSP) {
        return AlertCategory::SeriousShortageProtocol;
    }
    if recall_class(signals).is_some() || signals.any(&RE_RECALL) {
        return AlertCategory::MedicinesRecall;
    }
    if signals.any(&RE_DEVICE) {
        return AlertCategory::MedicalDeviceAlert;
    }
    if signals.any(&RE_ROUNDUP) {
        return AlertCategory::SafetyRoundup;
    }
    if signals.document_type == "drug_safety_update" || signals.any(&RE_DSU) {
        return AlertCategory::DrugSafetyUpdate;
    }
    if signals.any(&RE_SUPPLY) {
        return AlertCategory::MedicineSupplyAlert;
    }
    AlertCategory::Unclassified
}

/// Recall class (1 most serious, 4 least) if one is stated anywhere.
pub fn recall_class(signals: &CategorySignals<'_>) -> Option<u8> {
    [Some(signals.title), signals.alert_type, signals.message_type]
        .into_iter()
        .flatten()
        .find_map(|text| {
            RE_RECALL_CLASS
                .captures(text)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse().ok())
        })
}

/// Fixed severity lookup by category and, for recalls, class.
pub fn severity_for(category: AlertCategory, recall_class: Option<u8>) -> Severity {
    match (category, recall_class) {
        (AlertCategory::NationalPatientSafetyAlert, _) => Severity::Critical,
        (_, Some(1)) => Severity::Critical,
        (_, Some(2)) => Severity::High,
        (_, Some(3)) => Severity::Medium,
        (_, Some(4)) => Severity::Low,
        (AlertCategory::MedicinesRecall, _) => Severity::High,
        (AlertCategory::SeriousShortageProtocol, _) => Severity::High,
        (AlertCategory::MedicalDeviceAlert, _)
        | (AlertCategory::DrugSafetyUpdate, _)
        | (AlertCategory::SafetyRoundup, _)
        | (AlertCategory::MedicineSupplyAlert, _) => Severity::Medium,
        (AlertCategory::Unclassified, _) => Severity::Unspecified,
    }
}
