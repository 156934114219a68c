//! Triage classifier.
//!
//! `classify` is a pure function of the rule set and the candidate: the same
//! input always yields the same verdict and reason, so a reviewer can see
//! exactly why an alert was closed.

pub mod category;
pub mod product;

use std::collections::HashSet;

use alertwatch_common::config::TriageConfig;
use alertwatch_common::{
    tag_key, AlertCategory, CandidateRecord, Classification, Priority, Relevance,
};

use category::{detect_category, recall_class, severity_for, CategorySignals};

pub const REASON_NO_AUDIENCE_TAG: &str = "no matching audience tag";

/// One relevance predicate, evaluated in list order. The first that fires
/// decides the verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    DenyListed,
    AllowListed,
    NoTags,
    EscalatedAudience,
    AudienceTag,
}

struct Verdict {
    relevance: Relevance,
    reason: String,
    needs_manual_review: bool,
}

/// Classification configuration, resolved once and handed to `classify`.
#[derive(Debug, Clone)]
pub struct RuleSet {
    audience: HashSet<String>,
    always_escalate: HashSet<AlertCategory>,
    time_bound: HashSet<AlertCategory>,
    allow: HashSet<String>,
    deny: HashSet<String>,
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn from_config(config: &TriageConfig) -> Self {
        Self {
            audience: config.target_audience.iter().map(|t| tag_key(t)).collect(),
            always_escalate: config.always_escalate.iter().copied().collect(),
            time_bound: config.time_bound.iter().copied().collect(),
            allow: config.allow_list.iter().map(|s| s.trim().to_string()).collect(),
            deny: config.deny_list.iter().map(|s| s.trim().to_string()).collect(),
            rules: vec![
                Rule::DenyListed,
                Rule::AllowListed,
                Rule::NoTags,
                Rule::EscalatedAudience,
                Rule::AudienceTag,
            ],
        }
    }

    fn matching_tag<'a>(&self, candidate: &'a CandidateRecord) -> Option<&'a str> {
        candidate
            .tags
            .iter()
            .find(|t| self.audience.contains(&tag_key(t)))
            .map(String::as_str)
    }

    fn evaluate(
        &self,
        rule: Rule,
        candidate: &CandidateRecord,
        category: AlertCategory,
    ) -> Option<Verdict> {
        let verdict = |relevance, reason: String, needs_manual_review| Verdict {
            relevance,
            reason,
            needs_manual_review,
        };
        match rule {
            Rule::DenyListed => self.deny.contains(&candidate.external_id).then(|| {
                verdict(Relevance::NotRelevant, "identifier is deny-listed".into(), false)
            }),
            Rule::AllowListed => self.allow.contains(&candidate.external_id).then(|| {
                verdict(Relevance::Relevant, "identifier is allow-listed".into(), false)
            }),
            Rule::NoTags => candidate
                .tags
                .is_empty()
                .then(|| verdict(Relevance::NotRelevant, REASON_NO_AUDIENCE_TAG.into(), true)),
            Rule::EscalatedAudience => {
                if !self.always_escalate.contains(&category) {
                    return None;
                }
                self.matching_tag(candidate).map(|tag| {
                    verdict(
                        Relevance::Relevant,
                        format!("{category} for audience tag '{tag}'"),
                        false,
                    )
                })
            }
            Rule::AudienceTag => self.matching_tag(candidate).map(|tag| {
                verdict(Relevance::Relevant, format!("audience tag '{tag}'"), false)
            }),
        }
    }
}

/// Decide relevance, severity and priority for one candidate.
pub fn classify(rules: &RuleSet, candidate: &CandidateRecord) -> Classification {
    let signals = CategorySignals {
        title: &candidate.title,
        document_type: &candidate.document_type,
        message_type: candidate.message_type.as_deref(),
        alert_type: candidate.alert_type.as_deref(),
    };
    let category = detect_category(&signals);
    let severity = severity_for(category, recall_class(&signals));

    let mut priority = Priority::from(severity);
    if rules.time_bound.contains(&category) {
        priority = priority.max(Priority::P2Within48h);
    }

    let verdict = rules
        .rules
        .iter()
        .find_map(|rule| rules.evaluate(*rule, candidate, category))
        .unwrap_or(Verdict {
            relevance: Relevance::NotRelevant,
            reason: REASON_NO_AUDIENCE_TAG.into(),
            needs_manual_review: false,
        });

    Classification {
        relevance: verdict.relevance,
        reason: verdict.reason,
        severity,
        priority,
        category,
        needs_manual_review: verdict.needs_manual_review,
    }
}
