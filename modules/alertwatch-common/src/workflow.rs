//! Action-tracking fields recorded by reviewers.
//!
//! Fields are addressed by [`Field`] so the requirement table and the review
//! surface can talk about them without matching on struct members. Values
//! cross that boundary as [`FieldValue`].

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TransitionError;
use crate::types::{AlertStatus, Relevance};

// --- Choice enums ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationMethod {
    Email,
    Meeting,
    Phone,
    Multiple,
}

impl NotificationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "Email",
            Self::Meeting => "Meeting",
            Self::Phone => "Phone",
            Self::Multiple => "Multiple",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "email" => Some(Self::Email),
            "meeting" => Some(Self::Meeting),
            "phone" => Some(Self::Phone),
            "multiple" => Some(Self::Multiple),
            _ => None,
        }
    }
}

/// Whether affected patients have been contacted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContactStatus {
    Yes,
    No,
    InProgress,
}

impl ContactStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Yes => "Yes",
            Self::No => "No",
            Self::InProgress => "In Progress",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "yes" => Some(Self::Yes),
            "no" => Some(Self::No),
            "in progress" | "in-progress" | "in_progress" => Some(Self::InProgress),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContactMethod {
    Sms,
    Letter,
    Phone,
    FaceToFace,
}

impl ContactMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sms => "SMS",
            Self::Letter => "Letter",
            Self::Phone => "Phone",
            Self::FaceToFace => "F2F",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "sms" => Some(Self::Sms),
            "letter" => Some(Self::Letter),
            "phone" => Some(Self::Phone),
            "f2f" | "face to face" => Some(Self::FaceToFace),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HarmSeverity {
    Minor,
    Moderate,
    Severe,
}

impl HarmSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minor => "Minor",
            Self::Moderate => "Moderate",
            Self::Severe => "Severe",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "minor" => Some(Self::Minor),
            "moderate" => Some(Self::Moderate),
            "severe" => Some(Self::Severe),
            _ => None,
        }
    }
}

// --- Field addressing ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    FirstReviewedAt,
    ActionRequired,
    RecordSearchCompleted,
    RecordSearchDate,
    RecordSearchReason,
    AffectedCount,
    EmergencySupplyAffected,
    EmergencySupplyDetails,
    TeamNotified,
    TeamNotifiedDate,
    TeamNotificationMethod,
    ContactStatus,
    ContactMethod,
    MedicationStopped,
    MedicationStoppedDate,
    MedicationAlternativeProvided,
    MedicationNotStoppedReason,
    HarmAssessed,
    HarmAssessmentPlannedDate,
    HarmOccurred,
    HarmSeverity,
    HarmDetails,
}

/// Shape of the value a field accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    YesNo,
    Date,
    Timestamp,
    Count,
    Text,
    Choice,
}

impl Field {
    pub const ALL: [Field; 22] = [
        Field::FirstReviewedAt,
        Field::ActionRequired,
        Field::RecordSearchCompleted,
        Field::RecordSearchDate,
        Field::RecordSearchReason,
        Field::AffectedCount,
        Field::EmergencySupplyAffected,
        Field::EmergencySupplyDetails,
        Field::TeamNotified,
        Field::TeamNotifiedDate,
        Field::TeamNotificationMethod,
        Field::ContactStatus,
        Field::ContactMethod,
        Field::MedicationStopped,
        Field::MedicationStoppedDate,
        Field::MedicationAlternativeProvided,
        Field::MedicationNotStoppedReason,
        Field::HarmAssessed,
        Field::HarmAssessmentPlannedDate,
        Field::HarmOccurred,
        Field::HarmSeverity,
        Field::HarmDetails,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Field::FirstReviewedAt => "first_reviewed_at",
            Field::ActionRequired => "action_required",
            Field::RecordSearchCompleted => "record_search_completed",
            Field::RecordSearchDate => "record_search_date",
            Field::RecordSearchReason => "record_search_reason",
            Field::AffectedCount => "affected_count",
            Field::EmergencySupplyAffected => "emergency_supply_affected",
            Field::EmergencySupplyDetails => "emergency_supply_details",
            Field::TeamNotified => "team_notified",
            Field::TeamNotifiedDate => "team_notified_date",
            Field::TeamNotificationMethod => "team_notification_method",
            Field::ContactStatus => "contact_status",
            Field::ContactMethod => "contact_method",
            Field::MedicationStopped => "medication_stopped",
            Field::MedicationStoppedDate => "medication_stopped_date",
            Field::MedicationAlternativeProvided => "medication_alternative_provided",
            Field::MedicationNotStoppedReason => "medication_not_stopped_reason",
            Field::HarmAssessed => "harm_assessed",
            Field::HarmAssessmentPlannedDate => "harm_assessment_planned_date",
            Field::HarmOccurred => "harm_occurred",
            Field::HarmSeverity => "harm_severity",
            Field::HarmDetails => "harm_details",
        }
    }

    pub fn from_name(name: &str) -> Option<Field> {
        Field::ALL.into_iter().find(|f| f.name() == name)
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            Field::FirstReviewedAt => FieldKind::Timestamp,
            Field::RecordSearchCompleted
            | Field::EmergencySupplyAffected
            | Field::TeamNotified
            | Field::MedicationStopped
            | Field::MedicationAlternativeProvided
            | Field::HarmAssessed
            | Field::HarmOccurred => FieldKind::YesNo,
            Field::RecordSearchDate
            | Field::TeamNotifiedDate
            | Field::MedicationStoppedDate
            | Field::HarmAssessmentPlannedDate => FieldKind::Date,
            Field::AffectedCount => FieldKind::Count,
            Field::TeamNotificationMethod
            | Field::ContactStatus
            | Field::ContactMethod
            | Field::HarmSeverity => FieldKind::Choice,
            Field::ActionRequired
            | Field::RecordSearchReason
            | Field::EmergencySupplyDetails
            | Field::MedicationNotStoppedReason
            | Field::HarmDetails => FieldKind::Text,
        }
    }

    /// Fields that record remediation work, as opposed to triage notes.
    pub fn is_remediation(&self) -> bool {
        !matches!(self, Field::FirstReviewedAt | Field::ActionRequired)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A field value in transit. `Empty` clears the field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Empty,
    Bool(bool),
    Count(i64),
    Text(String),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
    Choice(String),
}

impl FieldValue {
    /// An explicit `false` is an answer; absence and blank text are not.
    pub fn is_answered(&self) -> bool {
        match self {
            FieldValue::Empty => false,
            FieldValue::Text(s) | FieldValue::Choice(s) => !s.trim().is_empty(),
            _ => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldAssignment {
    pub field: Field,
    pub value: FieldValue,
}

impl FieldAssignment {
    pub fn new(field: Field, value: FieldValue) -> Self {
        Self { field, value }
    }
}

// --- Field storage ---

/// Sparse action-tracking record. `None` means "not yet answered".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowFields {
    pub first_reviewed_at: Option<DateTime<Utc>>,
    pub action_required: Option<String>,
    pub record_search_completed: Option<bool>,
    pub record_search_date: Option<NaiveDate>,
    pub record_search_reason: Option<String>,
    pub affected_count: Option<i64>,
    pub emergency_supply_affected: Option<bool>,
    pub emergency_supply_details: Option<String>,
    pub team_notified: Option<bool>,
    pub team_notified_date: Option<NaiveDate>,
    pub team_notification_method: Option<NotificationMethod>,
    pub contact_status: Option<ContactStatus>,
    pub contact_method: Option<ContactMethod>,
    pub medication_stopped: Option<bool>,
    pub medication_stopped_date: Option<NaiveDate>,
    pub medication_alternative_provided: Option<bool>,
    pub medication_not_stopped_reason: Option<String>,
    pub harm_assessed: Option<bool>,
    pub harm_assessment_planned_date: Option<NaiveDate>,
    pub harm_occurred: Option<bool>,
    pub harm_severity: Option<HarmSeverity>,
    pub harm_details: Option<String>,
}

fn opt<T>(v: Option<T>, f: impl FnOnce(T) -> FieldValue) -> FieldValue {
    v.map(f).unwrap_or(FieldValue::Empty)
}

impl WorkflowFields {
    pub fn get(&self, field: Field) -> FieldValue {
        match field {
            Field::FirstReviewedAt => opt(self.first_reviewed_at, FieldValue::Timestamp),
            Field::ActionRequired => opt(self.action_required.clone(), FieldValue::Text),
            Field::RecordSearchCompleted => opt(self.record_search_completed, FieldValue::Bool),
            Field::RecordSearchDate => opt(self.record_search_date, FieldValue::Date),
            Field::RecordSearchReason => opt(self.record_search_reason.clone(), FieldValue::Text),
            Field::AffectedCount => opt(self.affected_count, FieldValue::Count),
            Field::EmergencySupplyAffected => opt(self.emergency_supply_affected, FieldValue::Bool),
            Field::EmergencySupplyDetails => {
                opt(self.emergency_supply_details.clone(), FieldValue::Text)
            }
            Field::TeamNotified => opt(self.team_notified, FieldValue::Bool),
            Field::TeamNotifiedDate => opt(self.team_notified_date, FieldValue::Date),
            Field::TeamNotificationMethod => opt(self.team_notification_method, |m| {
                FieldValue::Choice(m.as_str().to_string())
            }),
            Field::ContactStatus => opt(self.contact_status, |c| {
                FieldValue::Choice(c.as_str().to_string())
            }),
            Field::ContactMethod => opt(self.contact_method, |c| {
                FieldValue::Choice(c.as_str().to_string())
            }),
            Field::MedicationStopped => opt(self.medication_stopped, FieldValue::Bool),
            Field::MedicationStoppedDate => opt(self.medication_stopped_date, FieldValue::Date),
            Field::MedicationAlternativeProvided => {
                opt(self.medication_alternative_provided, FieldValue::Bool)
            }
            Field::MedicationNotStoppedReason => {
                opt(self.medication_not_stopped_reason.clone(), FieldValue::Text)
            }
            Field::HarmAssessed => opt(self.harm_assessed, FieldValue::Bool),
            Field::HarmAssessmentPlannedDate => {
                opt(self.harm_assessment_planned_date, FieldValue::Date)
            }
            Field::HarmOccurred => opt(self.harm_occurred, FieldValue::Bool),
            Field::HarmSeverity => opt(self.harm_severity, |h| {
                FieldValue::Choice(h.as_str().to_string())
            }),
            Field::HarmDetails => opt(self.harm_details.clone(), FieldValue::Text),
        }
    }

    pub fn is_answered(&self, field: Field) -> bool {
        self.get(field).is_answered()
    }

    /// Write one field, checking the value's shape against the field.
    pub fn set(&mut self, field: Field, value: FieldValue) -> Result<(), TransitionError> {
        let invalid = |reason: &str| TransitionError::InvalidFieldValue {
            field,
            reason: reason.to_string(),
        };

        if value == FieldValue::Empty {
            self.clear(field);
            return Ok(());
        }

        match (field.kind(), value) {
            (FieldKind::Timestamp, FieldValue::Timestamp(ts)) => self.first_reviewed_at = Some(ts),
            (FieldKind::YesNo, FieldValue::Bool(b)) => {
                let slot = match field {
                    Field::RecordSearchCompleted => &mut self.record_search_completed,
                    Field::EmergencySupplyAffected => &mut self.emergency_supply_affected,
                    Field::TeamNotified => &mut self.team_notified,
                    Field::MedicationStopped => &mut self.medication_stopped,
                    Field::MedicationAlternativeProvided => {
                        &mut self.medication_alternative_provided
                    }
                    Field::HarmAssessed => &mut self.harm_assessed,
                    _ => &mut self.harm_occurred,
                };
                *slot = Some(b);
            }
            (FieldKind::Date, FieldValue::Date(d)) => {
                let slot = match field {
                    Field::RecordSearchDate => &mut self.record_search_date,
                    Field::TeamNotifiedDate => &mut self.team_notified_date,
                    Field::MedicationStoppedDate => &mut self.medication_stopped_date,
                    _ => &mut self.harm_assessment_planned_date,
                };
                *slot = Some(d);
            }
            (FieldKind::Count, FieldValue::Count(n)) => {
                if n < 0 {
                    return Err(invalid("count cannot be negative"));
                }
                self.affected_count = Some(n);
            }
            (FieldKind::Text, FieldValue::Text(s)) => {
                let slot = match field {
                    Field::ActionRequired => &mut self.action_required,
                    Field::RecordSearchReason => &mut self.record_search_reason,
                    Field::EmergencySupplyDetails => &mut self.emergency_supply_details,
                    Field::MedicationNotStoppedReason => &mut self.medication_not_stopped_reason,
                    _ => &mut self.harm_details,
                };
                let trimmed = s.trim();
                *slot = (!trimmed.is_empty()).then(|| trimmed.to_string());
            }
            (FieldKind::Choice, FieldValue::Choice(s)) => match field {
                Field::TeamNotificationMethod => {
                    self.team_notification_method =
                        Some(NotificationMethod::parse(&s).ok_or_else(|| invalid("unknown method"))?)
                }
                Field::ContactStatus => {
                    self.contact_status =
                        Some(ContactStatus::parse(&s).ok_or_else(|| invalid("unknown status"))?)
                }
                Field::ContactMethod => {
                    self.contact_method =
                        Some(ContactMethod::parse(&s).ok_or_else(|| invalid("unknown method"))?)
                }
                _ => {
                    self.harm_severity =
                        Some(HarmSeverity::parse(&s).ok_or_else(|| invalid("unknown severity"))?)
                }
            },
            (kind, _) => return Err(invalid(&format!("expected a {kind:?} value"))),
        }
        Ok(())
    }

    fn clear(&mut self, field: Field) {
        match field {
            Field::FirstReviewedAt => self.first_reviewed_at = None,
            Field::ActionRequired => self.action_required = None,
            Field::RecordSearchCompleted => self.record_search_completed = None,
            Field::RecordSearchDate => self.record_search_date = None,
            Field::RecordSearchReason => self.record_search_reason = None,
            Field::AffectedCount => self.affected_count = None,
            Field::EmergencySupplyAffected => self.emergency_supply_affected = None,
            Field::EmergencySupplyDetails => self.emergency_supply_details = None,
            Field::TeamNotified => self.team_notified = None,
            Field::TeamNotifiedDate => self.team_notified_date = None,
            Field::TeamNotificationMethod => self.team_notification_method = None,
            Field::ContactStatus => self.contact_status = None,
            Field::ContactMethod => self.contact_method = None,
            Field::MedicationStopped => self.medication_stopped = None,
            Field::MedicationStoppedDate => self.medication_stopped_date = None,
            Field::MedicationAlternativeProvided => self.medication_alternative_provided = None,
            Field::MedicationNotStoppedReason => self.medication_not_stopped_reason = None,
            Field::HarmAssessed => self.harm_assessed = None,
            Field::HarmAssessmentPlannedDate => self.harm_assessment_planned_date = None,
            Field::HarmOccurred => self.harm_occurred = None,
            Field::HarmSeverity => self.harm_severity = None,
            Field::HarmDetails => self.harm_details = None,
        }
    }
}

/// Reviewer-owned state of an alert. Re-ingestion never writes any of this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub status: AlertStatus,
    pub fields: WorkflowFields,
    /// Reviewer's relevance decision, when it differs from triage or confirms it.
    pub final_relevance: Option<Relevance>,
    pub completed_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub time_to_first_review_hours: Option<f64>,
    pub time_to_completion_hours: Option<f64>,
}

impl WorkflowState {
    pub fn new(status: AlertStatus) -> Self {
        Self {
            status,
            fields: WorkflowFields::default(),
            final_relevance: None,
            completed_at: None,
            closed_at: None,
            time_to_first_review_hours: None,
            time_to_completion_hours: None,
        }
    }
}
