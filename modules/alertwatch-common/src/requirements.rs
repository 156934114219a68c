//! Which action-tracking fields an alert must have answered before it can
//! complete.
//!
//! The checklist branches on earlier answers, so applicability is expressed as
//! a static table of `(field, conditions)` rows evaluated against the current
//! field values on every call. Nothing here is cached.

use crate::workflow::{Field, FieldValue, WorkflowFields};

/// A condition on another field's current value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    Always,
    /// The field holds an explicit `true`.
    IfTrue(Field),
    /// The field holds an explicit `false`.
    IfFalse(Field),
    /// The field holds a count strictly greater than `n`.
    IfGreaterThan(Field, i64),
}

impl Requirement {
    pub fn holds(&self, fields: &WorkflowFields) -> bool {
        match *self {
            Requirement::Always => true,
            Requirement::IfTrue(f) => fields.get(f) == FieldValue::Bool(true),
            Requirement::IfFalse(f) => fields.get(f) == FieldValue::Bool(false),
            Requirement::IfGreaterThan(f, n) => {
                matches!(fields.get(f), FieldValue::Count(c) if c > n)
            }
        }
    }
}

/// A field that is required when every one of its conditions holds.
#[derive(Debug, Clone, Copy)]
pub struct RequiredField {
    pub field: Field,
    pub when: &'static [Requirement],
}

const AFFECTED: Requirement = Requirement::IfGreaterThan(Field::AffectedCount, 0);

pub static REQUIREMENTS: &[RequiredField] = &[
    RequiredField { field: Field::FirstReviewedAt, when: &[Requirement::Always] },
    // Record-system search
    RequiredField { field: Field::RecordSearchCompleted, when: &[Requirement::Always] },
    RequiredField {
        field: Field::RecordSearchDate,
        when: &[Requirement::IfTrue(Field::RecordSearchCompleted)],
    },
    RequiredField {
        field: Field::AffectedCount,
        when: &[Requirement::IfTrue(Field::RecordSearchCompleted)],
    },
    RequiredField {
        field: Field::RecordSearchReason,
        when: &[Requirement::IfFalse(Field::RecordSearchCompleted)],
    },
    // Emergency supply
    RequiredField { field: Field::EmergencySupplyAffected, when: &[Requirement::Always] },
    RequiredField {
        field: Field::EmergencySupplyDetails,
        when: &[Requirement::IfTrue(Field::EmergencySupplyAffected)],
    },
    // Team notification
    RequiredField { field: Field::TeamNotified, when: &[Requirement::Always] },
    RequiredField {
        field: Field::TeamNotifiedDate,
        when: &[Requirement::IfTrue(Field::TeamNotified)],
    },
    RequiredField {
        field: Field::TeamNotificationMethod,
        when: &[Requirement::IfTrue(Field::TeamNotified)],
    },
    // Patient follow-up, only when the search found someone
    RequiredField { field: Field::ContactStatus, when: &[AFFECTED] },
    RequiredField { field: Field::MedicationStopped, when: &[AFFECTED] },
    RequiredField {
        field: Field::MedicationStoppedDate,
        when: &[AFFECTED, Requirement::IfTrue(Field::MedicationStopped)],
    },
    RequiredField {
        field: Field::MedicationAlternativeProvided,
        when: &[AFFECTED, Requirement::IfTrue(Field::MedicationStopped)],
    },
    RequiredField {
        field: Field::MedicationNotStoppedReason,
        when: &[AFFECTED, Requirement::IfFalse(Field::MedicationStopped)],
    },
    RequiredField { field: Field::HarmAssessed, when: &[AFFECTED] },
    RequiredField {
        field: Field::HarmOccurred,
        when: &[AFFECTED, Requirement::IfTrue(Field::HarmAssessed)],
    },
    RequiredField {
        field: Field::HarmSeverity,
        when: &[
            AFFECTED,
            Requirement::IfTrue(Field::HarmAssessed),
            Requirement::IfTrue(Field::HarmOccurred),
        ],
    },
    RequiredField {
        field: Field::HarmDetails,
        when: &[
            AFFECTED,
            Requirement::IfTrue(Field::HarmAssessed),
            Requirement::IfTrue(Field::HarmOccurred),
        ],
    },
    RequiredField {
        field: Field::HarmAssessmentPlannedDate,
        when: &[AFFECTED, Requirement::IfFalse(Field::HarmAssessed)],
    },
];

/// Fields currently applicable, in checklist order.
pub fn required_fields(fields: &WorkflowFields) -> Vec<Field> {
    REQUIREMENTS
        .iter()
        .filter(|r| r.when.iter().all(|c| c.holds(fields)))
        .map(|r| r.field)
        .collect()
}

/// Applicable fields that are not yet answered.
pub fn missing_fields(fields: &WorkflowFields) -> Vec<Field> {
    required_fields(fields)
        .into_iter()
        .filter(|f| !fields.is_answered(*f))
        .collect()
}
