use thiserror::Error;
use uuid::Uuid;

use crate::types::AlertStatus;
use crate::workflow::Field;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Failures from the alert repository, shared by the Postgres store and
/// in-memory test doubles.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another writer inserted the same external identifier first.
    #[error("Alert with external id {external_id} already exists")]
    DuplicateIdentity { external_id: String },

    /// The row changed since it was read.
    #[error("Alert {id} was modified concurrently (expected version {expected})")]
    VersionConflict { id: Uuid, expected: i64 },

    #[error("Alert not found: {0}")]
    NotFound(String),

    #[error("Corrupt stored value: {0}")]
    Decode(String),

    #[error("Database error: {0}")]
    Database(String),
}

/// A reviewer action the lifecycle refused.
#[derive(Debug, Error, PartialEq)]
pub enum TransitionError {
    #[error("Missing required fields: {}", field_list(.0))]
    MissingRequiredFields(Vec<Field>),

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: AlertStatus, to: AlertStatus },

    #[error("Alert is {0} and no longer accepts changes")]
    Terminal(AlertStatus),

    #[error("Invalid value for {field}: {reason}")]
    InvalidFieldValue { field: Field, reason: String },

    #[error("A reason is required for this action")]
    ReasonRequired,
}

impl TransitionError {
    /// Missing field names, for callers rendering a checklist.
    pub fn missing(&self) -> Vec<&'static str> {
        match self {
            TransitionError::MissingRequiredFields(fields) => {
                fields.iter().map(|f| f.name()).collect()
            }
            _ => Vec::new(),
        }
    }
}

fn field_list(fields: &[Field]) -> String {
    fields
        .iter()
        .map(|f| f.name())
        .collect::<Vec<_>>()
        .join(", ")
}
