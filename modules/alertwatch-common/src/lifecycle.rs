//! Reviewer-driven status machine.
//!
//! `apply` is pure: it takes the current workflow state and an action and
//! either returns the next state or refuses. Persistence, versioning and
//! auditing are the caller's concern.
//!
//! Forward movement is derived from the fields: once reviewed, an alert is
//! Under-Review; a recorded action makes it Action-Required; any remediation
//! answer makes it In-Progress. Status never moves backwards except through
//! `Reopen` or `Override`, and Completed is gated on the requirement table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TransitionError;
use crate::requirements::missing_fields;
use crate::types::{AlertStatus, Relevance};
use crate::workflow::{Field, FieldAssignment, FieldValue, WorkflowFields, WorkflowState};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ReviewAction {
    /// Stamp the first-review timestamp if it is not already set.
    MarkReviewed,
    Record { assignments: Vec<FieldAssignment> },
    Advance { to: AlertStatus },
    MarkNotRelevant { reason: String },
    /// Bring a Closed or Completed alert back into the open workflow.
    Reopen { reason: String },
    /// Move an alert backwards. Closed and Completed targets keep the same
    /// entry rules as `Advance`.
    Override { to: AlertStatus, reason: String },
}

impl ReviewAction {
    pub fn name(&self) -> &'static str {
        match self {
            ReviewAction::MarkReviewed => "mark_reviewed",
            ReviewAction::Record { .. } => "record",
            ReviewAction::Advance { .. } => "advance",
            ReviewAction::MarkNotRelevant { .. } => "mark_not_relevant",
            ReviewAction::Reopen { .. } => "reopen",
            ReviewAction::Override { .. } => "override",
        }
    }
}

/// Outcome of an accepted action.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: WorkflowState,
    pub from: AlertStatus,
    pub to: AlertStatus,
    /// Human-readable line for the alert's notes, for audited moves.
    pub note: Option<String>,
}

/// Status implied by which fields are populated. Never returns a terminal status.
pub fn derive_status(fields: &WorkflowFields) -> AlertStatus {
    if fields.first_reviewed_at.is_none() {
        return AlertStatus::New;
    }
    let remediation_started = Field::ALL
        .iter()
        .filter(|f| f.is_remediation())
        .any(|f| fields.is_answered(*f));
    if remediation_started {
        AlertStatus::InProgress
    } else if fields.is_answered(Field::ActionRequired) {
        AlertStatus::ActionRequired
    } else {
        AlertStatus::UnderReview
    }
}

/// Apply a reviewer action at `now` to an alert created at `created_at`.
pub fn apply(
    current: &WorkflowState,
    action: &ReviewAction,
    created_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<Transition, TransitionError> {
    let from = current.status;
    let mut state = current.clone();
    let mut note = None;

    match action {
        ReviewAction::MarkReviewed => {
            reject_terminal(from)?;
            stamp_first_review(&mut state, created_at, now);
            auto_advance(&mut state);
        }
        ReviewAction::Record { assignments } => {
            reject_terminal(from)?;
            let had_review = state.fields.first_reviewed_at.is_some();
            for FieldAssignment { field, value } in assignments {
                state.fields.set(*field, value.clone())?;
            }
            if !had_review && state.fields.first_reviewed_at.is_some() {
                state.time_to_first_review_hours =
                    state.fields.first_reviewed_at.map(|at| hours_between(created_at, at));
            }
            auto_advance(&mut state);
        }
        ReviewAction::Advance { to } => {
            reject_terminal(from)?;
            if to.rank() <= from.rank() && *to != AlertStatus::Closed {
                return Err(TransitionError::InvalidTransition { from, to: *to });
            }
            match to {
                AlertStatus::Closed => close(&mut state, from, now)?,
                AlertStatus::Completed => complete(&mut state, from, created_at, now)?,
                _ => {
                    if state.fields.first_reviewed_at.is_none() {
                        return Err(TransitionError::MissingRequiredFields(vec![
                            Field::FirstReviewedAt,
                        ]));
                    }
                    state.status = *to;
                }
            }
        }
        ReviewAction::MarkNotRelevant { reason } => {
            let reason = require_reason(reason)?;
            reject_terminal(from)?;
            stamp_first_review(&mut state, created_at, now);
            close(&mut state, from, now)?;
            state.final_relevance = Some(Relevance::NotRelevant);
            note = Some(format!("Marked not relevant: {reason}"));
        }
        ReviewAction::Reopen { reason } => {
            let reason = require_reason(reason)?;
            if !from.is_terminal() {
                return Err(TransitionError::InvalidTransition { from, to: AlertStatus::New });
            }
            state.status = derive_status(&state.fields);
            state.final_relevance = Some(Relevance::Relevant);
            state.closed_at = None;
            state.completed_at = None;
            state.time_to_completion_hours = None;
            note = Some(format!("Reopened from {from}: {reason}"));
        }
        ReviewAction::Override { to, reason } => {
            let reason = require_reason(reason)?;
            match to {
                // Terminal targets keep their usual entry rules.
                AlertStatus::Closed => close(&mut state, from, now)?,
                AlertStatus::Completed => complete(&mut state, from, created_at, now)?,
                _ => {
                    if to.rank() >= from.rank() {
                        return Err(TransitionError::InvalidTransition { from, to: *to });
                    }
                    state.status = *to;
                    state.closed_at = None;
                    state.completed_at = None;
                    state.time_to_completion_hours = None;
                }
            }
            note = Some(format!("Status overridden from {from} to {to}: {reason}"));
        }
    }

    Ok(Transition { to: state.status, state, from, note })
}

fn reject_terminal(status: AlertStatus) -> Result<(), TransitionError> {
    if status.is_terminal() {
        Err(TransitionError::Terminal(status))
    } else {
        Ok(())
    }
}

fn require_reason(reason: &str) -> Result<&str, TransitionError> {
    let trimmed = reason.trim();
    if trimmed.is_empty() {
        Err(TransitionError::ReasonRequired)
    } else {
        Ok(trimmed)
    }
}

fn auto_advance(state: &mut WorkflowState) {
    let derived = derive_status(&state.fields);
    if derived.rank() > state.status.rank() {
        state.status = derived;
    }
}

fn stamp_first_review(state: &mut WorkflowState, created_at: DateTime<Utc>, now: DateTime<Utc>) {
    if state.fields.first_reviewed_at.is_none() {
        state.fields.first_reviewed_at = Some(now);
        state.time_to_first_review_hours = Some(hours_between(created_at, now));
    }
}

fn close(
    state: &mut WorkflowState,
    from: AlertStatus,
    now: DateTime<Utc>,
) -> Result<(), TransitionError> {
    if !matches!(from, AlertStatus::New | AlertStatus::UnderReview) {
        return Err(TransitionError::InvalidTransition { from, to: AlertStatus::Closed });
    }
    state.status = AlertStatus::Closed;
    state.closed_at = Some(now);
    Ok(())
}

fn complete(
    state: &mut WorkflowState,
    from: AlertStatus,
    created_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<(), TransitionError> {
    if from != AlertStatus::InProgress {
        return Err(TransitionError::InvalidTransition { from, to: AlertStatus::Completed });
    }
    let missing = missing_fields(&state.fields);
    if !missing.is_empty() {
        return Err(TransitionError::MissingRequiredFields(missing));
    }
    stamp_completion(state, created_at, now);
    Ok(())
}

fn stamp_completion(state: &mut WorkflowState, created_at: DateTime<Utc>, now: DateTime<Utc>) {
    state.status = AlertStatus::Completed;
    state.completed_at = Some(now);
    state.time_to_completion_hours = Some(hours_between(created_at, now));
}

fn hours_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    let secs = (end - start).num_seconds().max(0) as f64;
    (secs / 36.0).round() / 100.0
}

/// Convenience for building a `Record` action.
pub fn record(assignments: impl IntoIterator<Item = (Field, FieldValue)>) -> ReviewAction {
    ReviewAction::Record {
        assignments: assignments
            .into_iter()
            .map(|(field, value)| FieldAssignment::new(field, value))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate, TimeZone};

    fn created() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 4, 8, 0, 0).unwrap()
    }

    fn at(hours: i64) -> DateTime<Utc> {
        created() + Duration::hours(hours)
    }

    fn day() -> FieldValue {
        FieldValue::Date(NaiveDate::from_ymd_opt(2025, 3, 5).unwrap())
    }

    fn run(state: &WorkflowState, action: ReviewAction) -> Result<Transition, TransitionError> {
        apply(state, &action, created(), at(2))
    }

    /// Reviewed, searched with `count` hits, supply and team answered.
    fn in_progress(count: i64) -> WorkflowState {
        let state = WorkflowState::new(AlertStatus::New);
        run(
            &state,
            record([
                (Field::FirstReviewedAt, FieldValue::Timestamp(at(1))),
                (Field::RecordSearchCompleted, FieldValue::Bool(true)),
                (Field::RecordSearchDate, day()),
                (Field::AffectedCount, FieldValue::Count(count)),
                (Field::EmergencySupplyAffected, FieldValue::Bool(false)),
                (Field::TeamNotified, FieldValue::Bool(false)),
            ]),
        )
        .unwrap()
        .state
    }

    #[test]
    fn mark_reviewed_moves_new_to_under_review_and_stamps_metric() {
        let t = run(&WorkflowState::new(AlertStatus::New), ReviewAction::MarkReviewed).unwrap();
        assert_eq!(t.from, AlertStatus::New);
        assert_eq!(t.to, AlertStatus::UnderReview);
        assert_eq!(t.state.fields.first_reviewed_at, Some(at(2)));
        assert_eq!(t.state.time_to_first_review_hours, Some(2.0));
    }

    #[test]
    fn recording_remediation_advances_to_in_progress() {
        let state = in_progress(0);
        assert_eq!(state.status, AlertStatus::InProgress);
        assert_eq!(state.time_to_first_review_hours, Some(1.0));
    }

    #[test]
    fn action_text_alone_means_action_required() {
        let reviewed = run(&WorkflowState::new(AlertStatus::New), ReviewAction::MarkReviewed)
            .unwrap()
            .state;
        let t = run(
            &reviewed,
            record([(Field::ActionRequired, FieldValue::Text("Check stock".into()))]),
        )
        .unwrap();
        assert_eq!(t.to, AlertStatus::ActionRequired);
    }

    #[test]
    fn fields_without_review_stay_new() {
        let t = run(
            &WorkflowState::new(AlertStatus::New),
            record([(Field::TeamNotified, FieldValue::Bool(true))]),
        )
        .unwrap();
        assert_eq!(t.to, AlertStatus::New);
    }

    #[test]
    fn clearing_fields_never_regresses_status() {
        let state = in_progress(0);
        let t = run(
            &state,
            record([
                (Field::RecordSearchCompleted, FieldValue::Empty),
                (Field::RecordSearchDate, FieldValue::Empty),
                (Field::AffectedCount, FieldValue::Empty),
                (Field::EmergencySupplyAffected, FieldValue::Empty),
                (Field::TeamNotified, FieldValue::Empty),
            ]),
        )
        .unwrap();
        assert_eq!(t.to, AlertStatus::InProgress);
    }

    #[test]
    fn completion_with_zero_affected_needs_only_unconditional_fields() {
        let state = in_progress(0);
        let t = run(&state, ReviewAction::Advance { to: AlertStatus::Completed }).unwrap();
        assert_eq!(t.to, AlertStatus::Completed);
        assert_eq!(t.state.completed_at, Some(at(2)));
        assert_eq!(t.state.time_to_completion_hours, Some(2.0));
    }

    #[test]
    fn completion_names_missing_stop_date() {
        let state = in_progress(3);
        let state = run(&state, record([(Field::MedicationStopped, FieldValue::Bool(true))]))
            .unwrap()
            .state;
        let err = run(&state, ReviewAction::Advance { to: AlertStatus::Completed }).unwrap_err();
        match err {
            TransitionError::MissingRequiredFields(missing) => {
                assert!(missing.contains(&Field::MedicationStoppedDate));
            }
            other => panic!("expected missing fields, got {other:?}"),
        }
    }

    #[test]
    fn rejected_completion_leaves_input_untouched() {
        let state = in_progress(3);
        let before = state.clone();
        assert!(run(&state, ReviewAction::Advance { to: AlertStatus::Completed }).is_err());
        assert_eq!(state, before);
    }

    #[test]
    fn completion_only_from_in_progress() {
        let reviewed = run(&WorkflowState::new(AlertStatus::New), ReviewAction::MarkReviewed)
            .unwrap()
            .state;
        let err = run(&reviewed, ReviewAction::Advance { to: AlertStatus::Completed }).unwrap_err();
        assert_eq!(
            err,
            TransitionError::InvalidTransition {
                from: AlertStatus::UnderReview,
                to: AlertStatus::Completed
            }
        );
    }

    #[test]
    fn backward_advance_is_rejected() {
        let state = in_progress(0);
        let err = run(&state, ReviewAction::Advance { to: AlertStatus::UnderReview }).unwrap_err();
        assert!(matches!(err, TransitionError::InvalidTransition { .. }));
    }

    #[test]
    fn leaving_new_requires_first_review() {
        let err = run(
            &WorkflowState::new(AlertStatus::New),
            ReviewAction::Advance { to: AlertStatus::ActionRequired },
        )
        .unwrap_err();
        assert_eq!(err, TransitionError::MissingRequiredFields(vec![Field::FirstReviewedAt]));
    }

    #[test]
    fn not_relevant_closes_from_new_only_paths() {
        let t = run(
            &WorkflowState::new(AlertStatus::New),
            ReviewAction::MarkNotRelevant { reason: "Hospital only".into() },
        )
        .unwrap();
        assert_eq!(t.to, AlertStatus::Closed);
        assert_eq!(t.state.final_relevance, Some(Relevance::NotRelevant));
        assert!(t.state.fields.first_reviewed_at.is_some());
        assert_eq!(t.note.as_deref(), Some("Marked not relevant: Hospital only"));

        let err = run(
            &in_progress(0),
            ReviewAction::MarkNotRelevant { reason: "late".into() },
        )
        .unwrap_err();
        assert!(matches!(err, TransitionError::InvalidTransition { to: AlertStatus::Closed, .. }));
    }

    #[test]
    fn terminal_alerts_reject_field_changes() {
        let closed = WorkflowState::new(AlertStatus::Closed);
        let err = run(&closed, record([(Field::TeamNotified, FieldValue::Bool(true))])).unwrap_err();
        assert_eq!(err, TransitionError::Terminal(AlertStatus::Closed));
    }

    #[test]
    fn reopen_restores_derived_status_and_marks_relevant() {
        let closed = WorkflowState::new(AlertStatus::Closed);
        let t = run(&closed, ReviewAction::Reopen { reason: "Affects our patients".into() }).unwrap();
        assert_eq!(t.to, AlertStatus::New);
        assert_eq!(t.state.final_relevance, Some(Relevance::Relevant));
        assert!(t.note.unwrap().starts_with("Reopened from Closed"));

        let err = run(&in_progress(0), ReviewAction::Reopen { reason: "x".into() }).unwrap_err();
        assert!(matches!(err, TransitionError::InvalidTransition { .. }));
    }

    #[test]
    fn override_moves_backwards_with_reason() {
        let state = in_progress(0);
        let err = run(
            &state,
            ReviewAction::Override { to: AlertStatus::UnderReview, reason: "  ".into() },
        )
        .unwrap_err();
        assert_eq!(err, TransitionError::ReasonRequired);

        let t = run(
            &state,
            ReviewAction::Override { to: AlertStatus::UnderReview, reason: "Wrong alert".into() },
        )
        .unwrap();
        assert_eq!(t.to, AlertStatus::UnderReview);
        assert!(t.note.is_some());
    }

    #[test]
    fn override_cannot_skip_completion_gate() {
        let err = run(
            &in_progress(3),
            ReviewAction::Override { to: AlertStatus::Completed, reason: "done".into() },
        )
        .unwrap_err();
        assert!(matches!(err, TransitionError::MissingRequiredFields(_)));

        let reviewed = run(&WorkflowState::new(AlertStatus::New), ReviewAction::MarkReviewed)
            .unwrap()
            .state;
        let err = run(
            &reviewed,
            ReviewAction::Override { to: AlertStatus::Completed, reason: "done".into() },
        )
        .unwrap_err();
        assert_eq!(
            err,
            TransitionError::InvalidTransition {
                from: AlertStatus::UnderReview,
                to: AlertStatus::Completed
            }
        );
    }

    #[test]
    fn override_cannot_close_work_in_progress() {
        let err = run(
            &in_progress(0),
            ReviewAction::Override { to: AlertStatus::Closed, reason: "not ours".into() },
        )
        .unwrap_err();
        assert_eq!(
            err,
            TransitionError::InvalidTransition {
                from: AlertStatus::InProgress,
                to: AlertStatus::Closed
            }
        );

        let completed = run(&in_progress(0), ReviewAction::Advance { to: AlertStatus::Completed })
            .unwrap()
            .state;
        let err = run(
            &completed,
            ReviewAction::Override { to: AlertStatus::Closed, reason: "not ours".into() },
        )
        .unwrap_err();
        assert!(matches!(err, TransitionError::InvalidTransition { to: AlertStatus::Closed, .. }));
    }

    #[test]
    fn override_never_moves_forward() {
        let reviewed = run(&WorkflowState::new(AlertStatus::New), ReviewAction::MarkReviewed)
            .unwrap()
            .state;
        let err = run(
            &reviewed,
            ReviewAction::Override { to: AlertStatus::InProgress, reason: "skip".into() },
        )
        .unwrap_err();
        assert!(matches!(err, TransitionError::InvalidTransition { .. }));

        let completed = run(&in_progress(0), ReviewAction::Advance { to: AlertStatus::Completed })
            .unwrap()
            .state;
        let t = run(
            &completed,
            ReviewAction::Override { to: AlertStatus::InProgress, reason: "missed a patient".into() },
        )
        .unwrap();
        assert_eq!(t.to, AlertStatus::InProgress);
        assert!(t.state.completed_at.is_none());
    }

    #[test]
    fn derive_status_ignores_triage_notes() {
        let fields = WorkflowFields {
            first_reviewed_at: Some(at(1)),
            ..Default::default()
        };
        assert_eq!(derive_status(&fields), AlertStatus::UnderReview);
        assert_eq!(derive_status(&WorkflowFields::default()), AlertStatus::New);
    }
}
