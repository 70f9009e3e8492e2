//! Workflow state machine.
//!
//! Pure functions that move a [`WorkflowState`] along the legal status
//! edges. Each function records the events it implies in `events`; the
//! caller publishes them only once the mutated state has been persisted.

use crate::engine::{StepCompletion, StepExecution};
use af_protocol::ipc::WorkflowEvent;
use af_protocol::plan_models::StepSpec;
use af_protocol::workflow_models::{
    ApprovalDecision, ApprovalRecord, ApprovalRequest, CancellationRecord, FailureKind,
    StepOutcome, StepRecord, WorkflowFailure, WorkflowState, WorkflowStatus,
};
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

/// Comment recorded on a gate rejected because nobody decided in time.
pub const APPROVAL_TIMEOUT_COMMENT: &str = "approval timeout";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid state transition for task {task_id}: {from} -> {to}")]
pub struct TransitionError {
    pub task_id: String,
    pub from: WorkflowStatus,
    pub to: WorkflowStatus,
}

fn current_step_name(state: &WorkflowState) -> Option<String> {
    state
        .current_step
        .and_then(|index| state.plan.step(index))
        .map(|step| step.name.clone())
}

/// Move to `to` if the edge exists.
pub fn apply_status(
    state: &mut WorkflowState,
    to: WorkflowStatus,
    events: &mut Vec<WorkflowEvent>,
) -> Result<(), TransitionError> {
    let from = state.status;
    if !from.can_transition_to(to) {
        return Err(TransitionError {
            task_id: state.task_id.clone(),
            from,
            to,
        });
    }
    state.status = to;
    events.push(WorkflowEvent::StatusChanged {
        task_id: state.task_id.clone(),
        from,
        to,
        step: current_step_name(state),
    });
    Ok(())
}

/// Close any open record as interrupted and drop a pending approval.
fn interrupt_open_step(state: &mut WorkflowState, now: DateTime<Utc>) {
    if let Some(record) = state.last_record_mut() {
        if matches!(
            record.outcome,
            StepOutcome::InProgress | StepOutcome::AwaitingApproval
        ) {
            record.outcome = StepOutcome::Interrupted;
            record.finished_at = Some(now);
        }
    }
    state.approval = None;
}

fn time_out(
    state: &mut WorkflowState,
    message: String,
    now: DateTime<Utc>,
    events: &mut Vec<WorkflowEvent>,
) -> bool {
    let step_name = current_step_name(state);
    if apply_status(state, WorkflowStatus::TimedOut, events).is_err() {
        return false;
    }
    interrupt_open_step(state, now);
    state.error = Some(WorkflowFailure {
        step_name,
        kind: FailureKind::Timeout,
        message,
    });
    true
}

fn deadline_message(state: &WorkflowState) -> String {
    let timeout_seconds = (state.deadline - state.created_at).num_seconds();
    format!("workflow exceeded its deadline of {timeout_seconds}s")
}

/// Time the workflow out if its deadline has passed. Returns whether it did.
pub fn check_deadline(state: &mut WorkflowState, now: DateTime<Utc>, events: &mut Vec<WorkflowEvent>) -> bool {
    if !(state.status.is_timeout_eligible() && state.is_expired(now)) {
        return false;
    }
    let message = deadline_message(state);
    time_out(state, message, now, events)
}

fn fail(
    state: &mut WorkflowState,
    kind: FailureKind,
    message: String,
    events: &mut Vec<WorkflowEvent>,
) {
    let step_name = current_step_name(state);
    if apply_status(state, WorkflowStatus::Failed, events).is_ok() {
        state.error = Some(WorkflowFailure {
            step_name,
            kind,
            message,
        });
    }
}

fn complete(state: &mut WorkflowState, events: &mut Vec<WorkflowEvent>) {
    if state.result.is_none() {
        state.result = Some(
            state
                .history
                .iter()
                .rev()
                .find(|r| r.outcome == StepOutcome::Succeeded)
                .and_then(|r| r.output.clone())
                .map(Value::String)
                .unwrap_or(Value::Null),
        );
    }
    let _ = apply_status(state, WorkflowStatus::Completed, events);
}

fn gate_step(state: &WorkflowState) -> Option<&StepSpec> {
    state.current_step.and_then(|index| state.plan.step(index))
}

/// Pick the next step and open a record for it.
///
/// Returns the plan index to execute, or `None` when the driver should stop:
/// the workflow is terminal, waiting for approval, or just completed.
pub fn begin_next_step(
    state: &mut WorkflowState,
    now: DateTime<Utc>,
    events: &mut Vec<WorkflowEvent>,
) -> Option<usize> {
    if state.is_terminal() || state.status == WorkflowStatus::AwaitingApproval {
        return None;
    }
    if check_deadline(state, now, events) {
        return None;
    }

    let next = match state.status {
        WorkflowStatus::Pending => Some(state.plan.entry),
        WorkflowStatus::Running => {
            match state.last_record().map(|r| (r.step_index, r.outcome)) {
                // Left open by a driver that never finished it.
                Some((index, StepOutcome::InProgress | StepOutcome::Interrupted)) => {
                    if let Some(record) = state.last_record_mut() {
                        record.outcome = StepOutcome::Interrupted;
                        record.finished_at.get_or_insert(now);
                    }
                    Some(index)
                }
                Some((index, _)) => state.plan.step(index).and_then(|s| s.next),
                None => Some(state.plan.entry),
            }
        }
        WorkflowStatus::Approved => gate_step(state).and_then(|s| s.next),
        WorkflowStatus::Rejected => match gate_step(state).and_then(|s| s.on_reject) {
            Some(index) => Some(index),
            None => {
                let _ = apply_status(state, WorkflowStatus::Cancelled, events);
                return None;
            }
        },
        _ => return None,
    };

    if state.status != WorkflowStatus::Running
        && apply_status(state, WorkflowStatus::Running, events).is_err()
    {
        return None;
    }

    let Some(index) = next else {
        complete(state, events);
        return None;
    };
    let Some(name) = state.plan.step(index).map(|s| s.name.clone()) else {
        fail(
            state,
            FailureKind::Internal,
            format!("plan has no step at index {index}"),
            events,
        );
        return None;
    };

    state.current_step = Some(index);
    state.history.push(StepRecord::begin(name.clone(), index));
    events.push(WorkflowEvent::StepStarted {
        task_id: state.task_id.clone(),
        step_name: name,
        step_index: index,
    });
    Some(index)
}

/// Fold a step's execution into the state. Returns whether the driver should
/// continue with the next step.
///
/// A workflow that left RUNNING while the step executed (cancelled or timed
/// out) is not touched.
pub fn finish_step(
    state: &mut WorkflowState,
    index: usize,
    execution: StepExecution,
    now: DateTime<Utc>,
    events: &mut Vec<WorkflowEvent>,
) -> bool {
    if state.status != WorkflowStatus::Running || state.current_step != Some(index) {
        return false;
    }
    let task_id = state.task_id.clone();
    let Some(record) = state
        .history
        .last_mut()
        .filter(|r| r.step_index == index && r.outcome == StepOutcome::InProgress)
    else {
        return false;
    };

    for invocation in &execution.invocations {
        events.push(WorkflowEvent::ToolInvoked {
            task_id: task_id.clone(),
            tool_name: invocation.tool_name.clone(),
            attempt: invocation.attempt,
            success: invocation.succeeded(),
        });
    }
    record.finished_at = Some(now);
    record.output = execution.output;
    record.tool_invocations = execution.invocations;
    record.outcome = match &execution.outcome {
        Ok(StepCompletion::Gate { .. }) => StepOutcome::AwaitingApproval,
        Ok(_) => StepOutcome::Succeeded,
        Err(_) => StepOutcome::Failed,
    };
    if let Err(failure) = &execution.outcome {
        record.error = Some(failure.message.clone());
    }
    let step_name = record.step_name.clone();
    events.push(WorkflowEvent::StepFinished {
        task_id: task_id.clone(),
        step_name: step_name.clone(),
        outcome: record.outcome,
    });

    match execution.outcome {
        Ok(StepCompletion::Continue) => true,
        Ok(StepCompletion::Gate {
            proposed_action,
            expires_after,
        }) => {
            let expires_at = expires_after
                .and_then(|after| chrono::Duration::from_std(after).ok())
                .and_then(|after| now.checked_add_signed(after));
            state.approval = Some(ApprovalRequest {
                task_id: task_id.clone(),
                step_name: step_name.clone(),
                proposed_action: proposed_action.clone(),
                comment: None,
                requested_at: now,
                expires_at,
            });
            if apply_status(state, WorkflowStatus::AwaitingApproval, events).is_ok() {
                events.push(WorkflowEvent::ApprovalRequired {
                    task_id,
                    step_name,
                    proposed_action,
                });
            }
            false
        }
        Ok(StepCompletion::Finalize { result }) => {
            state.result = Some(result);
            complete(state, events);
            false
        }
        Err(failure) if failure.kind == FailureKind::Timeout => {
            let message = if state.is_expired(now) {
                deadline_message(state)
            } else {
                failure.message
            };
            time_out(state, message, now, events);
            false
        }
        Err(failure) => {
            fail(state, failure.kind, failure.message, events);
            false
        }
    }
}

/// Record a human decision on the pending gate.
///
/// Returns whether a driver should resume the workflow. A rejection with no
/// reject branch cancels the workflow instead.
pub fn resolve_approval(
    state: &mut WorkflowState,
    decision: ApprovalDecision,
    actor: Option<String>,
    comment: Option<String>,
    now: DateTime<Utc>,
    events: &mut Vec<WorkflowEvent>,
) -> Result<bool, TransitionError> {
    if state.status != WorkflowStatus::AwaitingApproval {
        return Err(TransitionError {
            task_id: state.task_id.clone(),
            from: state.status,
            to: decision.status(),
        });
    }
    apply_status(state, decision.status(), events)?;

    let step_name = state
        .approval
        .take()
        .map(|a| a.step_name)
        .or_else(|| current_step_name(state))
        .unwrap_or_default();
    if let Some(record) = state
        .last_record_mut()
        .filter(|r| r.outcome == StepOutcome::AwaitingApproval)
    {
        record.outcome = match decision {
            ApprovalDecision::Approved => StepOutcome::Approved,
            ApprovalDecision::Rejected => StepOutcome::Rejected,
        };
        record.finished_at = Some(now);
    }
    state.approvals.push(ApprovalRecord {
        step_name: step_name.clone(),
        decision,
        actor: actor.clone(),
        comment: comment.clone(),
        decided_at: now,
    });
    events.push(WorkflowEvent::ApprovalResolved {
        task_id: state.task_id.clone(),
        step_name: step_name.clone(),
        decision,
    });

    let has_branch = gate_step(state).is_some_and(|s| s.on_reject.is_some());
    if decision == ApprovalDecision::Rejected && !has_branch {
        apply_status(state, WorkflowStatus::Cancelled, events)?;
        state.cancellation = Some(CancellationRecord {
            actor,
            reason: Some(comment.unwrap_or_else(|| format!("rejected at '{step_name}'"))),
            cancelled_at: now,
        });
        return Ok(false);
    }
    Ok(true)
}

/// Reject a gate whose approval window has closed. Returns whether a driver
/// should resume the workflow on its reject branch.
pub fn expire_approval(
    state: &mut WorkflowState,
    now: DateTime<Utc>,
    events: &mut Vec<WorkflowEvent>,
) -> bool {
    if !state.approval_expired(now) {
        return false;
    }
    resolve_approval(
        state,
        ApprovalDecision::Rejected,
        None,
        Some(APPROVAL_TIMEOUT_COMMENT.to_string()),
        now,
        events,
    )
    .unwrap_or(false)
}

pub fn cancel(
    state: &mut WorkflowState,
    actor: Option<String>,
    reason: Option<String>,
    now: DateTime<Utc>,
    events: &mut Vec<WorkflowEvent>,
) -> Result<(), TransitionError> {
    apply_status(state, WorkflowStatus::Cancelled, events)?;
    interrupt_open_step(state, now);
    state.cancellation = Some(CancellationRecord {
        actor,
        reason,
        cancelled_at: now,
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::StepFailure;
    use af_protocol::plan_models::{Plan, StepTemplate};
    use af_protocol::workflow_models::WorkflowRequest;
    use serde_json::json;

    fn gated_state() -> WorkflowState {
        let plan = Plan::compile(&[
            StepTemplate::agent("plan", "p", false),
            StepTemplate::approval("gate", "Deploy")
                .with_on_reject(vec![StepTemplate::agent("remediate", "r", false)]),
            StepTemplate::finalize("done"),
        ]);
        WorkflowState::new("t-1", WorkflowRequest::new("dev", "deploy"), plan, 60)
    }

    fn ok(output: &str) -> StepExecution {
        StepExecution {
            output: Some(output.to_string()),
            invocations: Vec::new(),
            outcome: Ok(StepCompletion::Continue),
        }
    }

    fn gate() -> StepExecution {
        StepExecution {
            output: None,
            invocations: Vec::new(),
            outcome: Ok(StepCompletion::Gate {
                proposed_action: "Deploy".to_string(),
                expires_after: Some(std::time::Duration::from_secs(30)),
            }),
        }
    }

    /// Every StatusChanged event must follow a legal edge.
    fn assert_legal(events: &[WorkflowEvent]) {
        for event in events {
            if let WorkflowEvent::StatusChanged { from, to, .. } = event {
                assert!(from.can_transition_to(*to), "illegal edge {from} -> {to}");
            }
        }
    }

    #[test]
    fn test_apply_status_rejects_illegal_edge() {
        let mut state = gated_state();
        let mut events = Vec::new();
        let err = apply_status(&mut state, WorkflowStatus::Completed, &mut events).unwrap_err();
        assert_eq!(err.from, WorkflowStatus::Pending);
        assert_eq!(state.status, WorkflowStatus::Pending);
        assert!(events.is_empty());
    }

    #[test]
    fn test_gate_approve_and_finish() {
        let mut state = gated_state();
        let mut events = Vec::new();
        let now = Utc::now();

        assert_eq!(begin_next_step(&mut state, now, &mut events), Some(0));
        assert_eq!(state.status, WorkflowStatus::Running);
        assert!(finish_step(&mut state, 0, ok("planned"), now, &mut events));

        assert_eq!(begin_next_step(&mut state, now, &mut events), Some(1));
        assert!(!finish_step(&mut state, 1, gate(), now, &mut events));
        assert_eq!(state.status, WorkflowStatus::AwaitingApproval);
        assert_eq!(state.approval.as_ref().unwrap().step_name, "gate");
        assert_eq!(begin_next_step(&mut state, now, &mut events), None);

        let resume = resolve_approval(&mut state, ApprovalDecision::Approved, None, None, now, &mut events).unwrap();
        assert!(resume);
        assert!(state.approval.is_none());
        assert_eq!(state.history[1].outcome, StepOutcome::Approved);

        assert_eq!(begin_next_step(&mut state, now, &mut events), Some(2));
        let finalize = StepExecution {
            output: None,
            invocations: Vec::new(),
            outcome: Ok(StepCompletion::Finalize { result: json!({"ok": true}) }),
        };
        assert!(!finish_step(&mut state, 2, finalize, now, &mut events));
        assert_eq!(state.status, WorkflowStatus::Completed);
        assert_eq!(state.result, Some(json!({"ok": true})));
        assert_legal(&events);
    }

    #[test]
    fn test_reject_runs_branch_then_completes_with_last_output() {
        let mut state = gated_state();
        let mut events = Vec::new();
        let now = Utc::now();
        begin_next_step(&mut state, now, &mut events);
        finish_step(&mut state, 0, ok("planned"), now, &mut events);
        begin_next_step(&mut state, now, &mut events);
        finish_step(&mut state, 1, gate(), now, &mut events);

        assert!(resolve_approval(&mut state, ApprovalDecision::Rejected, Some("ops".to_string()), Some("no".to_string()), now, &mut events).unwrap());
        assert_eq!(begin_next_step(&mut state, now, &mut events), Some(3));
        assert!(finish_step(&mut state, 3, ok("rolled back"), now, &mut events));
        assert_eq!(begin_next_step(&mut state, now, &mut events), None);

        assert_eq!(state.status, WorkflowStatus::Completed);
        assert_eq!(state.result, Some(json!("rolled back")));
        assert_eq!(state.approvals[0].comment.as_deref(), Some("no"));
        assert_eq!(state.approvals[0].actor.as_deref(), Some("ops"));
        assert!(state.cancellation.is_none());
        assert_legal(&events);
    }

    #[test]
    fn test_reject_without_branch_cancels() {
        let plan = Plan::compile(&[StepTemplate::approval("gate", "Deploy"), StepTemplate::finalize("done")]);
        let mut state = WorkflowState::new("t-2", WorkflowRequest::new("dev", "x"), plan, 60);
        let mut events = Vec::new();
        let now = Utc::now();
        begin_next_step(&mut state, now, &mut events);
        finish_step(&mut state, 0, gate(), now, &mut events);

        let resume = resolve_approval(&mut state, ApprovalDecision::Rejected, Some("ops".to_string()), None, now, &mut events).unwrap();
        assert!(!resume);
        assert_eq!(state.status, WorkflowStatus::Cancelled);
        let cancellation = state.cancellation.as_ref().unwrap();
        assert_eq!(cancellation.actor.as_deref(), Some("ops"));
        assert_eq!(cancellation.reason.as_deref(), Some("rejected at 'gate'"));
        assert_legal(&events);
    }

    #[test]
    fn test_expired_gate_is_rejected_onto_branch() {
        let mut state = gated_state();
        let mut events = Vec::new();
        let now = Utc::now();
        begin_next_step(&mut state, now, &mut events);
        finish_step(&mut state, 0, ok("planned"), now, &mut events);
        begin_next_step(&mut state, now, &mut events);
        finish_step(&mut state, 1, gate(), now, &mut events);
        let expires_at = state.approval.as_ref().unwrap().expires_at.unwrap();
        assert_eq!(expires_at, now + chrono::Duration::seconds(30));

        let before = state.clone();
        assert!(!expire_approval(&mut state, expires_at - chrono::Duration::seconds(1), &mut events));
        assert_eq!(state, before);

        assert!(expire_approval(&mut state, expires_at, &mut events));
        assert_eq!(state.status, WorkflowStatus::Rejected);
        let record = &state.approvals[0];
        assert_eq!(record.decision, ApprovalDecision::Rejected);
        assert_eq!(record.comment.as_deref(), Some(APPROVAL_TIMEOUT_COMMENT));
        assert!(record.actor.is_none());
        assert_eq!(begin_next_step(&mut state, expires_at, &mut events), Some(3));
        assert_legal(&events);
    }

    #[test]
    fn test_resolve_outside_gate_is_rejected() {
        let mut state = gated_state();
        let before = state.clone();
        let mut events = Vec::new();
        let err = resolve_approval(&mut state, ApprovalDecision::Approved, None, None, Utc::now(), &mut events).unwrap_err();
        assert_eq!(err.from, WorkflowStatus::Pending);
        assert_eq!(err.to, WorkflowStatus::Approved);
        assert_eq!(state, before);
    }

    #[test]
    fn test_failure_records_error() {
        let mut state = gated_state();
        let mut events = Vec::new();
        let now = Utc::now();
        begin_next_step(&mut state, now, &mut events);
        let failed = StepExecution {
            output: None,
            invocations: Vec::new(),
            outcome: Err(StepFailure::new(FailureKind::Provider, "upstream 500")),
        };
        assert!(!finish_step(&mut state, 0, failed, now, &mut events));

        assert_eq!(state.status, WorkflowStatus::Failed);
        let error = state.error.as_ref().unwrap();
        assert_eq!(error.step_name.as_deref(), Some("plan"));
        assert_eq!(error.kind, FailureKind::Provider);
        assert_eq!(state.history[0].outcome, StepOutcome::Failed);
        assert_eq!(state.history[0].error.as_deref(), Some("upstream 500"));
    }

    #[test]
    fn test_deadline_times_out_running_but_not_pending() {
        let mut state = gated_state();
        let mut events = Vec::new();
        let late = state.deadline + chrono::Duration::seconds(1);
        assert!(!check_deadline(&mut state, late, &mut events));

        begin_next_step(&mut state, Utc::now(), &mut events);
        assert!(check_deadline(&mut state, late, &mut events));
        assert_eq!(state.status, WorkflowStatus::TimedOut);
        assert_eq!(state.history[0].outcome, StepOutcome::Interrupted);
        assert_eq!(state.error.as_ref().unwrap().kind, FailureKind::Timeout);

        // A step finishing after the timeout leaves the terminal state alone.
        let snapshot = state.clone();
        assert!(!finish_step(&mut state, 0, ok("late"), late, &mut events));
        assert_eq!(state, snapshot);
    }

    #[test]
    fn test_step_timeout_times_out_before_deadline() {
        let mut state = gated_state();
        let mut events = Vec::new();
        let now = Utc::now();
        begin_next_step(&mut state, now, &mut events);
        let timed_out = StepExecution {
            output: None,
            invocations: Vec::new(),
            outcome: Err(StepFailure::new(FailureKind::Timeout, "agent call timed out after 1s")),
        };
        assert!(!state.is_expired(now));
        assert!(!finish_step(&mut state, 0, timed_out, now, &mut events));

        assert_eq!(state.status, WorkflowStatus::TimedOut);
        let error = state.error.as_ref().unwrap();
        assert_eq!(error.kind, FailureKind::Timeout);
        assert_eq!(error.step_name.as_deref(), Some("plan"));
        assert_eq!(error.message, "agent call timed out after 1s");
        assert_eq!(state.history[0].outcome, StepOutcome::Failed);
        assert_legal(&events);
    }

    #[test]
    fn test_interrupted_step_is_rerun() {
        let mut state = gated_state();
        let mut events = Vec::new();
        let now = Utc::now();
        begin_next_step(&mut state, now, &mut events);

        assert_eq!(begin_next_step(&mut state, now, &mut events), Some(0));
        assert_eq!(state.history.len(), 2);
        assert_eq!(state.history[0].outcome, StepOutcome::Interrupted);
        assert_eq!(state.history[1].outcome, StepOutcome::InProgress);
    }

    #[test]
    fn test_cancel() {
        let mut state = gated_state();
        let mut events = Vec::new();
        let now = Utc::now();
        begin_next_step(&mut state, now, &mut events);
        cancel(&mut state, Some("alice".to_string()), Some("wrong branch".to_string()), now, &mut events).unwrap();
        assert_eq!(state.status, WorkflowStatus::Cancelled);
        assert_eq!(state.history[0].outcome, StepOutcome::Interrupted);
        let record = state.cancellation.clone().unwrap();
        assert_eq!(record.actor.as_deref(), Some("alice"));
        assert_eq!(record.reason.as_deref(), Some("wrong branch"));

        let err = cancel(&mut state, None, None, now, &mut events).unwrap_err();
        assert_eq!(err.from, WorkflowStatus::Cancelled);
        assert_eq!(state.cancellation, Some(record));
    }
}
