//! Custom assertions for workflow tests.

use af_core::Orchestrator;
use af_protocol::ipc::WorkflowEvent;
use af_protocol::workflow_models::{StepOutcome, WorkflowState, WorkflowStatus};
use std::time::Duration;
use tokio::sync::broadcast;

/// Collect every event already published on `rx`.
#[allow(dead_code)]
pub fn drain_events(rx: &mut broadcast::Receiver<WorkflowEvent>) -> Vec<WorkflowEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => return events,
        }
    }
}

/// The status path of `task_id` as seen through `StatusChanged` events,
/// starting at PENDING.
#[allow(dead_code)]
pub fn status_path(events: &[WorkflowEvent], task_id: &str) -> Vec<WorkflowStatus> {
    let mut path = vec![WorkflowStatus::Pending];
    for event in events {
        if let WorkflowEvent::StatusChanged {
            task_id: id,
            from,
            to,
            ..
        } = event
        {
            if id == task_id {
                assert_eq!(path.last(), Some(from), "event out of order: {event:?}");
                path.push(*to);
            }
        }
    }
    path
}

/// Assert every consecutive pair in `path` is a legal transition and nothing
/// follows a terminal status.
#[allow(dead_code)]
pub fn assert_legal_path(path: &[WorkflowStatus]) {
    for pair in path.windows(2) {
        assert!(
            pair[0].can_transition_to(pair[1]),
            "illegal transition {} -> {} in {path:?}",
            pair[0],
            pair[1]
        );
    }
}

/// Assert the workflow ended in `expected`, with a result only on success and
/// an error only on failure or timeout.
#[allow(dead_code)]
pub fn assert_terminal(state: &WorkflowState, expected: WorkflowStatus) {
    assert_eq!(state.status, expected, "unexpected final state: {state:#?}");
    assert!(state.is_terminal());
    assert!(state.approval.is_none());
    match expected {
        WorkflowStatus::Completed => {
            assert!(state.result.is_some());
            assert!(state.error.is_none());
        }
        WorkflowStatus::Failed | WorkflowStatus::TimedOut => {
            assert!(state.error.is_some());
            assert!(state.result.is_none());
        }
        _ => {}
    }
    assert!(
        state
            .history
            .iter()
            .all(|r| r.outcome != StepOutcome::InProgress),
        "terminal workflow left a step in progress"
    );
}

/// Step names in execution order.
#[allow(dead_code)]
pub fn step_names(state: &WorkflowState) -> Vec<&str> {
    state.history.iter().map(|r| r.step_name.as_str()).collect()
}

/// Poll until the workflow settles, failing the test after `limit`.
#[allow(dead_code)]
pub async fn settle(orchestrator: &Orchestrator, task_id: &str, limit: Duration) -> WorkflowState {
    tokio::time::timeout(
        limit,
        orchestrator.wait_until_settled(task_id, super::fixtures::POLL),
    )
    .await
    .expect("workflow did not settle in time")
    .expect("workflow lookup failed")
}

/// Receive events until `task_id` reaches `status`, failing after `limit`.
#[allow(dead_code)]
pub async fn events_until(
    rx: &mut broadcast::Receiver<WorkflowEvent>,
    task_id: &str,
    status: WorkflowStatus,
    limit: Duration,
) -> Vec<WorkflowEvent> {
    let mut events = Vec::new();
    let wait = async {
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return,
            };
            let reached = matches!(
                &event,
                WorkflowEvent::StatusChanged { task_id: id, to, .. } if id == task_id && *to == status
            );
            events.push(event);
            if reached {
                return;
            }
        }
    };
    tokio::time::timeout(limit, wait)
        .await
        .unwrap_or_else(|_| panic!("{task_id} never reached {status}"));
    events
}
