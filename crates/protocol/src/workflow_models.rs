//! Workflow request and state models.
//!
//! A [`WorkflowState`] is the single persisted record for a task. Every
//! mutation bumps `version`, which backs compare-and-swap in the state store.

use crate::plan_models::{Plan, StepTemplate};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Lifecycle status of a workflow.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    /// Accepted and persisted, driver not yet started.
    Pending,
    /// A step is executing or about to.
    Running,
    /// Suspended at an approval gate.
    AwaitingApproval,
    /// Gate approved, driver resuming.
    Approved,
    /// Gate rejected, driver resuming on the remediation branch.
    Rejected,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

impl WorkflowStatus {
    /// Terminal states accept no further mutation.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::TimedOut
        )
    }

    /// Whether `self -> next` is a legal edge of the state machine.
    ///
    /// # Examples
    ///
    /// ```
    /// use af_protocol::WorkflowStatus;
    ///
    /// assert!(WorkflowStatus::Pending.can_transition_to(WorkflowStatus::Running));
    /// assert!(!WorkflowStatus::Pending.can_transition_to(WorkflowStatus::Completed));
    /// assert!(!WorkflowStatus::Completed.can_transition_to(WorkflowStatus::Running));
    /// ```
    pub fn can_transition_to(self, next: Self) -> bool {
        use WorkflowStatus::*;
        matches!(
            (self, next),
            (Pending, Running | Cancelled)
                | (Running, AwaitingApproval | Completed | Failed | Cancelled | TimedOut)
                | (AwaitingApproval, Approved | Rejected | Cancelled | TimedOut)
                | (Approved, Running | Cancelled | TimedOut)
                | (Rejected, Running | Cancelled | TimedOut)
        )
    }

    /// States in which an expired deadline moves the workflow to `TimedOut`.
    pub fn is_timeout_eligible(self) -> bool {
        self.can_transition_to(Self::TimedOut)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::AwaitingApproval => "AWAITING_APPROVAL",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
            Self::TimedOut => "TIMED_OUT",
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A task submitted to the orchestrator.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WorkflowRequest {
    /// Caller-supplied id. Generated when absent.
    #[serde(default)]
    pub task_id: Option<String>,

    pub task_description: String,

    /// Agent id of the agent that drives the workflow.
    pub agent_role: String,

    /// Falls back to the configured default when absent.
    #[serde(default)]
    pub timeout_seconds: Option<u64>,

    /// Alternative action run when an approval gate is rejected.
    #[serde(default)]
    pub remediation: Option<String>,

    /// Explicit step list overriding templates and the default plan.
    #[serde(default)]
    pub plan: Option<Vec<StepTemplate>>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl WorkflowRequest {
    pub fn new(agent_role: impl Into<String>, task_description: impl Into<String>) -> Self {
        Self {
            task_id: None,
            task_description: task_description.into(),
            agent_role: agent_role.into(),
            timeout_seconds: None,
            remediation: None,
            plan: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    pub fn with_remediation(mut self, remediation: impl Into<String>) -> Self {
        self.remediation = Some(remediation.into());
        self
    }

    pub fn with_plan(mut self, steps: Vec<StepTemplate>) -> Self {
        self.plan = Some(steps);
        self
    }
}

/// Generate a fresh task id.
pub fn new_task_id() -> String {
    Uuid::new_v4().to_string()
}

/// Outcome of a single step execution.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepOutcome {
    InProgress,
    Succeeded,
    Failed,
    AwaitingApproval,
    Approved,
    Rejected,
    /// The step was running when its driver stopped and will be re-executed.
    Interrupted,
}

/// Error attached to a failed tool invocation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ToolFailure {
    pub kind: FailureKind,
    pub message: String,
    /// Set when the tool backend was unreachable rather than erroring.
    #[serde(default)]
    pub degraded: bool,
}

/// One call to an external tool. Recorded whether it succeeded or not.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub tool_name: String,
    pub arguments: Value,
    /// 1 for the first attempt, 2 for a retry.
    pub attempt: u32,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<ToolFailure>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl ToolInvocation {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// History entry for one executed step.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StepRecord {
    pub step_name: String,
    pub step_index: usize,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tool_invocations: Vec<ToolInvocation>,
    pub outcome: StepOutcome,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl StepRecord {
    pub fn begin(step_name: impl Into<String>, step_index: usize) -> Self {
        Self {
            step_name: step_name.into(),
            step_index,
            started_at: Utc::now(),
            finished_at: None,
            tool_invocations: Vec::new(),
            outcome: StepOutcome::InProgress,
            output: None,
            error: None,
        }
    }
}

/// A pending human decision. Present only while AWAITING_APPROVAL.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ApprovalRequest {
    pub task_id: String,
    pub step_name: String,
    pub proposed_action: String,
    #[serde(default)]
    pub comment: Option<String>,
    pub requested_at: DateTime<Utc>,
    /// The gate is rejected automatically from this instant on.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl ApprovalRequest {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalDecision {
    Approved,
    Rejected,
}

impl ApprovalDecision {
    /// Status the workflow moves to when this decision is applied.
    pub fn status(self) -> WorkflowStatus {
        match self {
            Self::Approved => WorkflowStatus::Approved,
            Self::Rejected => WorkflowStatus::Rejected,
        }
    }
}

/// A resolved approval.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ApprovalRecord {
    pub step_name: String,
    pub decision: ApprovalDecision,
    /// Who decided. `None` for automatic rejections.
    #[serde(default)]
    pub actor: Option<String>,
    /// Reason given with the decision.
    #[serde(default)]
    pub comment: Option<String>,
    pub decided_at: DateTime<Utc>,
}

/// Who stopped a workflow and why.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CancellationRecord {
    #[serde(default)]
    pub actor: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    pub cancelled_at: DateTime<Utc>,
}

/// Category of a workflow or tool failure.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Configuration,
    Provider,
    ToolNotFound,
    ToolExecution,
    ToolTimeout,
    Timeout,
    Internal,
}

/// Why a workflow ended in FAILED.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WorkflowFailure {
    #[serde(default)]
    pub step_name: Option<String>,
    pub kind: FailureKind,
    pub message: String,
}

/// Persisted state of one workflow. The single source of truth for polling.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WorkflowState {
    pub task_id: String,
    pub request: WorkflowRequest,
    pub plan: Plan,
    pub status: WorkflowStatus,
    /// Index into `plan.steps` of the step last begun.
    #[serde(default)]
    pub current_step: Option<usize>,
    #[serde(default)]
    pub history: Vec<StepRecord>,
    #[serde(default)]
    pub approval: Option<ApprovalRequest>,
    #[serde(default)]
    pub approvals: Vec<ApprovalRecord>,
    /// Set once the workflow is CANCELLED.
    #[serde(default)]
    pub cancellation: Option<CancellationRecord>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<WorkflowFailure>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub version: u64,
}

impl WorkflowState {
    /// Create the initial PENDING state for a request.
    pub fn new(task_id: impl Into<String>, request: WorkflowRequest, plan: Plan, timeout_seconds: u64) -> Self {
        let now = Utc::now();
        let timeout = i64::try_from(timeout_seconds).unwrap_or(i64::MAX);
        let deadline = now
            .checked_add_signed(chrono::Duration::seconds(timeout))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            task_id: task_id.into(),
            request,
            plan,
            status: WorkflowStatus::Pending,
            current_step: None,
            history: Vec::new(),
            approval: None,
            approvals: Vec::new(),
            cancellation: None,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
            deadline,
            version: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.deadline
    }

    /// Waiting at a gate whose approval window has closed.
    pub fn approval_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == WorkflowStatus::AwaitingApproval
            && self.approval.as_ref().is_some_and(|a| a.is_expired(now))
    }

    /// The most recent step record, if any.
    pub fn last_record(&self) -> Option<&StepRecord> {
        self.history.last()
    }

    pub fn last_record_mut(&mut self) -> Option<&mut StepRecord> {
        self.history.last_mut()
    }
}
