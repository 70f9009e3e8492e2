//! Events broadcast by the orchestrator and usage telemetry.
//!
//! The orchestrator publishes [`WorkflowEvent`]s on a broadcast channel so
//! collaborators (the CLI, a server, tests) can follow workflows without
//! polling. Adapters publish [`UsageReport`]s on a separate telemetry channel.
//!
//! Uses tagged enum serialization:
//! ```json
//! {
//!   "type": "statusChanged",
//!   "payload": {
//!     "task_id": "8c1f...",
//!     "from": "RUNNING",
//!     "to": "AWAITING_APPROVAL",
//!     "step": "gate"
//!   }
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::settings_models::Provider;
use crate::workflow_models::{ApprovalDecision, StepOutcome, WorkflowStatus};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum WorkflowEvent {
    /// A workflow was accepted and persisted as PENDING.
    Submitted { task_id: String, agent_role: String },

    /// A persisted status change.
    StatusChanged {
        task_id: String,
        from: WorkflowStatus,
        to: WorkflowStatus,
        step: Option<String>,
    },

    StepStarted {
        task_id: String,
        step_name: String,
        step_index: usize,
    },

    StepFinished {
        task_id: String,
        step_name: String,
        outcome: StepOutcome,
    },

    /// A tool call finished, successfully or not.
    ToolInvoked {
        task_id: String,
        tool_name: String,
        attempt: u32,
        success: bool,
    },

    ApprovalRequired {
        task_id: String,
        step_name: String,
        proposed_action: String,
    },

    ApprovalResolved {
        task_id: String,
        step_name: String,
        decision: ApprovalDecision,
    },
}

impl WorkflowEvent {
    pub fn task_id(&self) -> &str {
        match self {
            Self::Submitted { task_id, .. }
            | Self::StatusChanged { task_id, .. }
            | Self::StepStarted { task_id, .. }
            | Self::StepFinished { task_id, .. }
            | Self::ToolInvoked { task_id, .. }
            | Self::ApprovalRequired { task_id, .. }
            | Self::ApprovalResolved { task_id, .. } => task_id,
        }
    }
}

/// Token, cost and timing figures for one provider call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsageReport {
    pub provider: Provider,
    pub model: String,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cost_usd: Option<f64>,
    pub duration_ms: u64,
    #[serde(default)]
    pub num_turns: u32,
    pub at: DateTime<Utc>,
}

impl UsageReport {
    pub fn new(provider: Provider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            task_id: None,
            input_tokens: 0,
            output_tokens: 0,
            cost_usd: None,
            duration_ms: 0,
            num_turns: 0,
            at: Utc::now(),
        }
    }
}
