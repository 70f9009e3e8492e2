//! Orchestrator settings from `.agentflow/config.toml`.
//!
//! Every field has a default so an absent or partial file is valid.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How a failed tool invocation affects its step.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ToolFailurePolicy {
    /// The step fails and the workflow moves to FAILED.
    #[default]
    FailStep,
    /// Retry once; the second attempt is recorded as its own invocation.
    RetryOnce,
    /// Record the failure and keep going.
    Continue,
}

/// Project-wide orchestrator settings.
///
/// # Example
///
/// ```toml
/// # .agentflow/config.toml
/// default_timeout_seconds = 600
/// tool_failure_policy = "retry_once"
/// approval_keywords = ["deploy", "delete", "drop"]
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct OrchestratorSettings {
    /// Workflow deadline used when a request carries none.
    pub default_timeout_seconds: u64,

    /// Interval of the background timeout sweep.
    pub sweep_interval_seconds: u64,

    /// An approval gate left undecided this long is rejected automatically.
    /// `0` waits until the workflow deadline.
    pub approval_timeout_seconds: u64,

    pub tool_failure_policy: ToolFailurePolicy,

    /// Extra attempts after a provider failure before the step fails.
    pub provider_retries: u32,

    pub retry_delay_ms: u64,

    /// Task descriptions containing one of these get an approval gate in the
    /// default plan.
    pub approval_keywords: Vec<String>,

    /// Cached agents unused for this long are evicted.
    pub agent_idle_timeout_seconds: u64,

    /// Directory for persisted workflow state. Relative paths resolve against
    /// the project root. Defaults to `.agentflow/state`.
    pub state_dir: Option<PathBuf>,

    /// Base URL of a JSON-RPC tool gateway. The local tool client is used when
    /// absent.
    pub tool_gateway_url: Option<String>,

    /// Deadline for a single tool call.
    pub tool_timeout_seconds: u64,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            default_timeout_seconds: 300,
            sweep_interval_seconds: 5,
            approval_timeout_seconds: 3600,
            tool_failure_policy: ToolFailurePolicy::FailStep,
            provider_retries: 0,
            retry_delay_ms: 500,
            approval_keywords: vec!["deploy".to_string(), "delete".to_string()],
            agent_idle_timeout_seconds: 900,
            state_dir: None,
            tool_gateway_url: None,
            tool_timeout_seconds: 30,
        }
    }
}
