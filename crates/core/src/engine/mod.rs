//! Workflow step execution.
//!
//! The [`WorkflowEngine`] executes one plan step at a time on behalf of the
//! orchestrator's driver loop. It never touches persisted state: it receives
//! a snapshot, runs the step outside any lock and returns a
//! [`StepExecution`] that the driver folds back into the workflow.

pub mod plan;

pub use plan::PlanBuilder;

use crate::agents::base::{AgentError, AgentOutput, ExecutionContext};
use crate::agents::factory::AgentFactory;
use crate::mcp::{ToolClient, ToolError};
use af_protocol::config_models::{OrchestratorSettings, ToolFailurePolicy};
use af_protocol::plan_models::{StepKind, StepSpec};
use af_protocol::settings_models::AgentSettings;
use af_protocol::tool_models::ToolResult;
use af_protocol::workflow_models::{
    FailureKind, StepOutcome, ToolFailure, ToolInvocation, WorkflowState,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What a finished step asks the driver to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum StepCompletion {
    /// Move on to the step's `next`.
    Continue,
    /// Pause for a human decision. An undecided gate is rejected once
    /// `expires_after` has passed.
    Gate {
        proposed_action: String,
        expires_after: Option<Duration>,
    },
    /// Complete the workflow with this result.
    Finalize { result: Value },
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl StepFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<AgentError> for StepFailure {
    fn from(error: AgentError) -> Self {
        Self::new(error.failure_kind(), error.to_string())
    }
}

impl From<&ToolError> for StepFailure {
    fn from(error: &ToolError) -> Self {
        Self::new(error.failure_kind(), error.to_string())
    }
}

/// Result of executing one step. Tool invocations are kept even when the
/// step fails or runs out of time.
#[derive(Debug, Clone, PartialEq)]
pub struct StepExecution {
    pub output: Option<String>,
    pub invocations: Vec<ToolInvocation>,
    pub outcome: Result<StepCompletion, StepFailure>,
}

pub struct WorkflowEngine {
    factory: Arc<AgentFactory>,
    tools: Arc<dyn ToolClient>,
    tool_failure_policy: ToolFailurePolicy,
    provider_retries: u32,
    retry_delay: Duration,
    approval_timeout: Option<Duration>,
    project_path: Option<String>,
}

impl WorkflowEngine {
    pub fn new(
        factory: Arc<AgentFactory>,
        tools: Arc<dyn ToolClient>,
        settings: &OrchestratorSettings,
    ) -> Self {
        Self {
            factory,
            tools,
            tool_failure_policy: settings.tool_failure_policy,
            provider_retries: settings.provider_retries,
            retry_delay: Duration::from_millis(settings.retry_delay_ms),
            approval_timeout: (settings.approval_timeout_seconds > 0)
                .then(|| Duration::from_secs(settings.approval_timeout_seconds)),
            project_path: None,
        }
    }

    /// Working directory handed to agents.
    pub fn with_project_path(mut self, path: impl Into<String>) -> Self {
        self.project_path = Some(path.into());
        self
    }

    pub fn factory(&self) -> &Arc<AgentFactory> {
        &self.factory
    }

    pub fn tools(&self) -> &Arc<dyn ToolClient> {
        &self.tools
    }

    /// Execute `spec` for the workflow in `state`, bounded by the workflow
    /// deadline.
    pub async fn execute_step(&self, state: &WorkflowState, spec: &StepSpec) -> StepExecution {
        let remaining = (state.deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let mut invocations = Vec::new();

        let outcome = if remaining.is_zero() {
            Err(StepFailure::new(
                FailureKind::Timeout,
                format!("step '{}' started after the workflow deadline", spec.name),
            ))
        } else {
            match tokio::time::timeout(remaining, self.run_step(state, spec, &mut invocations)).await {
                Ok(result) => result,
                Err(_) => Err(StepFailure::new(
                    FailureKind::Timeout,
                    format!("step '{}' exceeded the workflow deadline", spec.name),
                )),
            }
        };

        match outcome {
            Ok((output, completion)) => StepExecution {
                output,
                invocations,
                outcome: Ok(completion),
            },
            Err(failure) => StepExecution {
                output: None,
                invocations,
                outcome: Err(failure),
            },
        }
    }

    async fn run_step(
        &self,
        state: &WorkflowState,
        spec: &StepSpec,
        invocations: &mut Vec<ToolInvocation>,
    ) -> Result<(Option<String>, StepCompletion), StepFailure> {
        match &spec.kind {
            StepKind::Agent { prompt, use_tools } => {
                let (settings, output) = self.run_agent(state, prompt, *use_tools).await?;
                if *use_tools {
                    for call in &output.tool_calls {
                        self.invoke_tool(&settings, &call.name, &call.arguments, invocations)
                            .await?;
                    }
                } else if !output.tool_calls.is_empty() {
                    tracing::debug!(
                        task_id = %state.task_id,
                        step = %spec.name,
                        requested = output.tool_calls.len(),
                        "ignoring tool calls from a step without tools"
                    );
                }
                Ok((Some(output.text), StepCompletion::Continue))
            }
            StepKind::Tool {
                tool_name,
                arguments,
            } => {
                let settings = self.role_settings(state)?;
                let result = self
                    .invoke_tool(&settings, tool_name, arguments, invocations)
                    .await?;
                let output = result.map(|r| match r.content {
                    Value::String(text) => text,
                    other => other.to_string(),
                });
                Ok((output, StepCompletion::Continue))
            }
            StepKind::Approval { proposed_action } => Ok((
                None,
                StepCompletion::Gate {
                    proposed_action: proposed_action.clone(),
                    expires_after: self.approval_timeout,
                },
            )),
            StepKind::Finalize => {
                let result = assemble_result(state);
                let summary = result
                    .get("summary")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                Ok((summary, StepCompletion::Finalize { result }))
            }
        }
    }

    fn role_settings(&self, state: &WorkflowState) -> Result<Arc<AgentSettings>, StepFailure> {
        let role = &state.request.agent_role;
        self.factory.settings(role).ok_or_else(|| {
            StepFailure::new(
                FailureKind::Configuration,
                format!("no agent registered for role '{role}'"),
            )
        })
    }

    async fn run_agent(
        &self,
        state: &WorkflowState,
        prompt: &str,
        use_tools: bool,
    ) -> Result<(Arc<AgentSettings>, AgentOutput), StepFailure> {
        let (settings, handle) = self
            .factory
            .get_or_create_for_role(&state.request.agent_role)
            .await?;

        let mut instruction = prompt.to_string();
        if let Some(previous) = previous_output(state) {
            instruction.push_str("\n\nOutput of the previous step:\n");
            instruction.push_str(previous);
        }

        let mut context = ExecutionContext::new(instruction)
            .with_system_prompt(settings.system_prompt.clone())
            .with_temperature(settings.model_settings.temperature)
            .with_max_tokens(settings.model_settings.max_tokens)
            .with_task_id(state.task_id.clone());
        if use_tools {
            context = context.with_allowed_tools(settings.tool_permissions.iter().cloned());
        }
        if let Some(path) = &self.project_path {
            context = context.with_project_path(path.clone());
        }

        let mut attempt = 0;
        loop {
            match handle.adapter.run(&context).await {
                Ok(output) => return Ok((settings, output)),
                Err(e) if e.is_retryable() && attempt < self.provider_retries => {
                    attempt += 1;
                    tracing::warn!(
                        task_id = %state.task_id,
                        agent_id = %settings.agent_id,
                        attempt,
                        error = %e,
                        "agent call failed, retrying"
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Invoke a tool under the failure policy, recording every attempt.
    ///
    /// Returns `Ok(None)` when the call failed but the policy lets the step
    /// continue.
    async fn invoke_tool(
        &self,
        settings: &AgentSettings,
        tool_name: &str,
        arguments: &Value,
        invocations: &mut Vec<ToolInvocation>,
    ) -> Result<Option<ToolResult>, StepFailure> {
        if !settings.permits_tool(tool_name) {
            let message = format!(
                "tool '{tool_name}' is not permitted for agent '{}'",
                settings.agent_id
            );
            invocations.push(ToolInvocation {
                tool_name: tool_name.to_string(),
                arguments: arguments.clone(),
                attempt: 1,
                result: None,
                error: Some(ToolFailure {
                    kind: FailureKind::Configuration,
                    message: message.clone(),
                    degraded: false,
                }),
                started_at: Utc::now(),
                duration_ms: 0,
            });
            return Err(StepFailure::new(FailureKind::Configuration, message));
        }

        let attempts = match self.tool_failure_policy {
            ToolFailurePolicy::RetryOnce => 2,
            ToolFailurePolicy::FailStep | ToolFailurePolicy::Continue => 1,
        };

        let mut last_error = None;
        for attempt in 1..=attempts {
            let started_at = Utc::now();
            let started = Instant::now();
            let result = self.tools.invoke(tool_name, arguments.clone()).await;
            let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            match result {
                Ok(result) => {
                    invocations.push(ToolInvocation {
                        tool_name: tool_name.to_string(),
                        arguments: arguments.clone(),
                        attempt,
                        result: Some(result.content.clone()),
                        error: None,
                        started_at,
                        duration_ms,
                    });
                    return Ok(Some(result));
                }
                Err(e) => {
                    tracing::warn!(
                        agent_id = %settings.agent_id,
                        tool = tool_name,
                        attempt,
                        degraded = e.is_degraded(),
                        error = %e,
                        "tool invocation failed"
                    );
                    invocations.push(ToolInvocation {
                        tool_name: tool_name.to_string(),
                        arguments: arguments.clone(),
                        attempt,
                        result: None,
                        error: Some(e.to_failure()),
                        started_at,
                        duration_ms,
                    });
                    let not_found = matches!(e, ToolError::NotFound(_));
                    last_error = Some(e);
                    if not_found {
                        break;
                    }
                }
            }
        }

        match (self.tool_failure_policy, last_error) {
            (ToolFailurePolicy::Continue, _) | (_, None) => Ok(None),
            (_, Some(e)) => Err(StepFailure::from(&e)),
        }
    }
}

/// Output of the most recent succeeded step before the one in progress.
fn previous_output(state: &WorkflowState) -> Option<&str> {
    state
        .history
        .iter()
        .rev()
        .skip_while(|r| r.outcome == StepOutcome::InProgress)
        .find(|r| r.outcome == StepOutcome::Succeeded && r.output.is_some())
        .and_then(|r| r.output.as_deref())
}

fn assemble_result(state: &WorkflowState) -> Value {
    let steps: Vec<Value> = state
        .history
        .iter()
        .filter(|r| r.outcome != StepOutcome::InProgress)
        .map(|r| {
            json!({
                "name": r.step_name,
                "outcome": r.outcome,
                "output": r.output,
                "tool_invocations": r.tool_invocations.len(),
            })
        })
        .collect();

    json!({
        "task_id": state.task_id,
        "summary": previous_output(state),
        "steps": steps,
        "approvals": state.approvals,
    })
}
