//! Command handlers.

use crate::output;
use crate::Command;
use af_core::agents::Telemetry;
use af_core::config::loader::load_config;
use af_core::config::models::AppConfig;
use af_core::secrets::{EnvManager, EnvSecretProvider};
use af_core::Orchestrator;
use af_protocol::workflow_models::{ApprovalDecision, WorkflowRequest, WorkflowState, WorkflowStatus};
use color_eyre::eyre::{bail, WrapErr};
use color_eyre::Result;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

pub async fn dispatch(root: &Path, command: Command) -> Result<()> {
    let config = load_config(root)
        .await
        .wrap_err_with(|| format!("failed to load configuration from {}", root.display()))?;

    if let Command::Agents = command {
        list_agents(&config);
        return Ok(());
    }

    let orchestrator = Orchestrator::from_config(&config, root, Arc::new(EnvSecretProvider), Telemetry::new())
        .await
        .wrap_err("failed to start orchestrator")?;
    // Deadlines and approval windows keep firing while a command waits.
    orchestrator.spawn_sweeper();

    let result = run_command(&orchestrator, command).await;
    orchestrator.shutdown().await;
    result
}

async fn run_command(orchestrator: &Orchestrator, command: Command) -> Result<()> {
    match command {
        Command::Run {
            role,
            task,
            task_id,
            timeout,
            remediation,
            no_wait,
        } => {
            let mut request = WorkflowRequest::new(role, task);
            if let Some(task_id) = task_id {
                request = request.with_task_id(task_id);
            }
            if let Some(timeout) = timeout {
                request = request.with_timeout(timeout);
            }
            if let Some(remediation) = remediation {
                request = request.with_remediation(remediation);
            }

            let task_id = orchestrator.submit_workflow(request).await?;
            if no_wait {
                println!("{task_id}");
                return Ok(());
            }
            let state = orchestrator.wait_until_settled(&task_id, POLL_INTERVAL).await?;
            report(&state)
        }
        Command::Status { task_id, wait } => {
            let state = if wait {
                orchestrator.recover().await?;
                orchestrator.wait_until_settled(&task_id, POLL_INTERVAL).await?
            } else {
                orchestrator.get_status(&task_id).await?
            };
            report(&state)
        }
        Command::Approve { task_id, comment, by } => {
            resolve(orchestrator, &task_id, ApprovalDecision::Approved, by, comment).await
        }
        Command::Reject { task_id, comment, by } => {
            resolve(orchestrator, &task_id, ApprovalDecision::Rejected, by, comment).await
        }
        Command::Cancel { task_id, reason, by } => {
            let state = orchestrator.cancel_by(&task_id, by, reason).await?;
            report(&state)
        }
        Command::Tools => {
            let tools = orchestrator
                .tools()
                .list_tools()
                .await
                .wrap_err("tool backend unavailable")?;
            output::print_tools(&tools);
            Ok(())
        }
        Command::Agents => Ok(()),
    }
}

async fn resolve(
    orchestrator: &Orchestrator,
    task_id: &str,
    decision: ApprovalDecision,
    actor: Option<String>,
    comment: Option<String>,
) -> Result<()> {
    let resolved = orchestrator
        .resolve_approval_by(task_id, decision, actor, comment)
        .await?;
    let state = if resolved.is_terminal() {
        resolved
    } else {
        orchestrator.wait_until_settled(task_id, POLL_INTERVAL).await?
    };
    report(&state)
}

/// Print the state and turn a failed or timed-out workflow into an error exit.
fn report(state: &WorkflowState) -> Result<()> {
    output::print_state(state)?;
    match state.status {
        WorkflowStatus::Failed | WorkflowStatus::TimedOut => {
            let reason = state
                .error
                .as_ref()
                .map(|e| e.message.as_str())
                .unwrap_or("no error recorded");
            bail!("workflow {} ended {}: {reason}", state.task_id, state.status)
        }
        _ => Ok(()),
    }
}

fn list_agents(config: &AppConfig) {
    let env = EnvManager::new(Arc::new(EnvSecretProvider));
    output::print_agents(&config.agents, |provider| env.validate_provider_keys(provider));
}
