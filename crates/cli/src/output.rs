//! Terminal rendering.

use af_protocol::settings_models::{AgentSettings, Provider};
use af_protocol::tool_models::ToolDescriptor;
use af_protocol::workflow_models::{WorkflowState, WorkflowStatus};
use colored::{ColoredString, Colorize};

fn paint(status: WorkflowStatus) -> ColoredString {
    let label = status.as_str();
    match status {
        WorkflowStatus::Completed => label.green().bold(),
        WorkflowStatus::Failed | WorkflowStatus::TimedOut => label.red().bold(),
        WorkflowStatus::Cancelled => label.dimmed(),
        WorkflowStatus::AwaitingApproval => label.yellow().bold(),
        _ => label.cyan(),
    }
}

/// A coloured status line followed by the state as pretty JSON.
pub fn print_state(state: &WorkflowState) -> serde_json::Result<()> {
    println!("{} {}", state.task_id.bold(), paint(state.status));
    if let Some(approval) = &state.approval {
        println!(
            "  {} {} ({})",
            "awaiting approval:".yellow(),
            approval.proposed_action,
            approval.step_name
        );
        println!(
            "  run `agentflow approve {0}` or `agentflow reject {0}`",
            state.task_id
        );
    }
    println!("{}", serde_json::to_string_pretty(state)?);
    Ok(())
}

pub fn print_agents(agents: &[AgentSettings], has_credentials: impl Fn(Provider) -> bool) {
    if agents.is_empty() {
        println!("{}", "No agents configured".yellow());
        println!("  Add agent definitions under .agentflow/agents/*.md");
        return;
    }

    for agent in agents {
        let credentials = if has_credentials(agent.provider) {
            "ready".green()
        } else {
            let var = agent.provider.credential_name().unwrap_or("credential");
            format!("missing {var}").red()
        };
        let tools: Vec<&str> = agent.tool_permissions.iter().map(String::as_str).collect();
        println!(
            "{}  {}/{}  tools: [{}]  {}",
            agent.agent_id.bold(),
            agent.provider,
            agent.model_settings.model_name,
            tools.join(", "),
            credentials
        );
        if !agent.description.is_empty() {
            println!("    {}", agent.description.dimmed());
        }
    }
}

pub fn print_tools(tools: &[ToolDescriptor]) {
    if tools.is_empty() {
        println!("{}", "No tools available".yellow());
        return;
    }
    for tool in tools {
        println!("{}  {}", tool.name.bold(), tool.description);
    }
}
