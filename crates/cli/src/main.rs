//! `agentflow` command-line entry point.
//!
//! Every invocation loads `.agentflow/` from the project root, wires an
//! orchestrator over the persisted state directory and runs one command.

mod commands;
mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Run agent workflows with approval gates and tool access.
#[derive(Parser, Debug)]
#[command(name = "agentflow", author, version, about)]
struct Cli {
    /// Project directory containing `.agentflow/`
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit a workflow and follow it until it completes or needs approval
    Run {
        /// Agent role (agent id) that executes the workflow
        #[arg(long)]
        role: String,

        /// What the workflow should accomplish
        #[arg(long)]
        task: String,

        /// Explicit task id; generated when omitted
        #[arg(long)]
        task_id: Option<String>,

        /// Workflow deadline in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Prompt for the step run when an approval gate is rejected
        #[arg(long)]
        remediation: Option<String>,

        /// Print the task id and exit without waiting
        #[arg(long)]
        no_wait: bool,
    },

    /// Show the state of a workflow
    Status {
        task_id: String,

        /// Resume the workflow if it was interrupted and wait for it to settle
        #[arg(long)]
        wait: bool,
    },

    /// Approve the pending gate of a workflow and continue it
    Approve {
        task_id: String,

        #[arg(long)]
        comment: Option<String>,

        /// Who is deciding; recorded with the decision
        #[arg(long)]
        by: Option<String>,
    },

    /// Reject the pending gate of a workflow
    Reject {
        task_id: String,

        /// Reason for the rejection
        #[arg(long)]
        comment: Option<String>,

        #[arg(long)]
        by: Option<String>,
    },

    /// Cancel a workflow
    Cancel {
        task_id: String,

        #[arg(long)]
        reason: Option<String>,

        #[arg(long)]
        by: Option<String>,
    },

    /// List configured agents and whether their credentials are present
    Agents,

    /// List tools offered by the configured tool backend
    Tools,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = Cli::parse();
    commands::dispatch(&cli.root, cli.command).await
}
