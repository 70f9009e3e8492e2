//! Test fixtures and helper functions.

use super::mock_agents::ScriptedBuilder;
use af_core::agents::AgentFactory;
use af_core::engine::WorkflowEngine;
use af_core::mcp::{LocalToolClient, ToolClient};
use af_core::secrets::{EnvManager, StaticSecretProvider};
use af_core::state::{MemoryStore, StateStore};
use af_core::Orchestrator;
use af_protocol::config_models::OrchestratorSettings;
use af_protocol::plan_models::PlanTemplate;
use af_protocol::settings_models::{AgentSettings, ModelSettings, Provider};
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const POLL: Duration = Duration::from_millis(10);

/// Creates a temporary project with a complete `.agentflow/` directory.
///
/// - `config.toml` with a short timeout and the `retry_once` policy
/// - `agents/dev.md` (mock model, echo + read_file)
/// - `agents/slow.md` (mock model sleeping 5 seconds per call)
/// - `plans/reviewer.yaml` with an approval gate and a remediation branch
/// - `README.md` readable through the `read_file` tool
#[allow(dead_code)]
pub fn create_test_project() -> TempDir {
    let temp = TempDir::new().unwrap();
    let af_dir = temp.path().join(".agentflow");
    fs::create_dir_all(af_dir.join("agents")).unwrap();
    fs::create_dir_all(af_dir.join("plans")).unwrap();

    fs::write(
        af_dir.join("config.toml"),
        r#"
default_timeout_seconds = 30
tool_failure_policy = "retry_once"
approval_keywords = ["deploy"]
retry_delay_ms = 10
"#,
    )
    .unwrap();

    fs::write(
        af_dir.join("agents/dev.md"),
        r#"---
name: dev
description: General developer
model: mock
provider: mock
tools: [echo, read_file]
---

You are a careful developer."#,
    )
    .unwrap();

    fs::write(
        af_dir.join("agents/slow.md"),
        r#"---
name: slow
model: mock-slow-5
provider: mock
---

You take your time."#,
    )
    .unwrap();

    fs::write(
        af_dir.join("plans/reviewer.yaml"),
        r#"role: dev
description: Review then publish
steps:
  - name: review
    type: agent
    prompt: "Review: {task}"
  - name: publish-gate
    type: approval
    proposed_action: "Publish {task}"
    on_reject:
      - name: revise
        type: agent
        prompt: "Revise after rejection"
  - name: read-readme
    type: tool
    tool_name: read_file
    arguments:
      path: README.md
  - name: finalize
    type: finalize
"#,
    )
    .unwrap();

    fs::write(temp.path().join("README.md"), "# demo project\n").unwrap();

    temp
}

/// Mock-provider settings for `agent_id` on `model`.
#[allow(dead_code)]
pub fn mock_settings(agent_id: &str, model: &str) -> AgentSettings {
    AgentSettings::new(agent_id, Provider::Mock, ModelSettings::new(model))
        .with_system_prompt(format!("You are {agent_id}."))
}

/// Settings tuned for fast tests.
#[allow(dead_code)]
pub fn fast_settings() -> OrchestratorSettings {
    OrchestratorSettings {
        default_timeout_seconds: 30,
        retry_delay_ms: 1,
        approval_keywords: vec!["deploy".to_string()],
        ..OrchestratorSettings::default()
    }
}

/// An orchestrator over a memory store, builtin local tools and a scripted
/// adapter builder, plus handles to the pieces tests poke at.
#[allow(dead_code)]
pub struct Harness {
    pub orchestrator: Orchestrator,
    pub builder: Arc<ScriptedBuilder>,
    pub tools: Arc<LocalToolClient>,
    pub store: Arc<dyn StateStore>,
    pub project: TempDir,
}

#[allow(dead_code)]
impl Harness {
    pub fn new(settings: OrchestratorSettings, builder: ScriptedBuilder, agents: Vec<AgentSettings>) -> Self {
        Self::with_store(settings, builder, agents, Arc::new(MemoryStore::new()), Vec::new())
    }

    pub fn with_store(
        settings: OrchestratorSettings,
        builder: ScriptedBuilder,
        agents: Vec<AgentSettings>,
        store: Arc<dyn StateStore>,
        templates: Vec<PlanTemplate>,
    ) -> Self {
        let project = TempDir::new().unwrap();
        fs::write(project.path().join("notes.txt"), "hello from notes").unwrap();

        let builder = Arc::new(builder);
        let factory = Arc::new(AgentFactory::new(
            builder.clone(),
            EnvManager::new(Arc::new(StaticSecretProvider::new())),
        ));
        for agent in agents {
            factory.register(agent);
        }

        let tools = Arc::new(LocalToolClient::with_builtins(
            project.path(),
            Duration::from_secs(settings.tool_timeout_seconds),
        ));
        let tool_client: Arc<dyn ToolClient> = tools.clone();
        let engine = WorkflowEngine::new(factory, tool_client, &settings)
            .with_project_path(project.path().display().to_string());

        let orchestrator = Orchestrator::new(settings, engine, store.clone(), templates);
        Self {
            orchestrator,
            builder,
            tools,
            store,
            project,
        }
    }

    /// A harness with one `dev` agent on the echoing mock model.
    pub fn simple() -> Self {
        Self::new(
            fast_settings(),
            ScriptedBuilder::new(),
            vec![mock_settings("dev", "mock").with_tools(["echo", "read_file", "flaky"])],
        )
    }
}
