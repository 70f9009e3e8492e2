//! Configuration models that aggregate all settings.
//!
//! This module provides the unified `AppConfig` structure that combines
//! orchestrator settings, agent settings, and plan templates into a single
//! configuration object.

use af_protocol::config_models::OrchestratorSettings;
use af_protocol::plan_models::PlanTemplate;
use af_protocol::settings_models::AgentSettings;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Name of the project configuration directory.
pub const CONFIG_DIR: &str = ".agentflow";

/// Unified application configuration loaded from `.agentflow/` directory.
///
/// This structure aggregates all configuration sources:
/// - `config.toml`: Orchestrator settings
/// - `agents/*.md`: Agent definitions
/// - `plans/*.yaml`: Plan templates
///
/// # Example
///
/// ```rust,no_run
/// use af_core::config::loader::load_config;
/// use std::path::Path;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = load_config(Path::new(".")).await?;
/// println!("Loaded {} agents and {} plan templates",
///          config.agents.len(),
///          config.plans.len());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    /// Orchestrator settings from `config.toml`.
    pub settings: OrchestratorSettings,

    /// All agent settings loaded from `agents/*.md`.
    pub agents: Vec<AgentSettings>,

    /// All plan templates loaded from `plans/*.yaml`.
    pub plans: Vec<PlanTemplate>,
}

impl AppConfig {
    /// Look up an agent by id.
    pub fn agent(&self, agent_id: &str) -> Option<&AgentSettings> {
        self.agents.iter().find(|a| a.agent_id == agent_id)
    }

    /// Directory for persisted workflow state, resolved against `root`.
    pub fn state_dir(&self, root: &Path) -> PathBuf {
        match &self.settings.state_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => root.join(dir),
            None => root.join(CONFIG_DIR).join("state"),
        }
    }
}

/// Front matter of an agent definition in `agents/*.md`.
///
/// ```markdown
/// ---
/// name: deployer
/// description: Ships releases
/// model: claude-sonnet-4.5
/// tools: [read_file, echo]
/// ---
///
/// You deploy things carefully.
/// ```
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct AgentDefinition {
    pub name: String,

    #[serde(default)]
    pub description: String,

    pub model: String,

    /// Inferred from `model` when absent.
    #[serde(default)]
    pub provider: Option<String>,

    #[serde(default)]
    pub temperature: Option<f32>,

    #[serde(default)]
    pub max_tokens: Option<u32>,

    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default)]
    pub request_timeout_seconds: Option<u64>,

    #[serde(default)]
    pub tools: Vec<String>,
}
