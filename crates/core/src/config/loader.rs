//! Configuration file loader for `.agentflow/` directory structure.
//!
//! This module provides functionality to load and parse all configuration files
//! from the `.agentflow/` directory, including:
//! - `config.toml`: Orchestrator settings
//! - `agents/*.md`: Agent definitions with YAML front matter
//! - `plans/*.yaml`: Plan templates keyed by agent role

use crate::config::error::ConfigError;
use crate::config::error::ConfigResult;
use crate::config::models::AgentDefinition;
use crate::config::models::AppConfig;
use crate::config::models::CONFIG_DIR;
use af_protocol::config_models::OrchestratorSettings;
use af_protocol::plan_models::Plan;
use af_protocol::plan_models::PlanTemplate;
use af_protocol::settings_models::AgentSettings;
use af_protocol::settings_models::ModelSettings;
use af_protocol::settings_models::Provider;
use gray_matter::engine::YAML;
use gray_matter::Matter;
use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;
use walkdir::WalkDir;

/// Loads all configuration from the `.agentflow/` directory.
///
/// # Arguments
///
/// * `root` - Root directory containing the `.agentflow/` folder
///
/// # Returns
///
/// An `AppConfig` containing all loaded configuration. If directories or files
/// are missing (but the root exists), returns an empty/default configuration
/// rather than an error.
///
/// # Errors
///
/// Returns `ConfigError` if:
/// - Files exist but cannot be read
/// - Files have invalid syntax (TOML, YAML, or Markdown front matter)
/// - An agent names an unknown provider, or two agents share an id
/// - A plan template fails validation or two templates share a role
///
/// # Example
///
/// ```rust,no_run
/// use af_core::config::loader::load_config;
/// use std::path::Path;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = load_config(Path::new(".")).await?;
/// println!("Loaded {} agents", config.agents.len());
/// # Ok(())
/// # }
/// ```
pub async fn load_config(root: &Path) -> ConfigResult<AppConfig> {
    let af_dir = root.join(CONFIG_DIR);

    if !af_dir.exists() {
        tracing::debug!(root = %root.display(), "no {CONFIG_DIR} directory, using defaults");
        return Ok(AppConfig::default());
    }

    let settings = load_settings(&af_dir)?;
    let agents = load_agents(&af_dir)?;
    let plans = load_plans(&af_dir)?;

    tracing::debug!(
        agents = agents.len(),
        plans = plans.len(),
        "loaded configuration"
    );

    Ok(AppConfig {
        settings,
        agents,
        plans,
    })
}

/// Loads orchestrator settings from `config.toml`.
fn load_settings(af_dir: &Path) -> ConfigResult<OrchestratorSettings> {
    let config_path = af_dir.join("config.toml");

    if !config_path.exists() {
        return Ok(OrchestratorSettings::default());
    }

    let content =
        std::fs::read_to_string(&config_path).map_err(|source| ConfigError::FileRead {
            path: config_path.clone(),
            source,
        })?;

    toml::from_str(&content).map_err(|source| ConfigError::TomlParse {
        path: config_path,
        source,
    })
}

/// Files directly inside `dir` whose extension is one of `extensions`, in
/// file name order.
fn config_files(dir: &Path, extensions: &[&str]) -> ConfigResult<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|source| ConfigError::DirectoryWalk {
            path: dir.to_path_buf(),
            source,
        })?;

        let path = entry.path();
        let ext = path.extension().and_then(|s| s.to_str());
        if ext.is_some_and(|ext| extensions.contains(&ext)) {
            files.push(path.to_path_buf());
        }
    }
    Ok(files)
}

/// Loads all agent definitions from `agents/*.md`.
fn load_agents(af_dir: &Path) -> ConfigResult<Vec<AgentSettings>> {
    let mut agents = Vec::new();
    let mut seen = HashSet::new();

    for path in config_files(&af_dir.join("agents"), &["md"])? {
        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::FileRead {
            path: path.clone(),
            source,
        })?;

        let matter = Matter::<YAML>::new();
        let result = matter.parse(&content);

        let definition: AgentDefinition = result
            .data
            .ok_or_else(|| ConfigError::MarkdownParse {
                path: path.clone(),
                reason: "Missing YAML front matter".to_string(),
            })?
            .deserialize()
            .map_err(|e| ConfigError::MarkdownParse {
                path: path.clone(),
                reason: format!("Failed to deserialize front matter: {e}"),
            })?;

        let settings = agent_settings(definition, result.content.trim().to_string(), &path)?;

        if !seen.insert(settings.agent_id.clone()) {
            return Err(ConfigError::DuplicateAgent {
                path,
                agent_id: settings.agent_id,
            });
        }
        agents.push(settings);
    }

    Ok(agents)
}

/// Converts front matter and Markdown body into agent settings.
fn agent_settings(
    definition: AgentDefinition,
    system_prompt: String,
    path: &Path,
) -> ConfigResult<AgentSettings> {
    let provider = match definition.provider.as_deref() {
        Some(name) => name
            .parse::<Provider>()
            .map_err(|reason| ConfigError::UnknownProvider {
                path: path.to_path_buf(),
                reason,
            })?,
        None => Provider::infer_from_model(&definition.model),
    };

    let mut model_settings = ModelSettings::new(definition.model);
    if let Some(temperature) = definition.temperature {
        model_settings = model_settings.with_temperature(temperature);
    }
    model_settings.max_tokens = definition.max_tokens;
    model_settings.base_url = definition.base_url;
    model_settings.request_timeout_seconds = definition.request_timeout_seconds;

    Ok(AgentSettings::new(definition.name, provider, model_settings)
        .with_description(definition.description)
        .with_tools(definition.tools)
        .with_system_prompt(system_prompt))
}

/// Loads all plan templates from `plans/*.yaml`.
fn load_plans(af_dir: &Path) -> ConfigResult<Vec<PlanTemplate>> {
    let mut plans = Vec::new();
    let mut roles = HashSet::new();

    for path in config_files(&af_dir.join("plans"), &["yaml", "yml"])? {
        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::FileRead {
            path: path.clone(),
            source,
        })?;

        let template: PlanTemplate =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::YamlParse {
                path: path.clone(),
                source,
            })?;

        Plan::compile(&template.steps)
            .validate()
            .map_err(|source| ConfigError::InvalidPlan {
                path: path.clone(),
                source,
            })?;

        if !roles.insert(template.role.clone()) {
            return Err(ConfigError::DuplicatePlanRole {
                path,
                role: template.role,
            });
        }
        plans.push(template);
    }

    Ok(plans)
}
