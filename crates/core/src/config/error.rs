//! Configuration loading errors.
//!
//! Every variant carries the path of the offending file so a malformed
//! `.agentflow/` tree can be fixed without guessing.

use af_protocol::plan_models::PlanError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// `config.toml` is not valid TOML or has a field of the wrong type.
    #[error("Failed to parse TOML file at {path}: {source}")]
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// A plan template under `plans/` is not valid YAML.
    #[error("Failed to parse YAML file at {path}: {source}")]
    YamlParse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    /// Missing or malformed front matter in an agent definition.
    #[error("Failed to parse Markdown front matter in {path}: {reason}")]
    MarkdownParse { path: PathBuf, reason: String },

    #[error("Failed to traverse directory {path}: {source}")]
    DirectoryWalk {
        path: PathBuf,
        source: walkdir::Error,
    },

    #[error("Unknown provider in {path}: {reason}")]
    UnknownProvider { path: PathBuf, reason: String },

    /// Two agent definitions share an id.
    #[error("Duplicate agent id '{agent_id}' in {path}")]
    DuplicateAgent { path: PathBuf, agent_id: String },

    /// Two plan templates target the same role.
    #[error("Duplicate plan template for role '{role}' in {path}")]
    DuplicatePlanRole { path: PathBuf, role: String },

    /// A plan template compiles to a plan that fails validation.
    #[error("Invalid plan template in {path}: {source}")]
    InvalidPlan {
        path: PathBuf,
        #[source]
        source: PlanError,
    },
}

pub type ConfigResult<T> = Result<T, ConfigError>;
