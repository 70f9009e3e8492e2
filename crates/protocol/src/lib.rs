//! # af-protocol
//!
//! Shared data models for agentflow.
//!
//! This crate defines all serializable structures used for:
//! - Agent and model settings (`.agentflow/agents/*.md`)
//! - Orchestrator settings (`.agentflow/config.toml`)
//! - Workflow plans and plan templates (`.agentflow/plans/*.yaml`)
//! - Persisted workflow state and its history
//! - Events broadcast by the orchestrator and usage telemetry
//!
//! ## Modules
//!
//! - [`settings_models`]: Provider, model and agent settings
//! - [`config_models`]: Orchestrator settings from config.toml
//! - [`plan_models`]: Step graph and plan templates
//! - [`workflow_models`]: Requests, workflow state, step records
//! - [`tool_models`]: Tool descriptors and results
//! - [`ipc`]: Workflow events and usage reports
//!
//! ## Design Principles
//!
//! - Minimal dependencies: only serde, chrono and uuid
//! - Independent compilation: no dependencies on other agentflow crates

pub mod config_models;
pub mod ipc;
pub mod plan_models;
pub mod settings_models;
pub mod tool_models;
pub mod workflow_models;

// Re-export all public types for convenience
pub use config_models::*;
pub use ipc::*;
pub use plan_models::*;
pub use settings_models::*;
pub use tool_models::*;
pub use workflow_models::*;
