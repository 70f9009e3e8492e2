//! Configuration loading and management.
//!
//! This module loads orchestrator settings, agent definitions and plan
//! templates from the `.agentflow/` directory structure.

pub mod error;
pub mod loader;
pub mod models;
