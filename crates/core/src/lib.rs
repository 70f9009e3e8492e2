//! # af-core
//!
//! Agent orchestration engine for agentflow.
//!
//! This crate provides:
//! - Configuration loading from the `.agentflow/` directory
//! - Credential lookup for model providers
//! - Agent abstraction layer, adapter cache and factory
//! - Tool clients (in-process and JSON-RPC gateway)
//! - The workflow state machine, step engine and orchestrator
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and management
//! - [`secrets`]: Secret providers and credential export
//! - [`agents`]: Agent trait, adapters, cache and factory
//! - [`mcp`]: Tool client trait and implementations
//! - [`engine`]: Plan construction and step execution
//! - [`state`]: Workflow state machine and state stores
//! - [`orchestrator`]: Submission, status, approval and cancellation

pub mod agents;
pub mod config;
pub mod engine;
pub mod mcp;
pub mod orchestrator;
pub mod secrets;
pub mod state;

pub use orchestrator::{Orchestrator, OrchestratorError};
