//! Agent abstraction layer.
//!
//! This module provides the `AgentAdapter` trait (one implementation per
//! provider), the keyed adapter cache and the `AgentFactory` that builds and
//! reuses adapters from settings.

pub mod adapters;
pub mod base;
pub mod cache;
pub mod cli_executor;
pub mod factory;
pub mod telemetry;

pub use adapters::MockAgent;
pub use base::{AgentAdapter, AgentError, AgentEvent, AgentOutput, AgentStream, ExecutionContext};
pub use cache::{AgentCache, AgentHandle, CacheKey};
pub use factory::{AdapterBuilder, AgentFactory, ProviderAdapterBuilder};
pub use telemetry::Telemetry;
