//! Common test utilities shared by the integration tests.
//!
//! This module provides:
//! - Fixtures (project directories, agent settings, wired orchestrators)
//! - Scripted mock agents and an adapter builder that counts creations
//! - Assertions over workflow events and states

pub mod assertions;
pub mod fixtures;
pub mod mock_agents;

#[allow(unused_imports)]
pub use assertions::*;
#[allow(unused_imports)]
pub use fixtures::*;
#[allow(unused_imports)]
pub use mock_agents::*;
