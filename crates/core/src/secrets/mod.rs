//! Credential lookup and export.
//!
//! Secret values come from a [`SecretProvider`]; the [`EnvManager`] validates
//! that a provider's credential is present and hands it to adapters. Values
//! are never logged, only the names of the variables carrying them.

pub mod env_manager;
pub mod provider;

pub use env_manager::{EnvManager, ProviderCredentials};
pub use provider::{EnvSecretProvider, SecretProvider, StaticSecretProvider};
