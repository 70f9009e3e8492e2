//! Sources of secret values.

use af_protocol::settings_models::SecretString;
use std::collections::HashMap;

/// Supplies credential values by name.
pub trait SecretProvider: Send + Sync {
    /// Look up a secret. Empty values count as absent.
    fn get(&self, name: &str) -> Option<SecretString>;
}

/// Reads secrets from the process environment.
#[derive(Debug, Default, Clone)]
pub struct EnvSecretProvider;

impl SecretProvider for EnvSecretProvider {
    fn get(&self, name: &str) -> Option<SecretString> {
        std::env::var(name)
            .ok()
            .map(SecretString::new)
            .filter(|secret| !secret.is_empty())
    }
}

/// Fixed in-memory secrets, for tests and embedding.
#[derive(Debug, Default, Clone)]
pub struct StaticSecretProvider {
    values: HashMap<String, SecretString>,
}

impl StaticSecretProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), SecretString::new(value));
        self
    }
}

impl SecretProvider for StaticSecretProvider {
    fn get(&self, name: &str) -> Option<SecretString> {
        self.values.get(name).filter(|secret| !secret.is_empty()).cloned()
    }
}
