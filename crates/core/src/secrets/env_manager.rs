//! Provider credential validation and export.

use crate::agents::base::AgentError;
use crate::secrets::provider::{EnvSecretProvider, SecretProvider};
use af_protocol::settings_models::{AgentSettings, Provider, SecretString};
use std::sync::Arc;
use tokio::process::Command;

/// Credentials resolved for one adapter.
#[derive(Debug, Clone)]
pub struct ProviderCredentials {
    pub provider: Provider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
}

impl ProviderCredentials {
    /// Credentials for a provider that needs none.
    pub fn none(provider: Provider) -> Self {
        Self {
            provider,
            api_key: None,
            base_url: None,
        }
    }

    /// Export the credentials into a child process environment.
    ///
    /// Only the variable names are logged.
    pub fn apply(&self, cmd: &mut Command) {
        if let (Some(var), Some(key)) = (self.provider.credential_name(), &self.api_key) {
            cmd.env(var, key.expose_secret());
            tracing::debug!(provider = %self.provider, var, "exported credential to child process");
        }
        if let (Some(var), Some(url)) = (self.provider.base_url_var(), &self.base_url) {
            cmd.env(var, url);
        }
    }
}

/// Validates and resolves provider credentials.
#[derive(Clone)]
pub struct EnvManager {
    secrets: Arc<dyn SecretProvider>,
}

impl EnvManager {
    pub fn new(secrets: Arc<dyn SecretProvider>) -> Self {
        Self { secrets }
    }

    /// Manager backed by the process environment.
    pub fn from_env() -> Self {
        Self::new(Arc::new(EnvSecretProvider))
    }

    /// Whether the credential for `provider` is available.
    ///
    /// Providers that need no credential always validate.
    pub fn validate_provider_keys(&self, provider: Provider) -> bool {
        match provider.credential_name() {
            Some(name) => self.secrets.get(name).is_some(),
            None => true,
        }
    }

    /// Resolve the credentials an adapter for `settings` needs.
    ///
    /// An api key set on the settings wins over the secret provider.
    ///
    /// # Errors
    ///
    /// Returns `AgentError::Configuration` when the provider needs a
    /// credential and none is available.
    pub fn resolve(&self, settings: &AgentSettings) -> Result<ProviderCredentials, AgentError> {
        let provider = settings.provider;
        let Some(var) = provider.credential_name() else {
            return Ok(ProviderCredentials::none(provider));
        };

        let api_key = settings
            .model_settings
            .api_key
            .clone()
            .filter(|key| !key.is_empty())
            .or_else(|| self.secrets.get(var))
            .ok_or_else(|| {
                tracing::warn!(provider = %provider, var, agent_id = %settings.agent_id, "missing provider credential");
                AgentError::Configuration(format!(
                    "{var} is not set; agent '{}' uses provider {provider}",
                    settings.agent_id
                ))
            })?;

        let base_url = settings.model_settings.base_url.clone().or_else(|| {
            provider
                .base_url_var()
                .and_then(|name| self.secrets.get(name))
                .map(|url| url.expose_secret().to_string())
        });

        Ok(ProviderCredentials {
            provider,
            api_key: Some(api_key),
            base_url,
        })
    }
}

impl std::fmt::Debug for EnvManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvManager").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::provider::StaticSecretProvider;
    use af_protocol::settings_models::ModelSettings;

    fn manager() -> EnvManager {
        EnvManager::new(Arc::new(
            StaticSecretProvider::new()
                .with("ANTHROPIC_API_KEY", "sk-ant")
                .with("ANTHROPIC_BASE_URL", "https://proxy.local"),
        ))
    }

    #[test]
    fn test_validate_provider_keys() {
        let env = manager();
        assert!(env.validate_provider_keys(Provider::Anthropic));
        assert!(!env.validate_provider_keys(Provider::OpenAi));
        assert!(env.validate_provider_keys(Provider::Mock));
    }

    #[test]
    fn test_resolve_from_secret_provider() {
        let settings = AgentSettings::new("a", Provider::Anthropic, ModelSettings::new("claude-sonnet-4.5"));
        let creds = manager().resolve(&settings).unwrap();
        assert_eq!(creds.api_key.map(|k| k.expose_secret().to_string()), Some("sk-ant".to_string()));
        assert_eq!(creds.base_url.as_deref(), Some("https://proxy.local"));
    }

    #[test]
    fn test_explicit_key_wins() {
        let settings = AgentSettings::new(
            "a",
            Provider::Anthropic,
            ModelSettings::new("claude-sonnet-4.5").with_api_key(SecretString::new("sk-explicit")),
        );
        let creds = manager().resolve(&settings).unwrap();
        assert_eq!(creds.api_key.map(|k| k.expose_secret().to_string()), Some("sk-explicit".to_string()));
    }

    #[test]
    fn test_missing_credential_is_configuration_error() {
        let settings = AgentSettings::new("coder", Provider::OpenAi, ModelSettings::new("gpt-5"));
        match manager().resolve(&settings) {
            Err(AgentError::Configuration(msg)) => {
                assert!(msg.contains("OPENAI_API_KEY"));
                assert!(msg.contains("coder"));
            }
            other => panic!("Expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn test_mock_needs_no_credential() {
        let settings = AgentSettings::new("m", Provider::Mock, ModelSettings::new("mock"));
        let creds = manager().resolve(&settings).unwrap();
        assert!(creds.api_key.is_none());
    }

    #[test]
    fn test_credentials_debug_is_redacted() {
        let settings = AgentSettings::new("a", Provider::Anthropic, ModelSettings::new("claude"));
        let creds = manager().resolve(&settings).unwrap();
        assert!(!format!("{creds:?}").contains("sk-ant"));
    }
}
