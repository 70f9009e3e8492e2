//! Agent factory for creating and caching adapters from settings.

use crate::agents::adapters::ClaudeAdapter;
use crate::agents::adapters::CodexAdapter;
use crate::agents::adapters::GeminiAdapter;
use crate::agents::adapters::MockAgent;
use crate::agents::base::AgentAdapter;
use crate::agents::base::AgentError;
use crate::agents::cache::AgentCache;
use crate::agents::cache::AgentHandle;
use crate::agents::cache::CacheKey;
use crate::agents::telemetry::Telemetry;
use crate::secrets::EnvManager;
use crate::secrets::ProviderCredentials;
use af_protocol::settings_models::AgentSettings;
use af_protocol::settings_models::Provider;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::PoisonError;
use std::sync::RwLock;
use std::time::Duration;

/// Builds an adapter from settings and resolved credentials.
#[async_trait]
pub trait AdapterBuilder: Send + Sync {
    async fn create_agent(
        &self,
        settings: &AgentSettings,
        credentials: ProviderCredentials,
    ) -> Result<Arc<dyn AgentAdapter>, AgentError>;
}

/// Builds the adapter matching `settings.provider`.
///
/// - Anthropic → `ClaudeAdapter`
/// - OpenAI → `CodexAdapter`
/// - Gemini → `GeminiAdapter`
/// - Mock → `MockAgent`
#[derive(Debug, Clone, Default)]
pub struct ProviderAdapterBuilder {
    telemetry: Telemetry,
}

impl ProviderAdapterBuilder {
    pub fn new(telemetry: Telemetry) -> Self {
        Self { telemetry }
    }
}

#[async_trait]
impl AdapterBuilder for ProviderAdapterBuilder {
    async fn create_agent(
        &self,
        settings: &AgentSettings,
        credentials: ProviderCredentials,
    ) -> Result<Arc<dyn AgentAdapter>, AgentError> {
        if credentials.provider != settings.provider {
            return Err(AgentError::Configuration(format!(
                "credentials for {} cannot build a {} adapter",
                credentials.provider, settings.provider
            )));
        }

        let model_settings = &settings.model_settings;
        let telemetry = self.telemetry.clone();
        let adapter: Arc<dyn AgentAdapter> = match settings.provider {
            Provider::Anthropic => Arc::new(ClaudeAdapter::new(model_settings, credentials, telemetry)),
            Provider::OpenAi => Arc::new(CodexAdapter::new(model_settings, credentials, telemetry)),
            Provider::Gemini => Arc::new(GeminiAdapter::new(model_settings, credentials, telemetry)),
            Provider::Mock => Arc::new(MockAgent::from_settings(model_settings).with_telemetry(telemetry)),
        };
        Ok(adapter)
    }
}

/// Creates adapters from settings, reusing cached ones.
///
/// The factory also keeps the registry of known agent settings so workflows
/// can resolve their role to an agent.
pub struct AgentFactory {
    builder: Arc<dyn AdapterBuilder>,
    cache: AgentCache,
    env: EnvManager,
    registry: RwLock<HashMap<String, Arc<AgentSettings>>>,
}

impl AgentFactory {
    pub fn new(builder: Arc<dyn AdapterBuilder>, env: EnvManager) -> Self {
        Self {
            builder,
            cache: AgentCache::new(),
            env,
            registry: RwLock::new(HashMap::new()),
        }
    }

    /// Register agent settings under their `agent_id`.
    ///
    /// Replacing settings that differ evicts the adapters built from the old
    /// record.
    pub fn register(&self, settings: AgentSettings) {
        let agent_id = settings.agent_id.clone();
        let previous = self
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(agent_id.clone(), Arc::new(settings.clone()));

        if previous.is_some_and(|old| *old != settings) {
            let evicted = self.cache.evict(&agent_id);
            tracing::info!(agent_id = %agent_id, evicted, "agent settings replaced");
        }
    }

    pub fn settings(&self, agent_id: &str) -> Option<Arc<AgentSettings>> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(agent_id)
            .cloned()
    }

    /// Registered agent ids, sorted.
    pub fn agent_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Return a cached adapter for `settings`, building one on a miss.
    ///
    /// # Errors
    ///
    /// Returns `AgentError::Configuration` when the provider's credential is
    /// missing or the builder rejects the settings.
    pub async fn get_or_create(&self, settings: &AgentSettings) -> Result<AgentHandle, AgentError> {
        let credentials = self.env.resolve(settings)?;
        let key = CacheKey::from_settings(settings);

        let builder = Arc::clone(&self.builder);
        let handle = self
            .cache
            .get_or_try_insert(&key, &settings.agent_id, || async move {
                tracing::info!(
                    agent_id = %settings.agent_id,
                    provider = %settings.provider,
                    model = %settings.model_settings.model_name,
                    "creating agent adapter"
                );
                builder.create_agent(settings, credentials).await
            })
            .await?;

        tracing::debug!(
            agent_id = %handle.agent_id,
            generation = handle.generation,
            "agent adapter ready"
        );
        Ok(handle)
    }

    /// Resolve a workflow role to its settings and adapter.
    pub async fn get_or_create_for_role(
        &self,
        role: &str,
    ) -> Result<(Arc<AgentSettings>, AgentHandle), AgentError> {
        let settings = self
            .settings(role)
            .ok_or_else(|| AgentError::Configuration(format!("no agent registered for role '{role}'")))?;
        let handle = self.get_or_create(&settings).await?;
        Ok((settings, handle))
    }

    pub fn evict(&self, agent_id: &str) -> usize {
        self.cache.evict(agent_id)
    }

    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let evicted = self.cache.evict_idle(max_idle);
        if evicted > 0 {
            tracing::debug!(evicted, "evicted idle agent adapters");
        }
        evicted
    }

    pub fn cache(&self) -> &AgentCache {
        &self.cache
    }
}
