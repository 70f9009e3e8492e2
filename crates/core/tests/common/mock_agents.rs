//! Mock agents for deterministic testing.

use af_core::agents::base::{AgentAdapter, AgentError, AgentEvent};
use af_core::agents::factory::AdapterBuilder;
use af_core::agents::MockAgent;
use af_core::secrets::ProviderCredentials;
use af_protocol::settings_models::AgentSettings;
use af_protocol::tool_models::ToolRequest;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Builds adapters from a model-name script, counting every creation.
///
/// Models without a script fall back to [`MockAgent::from_settings`].
#[derive(Default)]
pub struct ScriptedBuilder {
    scripts: Mutex<HashMap<String, MockAgent>>,
    created: AtomicUsize,
    creation_delay: Option<Duration>,
}

#[allow(dead_code)]
impl ScriptedBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `agent` for every adapter built for `model`.
    pub fn script(self, model: &str, agent: MockAgent) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(model.to_string(), agent);
        self
    }

    /// Make each creation take `delay`, to widen race windows.
    pub fn with_creation_delay(mut self, delay: Duration) -> Self {
        self.creation_delay = Some(delay);
        self
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AdapterBuilder for ScriptedBuilder {
    async fn create_agent(
        &self,
        settings: &AgentSettings,
        _credentials: ProviderCredentials,
    ) -> Result<Arc<dyn AgentAdapter>, AgentError> {
        self.created.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.creation_delay {
            tokio::time::sleep(delay).await;
        }
        let model = &settings.model_settings.model_name;
        let agent = self
            .scripts
            .lock()
            .unwrap()
            .get(model)
            .cloned()
            .unwrap_or_else(|| MockAgent::from_settings(&settings.model_settings));
        Ok(Arc::new(agent))
    }
}

/// An agent that requests each tool in order, then answers `reply`.
#[allow(dead_code)]
pub fn tool_calling_agent(calls: &[(&str, Value)], reply: &str) -> MockAgent {
    let mut events: Vec<Result<AgentEvent, AgentError>> = calls
        .iter()
        .map(|(name, arguments)| Ok(AgentEvent::ToolCall(ToolRequest::new(*name, arguments.clone()))))
        .collect();
    events.push(Ok(AgentEvent::MessageChunk(reply.to_string())));
    events.push(Ok(AgentEvent::Completed));
    MockAgent::new(true, events)
}
