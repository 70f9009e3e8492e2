//! Agent and model settings.
//!
//! These records describe how an agent is built: which provider backs it,
//! which model it talks to, which credential it uses and which tools it may
//! call. They are immutable once an adapter has been built from them; a change
//! requires constructing a new record and rebuilding the adapter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// The AI provider backing an agent.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Anthropic,
    #[serde(rename = "openai")]
    OpenAi,
    Gemini,
    /// In-process scripted agent, used for tests and offline runs.
    Mock,
}

impl Provider {
    /// Infer the provider from a model name.
    ///
    /// Defaults to `Mock` if the model doesn't match any known pattern.
    ///
    /// # Examples
    ///
    /// ```
    /// use af_protocol::Provider;
    ///
    /// assert_eq!(Provider::infer_from_model("claude-sonnet-4.5"), Provider::Anthropic);
    /// assert_eq!(Provider::infer_from_model("gpt-5"), Provider::OpenAi);
    /// assert_eq!(Provider::infer_from_model("gemini-2.5-pro"), Provider::Gemini);
    /// assert_eq!(Provider::infer_from_model("unknown-model"), Provider::Mock);
    /// ```
    pub fn infer_from_model(model: &str) -> Self {
        let model_lower = model.to_lowercase();

        if model_lower.contains("claude")
            || model_lower.starts_with("sonnet")
            || model_lower.starts_with("opus")
            || model_lower.starts_with("haiku")
        {
            Self::Anthropic
        } else if model_lower.starts_with("gpt")
            || model_lower.contains("codex")
            || model_lower.starts_with("o3")
            || model_lower.starts_with("o4")
        {
            Self::OpenAi
        } else if model_lower.contains("gemini") {
            Self::Gemini
        } else {
            Self::Mock
        }
    }

    /// Get a human-readable name for the provider.
    pub fn name(self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
            Self::Gemini => "gemini",
            Self::Mock => "mock",
        }
    }

    /// Name of the secret holding this provider's API key.
    ///
    /// `None` for providers that need no credential.
    pub fn credential_name(self) -> Option<&'static str> {
        match self {
            Self::Anthropic => Some("ANTHROPIC_API_KEY"),
            Self::OpenAi => Some("OPENAI_API_KEY"),
            Self::Gemini => Some("GEMINI_API_KEY"),
            Self::Mock => None,
        }
    }

    /// Environment variable the provider runtime reads a custom endpoint from.
    pub fn base_url_var(self) -> Option<&'static str> {
        match self {
            Self::Anthropic => Some("ANTHROPIC_BASE_URL"),
            Self::OpenAi => Some("OPENAI_BASE_URL"),
            Self::Gemini => Some("GOOGLE_GEMINI_BASE_URL"),
            Self::Mock => None,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "openai" | "open-ai" | "codex" => Ok(Self::OpenAi),
            "gemini" | "google" => Ok(Self::Gemini),
            "mock" => Ok(Self::Mock),
            other => Err(format!("unknown provider '{other}'")),
        }
    }
}

/// An opaque credential value.
///
/// The plain value is only reachable through [`SecretString::expose_secret`].
/// `Debug`, `Display` and `Serialize` all emit a fixed mask.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct SecretString(String);

impl SecretString {
    const MASK: &'static str = "**********";

    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose_secret(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretString({})", Self::MASK)
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(Self::MASK)
    }
}

impl Serialize for SecretString {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(Self::MASK)
    }
}

fn default_temperature() -> f32 {
    0.7
}

/// Settings for the model behind an agent.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ModelSettings {
    /// Provider-specific model identifier (e.g. "claude-sonnet-4.5").
    pub model_name: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default)]
    pub max_tokens: Option<u32>,

    /// API key for the provider. Never written out in plain text.
    #[serde(default, skip_serializing)]
    pub api_key: Option<SecretString>,

    /// Custom endpoint for the provider.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Deadline for a single provider call.
    #[serde(default)]
    pub request_timeout_seconds: Option<u64>,
}

impl ModelSettings {
    pub fn new(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            temperature: default_temperature(),
            max_tokens: None,
            api_key: None,
            base_url: None,
            request_timeout_seconds: None,
        }
    }

    pub fn with_api_key(mut self, api_key: SecretString) -> Self {
        self.api_key = Some(api_key);
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_request_timeout(mut self, seconds: u64) -> Self {
        self.request_timeout_seconds = Some(seconds);
        self
    }
}

/// Settings for an AI agent, keyed by `agent_id` (the role name).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AgentSettings {
    /// Unique identifier for this agent. Workflows reference it as their role.
    pub agent_id: String,

    #[serde(default)]
    pub description: String,

    pub provider: Provider,

    pub model_settings: ModelSettings,

    /// Names of the tools this agent may invoke.
    #[serde(default)]
    pub tool_permissions: BTreeSet<String>,

    /// System prompt that initializes the agent context.
    #[serde(default)]
    pub system_prompt: String,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl AgentSettings {
    pub fn new(agent_id: impl Into<String>, provider: Provider, model_settings: ModelSettings) -> Self {
        Self {
            agent_id: agent_id.into(),
            description: String::new(),
            provider,
            model_settings,
            tool_permissions: BTreeSet::new(),
            system_prompt: String::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tool_permissions = tools.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Whether this agent may invoke the named tool.
    pub fn permits_tool(&self, tool_name: &str) -> bool {
        self.tool_permissions.contains(tool_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_provider() {
        assert_eq!(Provider::infer_from_model("Claude-Haiku-3.5"), Provider::Anthropic);
        assert_eq!(Provider::infer_from_model("opus-4.1"), Provider::Anthropic);
        assert_eq!(Provider::infer_from_model("gpt-4o"), Provider::OpenAi);
        assert_eq!(Provider::infer_from_model("openai-codex"), Provider::OpenAi);
        assert_eq!(Provider::infer_from_model("Gemini-Pro"), Provider::Gemini);
        assert_eq!(Provider::infer_from_model(""), Provider::Mock);
    }

    #[test]
    fn test_provider_from_str_aliases() {
        assert_eq!("claude".parse::<Provider>(), Ok(Provider::Anthropic));
        assert_eq!("Google".parse::<Provider>(), Ok(Provider::Gemini));
        assert_eq!("openai".parse::<Provider>(), Ok(Provider::OpenAi));
        assert!("bedrock".parse::<Provider>().is_err());
    }

    #[test]
    fn test_secret_is_masked() {
        let secret = SecretString::new("sk-live-123");
        assert_eq!(format!("{secret:?}"), "SecretString(**********)");
        assert_eq!(secret.to_string(), "**********");
        assert_eq!(secret.expose_secret(), "sk-live-123");
    }

    #[test]
    fn test_api_key_never_serialized() {
        let settings = ModelSettings::new("claude-sonnet-4.5").with_api_key(SecretString::new("sk-live-123"));
        let json = serde_json::to_string(&settings).unwrap();
        assert!(!json.contains("sk-live-123"));
        assert!(!json.contains("api_key"));
    }

    #[test]
    fn test_api_key_deserializes_from_plain_text() {
        let json = r#"{"model_name":"gpt-5","api_key":"sk-abc"}"#;
        let settings: ModelSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.api_key.map(|k| k.expose_secret().to_string()), Some("sk-abc".to_string()));
        assert_eq!(settings.temperature, 0.7);
    }

    #[test]
    fn test_permits_tool() {
        let settings = AgentSettings::new("dev", Provider::Mock, ModelSettings::new("mock"))
            .with_tools(["read_file", "echo"]);
        assert!(settings.permits_tool("echo"));
        assert!(!settings.permits_tool("run_command"));
    }
}
