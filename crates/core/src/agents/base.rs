//! Base adapter trait and supporting types.

use af_protocol::settings_models::Provider;
use af_protocol::tool_models::ToolRequest;
use af_protocol::workflow_models::FailureKind;
use async_trait::async_trait;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tokio_stream::Stream;
use tokio_stream::StreamExt;

/// Context information passed to agents during execution.
///
/// Per-call parameters travel here rather than in the cached adapter, so one
/// adapter can serve every workflow that shares its cache key.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// The user instruction (prompt).
    pub instruction: String,

    /// System prompt of the agent driving the call.
    pub system_prompt: Option<String>,

    pub temperature: Option<f32>,

    pub max_tokens: Option<u32>,

    /// Workflow this call belongs to, for telemetry.
    pub task_id: Option<String>,

    /// The project path (working directory).
    pub project_path: String,

    /// Tools the agent may request.
    pub allowed_tools: Vec<String>,
}

impl ExecutionContext {
    /// Create a new ExecutionContext with the given instruction.
    ///
    /// Defaults:
    /// - project_path: current directory
    /// - everything else: unset/empty
    pub fn new(instruction: String) -> Self {
        Self {
            instruction,
            system_prompt: None,
            temperature: None,
            max_tokens: None,
            task_id: None,
            project_path: std::env::current_dir()
                .ok()
                .and_then(|p| p.to_str().map(|s| s.to_string()))
                .unwrap_or_else(|| ".".to_string()),
            allowed_tools: Vec::new(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        self.system_prompt = (!prompt.is_empty()).then_some(prompt);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    /// Set the project path.
    pub fn with_project_path(mut self, path: String) -> Self {
        self.project_path = path;
        self
    }

    pub fn with_allowed_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_tools = tools.into_iter().map(Into::into).collect();
        self
    }
}

/// One chunk of an agent's streamed response.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    Thought(String),
    /// The agent asks for a tool to be run on its behalf.
    ToolCall(ToolRequest),
    MessageChunk(String),
    Completed,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
    /// Credentials or settings are missing or invalid.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The upstream call failed. `status` is the provider's raw status, the
    /// process exit code for CLI-backed adapters.
    #[error("{provider} call failed (status {status:?}): {message}")]
    Provider {
        provider: Provider,
        status: Option<i32>,
        message: String,
    },

    #[error("No response within {0:?}")]
    Timeout(Duration),

    #[error("Agent not available: {0}")]
    NotAvailable(String),

    #[error("Stream parsing error: {0}")]
    StreamParse(String),

    #[error("Execution failed: {0}")]
    Execution(String),
}

impl AgentError {
    /// Category recorded on the workflow when this error fails a step.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Configuration(_) => FailureKind::Configuration,
            Self::Timeout(_) => FailureKind::Timeout,
            Self::Provider { .. }
            | Self::NotAvailable(_)
            | Self::StreamParse(_)
            | Self::Execution(_) => FailureKind::Provider,
        }
    }

    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Provider { .. } | Self::Timeout(_) | Self::StreamParse(_) | Self::Execution(_)
        )
    }
}

pub type AgentStream = Pin<Box<dyn Stream<Item = Result<AgentEvent, AgentError>> + Send>>;

/// Collected result of a finished agent call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentOutput {
    /// Concatenated message chunks.
    pub text: String,
    pub thoughts: Vec<String>,
    /// Tool requests in the order the agent made them.
    pub tool_calls: Vec<ToolRequest>,
}

impl AgentOutput {
    /// Drain a stream until `Completed`, its end, or the first error.
    pub async fn collect(mut stream: AgentStream) -> Result<Self, AgentError> {
        let mut output = Self::default();
        while let Some(event) = stream.next().await {
            match event? {
                AgentEvent::Thought(thought) => output.thoughts.push(thought),
                AgentEvent::ToolCall(request) => output.tool_calls.push(request),
                AgentEvent::MessageChunk(chunk) => output.text.push_str(&chunk),
                AgentEvent::Completed => break,
            }
        }
        Ok(output)
    }
}

/// A model-backed agent behind a uniform interface.
///
/// One implementation exists per [`Provider`]. Instances are shared between
/// workflows through the agent cache, so implementations must not keep
/// per-call state.
#[async_trait]
pub trait AgentAdapter: Send + Sync {
    fn provider(&self) -> Provider;

    fn model_name(&self) -> &str;

    async fn check_availability(&self) -> bool;

    /// Start a provider call and return its events lazily.
    ///
    /// The stream is finite and not restartable; calling `stream` again
    /// issues a new provider call.
    async fn stream(&self, context: &ExecutionContext) -> Result<AgentStream, AgentError>;

    /// Deadline for a single call, if the adapter has one.
    fn request_timeout(&self) -> Option<Duration> {
        None
    }

    /// Run a call to completion under the adapter's request deadline.
    async fn run(&self, context: &ExecutionContext) -> Result<AgentOutput, AgentError> {
        let call = async {
            let stream = self.stream(context).await?;
            AgentOutput::collect(stream).await
        };

        match self.request_timeout() {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| AgentError::Timeout(limit))?,
            None => call.await,
        }
    }
}
