//! Claude adapter implementation using Claude CLI subprocess.

use crate::agents::base::{AgentAdapter, AgentError, AgentEvent, AgentStream, ExecutionContext};
use crate::agents::cli_executor::{CliExecutor, CliInvocation};
use crate::agents::telemetry::Telemetry;
use crate::secrets::ProviderCredentials;
use af_protocol::ipc::UsageReport;
use af_protocol::settings_models::{ModelSettings, Provider};
use af_protocol::tool_models::ToolRequest;
use async_trait::async_trait;
use serde::Deserialize;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio_stream::StreamExt;

/// Claude adapter for executing instructions using Claude CLI.
///
/// This adapter spawns the `claude` CLI as a subprocess and parses its
/// `stream-json` output to create a stream of AgentEvents.
pub struct ClaudeAdapter {
    model: String,
    credentials: ProviderCredentials,
    telemetry: Telemetry,
    request_timeout: Option<Duration>,
}

impl ClaudeAdapter {
    /// Create a new Claude adapter.
    ///
    /// # Arguments
    ///
    /// * `model_settings` - Model id and request deadline
    /// * `credentials` - Resolved Anthropic credentials, exported to the child
    /// * `telemetry` - Sink for usage reports
    pub fn new(model_settings: &ModelSettings, credentials: ProviderCredentials, telemetry: Telemetry) -> Self {
        Self {
            model: model_settings.model_name.clone(),
            credentials,
            telemetry,
            request_timeout: model_settings.request_timeout_seconds.map(Duration::from_secs),
        }
    }

    /// Create a temporary settings file for the Claude CLI.
    ///
    /// The settings file contains the system prompt.
    fn create_settings_file(system_prompt: &str) -> Result<tempfile::NamedTempFile, AgentError> {
        use std::io::Write;

        let settings = serde_json::json!({
            "customSystemPrompt": system_prompt
        });

        let mut temp_file = tempfile::NamedTempFile::new()
            .map_err(|e| AgentError::Execution(format!("Failed to create temp file: {e}")))?;

        serde_json::to_writer(&mut temp_file, &settings)
            .map_err(|e| AgentError::Execution(format!("Failed to write settings: {e}")))?;

        temp_file
            .flush()
            .map_err(|e| AgentError::Execution(format!("Failed to flush settings: {e}")))?;

        Ok(temp_file)
    }

    fn build_args(&self, context: &ExecutionContext, settings_path: Option<&str>) -> Vec<String> {
        let mut args = vec![
            "--print".to_string(),
            context.instruction.clone(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
            "--model".to_string(),
            self.model.clone(),
            // Tool use is surfaced to the orchestrator instead of run by the CLI.
            "--max-turns".to_string(),
            "1".to_string(),
        ];
        if let Some(path) = settings_path {
            args.push("--settings".to_string());
            args.push(path.to_string());
        }
        args
    }
}

#[async_trait]
impl AgentAdapter for ClaudeAdapter {
    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn check_availability(&self) -> bool {
        match Command::new("claude")
            .arg("-h")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
        {
            Ok(status) => status.success(),
            Err(_) => false,
        }
    }

    async fn stream(&self, context: &ExecutionContext) -> Result<AgentStream, AgentError> {
        let settings_file = match &context.system_prompt {
            Some(prompt) => Some(Self::create_settings_file(prompt)?),
            None => None,
        };
        let settings_path = match &settings_file {
            Some(file) => Some(
                file.path()
                    .to_str()
                    .ok_or_else(|| AgentError::Execution("Invalid settings path".to_string()))?
                    .to_string(),
            ),
            None => None,
        };

        let invocation = CliInvocation::new(
            Provider::Anthropic,
            "claude",
            self.build_args(context, settings_path.as_deref()),
            context.project_path.clone(),
        )
        .with_credentials(self.credentials.clone());

        let mut values = CliExecutor::execute(invocation);
        let telemetry = self.telemetry.clone();
        let model = self.model.clone();
        let task_id = context.task_id.clone();

        let stream = async_stream::stream! {
            // The settings file must outlive the child process.
            let _settings_file = settings_file;
            let started = Instant::now();

            while let Some(value) = values.next().await {
                let value = match value {
                    Ok(value) => value,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };
                let message = match serde_json::from_value::<ClaudeMessage>(value) {
                    Ok(message) => message,
                    Err(e) => {
                        yield Err(AgentError::StreamParse(format!("Unexpected Claude message: {e}")));
                        return;
                    }
                };

                match message {
                    ClaudeMessage::Assistant { message } => {
                        for block in message.content {
                            if let Some(event) = block.into_event() {
                                yield Ok(event);
                            }
                        }
                    }
                    ClaudeMessage::Result { is_error, result, duration_ms, total_cost_usd, num_turns, usage } => {
                        let mut report = UsageReport::new(Provider::Anthropic, model.clone());
                        report.task_id = task_id.clone();
                        report.duration_ms = duration_ms.unwrap_or_else(|| elapsed_ms(started));
                        report.cost_usd = total_cost_usd;
                        report.num_turns = num_turns.unwrap_or(0);
                        if let Some(usage) = usage {
                            report.input_tokens = usage.input_tokens;
                            report.output_tokens = usage.output_tokens;
                        }
                        telemetry.record(report);

                        if is_error.unwrap_or(false) {
                            yield Err(AgentError::Provider {
                                provider: Provider::Anthropic,
                                status: None,
                                message: result.unwrap_or_else(|| "Claude reported an error".to_string()),
                            });
                        } else {
                            yield Ok(AgentEvent::Completed);
                        }
                        return;
                    }
                    ClaudeMessage::System | ClaudeMessage::User | ClaudeMessage::Other => {}
                }
            }
        };

        Ok(Box::pin(stream))
    }

    fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout
    }
}

pub(crate) fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Claude CLI message types (stream-json output).
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClaudeMessage {
    System,
    Assistant {
        message: AssistantMessage,
    },
    User,
    Result {
        is_error: Option<bool>,
        result: Option<String>,
        duration_ms: Option<u64>,
        total_cost_usd: Option<f64>,
        num_turns: Option<u32>,
        usage: Option<Usage>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

/// Content blocks within an assistant message.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
    },
    ToolUse {
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

impl ContentBlock {
    fn into_event(self) -> Option<AgentEvent> {
        match self {
            Self::Text { text } if !text.trim().is_empty() => Some(AgentEvent::MessageChunk(text)),
            Self::Thinking { thinking } => Some(AgentEvent::Thought(thinking)),
            Self::ToolUse { name, input } => Some(AgentEvent::ToolCall(ToolRequest::new(name, input))),
            _ => None,
        }
    }
}
