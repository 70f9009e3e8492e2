//! Codex adapter implementation using the OpenAI Codex CLI.
//!
//! Runs `codex exec --json`, which prints one JSON event per line.

use crate::agents::adapters::claude_adapter::elapsed_ms;
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

/// Codex adapter for executing instructions using OpenAI Codex CLI.
pub struct CodexAdapter {
    model: String,
    credentials: ProviderCredentials,
    telemetry: Telemetry,
    request_timeout: Option<Duration>,
}

impl CodexAdapter {
    pub fn new(model_settings: &ModelSettings, credentials: ProviderCredentials, telemetry: Telemetry) -> Self {
        Self {
            model: model_settings.model_name.clone(),
            credentials,
            telemetry,
            request_timeout: model_settings.request_timeout_seconds.map(Duration::from_secs),
        }
    }

    /// Determine the codex executable name based on platform.
    fn get_executable_name() -> &'static str {
        if cfg!(target_os = "windows") {
            "codex.cmd"
        } else {
            "codex"
        }
    }

    /// Codex has no system prompt flag, so the prompt is prepended.
    fn build_args(&self, context: &ExecutionContext) -> Vec<String> {
        let prompt = match &context.system_prompt {
            Some(system) => format!("{system}\n\n{}", context.instruction),
            None => context.instruction.clone(),
        };
        vec![
            "exec".to_string(),
            "--json".to_string(),
            "--skip-git-repo-check".to_string(),
            "--model".to_string(),
            self.model.clone(),
            prompt,
        ]
    }
}

#[async_trait]
impl AgentAdapter for CodexAdapter {
    fn provider(&self) -> Provider {
        Provider::OpenAi
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn check_availability(&self) -> bool {
        Command::new(Self::get_executable_name())
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    async fn stream(&self, context: &ExecutionContext) -> Result<AgentStream, AgentError> {
        let invocation = CliInvocation::new(
            Provider::OpenAi,
            Self::get_executable_name(),
            self.build_args(context),
            context.project_path.clone(),
        )
        .with_credentials(self.credentials.clone());

        let mut values = CliExecutor::execute(invocation);
        let telemetry = self.telemetry.clone();
        let model = self.model.clone();
        let task_id = context.task_id.clone();

        let stream = async_stream::stream! {
            let started = Instant::now();
            let mut report = UsageReport::new(Provider::OpenAi, model);
            report.task_id = task_id;
            let mut completed = false;

            while let Some(value) = values.next().await {
                let value = match value {
                    Ok(value) => value,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };
                let event = match serde_json::from_value::<CodexEvent>(value) {
                    Ok(event) => event,
                    Err(e) => {
                        yield Err(AgentError::StreamParse(format!("Unexpected Codex event: {e}")));
                        return;
                    }
                };

                match event {
                    CodexEvent::ItemCompleted { item } => {
                        if let Some(event) = item.into_event() {
                            yield Ok(event);
                        }
                    }
                    CodexEvent::TurnCompleted { usage } => {
                        report.num_turns += 1;
                        if let Some(usage) = usage {
                            report.input_tokens += usage.input_tokens;
                            report.output_tokens += usage.output_tokens;
                        }
                        completed = true;
                    }
                    CodexEvent::TurnFailed { error } | CodexEvent::Error { error } => {
                        yield Err(AgentError::Provider {
                            provider: Provider::OpenAi,
                            status: None,
                            message: error.message,
                        });
                        return;
                    }
                    CodexEvent::Other => {}
                }
            }

            report.duration_ms = elapsed_ms(started);
            telemetry.record(report);
            if completed {
                yield Ok(AgentEvent::Completed);
            }
        };

        Ok(Box::pin(stream))
    }

    fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum CodexEvent {
    #[serde(rename = "item.completed")]
    ItemCompleted { item: CodexItem },
    #[serde(rename = "turn.completed")]
    TurnCompleted { usage: Option<CodexUsage> },
    #[serde(rename = "turn.failed")]
    TurnFailed { error: CodexError },
    #[serde(rename = "error")]
    Error {
        #[serde(flatten)]
        error: CodexError,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum CodexItem {
    AgentMessage {
        text: String,
    },
    Reasoning {
        text: String,
    },
    McpToolCall {
        tool: String,
        #[serde(default)]
        arguments: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

impl CodexItem {
    fn into_event(self) -> Option<AgentEvent> {
        match self {
            Self::AgentMessage { text } => Some(AgentEvent::MessageChunk(text)),
            Self::Reasoning { text } => Some(AgentEvent::Thought(text)),
            Self::McpToolCall { tool, arguments } => Some(AgentEvent::ToolCall(ToolRequest::new(tool, arguments))),
            Self::Other => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CodexUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct CodexError {
    message: String,
}
