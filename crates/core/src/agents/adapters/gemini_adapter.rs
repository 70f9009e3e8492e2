//! Gemini adapter implementation using the Gemini CLI.
//!
//! Runs `gemini --output-format stream-json`, which prints one JSON event
//! per line.

use crate::agents::adapters::claude_adapter::elapsed_ms;
use crate::agents::base::AgentAdapter;
use crate::agents::base::AgentError;
use crate::agents::base::AgentEvent;
use crate::agents::base::AgentStream;
use crate::agents::base::ExecutionContext;
use crate::agents::cli_executor::CliExecutor;
use crate::agents::cli_executor::CliInvocation;
use crate::agents::telemetry::Telemetry;
use crate::secrets::ProviderCredentials;
use af_protocol::ipc::UsageReport;
use af_protocol::settings_models::ModelSettings;
use af_protocol::settings_models::Provider;
use af_protocol::tool_models::ToolRequest;
use async_trait::async_trait;
use serde::Deserialize;
use std::process::Stdio;
use std::time::Duration;
use std::time::Instant;
use tokio::process::Command;
use tokio_stream::StreamExt;

/// Gemini adapter for executing instructions using Gemini CLI.
pub struct GeminiAdapter {
    model: String,
    credentials: ProviderCredentials,
    telemetry: Telemetry,
    request_timeout: Option<Duration>,
}

impl GeminiAdapter {
    /// Create a new Gemini adapter.
    ///
    /// # Arguments
    ///
    /// * `model_settings` - Model id (e.g., "gemini-2.5-pro") and request deadline
    /// * `credentials` - Resolved Gemini credentials, exported to the child
    /// * `telemetry` - Sink for usage reports
    pub fn new(model_settings: &ModelSettings, credentials: ProviderCredentials, telemetry: Telemetry) -> Self {
        Self {
            model: model_settings.model_name.clone(),
            credentials,
            telemetry,
            request_timeout: model_settings.request_timeout_seconds.map(Duration::from_secs),
        }
    }

    fn build_args(&self, context: &ExecutionContext) -> Vec<String> {
        let prompt = match &context.system_prompt {
            Some(system) => format!("{system}\n\n{}", context.instruction),
            None => context.instruction.clone(),
        };
        vec![
            "--model".to_string(),
            self.model.clone(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--prompt".to_string(),
            prompt,
        ]
    }
}

#[async_trait]
impl AgentAdapter for GeminiAdapter {
    fn provider(&self) -> Provider {
        Provider::Gemini
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn check_availability(&self) -> bool {
        Command::new("gemini")
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
            Provider::Gemini,
            "gemini",
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

            while let Some(value) = values.next().await {
                let value = match value {
                    Ok(value) => value,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };
                let event = match serde_json::from_value::<GeminiEvent>(value) {
                    Ok(event) => event,
                    Err(e) => {
                        yield Err(AgentError::StreamParse(format!("Unexpected Gemini event: {e}")));
                        return;
                    }
                };

                match event {
                    GeminiEvent::Message { role, content } if role == "assistant" => {
                        yield Ok(AgentEvent::MessageChunk(content));
                    }
                    GeminiEvent::ToolUse { tool_name, parameters } => {
                        yield Ok(AgentEvent::ToolCall(ToolRequest::new(tool_name, parameters)));
                    }
                    GeminiEvent::Result { status, error, stats } => {
                        let mut report = UsageReport::new(Provider::Gemini, model.clone());
                        report.task_id = task_id.clone();
                        report.num_turns = 1;
                        report.duration_ms = elapsed_ms(started);
                        if let Some(stats) = stats {
                            report.input_tokens = stats.input_tokens;
                            report.output_tokens = stats.output_tokens;
                            if let Some(duration_ms) = stats.duration_ms {
                                report.duration_ms = duration_ms;
                            }
                        }
                        telemetry.record(report);

                        if status.as_deref() == Some("error") {
                            yield Err(AgentError::Provider {
                                provider: Provider::Gemini,
                                status: None,
                                message: error
                                    .map(|e| e.message)
                                    .unwrap_or_else(|| "Gemini reported an error".to_string()),
                            });
                        } else {
                            yield Ok(AgentEvent::Completed);
                        }
                        return;
                    }
                    GeminiEvent::Error { message } => {
                        yield Err(AgentError::Provider {
                            provider: Provider::Gemini,
                            status: None,
                            message,
                        });
                        return;
                    }
                    _ => {}
                }
            }
        };

        Ok(Box::pin(stream))
    }

    fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum GeminiEvent {
    Message {
        role: String,
        #[serde(default)]
        content: String,
    },
    ToolUse {
        tool_name: String,
        #[serde(default)]
        parameters: serde_json::Value,
    },
    Result {
        status: Option<String>,
        error: Option<GeminiError>,
        stats: Option<GeminiStats>,
    },
    Error {
        message: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct GeminiStats {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    duration_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_gemini_adapter_new() {
        let adapter = GeminiAdapter::new(
            &ModelSettings::new("gemini-2.5-pro").with_request_timeout(10),
            ProviderCredentials::none(Provider::Gemini),
            Telemetry::new(),
        );
        assert_eq!(adapter.model_name(), "gemini-2.5-pro");
        assert_eq!(adapter.request_timeout(), Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_parse_events() {
        let message: GeminiEvent =
            serde_json::from_value(json!({"type": "message", "role": "assistant", "content": "hi", "delta": true}))
                .unwrap();
        assert!(matches!(message, GeminiEvent::Message { ref content, .. } if content == "hi"));

        let tool: GeminiEvent = serde_json::from_value(json!({
            "type": "tool_use",
            "tool_name": "list_files",
            "tool_id": "t1",
            "parameters": {"path": "."}
        }))
        .unwrap();
        assert!(matches!(tool, GeminiEvent::ToolUse { ref tool_name, .. } if tool_name == "list_files"));

        let init: GeminiEvent = serde_json::from_value(json!({"type": "init", "session_id": "s"})).unwrap();
        assert!(matches!(init, GeminiEvent::Other));
    }
}
