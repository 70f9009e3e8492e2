//! Common CLI subprocess executor for agent adapters.
//!
//! This module provides a unified interface for executing CLI-based agents
//! and parsing their JSON Lines / NDJSON output streams.

use crate::agents::base::AgentError;
use crate::secrets::ProviderCredentials;
use af_protocol::settings_models::Provider;
use std::pin::Pin;
use std::process::Stdio;
use tokio::io::AsyncBufReadExt;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::io::BufReader;
use tokio::process::Command;
use tokio_stream::Stream;

/// Bytes of stderr kept for error messages.
const STDERR_TAIL: usize = 2048;

/// A CLI invocation for one provider call.
#[derive(Debug, Clone)]
pub struct CliInvocation {
    pub provider: Provider,
    /// The command to execute (e.g., "claude", "codex")
    pub command: String,
    pub args: Vec<String>,
    /// Working directory for the command
    pub working_dir: String,
    /// Exported into the child environment.
    pub credentials: Option<ProviderCredentials>,
}

impl CliInvocation {
    pub fn new(provider: Provider, command: impl Into<String>, args: Vec<String>, working_dir: impl Into<String>) -> Self {
        Self {
            provider,
            command: command.into(),
            args,
            working_dir: working_dir.into(),
            credentials: None,
        }
    }

    pub fn with_credentials(mut self, credentials: ProviderCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }
}

/// CLI executor for agent adapters.
///
/// This struct provides common functionality for spawning subprocess-based
/// CLI tools and parsing their JSON Lines output.
pub struct CliExecutor;

impl CliExecutor {
    /// Execute a CLI command and parse its stdout as JSON Lines/NDJSON.
    ///
    /// # Returns
    ///
    /// A stream of `serde_json::Value` objects, one per line of JSON output.
    /// Empty lines are filtered out. Lines that fail to parse as JSON yield
    /// `AgentError::StreamParse`. A non-zero exit yields a final
    /// `AgentError::Provider` carrying the exit code and the tail of stderr.
    ///
    /// The child is killed if the stream is dropped early, e.g. when a
    /// request deadline expires.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use af_core::agents::cli_executor::{CliExecutor, CliInvocation};
    /// use af_protocol::Provider;
    /// use tokio_stream::StreamExt;
    ///
    /// #[tokio::main]
    /// async fn main() {
    ///     let stream = CliExecutor::execute(CliInvocation::new(
    ///         Provider::Mock,
    ///         "echo",
    ///         vec![r#"{"type":"test"}"#.to_string()],
    ///         ".",
    ///     ));
    ///
    ///     let values: Vec<_> = stream.collect().await;
    ///     println!("Got {} values", values.len());
    /// }
    /// ```
    pub fn execute(
        invocation: CliInvocation,
    ) -> Pin<Box<dyn Stream<Item = Result<serde_json::Value, AgentError>> + Send>> {
        let stream = async_stream::stream! {
            let CliInvocation { provider, command, args, working_dir, credentials } = invocation;

            let mut cmd = Command::new(&command);
            cmd.args(&args);
            cmd.current_dir(&working_dir);
            cmd.stdin(Stdio::null());
            cmd.stdout(Stdio::piped());
            cmd.stderr(Stdio::piped());
            cmd.kill_on_drop(true);
            if let Some(credentials) = &credentials {
                credentials.apply(&mut cmd);
            }

            tracing::debug!(provider = %provider, command = %command, "spawning agent CLI");

            let mut child = match cmd.spawn() {
                Ok(child) => child,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    yield Err(AgentError::NotAvailable(format!(
                        "Failed to spawn command '{command}': {e}"
                    )));
                    return;
                }
                Err(e) => {
                    yield Err(AgentError::Execution(format!(
                        "Failed to spawn command '{command}': {e}"
                    )));
                    return;
                }
            };

            let stdout = match child.stdout.take() {
                Some(stdout) => stdout,
                None => {
                    yield Err(AgentError::Execution("Failed to capture stdout".to_string()));
                    return;
                }
            };

            // Drain stderr concurrently so a chatty child cannot block on a full pipe.
            let stderr_task = child
                .stderr
                .take()
                .map(|stderr| tokio::spawn(read_lossy(stderr)));

            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<serde_json::Value>(&line) {
                            Ok(value) => yield Ok(value),
                            Err(e) => {
                                yield Err(AgentError::StreamParse(format!(
                                    "Failed to parse JSON: {e} (line: {line})"
                                )));
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(AgentError::StreamParse(e.to_string()));
                        break;
                    }
                }
            }

            let status = child.wait().await;
            let stderr = match stderr_task {
                Some(task) => task.await.unwrap_or_default(),
                None => String::new(),
            };

            match status {
                Ok(status) if status.success() => {}
                Ok(status) => {
                    tracing::warn!(provider = %provider, code = ?status.code(), "agent CLI exited with failure");
                    yield Err(AgentError::Provider {
                        provider,
                        status: status.code(),
                        message: tail(&stderr),
                    });
                }
                Err(e) => {
                    yield Err(AgentError::Execution(format!("Failed to wait for '{command}': {e}")));
                }
            }
        };

        Box::pin(stream)
    }
}

/// Everything `reader` yields, decoded lossily. A read error keeps what
/// arrived before it.
async fn read_lossy<R: AsyncRead + Unpin>(mut reader: R) -> String {
    let mut buf = Vec::new();
    if let Err(e) = reader.read_to_end(&mut buf).await {
        tracing::debug!(error = %e, "stderr read ended early");
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Last `STDERR_TAIL` bytes of `text`, trimmed, on a char boundary.
fn tail(text: &str) -> String {
    let text = text.trim();
    if text.len() <= STDERR_TAIL {
        return text.to_string();
    }
    let mut start = text.len() - STDERR_TAIL;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    fn invocation(command: &str, args: &[&str], dir: &str) -> CliInvocation {
        CliInvocation::new(
            Provider::Mock,
            command,
            args.iter().map(|a| a.to_string()).collect(),
            dir,
        )
    }

    #[tokio::test]
    async fn test_execute_echo_json() {
        let stream = CliExecutor::execute(invocation("echo", &[r#"{"type":"test","value":42}"#], "."));

        let values: Vec<_> = stream
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<Result<Vec<_>, _>>()
            .expect("Should parse JSON successfully");

        assert_eq!(values.len(), 1);
        assert_eq!(values[0].get("type").and_then(|v| v.as_str()), Some("test"));
        assert_eq!(values[0].get("value").and_then(|v| v.as_i64()), Some(42));
    }

    #[tokio::test]
    async fn test_execute_invalid_command() {
        let stream = CliExecutor::execute(invocation("nonexistent-command-xyz", &[], "."));
        let results: Vec<_> = stream.collect::<Vec<_>>().await;

        assert_eq!(results.len(), 1);
        match &results[0] {
            Err(AgentError::NotAvailable(msg)) => assert!(msg.contains("Failed to spawn command")),
            other => panic!("Expected NotAvailable, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_execute_reports_exit_status() {
        let stream = CliExecutor::execute(invocation(
            "sh",
            &["-c", r#"echo '{"n":1}'; echo 'quota exceeded' >&2; exit 3"#],
            ".",
        ));
        let results: Vec<_> = stream.collect::<Vec<_>>().await;

        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        match &results[1] {
            Err(AgentError::Provider { status, message, .. }) => {
                assert_eq!(*status, Some(3));
                assert!(message.contains("quota exceeded"));
            }
            other => panic!("Expected Provider error, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_execute_filters_empty_lines_and_flags_garbage() {
        let stream = CliExecutor::execute(invocation(
            "sh",
            &["-c", r#"echo; echo '{"num":1}'; echo; echo 'not json'; echo '{"num":2}'"#],
            ".",
        ));
        let results: Vec<_> = stream.collect::<Vec<_>>().await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().ok().and_then(|v| v.get("num")?.as_i64()), Some(1));
        assert!(matches!(results[1], Err(AgentError::StreamParse(_))));
        assert_eq!(results[2].as_ref().ok().and_then(|v| v.get("num")?.as_i64()), Some(2));
    }

    #[tokio::test]
    async fn test_read_lossy_keeps_invalid_utf8() {
        let bytes: &[u8] = b"warn \xff\xfe then quota exceeded";
        let text = read_lossy(bytes).await;
        assert!(text.starts_with("warn "));
        assert!(text.ends_with("then quota exceeded"));
        assert!(text.contains('\u{FFFD}'));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_status_keeps_non_utf8_stderr_tail() {
        let stream = CliExecutor::execute(invocation(
            "sh",
            &["-c", r#"printf 'bad \377 byte\nrate limited\n' >&2; exit 2"#],
            ".",
        ));
        let results: Vec<_> = stream.collect::<Vec<_>>().await;

        match results.last() {
            Some(Err(AgentError::Provider { status, message, .. })) => {
                assert_eq!(*status, Some(2));
                assert!(message.contains("rate limited"));
            }
            other => panic!("Expected Provider error, got {other:?}"),
        }
    }

    #[test]
    fn test_tail_keeps_end() {
        let long = "x".repeat(STDERR_TAIL) + "END";
        let kept = tail(&long);
        assert_eq!(kept.len(), STDERR_TAIL);
        assert!(kept.ends_with("END"));
    }
}
