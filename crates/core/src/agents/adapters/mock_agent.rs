//! Mock agent implementation for tests and offline runs.
//!
//! Built for `Provider::Mock`. The model name selects a behaviour:
//! - `mock-fail`: every call fails with a provider error
//! - `mock-slow-<secs>`: each call sleeps before answering
//! - anything else: echoes the instruction
//!
//! `request_timeout_seconds` applies as it does for real providers.

use crate::agents::base::{AgentAdapter, AgentError, AgentEvent, AgentStream, ExecutionContext};
use crate::agents::telemetry::Telemetry;
use af_protocol::ipc::UsageReport;
use af_protocol::settings_models::{ModelSettings, Provider};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct MockAgent {
    model: String,
    available: bool,
    /// Scripted events. `None` echoes the instruction.
    events: Option<Vec<Result<AgentEvent, AgentError>>>,
    delay: Option<Duration>,
    request_timeout: Option<Duration>,
    /// Calls that fail with a provider error before the script runs.
    failures_left: Arc<AtomicUsize>,
    calls: Arc<AtomicUsize>,
    telemetry: Option<Telemetry>,
}

impl MockAgent {
    pub fn new(available: bool, events: Vec<Result<AgentEvent, AgentError>>) -> Self {
        Self {
            model: "mock".to_string(),
            available,
            events: Some(events),
            delay: None,
            request_timeout: None,
            failures_left: Arc::new(AtomicUsize::new(0)),
            calls: Arc::new(AtomicUsize::new(0)),
            telemetry: None,
        }
    }

    /// Answers every call with `Mock response to: <instruction>`.
    pub fn echo() -> Self {
        Self {
            events: None,
            ..Self::new(true, Vec::new())
        }
    }

    pub fn success() -> Self {
        Self::new(
            true,
            vec![
                Ok(AgentEvent::Thought("Mock agent thinking".to_string())),
                Ok(AgentEvent::MessageChunk("Mock response".to_string())),
                Ok(AgentEvent::Completed),
            ],
        )
    }

    pub fn unavailable() -> Self {
        Self::new(false, vec![])
    }

    pub fn failing() -> Self {
        Self::new(
            true,
            vec![
                Ok(AgentEvent::Thought("Starting...".to_string())),
                Err(AgentError::Provider {
                    provider: Provider::Mock,
                    status: Some(1),
                    message: "Mock failure".to_string(),
                }),
            ],
        )
    }

    /// Build from settings, picking the behaviour from the model name.
    pub fn from_settings(model_settings: &ModelSettings) -> Self {
        let model = model_settings.model_name.as_str();
        let mut agent = if model == "mock-fail" {
            Self::failing()
        } else {
            Self::echo()
        };
        if let Some(secs) = model
            .strip_prefix("mock-slow-")
            .and_then(|secs| secs.parse::<u64>().ok())
        {
            agent.delay = Some(Duration::from_secs(secs));
        }
        agent.model = model.to_string();
        agent.request_timeout = model_settings.request_timeout_seconds.map(Duration::from_secs);
        agent
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail the first `failures` calls with a retryable provider error.
    pub fn with_transient_failures(self, failures: usize) -> Self {
        self.failures_left.store(failures, Ordering::SeqCst);
        self
    }

    pub fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Number of `stream` calls made so far, across clones.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AgentAdapter for MockAgent {
    fn provider(&self) -> Provider {
        Provider::Mock
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn check_availability(&self) -> bool {
        self.available
    }

    fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout
    }

    async fn stream(&self, context: &ExecutionContext) -> Result<AgentStream, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if !self.available {
            return Err(AgentError::NotAvailable("Mock agent not available".to_string()));
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let transient = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if transient {
            return Err(AgentError::Provider {
                provider: Provider::Mock,
                status: Some(503),
                message: "Mock transient failure".to_string(),
            });
        }

        if let Some(telemetry) = &self.telemetry {
            let mut report = UsageReport::new(Provider::Mock, self.model.clone());
            report.task_id = context.task_id.clone();
            report.num_turns = 1;
            telemetry.record(report);
        }

        let events = match &self.events {
            Some(events) => events.clone(),
            None => vec![
                Ok(AgentEvent::MessageChunk(format!(
                    "Mock response to: {}",
                    context.instruction
                ))),
                Ok(AgentEvent::Completed),
            ],
        };
        Ok(Box::pin(tokio_stream::iter(events)))
    }
}
