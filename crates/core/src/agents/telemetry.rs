//! Usage and cost telemetry.
//!
//! Adapters report token counts, cost and timing here instead of returning
//! them. Each report is logged as a structured `tracing` event and published
//! to any live subscribers.

use af_protocol::ipc::UsageReport;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct Telemetry {
    sender: broadcast::Sender<UsageReport>,
}

impl Telemetry {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Log and publish a usage report. Having no subscribers is fine.
    pub fn record(&self, report: UsageReport) {
        tracing::info!(
            provider = %report.provider,
            model = %report.model,
            task_id = report.task_id.as_deref().unwrap_or("-"),
            input_tokens = report.input_tokens,
            output_tokens = report.output_tokens,
            cost_usd = report.cost_usd.unwrap_or(0.0),
            duration_ms = report.duration_ms,
            num_turns = report.num_turns,
            "agent usage"
        );
        let _ = self.sender.send(report);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UsageReport> {
        self.sender.subscribe()
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use af_protocol::settings_models::Provider;

    #[tokio::test]
    async fn test_record_reaches_subscribers() {
        let telemetry = Telemetry::new();
        let mut rx = telemetry.subscribe();

        let mut report = UsageReport::new(Provider::Anthropic, "claude-sonnet-4.5");
        report.output_tokens = 42;
        telemetry.record(report);

        let received = rx.recv().await.unwrap();
        assert_eq!(received.output_tokens, 42);
    }

    #[test]
    fn test_record_without_subscribers() {
        Telemetry::new().record(UsageReport::new(Provider::Mock, "mock"));
    }
}
