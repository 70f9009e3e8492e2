//! Tool/resource clients.
//!
//! A [`ToolClient`] invokes named external tools and returns structured
//! results, whatever backs them: an in-process registry
//! ([`LocalToolClient`]) or a JSON-RPC gateway ([`GatewayToolClient`]).
//! An unreachable backend surfaces as a degraded
//! [`ToolError::Execution`], never as a panic.

pub mod gateway;
pub mod local;

pub use gateway::GatewayToolClient;
pub use local::LocalToolClient;

use af_protocol::tool_models::{ToolDescriptor, ToolResult};
use af_protocol::workflow_models::{FailureKind, ToolFailure};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    /// `degraded` is set when the backend could not be reached at all.
    #[error("Tool '{tool}' failed: {message}")]
    Execution {
        tool: String,
        message: String,
        degraded: bool,
    },

    #[error("Tool '{tool}' timed out after {timeout:?}")]
    Timeout { tool: String, timeout: Duration },
}

impl ToolError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::NotFound(_) => FailureKind::ToolNotFound,
            Self::Execution { .. } => FailureKind::ToolExecution,
            Self::Timeout { .. } => FailureKind::ToolTimeout,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Execution { degraded: true, .. })
    }

    /// Serializable form recorded on the tool invocation.
    pub fn to_failure(&self) -> ToolFailure {
        ToolFailure {
            kind: self.failure_kind(),
            message: self.to_string(),
            degraded: self.is_degraded(),
        }
    }

    pub(crate) fn unavailable(tool: &str, message: impl Into<String>) -> Self {
        Self::Execution {
            tool: tool.to_string(),
            message: message.into(),
            degraded: true,
        }
    }
}

#[async_trait]
pub trait ToolClient: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ToolError>;

    async fn invoke(&self, tool_name: &str, arguments: Value) -> Result<ToolResult, ToolError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_mapping() {
        let degraded = ToolError::unavailable("echo", "connection refused");
        let failure = degraded.to_failure();
        assert_eq!(failure.kind, FailureKind::ToolExecution);
        assert!(failure.degraded);
        assert!(failure.message.contains("connection refused"));

        let missing = ToolError::NotFound("nope".to_string()).to_failure();
        assert_eq!(missing.kind, FailureKind::ToolNotFound);
        assert!(!missing.degraded);
    }
}
