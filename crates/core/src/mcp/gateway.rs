//! JSON-RPC tool gateway client.
//!
//! Speaks MCP-style JSON-RPC 2.0 over HTTP: every call is a `POST` to
//! `{base_url}/rpc` with method `tools/list` or `tools/call`.

use crate::mcp::{ToolClient, ToolError};
use af_protocol::tool_models::{ToolDescriptor, ToolResult};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// JSON-RPC "method not found"; gateways also use it for unknown tools.
const METHOD_NOT_FOUND: i64 = -32601;

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct ListToolsResult {
    #[serde(default)]
    tools: Vec<ToolDescriptor>,
}

pub struct GatewayToolClient {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
    next_id: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
}

impl GatewayToolClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ToolError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ToolError::unavailable("gateway", format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/rpc", base_url.trim_end_matches('/')),
            timeout,
            next_id: AtomicU64::new(1),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// `(successful, failed)` calls so far.
    pub fn stats(&self) -> (u64, u64) {
        (
            self.successes.load(Ordering::Relaxed),
            self.failures.load(Ordering::Relaxed),
        )
    }

    async fn call(&self, tool: &str, method: &str, params: Value) -> Result<Value, ToolError> {
        let result = self.send(tool, method, params).await;
        match &result {
            Ok(_) => self.successes.fetch_add(1, Ordering::Relaxed),
            Err(e) => {
                tracing::warn!(endpoint = %self.endpoint, method, error = %e, "tool gateway call failed");
                self.failures.fetch_add(1, Ordering::Relaxed)
            }
        };
        result
    }

    async fn send(&self, tool: &str, method: &str, params: Value) -> Result<Value, ToolError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        tracing::debug!(endpoint = %self.endpoint, method, id, "tool gateway request");

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(tool, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::Execution {
                tool: tool.to_string(),
                message: format!("gateway returned HTTP {status}"),
                degraded: status.is_server_error(),
            });
        }

        let rpc: RpcResponse = response
            .json()
            .await
            .map_err(|e| self.transport_error(tool, e))?;

        if let Some(error) = rpc.error {
            if error.code == METHOD_NOT_FOUND {
                return Err(ToolError::NotFound(tool.to_string()));
            }
            return Err(ToolError::Execution {
                tool: tool.to_string(),
                message: format!("{} (code {})", error.message, error.code),
                degraded: false,
            });
        }

        rpc.result.ok_or_else(|| ToolError::Execution {
            tool: tool.to_string(),
            message: "response carried neither result nor error".to_string(),
            degraded: false,
        })
    }

    fn transport_error(&self, tool: &str, error: reqwest::Error) -> ToolError {
        if error.is_timeout() {
            ToolError::Timeout {
                tool: tool.to_string(),
                timeout: self.timeout,
            }
        } else if error.is_decode() {
            ToolError::Execution {
                tool: tool.to_string(),
                message: format!("malformed gateway response: {error}"),
                degraded: false,
            }
        } else {
            ToolError::unavailable(tool, format!("gateway unreachable: {error}"))
        }
    }
}

#[async_trait]
impl ToolClient for GatewayToolClient {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ToolError> {
        let result = self.call("tools/list", "tools/list", json!({})).await?;
        let listed: ListToolsResult = serde_json::from_value(result).map_err(|e| ToolError::Execution {
            tool: "tools/list".to_string(),
            message: format!("malformed tool list: {e}"),
            degraded: false,
        })?;
        Ok(listed.tools)
    }

    async fn invoke(&self, tool_name: &str, arguments: Value) -> Result<ToolResult, ToolError> {
        let result = self
            .call(
                tool_name,
                "tools/call",
                json!({"name": tool_name, "arguments": arguments}),
            )
            .await?;

        // MCP reports tool-level failures in-band.
        if result.get("isError").and_then(Value::as_bool) == Some(true) {
            return Err(ToolError::Execution {
                tool: tool_name.to_string(),
                message: result
                    .get("content")
                    .map(Value::to_string)
                    .unwrap_or_else(|| "tool reported an error".to_string()),
                degraded: false,
            });
        }

        let content = result.get("content").cloned().unwrap_or_else(|| result.clone());
        let metadata = result.get("_meta").cloned().unwrap_or(Value::Null);
        Ok(ToolResult { content, metadata })
    }
}
