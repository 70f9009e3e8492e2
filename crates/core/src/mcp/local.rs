//! In-process tool client.

use crate::mcp::{ToolClient, ToolError};
use af_protocol::tool_models::{ToolDescriptor, ToolResult};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, String>> + Send>>;
type Handler = Arc<dyn Fn(Value) -> HandlerFuture + Send + Sync>;

/// Registry of async tool handlers run in-process.
pub struct LocalToolClient {
    tools: RwLock<HashMap<String, (ToolDescriptor, Handler)>>,
    timeout: Duration,
    available: AtomicBool,
}

impl LocalToolClient {
    pub fn new(timeout: Duration) -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            timeout,
            available: AtomicBool::new(true),
        }
    }

    /// Client with `echo`, `read_file` and `list_files`. File tools resolve
    /// paths against `root` and refuse to leave it.
    pub fn with_builtins(root: impl Into<PathBuf>, timeout: Duration) -> Self {
        let client = Self::new(timeout);
        let root = Arc::new(root.into());

        client.register_fn(
            ToolDescriptor::new("echo", "Return the arguments unchanged").with_schema(json!({"type": "object"})),
            |arguments| async move { Ok(arguments) },
        );

        let read_root = Arc::clone(&root);
        client.register_fn(
            ToolDescriptor::new("read_file", "Read a UTF-8 file under the project root").with_schema(json!({
                "type": "object",
                "properties": {"path": {"type": "string"}},
                "required": ["path"]
            })),
            move |arguments| {
                let root = Arc::clone(&read_root);
                async move {
                    let path = resolve(&root, &arguments)?;
                    let content = tokio::fs::read_to_string(&path)
                        .await
                        .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
                    Ok(json!({"path": path.display().to_string(), "content": content}))
                }
            },
        );

        let list_root = root;
        client.register_fn(
            ToolDescriptor::new("list_files", "List entries of a directory under the project root").with_schema(json!({
                "type": "object",
                "properties": {"path": {"type": "string"}}
            })),
            move |arguments| {
                let root = Arc::clone(&list_root);
                async move {
                    let path = if arguments.get("path").is_some() {
                        resolve(&root, &arguments)?
                    } else {
                        root.as_ref().clone()
                    };
                    let mut dir = tokio::fs::read_dir(&path)
                        .await
                        .map_err(|e| format!("cannot list {}: {e}", path.display()))?;
                    let mut entries = Vec::new();
                    while let Some(entry) = dir.next_entry().await.map_err(|e| e.to_string())? {
                        entries.push(entry.file_name().to_string_lossy().to_string());
                    }
                    entries.sort();
                    Ok(json!({"path": path.display().to_string(), "entries": entries}))
                }
            },
        );

        client
    }

    /// Register (or replace) a tool.
    pub fn register_fn<F, Fut>(&self, descriptor: ToolDescriptor, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, String>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |arguments| Box::pin(handler(arguments)));
        self.tools
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(descriptor.name.clone(), (descriptor, handler));
    }

    /// Mark the backend reachable or not. While unavailable every call fails
    /// as degraded.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self, tool: &str) -> Result<(), ToolError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ToolError::unavailable(tool, "tool backend unavailable"))
        }
    }
}

/// Resolve `arguments.path` under `root`, rejecting absolute paths and `..`.
fn resolve(root: &Path, arguments: &Value) -> Result<PathBuf, String> {
    let relative = arguments
        .get("path")
        .and_then(Value::as_str)
        .ok_or_else(|| "missing string argument 'path'".to_string())?;
    let relative = Path::new(relative);
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(format!("path '{}' escapes the project root", relative.display()));
    }
    Ok(root.join(relative))
}

#[async_trait]
impl ToolClient for LocalToolClient {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ToolError> {
        self.ensure_available("tools/list")?;
        let mut tools: Vec<ToolDescriptor> = self
            .tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|(descriptor, _)| descriptor.clone())
            .collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tools)
    }

    async fn invoke(&self, tool_name: &str, arguments: Value) -> Result<ToolResult, ToolError> {
        self.ensure_available(tool_name)?;

        let handler = self
            .tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(tool_name)
            .map(|(_, handler)| Arc::clone(handler))
            .ok_or_else(|| ToolError::NotFound(tool_name.to_string()))?;

        match tokio::time::timeout(self.timeout, handler(arguments)).await {
            Ok(Ok(content)) => Ok(ToolResult::new(content)),
            Ok(Err(message)) => Err(ToolError::Execution {
                tool: tool_name.to_string(),
                message,
                degraded: false,
            }),
            Err(_) => Err(ToolError::Timeout {
                tool: tool_name.to_string(),
                timeout: self.timeout,
            }),
        }
    }
}
