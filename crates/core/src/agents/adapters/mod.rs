//! Agent adapter implementations, one per provider.

mod claude_adapter;
mod codex_adapter;
mod gemini_adapter;
pub mod mock_agent;

pub use claude_adapter::ClaudeAdapter;
pub use codex_adapter::CodexAdapter;
pub use gemini_adapter::GeminiAdapter;
pub use mock_agent::MockAgent;
