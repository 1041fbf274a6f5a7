//! Tool calls and the tool abstraction.
//!
//! The model embeds tool calls in its text output; the parser decodes them
//! into [`ToolCallRequest`]s and the task loop dispatches each one to a
//! registered [`Tool`] (terminal, file read, directory listing, search).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use crate::error::ToolError;

/// Untyped key → value input of a tool call.
pub type ToolInput = serde_json::Map<String, serde_json::Value>;

/// A tool call decoded from the model stream. Immutable once decoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Call id as emitted by the model
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Decoded JSON object
    pub input: ToolInput,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, input: ToolInput) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input,
        }
    }

    /// String argument lookup.
    pub fn str_arg(&self, key: &str) -> Option<&str> {
        self.input.get(key).and_then(|v| v.as_str())
    }

    /// Boolean argument lookup, `false` when absent.
    pub fn flag(&self, key: &str) -> bool {
        self.input.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
    }

    /// Required string argument.
    pub fn require_str(&self, key: &str) -> Result<&str, ToolError> {
        self.str_arg(key)
            .ok_or_else(|| ToolError::InvalidArguments(format!("Missing '{key}' argument")))
    }
}

/// The result of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// The call ID this result is for
    pub call_id: String,

    /// Whether the tool executed successfully
    pub success: bool,

    /// The output content
    pub output: String,

    /// Optional structured data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ToolResult {
    pub fn ok(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            success: true,
            output: output.into(),
            data: None,
        }
    }

    pub fn failed(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            success: false,
            output: output.into(),
            data: None,
        }
    }
}

/// The core Tool trait.
///
/// Each collaborator the task loop dispatches to (terminal, read_file,
/// list_dir, codebase_search) implements this trait. File writes are not
/// tools: they become proposed edits and go through the edit pipeline.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "run_terminal_cmd", "read_file").
    fn name(&self) -> &str;

    /// A description of what this tool does.
    fn description(&self) -> &str;

    /// Execute the tool for the given call.
    async fn execute(&self, call: &ToolCallRequest) -> std::result::Result<ToolResult, ToolError>;
}

/// A registry of available tools, keyed by name.
///
/// One tool may be registered under several names (models use both
/// `read_file` and `file_read`, for example).
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Make an already registered tool reachable under another name.
    /// Returns `false` when `target` is unknown.
    pub fn alias(&mut self, alias: &str, target: &str) -> bool {
        match self.tools.get(target).cloned() {
            Some(tool) => {
                self.tools.insert(alias.to_string(), tool);
                true
            }
            None => false,
        }
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// Execute a tool call.
    pub async fn execute(&self, call: &ToolCallRequest) -> std::result::Result<ToolResult, ToolError> {
        let tool = self
            .tools
            .get(&call.name)
            .ok_or_else(|| ToolError::NotFound(call.name.clone()))?;
        tool.execute(call).await
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
