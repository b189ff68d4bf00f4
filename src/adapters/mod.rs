//! Tool invocation contract.
//!
//! Every capability the orchestrator can hand out (search, summarization,
//! templating, file storage, third-party plugins) implements [`Tool`] and
//! speaks the same [`ToolContext`] / [`ToolResult`] shape.

pub mod plugin;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::InvocationMetadata;

pub use plugin::PluginTool;

/// Where a tool's code runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Isolation {
    /// Trusted code in this process, run through the resilience executor
    InProcess,
    /// Untrusted code in a sandboxed child process
    Sandboxed,
}

/// Input for one tool call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolContext {
    /// Run the call is recorded on
    pub run_id: Uuid,

    /// Canonical tool name
    pub tool: String,

    /// Tool-specific parameters
    #[serde(default)]
    pub params: serde_json::Value,

    /// Cost and privacy metadata for the safety preflight
    #[serde(default)]
    pub metadata: InvocationMetadata,
}

impl ToolContext {
    pub fn new(run_id: Uuid, tool: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            run_id,
            tool: tool.into(),
            params,
            metadata: InvocationMetadata::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: InvocationMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Output from a tool call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Tool-specific output
    pub output: serde_json::Value,

    /// Actual cost in USD (if known)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,

    /// Extra details about the call
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl ToolResult {
    /// Create a result with just output
    pub fn new(output: serde_json::Value) -> Self {
        Self {
            output,
            cost_usd: None,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_cost(mut self, cost_usd: f64) -> Self {
        self.cost_usd = Some(cost_usd);
        self
    }
}

/// A capability the orchestrator can resolve and invoke
#[async_trait]
pub trait Tool: Send + Sync {
    /// Canonical tool name
    fn name(&self) -> &str;

    /// Where this tool runs
    fn isolation(&self) -> Isolation {
        Isolation::InProcess
    }

    /// Invoke the tool
    async fn invoke(&self, ctx: ToolContext) -> Result<ToolResult>;
}
