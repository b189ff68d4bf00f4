//! Tool adapter for sandboxed third-party plugins.
//!
//! Each call goes through the plugin host, which runs the plugin in a
//! separate runner process under resource limits.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::core::ledger::hash_input;
use crate::core::permissions::canonicalize;
use crate::domain::PluginRecord;
use crate::sandbox::PluginHost;

use super::{Isolation, Tool, ToolContext, ToolResult};

/// A plugin exposed as a tool
#[derive(Debug, Clone)]
pub struct PluginTool {
    name: String,
    plugin_id: String,
    manifest_path: PathBuf,
    host: PluginHost,
    env: HashMap<String, String>,
}

impl PluginTool {
    pub fn new(plugin_id: impl Into<String>, manifest_path: impl Into<PathBuf>, host: PluginHost) -> Self {
        let plugin_id = plugin_id.into();
        Self {
            name: canonicalize(&plugin_id),
            plugin_id,
            manifest_path: manifest_path.into(),
            host,
            env: HashMap::new(),
        }
    }

    /// Tool for an installed plugin record
    pub fn from_record(record: &PluginRecord, host: PluginHost) -> Self {
        Self::new(record.plugin_id.clone(), record.manifest_path.clone(), host)
    }

    /// Extra environment variables visible to the plugin
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }
}

#[async_trait]
impl Tool for PluginTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn isolation(&self) -> Isolation {
        Isolation::Sandboxed
    }

    async fn invoke(&self, ctx: ToolContext) -> Result<ToolResult> {
        let request = json!({
            "tool": ctx.tool,
            "params": ctx.params,
            "run_id": ctx.run_id,
        });
        let request_hash = hash_input(&request.to_string());
        debug!(plugin = %self.plugin_id, %request_hash, "Launching plugin");

        let limits = *self.host.limits();
        let output = self
            .host
            .launch(&self.manifest_path, &request, &limits, &self.env)
            .await?;

        let cost_usd = output.get("cost_usd").and_then(|c| c.as_f64());

        Ok(ToolResult {
            output,
            cost_usd,
            metadata: json!({
                "plugin_id": self.plugin_id,
                "request_hash": request_hash,
            }),
        })
    }
}
