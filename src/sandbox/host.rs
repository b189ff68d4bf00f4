//! Host side of the plugin sandbox.
//!
//! The host writes the request to a temporary file, starts `toolgate-runner`
//! with a cleared environment and reads back the single envelope line the
//! runner prints last.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde_json::{json, Value};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use crate::domain::{Envelope, ResourceLimits};

/// Name of the runner binary
pub const RUNNER_BIN: &str = "toolgate-runner";

/// Maximum amount of runner stderr carried in error details
const STDERR_TAIL_CHARS: usize = 4096;

/// Every way a sandboxed call can fail
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PluginError {
    pub message: String,
    pub details: Value,
}

impl PluginError {
    pub fn new(message: impl Into<String>, details: Value) -> Self {
        Self {
            message: message.into(),
            details,
        }
    }
}

/// Launches plugins through the runner process
#[derive(Debug, Clone)]
pub struct PluginHost {
    runner: PathBuf,
    limits: ResourceLimits,
    timeout: Option<Duration>,
    temp_dir: Option<PathBuf>,
}

impl PluginHost {
    pub fn new(runner: impl Into<PathBuf>) -> Self {
        Self {
            runner: runner.into(),
            limits: ResourceLimits::default(),
            timeout: None,
            temp_dir: None,
        }
    }

    /// Default limits passed to the runner
    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Wall-clock timeout after which the runner is killed
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Directory for request files (system temp dir when unset)
    pub fn with_temp_dir(mut self, temp_dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(temp_dir.into());
        self
    }

    pub fn runner_path(&self) -> &Path {
        &self.runner
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    /// Run the plugin described by `manifest_path` on `request`.
    ///
    /// The child sees only `PATH` and the variables in `env`.
    #[instrument(skip(self, request, env), fields(manifest = %manifest_path.display()))]
    pub async fn launch(
        &self,
        manifest_path: &Path,
        request: &Value,
        limits: &ResourceLimits,
        env: &HashMap<String, String>,
    ) -> Result<Value, PluginError> {
        // Removed when dropped, on every return path below
        let request_file = write_request(request, self.temp_dir.as_deref())?;

        let mut command = Command::new(&self.runner);
        command
            .arg("--manifest")
            .arg(manifest_path)
            .arg("--request")
            .arg(request_file.path())
            .arg("--cpu-seconds")
            .arg(limits.cpu_seconds.to_string())
            .arg("--memory-bytes")
            .arg(limits.memory_bytes.to_string())
            .arg("--fd-limit")
            .arg(limits.fd_limit.to_string())
            .env_clear();

        if let Some(path) = std::env::var_os("PATH") {
            command.env("PATH", path);
        }

        command
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|e| {
            PluginError::new(
                format!("Failed to start plugin runner: {}", e),
                json!({"runner": self.runner.display().to_string()}),
            )
        })?;

        let wait = child.wait_with_output();
        let output = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, wait).await {
                Ok(result) => result,
                Err(_) => {
                    // Dropping the wait future drops the child, which kills it
                    warn!(timeout = ?limit, "Plugin runner timed out");
                    return Err(PluginError::new(
                        format!("Plugin timed out after {:?}", limit),
                        json!({"timeout_ms": limit.as_millis() as u64}),
                    ));
                }
            },
            None => wait.await,
        }
        .map_err(|e| PluginError::new(format!("Failed to wait for plugin runner: {}", e), json!({})))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            debug!(stderr = %tail(&stderr, STDERR_TAIL_CHARS), "Plugin runner stderr");
        }

        let Some(line) = last_line(&stdout) else {
            return Err(PluginError::new(
                "Plugin runner produced no output",
                json!({
                    "exit_code": output.status.code(),
                    "stderr": tail(&stderr, STDERR_TAIL_CHARS),
                }),
            ));
        };

        let envelope: Envelope = serde_json::from_str(line).map_err(|e| {
            PluginError::new(
                "Plugin runner produced invalid output",
                json!({"line": line, "error": e.to_string()}),
            )
        })?;

        if envelope.ok {
            info!("Plugin completed");
            Ok(envelope.response.unwrap_or(Value::Null))
        } else {
            let message = envelope
                .error
                .unwrap_or_else(|| "Plugin failed without an error message".to_string());
            warn!(error = %message, "Plugin failed");
            Err(PluginError::new(message, envelope.details.unwrap_or(Value::Null)))
        }
    }
}

fn write_request(
    request: &Value,
    temp_dir: Option<&Path>,
) -> Result<tempfile::NamedTempFile, PluginError> {
    let io_error = |e: std::io::Error| {
        PluginError::new(format!("Failed to write plugin request: {}", e), json!({}))
    };

    let mut builder = tempfile::Builder::new();
    builder.prefix("toolgate-request-").suffix(".json");
    let mut file = match temp_dir {
        Some(dir) => builder.tempfile_in(dir),
        None => builder.tempfile(),
    }
    .map_err(io_error)?;

    serde_json::to_writer(file.as_file_mut(), request)
        .map_err(|e| PluginError::new(format!("Failed to encode plugin request: {}", e), json!({})))?;
    file.as_file_mut().flush().map_err(io_error)?;

    Ok(file)
}

/// Last non-empty line of `text`
pub(crate) fn last_line(text: &str) -> Option<&str> {
    text.lines().map(str::trim).filter(|l| !l.is_empty()).last()
}

/// Last `max_chars` characters of `text`
pub(crate) fn tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    text.chars().skip(count - max_chars).collect()
}

/// Locate the runner: next to the current executable, then on `PATH`
pub fn default_runner_path() -> PathBuf {
    let sibling = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(RUNNER_BIN)));

    match sibling {
        Some(path) if path.is_file() => path,
        _ => PathBuf::from(RUNNER_BIN),
    }
}
