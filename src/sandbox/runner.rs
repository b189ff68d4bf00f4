//! Runner side of the plugin sandbox.
//!
//! The runner limits itself, loads the manifest, resolves the plugin artifact
//! and runs it as a child that inherits those limits. Whatever happens, it
//! ends by printing exactly one [`Envelope`] line on stdout.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::domain::{Envelope, PluginManifest, ResourceLimits};

use super::host::{last_line, tail};
use super::limits;

/// Names searched, in order, when a directory module names no symbol
pub const DEFAULT_SYMBOLS: &[&str] = &["invoke", "run", "main", "plugin"];

const STDERR_TAIL_CHARS: usize = 4096;

/// Runner command line
#[derive(Debug, Clone, Parser)]
#[command(name = "toolgate-runner")]
#[command(about = "Run a toolgate plugin under OS resource limits")]
pub struct RunnerArgs {
    /// Plugin manifest file
    #[arg(long)]
    pub manifest: PathBuf,

    /// Request file (stdin when omitted)
    #[arg(long)]
    pub request: Option<PathBuf>,

    /// CPU time limit in seconds
    #[arg(long, default_value_t = crate::domain::plugin::DEFAULT_CPU_SECONDS)]
    pub cpu_seconds: u64,

    /// Address space limit in bytes
    #[arg(long, default_value_t = crate::domain::plugin::DEFAULT_MEMORY_BYTES)]
    pub memory_bytes: u64,

    /// Open file descriptor limit
    #[arg(long, default_value_t = crate::domain::plugin::DEFAULT_FD_LIMIT)]
    pub fd_limit: u64,
}

impl RunnerArgs {
    pub fn limits(&self) -> ResourceLimits {
        ResourceLimits {
            cpu_seconds: self.cpu_seconds,
            memory_bytes: self.memory_bytes,
            fd_limit: self.fd_limit,
        }
    }
}

/// Program and arguments that make up a resolved plugin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEntry {
    pub program: PathBuf,
    pub args: Vec<String>,
}

/// A plugin failure reported back to the host
#[derive(Debug)]
struct Failure {
    message: String,
    details: Value,
}

impl Failure {
    fn new(message: impl Into<String>, details: Value) -> Self {
        Self {
            message: message.into(),
            details,
        }
    }
}

impl From<anyhow::Error> for Failure {
    fn from(e: anyhow::Error) -> Self {
        Self::new(format!("{:#}", e), json!({}))
    }
}

/// Run one plugin call and produce its envelope
pub async fn run(args: RunnerArgs) -> Envelope {
    match execute(&args).await {
        Ok(response) => Envelope::success(response),
        Err(failure) => {
            warn!(error = %failure.message, "Plugin call failed");
            Envelope::failure(failure.message, failure.details)
        }
    }
}

/// Print the envelope as the final stdout line
pub fn emit(envelope: &Envelope) {
    let line = serde_json::to_string(envelope).unwrap_or_else(|e| {
        json!({"ok": false, "error": format!("Failed to encode envelope: {}", e)}).to_string()
    });
    println!("{}", line);
}

async fn execute(args: &RunnerArgs) -> Result<Value, Failure> {
    let applied = limits::apply(&args.limits()).context("Failed to apply resource limits")?;

    let request = read_request(args.request.as_deref()).await?;
    let manifest = PluginManifest::load(&args.manifest)?;

    let tightened = applied.tightened_by(&manifest.limits);
    if tightened != applied {
        limits::apply(&tightened).context("Failed to apply manifest resource limits")?;
    }

    let entry = resolve_entry(&manifest, &args.manifest)?;
    debug!(plugin = %manifest.plugin_id, program = %entry.program.display(), "Resolved plugin entry");

    run_plugin(&manifest, &args.manifest, &entry, &request).await
}

async fn read_request(path: Option<&Path>) -> Result<Value> {
    let content = match path {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read request file: {}", path.display()))?,
        None => {
            let mut content = String::new();
            tokio::io::stdin()
                .read_to_string(&mut content)
                .await
                .context("Failed to read request from stdin")?;
            content
        }
    };

    serde_json::from_str(&content).context("Request is not valid JSON")
}

/// Resolve the manifest entrypoint to a program and its arguments.
///
/// A directory module resolves `symbol` inside it, or the first of
/// [`DEFAULT_SYMBOLS`] that exists. A file module is the program itself and
/// `symbol` becomes its first argument.
pub fn resolve_entry(manifest: &PluginManifest, manifest_path: &Path) -> Result<ResolvedEntry> {
    let entry = manifest.entry_point()?;
    let module = manifest.module_base(manifest_path).join(&entry.module);

    if module.is_dir() {
        let program = match &entry.symbol {
            Some(symbol) => {
                let candidate = module.join(symbol);
                if !candidate.is_file() {
                    anyhow::bail!(
                        "Plugin symbol '{}' not found in {}",
                        symbol,
                        module.display()
                    );
                }
                candidate
            }
            None => DEFAULT_SYMBOLS
                .iter()
                .map(|name| module.join(name))
                .find(|candidate| candidate.is_file())
                .with_context(|| {
                    format!(
                        "No plugin entry ({}) found in {}",
                        DEFAULT_SYMBOLS.join(", "),
                        module.display()
                    )
                })?,
        };

        return Ok(ResolvedEntry {
            program,
            args: Vec::new(),
        });
    }

    if module.is_file() {
        return Ok(ResolvedEntry {
            program: module,
            args: entry.symbol.into_iter().collect(),
        });
    }

    anyhow::bail!("Plugin module not found: {}", module.display())
}

async fn run_plugin(
    manifest: &PluginManifest,
    manifest_path: &Path,
    entry: &ResolvedEntry,
    request: &Value,
) -> Result<Value, Failure> {
    let mut command = match &manifest.runtime_executable {
        Some(runtime) => {
            let mut command = Command::new(runtime);
            command.arg(&entry.program);
            command
        }
        None => Command::new(&entry.program),
    };

    if let Some(dir) = manifest_path.parent().filter(|d| !d.as_os_str().is_empty()) {
        command.current_dir(dir);
    }

    let mut child = command
        .args(&entry.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            Failure::new(
                format!("Failed to start plugin: {}", e),
                json!({"program": entry.program.display().to_string()}),
            )
        })?;

    // Feed the request while draining output so neither side fills a pipe
    let stdin = child.stdin.take();
    let payload = request.to_string();
    let feed = async move {
        if let Some(mut stdin) = stdin {
            // A plugin that ignores its input may exit before reading it
            if let Err(e) = stdin.write_all(payload.as_bytes()).await {
                debug!(error = %e, "Plugin did not consume its request");
            }
        }
    };

    let ((), output) = tokio::join!(feed, child.wait_with_output());
    let output =
        output.map_err(|e| Failure::new(format!("Failed to wait for plugin: {}", e), json!({})))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    if !output.status.success() {
        let stderr_tail = tail(&stderr, STDERR_TAIL_CHARS);
        let details = match output.status.code() {
            Some(code) => json!({"exit_code": code, "stderr": stderr_tail}),
            None => json!({"signal": exit_signal(&output.status), "stderr": stderr_tail}),
        };
        let message = last_line(&stderr)
            .map(str::to_string)
            .unwrap_or_else(|| format!("Plugin exited with {}", output.status));
        return Err(Failure::new(message, details));
    }

    let Some(line) = last_line(&stdout) else {
        return Err(Failure::new("Plugin produced no output", json!({})));
    };

    match serde_json::from_str::<Value>(line) {
        Ok(value) if value.is_object() => Ok(value),
        Ok(_) => Err(Failure::new(
            "Plugin result must be a JSON object",
            json!({"output": line}),
        )),
        Err(e) => Err(Failure::new(
            "Plugin output is not valid JSON",
            json!({"output": line, "error": e.to_string()}),
        )),
    }
}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manifest(entrypoint: &str, module_path: Option<&str>) -> PluginManifest {
        serde_json::from_value(json!({
            "plugin_id": "wordcount",
            "entrypoint": entrypoint,
            "module_path": module_path,
        }))
        .unwrap()
    }

    #[test]
    fn test_directory_module_default_symbol_order() {
        let temp = TempDir::new().unwrap();
        let module = temp.path().join("pkg");
        std::fs::create_dir(&module).unwrap();
        std::fs::write(module.join("main"), "").unwrap();
        std::fs::write(module.join("plugin"), "").unwrap();
        let manifest_path = temp.path().join("manifest.json");

        let entry = resolve_entry(&manifest("pkg", None), &manifest_path).unwrap();
        assert_eq!(entry.program, module.join("main"));
        assert!(entry.args.is_empty());

        std::fs::write(module.join("run"), "").unwrap();
        let entry = resolve_entry(&manifest("pkg", None), &manifest_path).unwrap();
        assert_eq!(entry.program, module.join("run"));
    }

    #[test]
    fn test_directory_module_explicit_symbol() {
        let temp = TempDir::new().unwrap();
        let module = temp.path().join("pkg");
        std::fs::create_dir(&module).unwrap();
        std::fs::write(module.join("count"), "").unwrap();
        let manifest_path = temp.path().join("manifest.json");

        let entry = resolve_entry(&manifest("pkg:count", None), &manifest_path).unwrap();
        assert_eq!(entry.program, module.join("count"));

        assert!(resolve_entry(&manifest("pkg:missing", None), &manifest_path).is_err());
    }

    #[test]
    fn test_file_module_passes_symbol_as_argument() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir(temp.path().join("lib")).unwrap();
        std::fs::write(temp.path().join("lib/plugin.sh"), "").unwrap();
        let manifest_path = temp.path().join("manifest.json");

        let entry =
            resolve_entry(&manifest("plugin.sh:count", Some("lib")), &manifest_path).unwrap();
        assert_eq!(entry.program, temp.path().join("lib/plugin.sh"));
        assert_eq!(entry.args, vec!["count".to_string()]);
    }

    #[test]
    fn test_missing_module() {
        let temp = TempDir::new().unwrap();
        let manifest_path = temp.path().join("manifest.json");
        let err = resolve_entry(&manifest("nope", None), &manifest_path).unwrap_err();
        assert!(err.to_string().contains("Plugin module not found"));
    }

    #[test]
    fn test_args_parse_with_defaults() {
        let args = RunnerArgs::try_parse_from(["toolgate-runner", "--manifest", "m.json"]).unwrap();
        assert_eq!(args.limits(), ResourceLimits::default());
        assert!(args.request.is_none());
    }
}
