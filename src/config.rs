//! Configuration for toolgate.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (TOOLGATE_HOME, TOOLGATE_CHECKLIST,
//!    TOOLGATE_PROJECT, TOOLGATE_RUNNER)
//! 2. Config file (.toolgate/config.yaml)
//! 3. Defaults (~/.toolgate)
//!
//! Config file discovery:
//! - Searches the start directory and its parents for .toolgate/config.yaml
//! - `paths.home` is relative to the .toolgate/ directory; every other path is
//!   relative to the directory containing .toolgate/

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::permissions::canonicalize;
use crate::core::resilience::{ResilienceConfig, ResilienceExecutor, DEFAULT_WORKERS};
use crate::core::retry::RetryPolicy;
use crate::core::orchestrator::DEFAULT_OPERATION_CONCURRENCY;
use crate::core::RunLedger;
use crate::domain::ResourceLimits;
use crate::sandbox::{default_runner_path, PluginHost, PluginStore};

const CONFIG_DIR: &str = ".toolgate";
const CONFIG_FILE: &str = "config.yaml";

pub const ENV_HOME: &str = "TOOLGATE_HOME";
pub const ENV_CHECKLIST: &str = "TOOLGATE_CHECKLIST";
pub const ENV_PROJECT: &str = "TOOLGATE_PROJECT";
pub const ENV_RUNNER: &str = "TOOLGATE_RUNNER";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub resilience: Option<ResilienceSettings>,
    #[serde(default)]
    pub operations: Option<OperationSettings>,
    #[serde(default)]
    pub sandbox: Option<SandboxConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory (relative to .toolgate/)
    pub home: Option<String>,
    /// Checklist document
    pub checklist: Option<String>,
    /// Project metadata file (JSON or YAML)
    pub project: Option<String>,
    /// Installed plugins directory
    pub plugins: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SandboxConfig {
    /// Path to the toolgate-runner binary
    pub runner: Option<String>,
    /// Wall-clock timeout for one plugin call
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub limits: ResourceLimits,
}

/// Executor settings: worker pool, default and per-tool resilience
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResilienceSettings {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default)]
    pub default: ResilienceConfig,
    #[serde(default)]
    pub tools: HashMap<String, ResilienceConfig>,
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

impl Default for ResilienceSettings {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            default: ResilienceConfig::default(),
            tools: HashMap::new(),
        }
    }
}

/// Top-level operation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationSettings {
    #[serde(default = "default_operation_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_operation_concurrency() -> usize {
    DEFAULT_OPERATION_CONCURRENCY
}

impl Default for OperationSettings {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_OPERATION_CONCURRENCY,
            retry: RetryPolicy::default(),
        }
    }
}

/// Resolved sandbox settings
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SandboxSettings {
    pub runner: PathBuf,
    pub timeout_ms: Option<u64>,
    pub limits: ResourceLimits,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// State directory (runs, default checklist/project/plugins)
    pub home: PathBuf,
    /// Checklist document
    pub checklist: PathBuf,
    /// Project metadata file
    pub project: PathBuf,
    /// Installed plugins directory
    pub plugins_dir: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub resilience: ResilienceSettings,
    pub operations: OperationSettings,
    pub sandbox: SandboxSettings,
}

impl Config {
    /// Load configuration starting from the current directory
    pub fn load() -> Result<Self> {
        let cwd = std::env::current_dir().context("Failed to determine current directory")?;
        Self::load_with(&cwd, |key| std::env::var(key).ok())
    }

    /// Load configuration starting from `start_dir`, reading environment
    /// overrides through `env`
    pub fn load_with(start_dir: &Path, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let config_file = find_config_file(start_dir);
        let file = match &config_file {
            Some(path) => load_config_file(path)?,
            None => ConfigFile::default(),
        };

        let default_home = || -> Result<PathBuf> {
            Ok(dirs::home_dir()
                .context("Failed to determine home directory")?
                .join(CONFIG_DIR))
        };

        // .toolgate/ and the directory that contains it
        let config_dir = config_file.as_deref().and_then(Path::parent);
        let base_dir = config_dir.and_then(Path::parent);

        let home = match (env(ENV_HOME), &file.paths.home, config_dir) {
            (Some(home), _, _) => PathBuf::from(home),
            (None, Some(home), Some(dir)) => resolve_path(dir, home),
            _ => default_home()?,
        };

        let from_file = |value: &Option<String>| match (value, base_dir) {
            (Some(path), Some(base)) => Some(resolve_path(base, path)),
            (Some(path), None) => Some(PathBuf::from(path)),
            _ => None,
        };

        let checklist = env(ENV_CHECKLIST)
            .map(PathBuf::from)
            .or_else(|| from_file(&file.paths.checklist))
            .unwrap_or_else(|| home.join("checklist.md"));

        let project = env(ENV_PROJECT)
            .map(PathBuf::from)
            .or_else(|| from_file(&file.paths.project))
            .unwrap_or_else(|| home.join("project.json"));

        let plugins_dir = from_file(&file.paths.plugins).unwrap_or_else(|| home.join("plugins"));

        let sandbox_file = file.sandbox.as_ref();
        let runner = env(ENV_RUNNER)
            .map(PathBuf::from)
            .or_else(|| from_file(&sandbox_file.and_then(|s| s.runner.clone())))
            .unwrap_or_else(default_runner_path);

        let sandbox = SandboxSettings {
            runner,
            timeout_ms: sandbox_file.and_then(|s| s.timeout_ms),
            limits: sandbox_file.map(|s| s.limits).unwrap_or_default(),
        };

        let config = Self {
            home,
            checklist,
            project,
            plugins_dir,
            config_file,
            resilience: file.resilience.unwrap_or_default(),
            operations: file.operations.unwrap_or_default(),
            sandbox,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings that cannot run
    pub fn validate(&self) -> Result<()> {
        self.resilience
            .default
            .validate()
            .context("Invalid default resilience settings")?;
        for (tool, settings) in &self.resilience.tools {
            settings
                .validate()
                .with_context(|| format!("Invalid resilience settings for '{}'", tool))?;
        }
        self.operations
            .retry
            .validate()
            .context("Invalid operation retry settings")?;
        if self.resilience.workers == 0 {
            anyhow::bail!("resilience.workers must be at least 1");
        }
        if self.operations.concurrency == 0 {
            anyhow::bail!("operations.concurrency must be at least 1");
        }
        Ok(())
    }

    /// Runs directory ($TOOLGATE_HOME/runs)
    pub fn runs_dir(&self) -> PathBuf {
        self.home.join("runs")
    }

    pub fn ledger(&self) -> RunLedger {
        RunLedger::new(self.runs_dir())
    }

    /// Executor with per-tool settings keyed by canonical tool name
    pub fn executor(&self) -> ResilienceExecutor {
        self.resilience.tools.iter().fold(
            ResilienceExecutor::new(self.resilience.default.clone(), self.resilience.workers),
            |executor, (tool, settings)| executor.with_config(canonicalize(tool), settings.clone()),
        )
    }

    pub fn plugin_store(&self) -> PluginStore {
        PluginStore::new(&self.plugins_dir)
    }

    pub fn plugin_host(&self) -> PluginHost {
        PluginHost::new(&self.sandbox.runner)
            .with_limits(self.sandbox.limits)
            .with_timeout(self.sandbox.timeout_ms.map(Duration::from_millis))
    }
}

/// Find config file by searching `start` and its parents
fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_DIR).join(CONFIG_FILE);
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to `base`
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}
