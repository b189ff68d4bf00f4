//! Plugin manifests, records, resource limits and the runner envelope.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Default CPU time ceiling for a plugin run
pub const DEFAULT_CPU_SECONDS: u64 = 10;

/// Default address-space ceiling (512 MiB)
pub const DEFAULT_MEMORY_BYTES: u64 = 512 * 1024 * 1024;

/// Default open file descriptor ceiling
pub const DEFAULT_FD_LIMIT: u64 = 64;

/// OS resource ceilings applied inside the sandbox
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    #[serde(default = "default_cpu_seconds")]
    pub cpu_seconds: u64,

    #[serde(default = "default_memory_bytes")]
    pub memory_bytes: u64,

    #[serde(default = "default_fd_limit")]
    pub fd_limit: u64,
}

fn default_cpu_seconds() -> u64 {
    DEFAULT_CPU_SECONDS
}
fn default_memory_bytes() -> u64 {
    DEFAULT_MEMORY_BYTES
}
fn default_fd_limit() -> u64 {
    DEFAULT_FD_LIMIT
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_seconds: DEFAULT_CPU_SECONDS,
            memory_bytes: DEFAULT_MEMORY_BYTES,
            fd_limit: DEFAULT_FD_LIMIT,
        }
    }
}

impl ResourceLimits {
    /// Apply manifest overrides, which may only lower a ceiling
    pub fn tightened_by(self, overrides: &LimitOverrides) -> Self {
        let lower = |current: u64, requested: Option<u64>| match requested {
            Some(value) => current.min(value),
            None => current,
        };

        Self {
            cpu_seconds: lower(self.cpu_seconds, overrides.cpu_seconds),
            memory_bytes: lower(self.memory_bytes, overrides.memory_bytes),
            fd_limit: lower(self.fd_limit, overrides.fd_limit),
        }
    }
}

/// Optional per-plugin limit overrides from the manifest
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_seconds: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_bytes: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fd_limit: Option<u64>,
}

/// Plugin manifest as stored on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    /// Plugin identifier (defaults to the plugin directory name)
    #[serde(default)]
    pub plugin_id: String,

    /// Entrypoint descriptor: `module` or `module:symbol`
    pub entrypoint: String,

    /// Directory modules are resolved against (relative to the manifest)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_path: Option<PathBuf>,

    /// Interpreter used to run the artifact (e.g. "sh", "python3")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_executable: Option<String>,

    /// Limit overrides (can only tighten the host's limits)
    #[serde(default)]
    pub limits: LimitOverrides,
}

impl PluginManifest {
    /// Load a manifest file. Missing or malformed manifests are configuration errors.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read plugin manifest: {}", path.display()))?;

        let mut manifest: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse plugin manifest: {}", path.display()))?;

        if manifest.plugin_id.is_empty() {
            manifest.plugin_id = path
                .parent()
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
        }

        manifest.entry_point()?;
        Ok(manifest)
    }

    /// Parse the entrypoint descriptor
    pub fn entry_point(&self) -> Result<EntryPoint> {
        EntryPoint::parse(&self.entrypoint)
    }

    /// Directory the entrypoint module is resolved against
    pub fn module_base(&self, manifest_path: &Path) -> PathBuf {
        let manifest_dir = manifest_path.parent().unwrap_or(Path::new("."));
        match &self.module_path {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => manifest_dir.join(path),
            None => manifest_dir.to_path_buf(),
        }
    }
}

/// Parsed `module[:symbol]` entrypoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    pub module: String,
    pub symbol: Option<String>,
}

impl EntryPoint {
    pub fn parse(descriptor: &str) -> Result<Self> {
        let descriptor = descriptor.trim();
        let (module, symbol) = match descriptor.rsplit_once(':') {
            Some((module, symbol)) => (module.trim(), Some(symbol.trim())),
            None => (descriptor, None),
        };

        if module.is_empty() {
            anyhow::bail!("Plugin entrypoint '{}' has no module", descriptor);
        }

        Ok(Self {
            module: module.to_string(),
            symbol: symbol.filter(|s| !s.is_empty()).map(str::to_string),
        })
    }
}

/// Derived view of an installed plugin, recomputed on every listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginRecord {
    pub plugin_id: String,
    pub manifest_path: PathBuf,
    pub enabled: bool,
}

/// Persisted plugin state file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginState {
    #[serde(default)]
    pub enabled: bool,
}

/// The single JSON line a runner emits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub ok: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl Envelope {
    pub fn success(response: serde_json::Value) -> Self {
        Self {
            ok: true,
            response: Some(response),
            error: None,
            details: None,
        }
    }

    pub fn failure(error: impl Into<String>, details: serde_json::Value) -> Self {
        Self {
            ok: false,
            response: None,
            error: Some(error.into()),
            details: Some(details),
        }
    }
}
