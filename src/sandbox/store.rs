//! Installed plugins on disk.
//!
//! Layout: `<root>/<plugin_id>/manifest.json` plus an optional
//! `<root>/<plugin_id>/state.json` holding `{"enabled": bool}`. A plugin
//! without a state file is disabled. Nothing is cached; every listing rescans.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::domain::{PluginManifest, PluginRecord, PluginState};

const MANIFEST_FILE: &str = "manifest.json";
const STATE_FILE: &str = "state.json";

/// Directory of installed plugins
#[derive(Debug, Clone)]
pub struct PluginStore {
    root: PathBuf,
}

impl PluginStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn plugin_dir(&self, plugin_id: &str) -> PathBuf {
        self.root.join(plugin_id)
    }

    pub fn manifest_path(&self, plugin_id: &str) -> PathBuf {
        self.plugin_dir(plugin_id).join(MANIFEST_FILE)
    }

    fn state_path(&self, plugin_id: &str) -> PathBuf {
        self.plugin_dir(plugin_id).join(STATE_FILE)
    }

    /// All installed plugins, sorted by id
    pub fn list(&self) -> Result<Vec<PluginRecord>> {
        let pattern = format!(
            "{}/*/{}",
            glob::Pattern::escape(&self.root.to_string_lossy()),
            MANIFEST_FILE
        );

        let mut records = Vec::new();
        for entry in glob::glob(&pattern).context("Invalid plugin glob pattern")? {
            let manifest_path = match entry {
                Ok(path) => path,
                Err(e) => {
                    debug!(error = %e, "Skipping unreadable plugin entry");
                    continue;
                }
            };

            let Some(plugin_id) = manifest_path
                .parent()
                .and_then(|dir| dir.file_name())
                .map(|name| name.to_string_lossy().to_string())
            else {
                continue;
            };

            let enabled = self.is_enabled(&plugin_id)?;
            records.push(PluginRecord {
                plugin_id,
                manifest_path,
                enabled,
            });
        }

        records.sort_by(|a, b| a.plugin_id.cmp(&b.plugin_id));
        Ok(records)
    }

    /// Current record for one plugin
    pub fn record(&self, plugin_id: &str) -> Result<PluginRecord> {
        let manifest_path = self.manifest_path(plugin_id);
        if !manifest_path.is_file() {
            anyhow::bail!("Plugin '{}' is not installed", plugin_id);
        }

        Ok(PluginRecord {
            plugin_id: plugin_id.to_string(),
            manifest_path,
            enabled: self.is_enabled(plugin_id)?,
        })
    }

    /// Load and validate a plugin's manifest
    pub fn manifest(&self, plugin_id: &str) -> Result<PluginManifest> {
        PluginManifest::load(&self.manifest_path(plugin_id))
    }

    /// Whether a plugin is enabled (no state file means disabled)
    pub fn is_enabled(&self, plugin_id: &str) -> Result<bool> {
        let path = self.state_path(plugin_id);
        if !path.exists() {
            return Ok(false);
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read plugin state: {}", path.display()))?;
        let state: PluginState = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse plugin state: {}", path.display()))?;

        Ok(state.enabled)
    }

    /// Enable or disable an installed plugin, rewriting its state atomically
    pub fn set_enabled(&self, plugin_id: &str, enabled: bool) -> Result<PluginRecord> {
        // Refuse to create state for a plugin whose manifest is unusable
        self.manifest(plugin_id)?;

        let dir = self.plugin_dir(plugin_id);
        let mut file = tempfile::NamedTempFile::new_in(&dir)
            .with_context(|| format!("Failed to create temp state file in {}", dir.display()))?;

        let json = serde_json::to_vec_pretty(&PluginState { enabled })
            .context("Failed to serialize plugin state")?;
        file.write_all(&json).context("Failed to write plugin state")?;

        let path = self.state_path(plugin_id);
        file.persist(&path)
            .with_context(|| format!("Failed to replace plugin state: {}", path.display()))?;

        info!(plugin = plugin_id, enabled, "Plugin state updated");
        self.record(plugin_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn install(store: &PluginStore, plugin_id: &str) {
        let dir = store.plugin_dir(plugin_id);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join(MANIFEST_FILE),
            format!(r#"{{"plugin_id": "{}", "entrypoint": "run.sh"}}"#, plugin_id),
        )
        .unwrap();
    }

    #[test]
    fn test_list_rescans_and_defaults_to_disabled() {
        let temp = TempDir::new().unwrap();
        let store = PluginStore::new(temp.path().join("plugins"));
        assert!(store.list().unwrap().is_empty());

        install(&store, "wordcount");
        install(&store, "echo");
        // directories without a manifest are ignored
        std::fs::create_dir_all(store.plugin_dir("stray")).unwrap();

        let records = store.list().unwrap();
        let ids: Vec<&str> = records.iter().map(|r| r.plugin_id.as_str()).collect();
        assert_eq!(ids, vec!["echo", "wordcount"]);
        assert!(records.iter().all(|r| !r.enabled));
    }

    #[test]
    fn test_enable_and_disable() {
        let temp = TempDir::new().unwrap();
        let store = PluginStore::new(temp.path());
        install(&store, "wordcount");

        let record = store.set_enabled("wordcount", true).unwrap();
        assert!(record.enabled);
        assert!(store.list().unwrap()[0].enabled);

        store.set_enabled("wordcount", false).unwrap();
        assert!(!store.is_enabled("wordcount").unwrap());

        let leftovers: Vec<_> = std::fs::read_dir(store.plugin_dir("wordcount"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(leftovers.len(), 2);
    }

    #[test]
    fn test_set_enabled_requires_installed_plugin() {
        let temp = TempDir::new().unwrap();
        let store = PluginStore::new(temp.path());
        assert!(store.set_enabled("ghost", true).is_err());
        assert!(store.record("ghost").is_err());
    }
}
