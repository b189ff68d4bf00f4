//! File-backed run ledger.
//!
//! Each run is one JSON document (`<runs_dir>/<run_id>.json`). Appends are a
//! read-modify-rewrite cycle: the run is loaded, mutated in memory and written
//! to a temporary sibling that is renamed over the original. There is no
//! cross-process lock, so two writers appending to the same run at the same
//! time can lose one of the events.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use crate::domain::{Event, EventType, Run, RunStatus};

use super::redact::postflight_scrub;

/// Directory-backed store of run documents
#[derive(Debug, Clone)]
pub struct RunLedger {
    /// Directory containing `<run_id>.json` files
    runs_dir: PathBuf,
}

impl RunLedger {
    /// Ledger rooted at `runs_dir` (created lazily on first write)
    pub fn new(runs_dir: impl Into<PathBuf>) -> Self {
        Self {
            runs_dir: runs_dir.into(),
        }
    }

    /// Directory holding the run files
    pub fn runs_dir(&self) -> &Path {
        &self.runs_dir
    }

    /// Path of a run's document
    pub fn run_path(&self, run_id: Uuid) -> PathBuf {
        self.runs_dir.join(format!("{}.json", run_id))
    }

    /// Create and persist a new running run
    pub async fn create_run(&self, kind: &str, params: serde_json::Value) -> Result<Run> {
        let run = Run::new(kind, postflight_scrub(&params));
        self.save(&run).await?;
        debug!(run_id = %run.run_id, kind, "Created run");
        Ok(run)
    }

    /// Load a run by id
    pub async fn load(&self, run_id: Uuid) -> Result<Run> {
        let path = self.run_path(run_id);
        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Run {} not found at {}", run_id, path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse run file: {}", path.display()))
    }

    /// Whether a run document exists
    pub async fn exists(&self, run_id: Uuid) -> bool {
        fs::try_exists(self.run_path(run_id)).await.unwrap_or(false)
    }

    /// Append an event to a run, returning the stored event.
    ///
    /// The payload is scrubbed before it is written.
    pub async fn append_event(
        &self,
        run_id: Uuid,
        event_type: EventType,
        payload: serde_json::Value,
    ) -> Result<Event> {
        let mut run = self.load(run_id).await?;
        let event = run
            .push_event(event_type, postflight_scrub(&payload))
            .clone();
        self.save(&run).await?;

        debug!(%run_id, event_id = event.id, event_type = %event_type, "Appended event");
        Ok(event)
    }

    /// Update a run's status
    pub async fn set_status(&self, run_id: Uuid, status: RunStatus) -> Result<Run> {
        let mut run = self.load(run_id).await?;
        run.set_status(status);
        self.save(&run).await?;
        Ok(run)
    }

    /// List all runs, most recently created first
    pub async fn list_runs(&self) -> Result<Vec<Run>> {
        let mut runs = Vec::new();

        if !fs::try_exists(&self.runs_dir).await.unwrap_or(false) {
            return Ok(runs);
        }

        let mut entries = fs::read_dir(&self.runs_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let Some(stem) = name.strip_suffix(".json") else {
                continue;
            };
            if let Ok(run_id) = Uuid::parse_str(stem) {
                match self.load(run_id).await {
                    Ok(run) => runs.push(run),
                    Err(e) => debug!(%run_id, error = %e, "Skipping unreadable run"),
                }
            }
        }

        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(runs)
    }

    /// Atomically rewrite a run document
    async fn save(&self, run: &Run) -> Result<()> {
        fs::create_dir_all(&self.runs_dir)
            .await
            .with_context(|| format!("Failed to create runs directory: {}", self.runs_dir.display()))?;

        let path = self.run_path(run.run_id);
        let tmp_path = self
            .runs_dir
            .join(format!(".{}.{}.tmp", run.run_id, Uuid::new_v4()));

        let json = serde_json::to_vec_pretty(run).context("Failed to serialize run")?;
        fs::write(&tmp_path, json)
            .await
            .with_context(|| format!("Failed to write run file: {}", tmp_path.display()))?;

        if let Err(e) = fs::rename(&tmp_path, &path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e).with_context(|| format!("Failed to replace run file: {}", path.display()));
        }

        Ok(())
    }
}

/// Hash input content (first 16 hex chars of SHA256)
pub fn hash_input(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..8])
}
