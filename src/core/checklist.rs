//! Checklist parsing and caching.
//!
//! The checklist is an externally authored markdown document. Relevant lines
//! look like `- [AI] Run web research → notes` or `- [H] Approve final draft`.
//! Text after `→` is ignored. Each entry is keyed by a slug of its text.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

const AI_MARKER: &str = "- [AI]";
const HUMAN_MARKER: &str = "- [H]";
const TRUNCATE_AT: char = '→';

/// One checklist entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistItem {
    /// Text of the item (before any `→`)
    pub text: String,

    /// Whether the decision may be taken by an AI
    pub ai: bool,
}

/// Slug → item index built from a checklist document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChecklistIndex {
    items: BTreeMap<String, ChecklistItem>,
}

impl ChecklistIndex {
    /// Parse checklist content. The first entry for a slug wins.
    pub fn parse(content: &str) -> Self {
        let mut items = BTreeMap::new();

        for line in content.lines() {
            let line = line.trim();
            let (rest, ai) = if let Some(rest) = line.strip_prefix(AI_MARKER) {
                (rest, true)
            } else if let Some(rest) = line.strip_prefix(HUMAN_MARKER) {
                (rest, false)
            } else {
                continue;
            };

            let text = rest.split(TRUNCATE_AT).next().unwrap_or_default().trim();
            let slug = slugify(text);
            if slug.is_empty() {
                continue;
            }

            items.entry(slug).or_insert_with(|| ChecklistItem {
                text: text.to_string(),
                ai,
            });
        }

        Self { items }
    }

    /// Load a checklist file.
    ///
    /// A missing file, or one without any `[AI]`/`[H]` entries, is a
    /// configuration error.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read checklist: {}", path.display()))?;

        let index = Self::parse(&content);
        if index.is_empty() {
            anyhow::bail!(
                "Checklist {} has no '{}' or '{}' entries",
                path.display(),
                AI_MARKER,
                HUMAN_MARKER
            );
        }

        debug!(path = %path.display(), entries = index.len(), "Loaded checklist");
        Ok(index)
    }

    pub fn get(&self, slug: &str) -> Option<&ChecklistItem> {
        self.items.get(slug)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterate entries in slug order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ChecklistItem)> {
        self.items.iter()
    }
}

/// Normalize checklist text to a slug: lowercase, non-alphanumeric runs
/// become `-`, no leading or trailing `-`.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_dash = false;

    for c in text.chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
        } else {
            pending_dash = true;
        }
    }

    slug
}

/// Loaded checklists keyed by source path.
///
/// Owned by whoever builds registries; each path is parsed at most once.
#[derive(Debug, Default)]
pub struct ChecklistCache {
    entries: Mutex<HashMap<PathBuf, Arc<ChecklistIndex>>>,
}

impl ChecklistCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached index for `path`, loading it on first use
    pub fn get_or_load(&self, path: &Path) -> Result<Arc<ChecklistIndex>> {
        let key = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());

        if let Some(index) = self.lock().get(&key) {
            return Ok(index.clone());
        }

        // Parse outside the lock; a concurrent loader may win the insert
        let index = Arc::new(ChecklistIndex::load(path)?);
        Ok(self.lock().entry(key).or_insert(index).clone())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, Arc<ChecklistIndex>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
