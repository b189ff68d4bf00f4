//! Permission registry: checklist defaults plus project overrides.
//!
//! Decisions are deterministic for a given checklist, project file and
//! request. Every decision is written to the run ledger before it is returned.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use serde_json::json;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::{DecisionSource, EventType, ProjectMetadata, ToolDecision, WILDCARD};

use super::checklist::{slugify, ChecklistCache, ChecklistIndex};
use super::ledger::RunLedger;

/// Fixed aliases applied after normalization. Targets are canonical.
const ALIASES: &[(&str, &str)] = &[
    ("filestore", "file_store"),
    ("files", "file_store"),
    ("summarizer", "summarize"),
    ("summary", "summarize"),
    ("templating", "template"),
    ("templates", "template"),
    ("web_search", "search"),
    ("research", "search"),
];

/// Checklist slug consulted for each built-in tool when the caller does not
/// name a checklist item
const TOOL_LABELS: &[(&str, &str)] = &[
    ("search", "run-web-research"),
    ("summarize", "summarize-source-material"),
    ("template", "apply-outline-templates"),
    ("file_store", "persist-project-files"),
];

const TOOL_SUFFIX: &str = "_tool";

/// Normalize a requested tool name to its canonical form.
///
/// Case-folds, collapses non-alphanumeric runs to `_`, strips trailing
/// `_tool` suffixes and resolves aliases. Idempotent.
pub fn canonicalize(name: &str) -> String {
    let mut canonical = String::with_capacity(name.len());
    let mut pending_sep = false;

    for c in name.chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            if pending_sep && !canonical.is_empty() {
                canonical.push('_');
            }
            pending_sep = false;
            canonical.push(c);
        } else {
            pending_sep = true;
        }
    }

    while let Some(stripped) = canonical.strip_suffix(TOOL_SUFFIX) {
        if stripped.is_empty() {
            break;
        }
        canonical.truncate(stripped.len());
    }

    match ALIASES.iter().find(|(alias, _)| *alias == canonical) {
        Some((_, target)) => (*target).to_string(),
        None => canonical,
    }
}

/// Checklist slug a canonical tool maps to by default
pub fn default_label(tool: &str) -> Option<&'static str> {
    TOOL_LABELS
        .iter()
        .find(|(name, _)| *name == tool)
        .map(|(_, slug)| *slug)
}

/// Canonicalized project allow/deny sets
#[derive(Debug, Clone, Default)]
struct Overrides {
    allow: HashSet<String>,
    deny: HashSet<String>,
    allow_all: bool,
    deny_all: bool,
}

impl Overrides {
    fn from_project(project: &ProjectMetadata) -> Self {
        let collect = |names: &[String]| -> (HashSet<String>, bool) {
            let wildcard = names.iter().any(|n| n.trim() == WILDCARD);
            let set = names
                .iter()
                .filter(|n| n.trim() != WILDCARD)
                .map(|n| canonicalize(n))
                .collect();
            (set, wildcard)
        };

        let (allow, allow_all) = collect(&project.tools.allow);
        let (deny, deny_all) = collect(&project.tools.deny);

        Self {
            allow,
            deny,
            allow_all,
            deny_all,
        }
    }
}

/// Allow/deny authority for tool calls
#[derive(Debug, Clone)]
pub struct PermissionRegistry {
    checklist: Arc<ChecklistIndex>,
    project: Arc<ProjectMetadata>,
    overrides: Overrides,
    ledger: RunLedger,
}

impl PermissionRegistry {
    /// Build a registry from already-loaded sources
    pub fn new(checklist: Arc<ChecklistIndex>, project: Arc<ProjectMetadata>, ledger: RunLedger) -> Self {
        let overrides = Overrides::from_project(&project);
        Self {
            checklist,
            project,
            overrides,
            ledger,
        }
    }

    /// Build a registry from files. Missing or malformed sources fail here,
    /// never at call time.
    pub fn from_files(
        cache: &ChecklistCache,
        checklist_path: &Path,
        project_path: &Path,
        ledger: RunLedger,
    ) -> Result<Self> {
        let checklist = cache.get_or_load(checklist_path)?;
        let project = Arc::new(ProjectMetadata::load(project_path)?);
        Ok(Self::new(checklist, project, ledger))
    }

    /// Project metadata this registry was built from
    pub fn project(&self) -> &Arc<ProjectMetadata> {
        &self.project
    }

    /// Decide whether `name` may run, without recording anything
    pub fn decide(&self, name: &str, checklist_item: Option<&str>) -> ToolDecision {
        let tool = canonicalize(name);
        let default = self.default_decision(&tool, checklist_item);
        self.apply_overrides(default)
    }

    /// Decide whether `name` may run and record the decision on `run_id`.
    #[instrument(skip(self, metadata))]
    pub async fn check_permission(
        &self,
        name: &str,
        run_id: Uuid,
        checklist_item: Option<&str>,
        metadata: Option<&serde_json::Value>,
    ) -> Result<ToolDecision> {
        let decision = self.decide(name, checklist_item);

        let event_type = if decision.allowed {
            EventType::ToolApproved
        } else {
            EventType::ToolDenied
        };

        let payload = json!({
            "requested": name,
            "decision": decision,
            "metadata": metadata.cloned().unwrap_or(serde_json::Value::Null),
        });
        self.ledger.append_event(run_id, event_type, payload).await?;

        if decision.allowed {
            info!(tool = %decision.tool, source = %decision.source, "Tool approved");
        } else {
            warn!(
                tool = %decision.tool,
                source = %decision.source,
                reason = %decision.reason,
                "Tool denied"
            );
        }

        Ok(decision)
    }

    fn default_decision(&self, tool: &str, checklist_item: Option<&str>) -> ToolDecision {
        let slug = match checklist_item {
            Some(item) => Some(slugify(item)),
            None => default_label(tool).map(str::to_string),
        };

        let entry = slug
            .as_deref()
            .and_then(|s| self.checklist.get(s).map(|item| (s, item)));

        match entry {
            Some((slug, item)) if item.ai => ToolDecision {
                tool: tool.to_string(),
                allowed: true,
                source: DecisionSource::ChecklistAi,
                reason: format!("checklist item '{}' is AI-decidable", item.text),
                checklist_item: Some(item.text.clone()),
                checklist_slug: Some(slug.to_string()),
            },
            Some((slug, item)) => ToolDecision {
                tool: tool.to_string(),
                allowed: false,
                source: DecisionSource::ChecklistHuman,
                reason: format!("checklist item '{}' requires a human decision", item.text),
                checklist_item: Some(item.text.clone()),
                checklist_slug: Some(slug.to_string()),
            },
            None => ToolDecision {
                tool: tool.to_string(),
                allowed: false,
                source: DecisionSource::ChecklistUnknown,
                reason: match &slug {
                    Some(slug) => format!("checklist has no item '{}'", slug),
                    None => format!("no checklist item maps to tool '{}'", tool),
                },
                checklist_item: None,
                checklist_slug: slug,
            },
        }
    }

    fn apply_overrides(&self, default: ToolDecision) -> ToolDecision {
        let overrides = &self.overrides;

        if overrides.deny_all || overrides.deny.contains(&default.tool) {
            let reason = format!("project deny list blocks '{}'", default.tool);
            return default.overridden(false, DecisionSource::ProjectDeny, reason);
        }

        if overrides.allow_all || overrides.allow.contains(&default.tool) {
            let reason = format!("project allow list permits '{}'", default.tool);
            return default.overridden(true, DecisionSource::ProjectAllow, reason);
        }

        default
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ToolLists;
    use tempfile::TempDir;

    const CHECKLIST: &str = "\
- [AI] Run web research → sources
- [AI] Summarize source material
- [H] Persist project files
- [H] Approve plugin usage
";

    fn registry(allow: &[&str], deny: &[&str]) -> (PermissionRegistry, TempDir) {
        let temp = TempDir::new().unwrap();
        let project = ProjectMetadata {
            project_id: "p1".to_string(),
            tools: ToolLists {
                allow: allow.iter().map(|s| s.to_string()).collect(),
                deny: deny.iter().map(|s| s.to_string()).collect(),
            },
            ..Default::default()
        };
        let registry = PermissionRegistry::new(
            Arc::new(ChecklistIndex::parse(CHECKLIST)),
            Arc::new(project),
            RunLedger::new(temp.path().join("runs")),
        );
        (registry, temp)
    }

    #[test]
    fn test_canonicalize() {
        assert_eq!(canonicalize("Search"), "search");
        assert_eq!(canonicalize("file-store"), "file_store");
        assert_eq!(canonicalize("FileStore"), "file_store");
        assert_eq!(canonicalize("summarizer_tool"), "summarize");
        assert_eq!(canonicalize("  Web Search Tool "), "search");
        assert_eq!(canonicalize("my--plugin__tool_tool"), "my_plugin");
        assert_eq!(canonicalize("tool"), "tool");
    }

    #[test]
    fn test_checklist_defaults() {
        let (registry, _temp) = registry(&[], &[]);

        let search = registry.decide("search", None);
        assert!(search.allowed);
        assert_eq!(search.source, DecisionSource::ChecklistAi);
        assert_eq!(search.checklist_slug.as_deref(), Some("run-web-research"));

        let files = registry.decide("file-store", None);
        assert!(!files.allowed);
        assert_eq!(files.source, DecisionSource::ChecklistHuman);

        let template = registry.decide("template", None);
        assert!(!template.allowed);
        assert_eq!(template.source, DecisionSource::ChecklistUnknown);

        let unknown = registry.decide("mystery", None);
        assert_eq!(unknown.source, DecisionSource::ChecklistUnknown);
    }

    #[test]
    fn test_explicit_checklist_item() {
        let (registry, _temp) = registry(&[], &[]);

        let decision = registry.decide("wordcount", Some("Approve plugin usage"));
        assert!(!decision.allowed);
        assert_eq!(decision.source, DecisionSource::ChecklistHuman);
        assert_eq!(decision.checklist_item.as_deref(), Some("Approve plugin usage"));
    }

    #[test]
    fn test_deny_overrides_allow() {
        let (registry, _temp) = registry(&["*"], &["search"]);

        let decision = registry.decide("search", None);
        assert!(!decision.allowed);
        assert_eq!(decision.source, DecisionSource::ProjectDeny);

        let other = registry.decide("file_store", None);
        assert!(other.allowed);
        assert_eq!(other.source, DecisionSource::ProjectAllow);
        // checklist context is kept on overridden decisions
        assert_eq!(other.checklist_slug.as_deref(), Some("persist-project-files"));
    }

    #[test]
    fn test_project_lists_are_canonicalized() {
        let (registry, _temp) = registry(&["File-Store"], &[]);
        assert!(registry.decide("files", None).allowed);
    }

    #[tokio::test]
    async fn test_check_permission_records_audit_event() {
        let (registry, _temp) = registry(&[], &["summarize"]);
        let run = registry.ledger.create_run("check", json!({})).await.unwrap();

        let decision = registry
            .check_permission("Summarizer", run.run_id, None, Some(&json!({"caller": "test"})))
            .await
            .unwrap();
        assert!(!decision.allowed);

        let stored = registry.ledger.load(run.run_id).await.unwrap();
        assert_eq!(stored.events.len(), 1);
        assert_eq!(stored.events[0].event_type, EventType::ToolDenied);
        assert_eq!(stored.events[0].payload["decision"]["source"], "project.deny");
        assert_eq!(stored.events[0].payload["metadata"]["caller"], "test");
    }
}
