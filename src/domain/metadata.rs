//! Project and invocation metadata consumed by the policy layers.
//!
//! Project metadata is owned by the external project store; we only read it.
//! Invocation metadata travels with each tool call.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Wildcard entry matching every tool in allow/deny lists
pub const WILDCARD: &str = "*";

/// Project-level configuration relevant to tool gating
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectMetadata {
    /// Project identifier
    #[serde(default)]
    pub project_id: String,

    /// Allow/deny overrides
    #[serde(default)]
    pub tools: ToolLists,

    /// Budget state and limits
    #[serde(default)]
    pub budget: Budget,
}

/// Project allow and deny lists (`"*"` is a wildcard)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolLists {
    #[serde(default)]
    pub allow: Vec<String>,

    #[serde(default)]
    pub deny: Vec<String>,
}

/// Project budget in USD
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Budget {
    /// Amount already spent
    #[serde(default)]
    pub spent_usd: Option<f64>,

    /// Soft limit (calls proceed with a warning above this)
    #[serde(default)]
    pub soft: Option<f64>,

    /// Hard limit (calls are blocked above this)
    #[serde(default)]
    pub hard: Option<f64>,
}

impl ProjectMetadata {
    /// Load project metadata from a JSON or YAML file.
    ///
    /// A missing or unparsable file is a configuration error.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read project file: {}", path.display()))?;

        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );

        if is_yaml {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse project file: {}", path.display()))
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse project file: {}", path.display()))
        }
    }
}

/// Per-call metadata used by the safety preflight
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvocationMetadata {
    /// Estimated cost of this call in USD
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_cost_usd: Option<f64>,

    /// Explicit projected total, overriding `spent + estimate`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_after_usd: Option<f64>,

    /// Soft limit override for this call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soft_limit_usd: Option<f64>,

    /// Hard limit override for this call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hard_limit_usd: Option<f64>,

    /// Where results may be shared ("local", "project", "team", "public", ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sharing_scope: Option<String>,

    /// Whether the user consented to sharing beyond the project
    #[serde(default)]
    pub consent: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_json_project() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("project.json");
        std::fs::write(
            &path,
            r#"{"project_id": "novel", "tools": {"allow": ["search"], "deny": ["*"]},
                "budget": {"spent_usd": 1.5, "hard": 20}}"#,
        )
        .unwrap();

        let project = ProjectMetadata::load(&path).unwrap();
        assert_eq!(project.project_id, "novel");
        assert_eq!(project.tools.deny, vec!["*"]);
        assert_eq!(project.budget.spent_usd, Some(1.5));
        assert_eq!(project.budget.soft, None);
    }

    #[test]
    fn test_load_yaml_project() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("project.yaml");
        std::fs::write(&path, "project_id: p\ntools:\n  allow: [template]\n").unwrap();

        let project = ProjectMetadata::load(&path).unwrap();
        assert_eq!(project.tools.allow, vec!["template"]);
        assert!(project.tools.deny.is_empty());
    }

    #[test]
    fn test_missing_or_malformed_project_is_error() {
        let temp = TempDir::new().unwrap();
        assert!(ProjectMetadata::load(&temp.path().join("absent.json")).is_err());

        let path = temp.path().join("broken.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(ProjectMetadata::load(&path).is_err());
    }
}
