//! Permission decisions produced by the registry.

use serde::{Deserialize, Serialize};

/// Where a permission decision came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DecisionSource {
    /// Checklist item marked AI-decidable
    #[serde(rename = "checklist.ai")]
    ChecklistAi,

    /// Checklist item that requires a human
    #[serde(rename = "checklist.human")]
    ChecklistHuman,

    /// No checklist item maps to the tool
    #[serde(rename = "checklist.unknown")]
    ChecklistUnknown,

    /// Project allow list (or `*`)
    #[serde(rename = "project.allow")]
    ProjectAllow,

    /// Project deny list (or `*`)
    #[serde(rename = "project.deny")]
    ProjectDeny,
}

impl DecisionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChecklistAi => "checklist.ai",
            Self::ChecklistHuman => "checklist.human",
            Self::ChecklistUnknown => "checklist.unknown",
            Self::ProjectAllow => "project.allow",
            Self::ProjectDeny => "project.deny",
        }
    }
}

impl std::fmt::Display for DecisionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable allow/deny outcome for one tool request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDecision {
    /// Canonical tool name the decision applies to
    pub tool: String,

    /// Whether the call may proceed
    pub allowed: bool,

    /// Which rule produced the outcome
    pub source: DecisionSource,

    /// Human-readable explanation
    pub reason: String,

    /// Checklist text backing the default decision, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checklist_item: Option<String>,

    /// Checklist slug backing the default decision, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checklist_slug: Option<String>,
}

impl ToolDecision {
    /// Re-target a default decision at a project override, keeping the checklist context
    pub(crate) fn overridden(self, allowed: bool, source: DecisionSource, reason: String) -> Self {
        Self {
            allowed,
            source,
            reason,
            ..self
        }
    }
}
