//! Budget and privacy preflight for tool calls.
//!
//! Every cost- or privacy-sensitive invocation passes through `preflight`
//! before it executes. Violations block the call and are never retried.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{InvocationMetadata, ProjectMetadata};

/// Soft budget limit used when neither the call nor the project sets one
pub const DEFAULT_SOFT_LIMIT_USD: f64 = 5.0;

/// Hard budget limit used when neither the call nor the project sets one
pub const DEFAULT_HARD_LIMIT_USD: f64 = 10.0;

/// Sharing scopes that never leave the project
const LOCAL_SCOPE: &str = "local";
const PROJECT_SCOPE: &str = "project";

/// Outcome of the budget evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BudgetStatus {
    /// No estimate supplied; the call is not blocked
    Unknown,

    /// Projected total is within the soft limit
    Ok,

    /// Projected total is above soft but within hard
    SoftLimit,
}

/// Immutable result of a successful preflight
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyReport {
    pub tool: String,
    pub budget_status: BudgetStatus,
    pub estimated_usd: Option<f64>,
    pub spent_usd: f64,
    pub total_after_usd: Option<f64>,
    pub soft_limit_usd: f64,
    pub hard_limit_usd: f64,
    pub privacy_flags: Vec<String>,
}

impl SafetyReport {
    /// True when the call proceeds past the soft limit
    pub fn is_soft_limited(&self) -> bool {
        self.budget_status == BudgetStatus::SoftLimit
    }
}

/// Safety violation errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SafetyViolation {
    #[error("Policy violation for '{tool}': {reason}")]
    PolicyViolation { tool: String, reason: String },

    #[error("Budget exceeded for '{tool}': {total_after_usd:.2} > hard limit {hard_limit_usd:.2}")]
    BudgetExceeded {
        tool: String,
        total_after_usd: f64,
        hard_limit_usd: f64,
    },

    #[error("Privacy denied for '{tool}': sharing scope '{scope}' requires consent")]
    PrivacyDenied { tool: String, scope: String },
}

// NaN fails every comparison, so it would otherwise pass as within budget
fn check_amount(tool: &str, name: &str, amount: f64) -> Result<(), SafetyViolation> {
    if amount.is_finite() {
        return Ok(());
    }
    Err(SafetyViolation::PolicyViolation {
        tool: tool.to_string(),
        reason: format!("{} must be a finite amount, got {}", name, amount),
    })
}

/// Evaluate budget and privacy policy for one call.
pub fn preflight(
    tool: &str,
    project: &ProjectMetadata,
    invocation: &InvocationMetadata,
) -> Result<SafetyReport, SafetyViolation> {
    let spent = project.budget.spent_usd.unwrap_or(0.0);
    let soft = invocation
        .soft_limit_usd
        .or(project.budget.soft)
        .unwrap_or(DEFAULT_SOFT_LIMIT_USD);
    let hard = invocation
        .hard_limit_usd
        .or(project.budget.hard)
        .unwrap_or(DEFAULT_HARD_LIMIT_USD);

    for (name, amount) in [("spent", spent), ("soft limit", soft), ("hard limit", hard)] {
        check_amount(tool, name, amount)?;
    }

    if hard < soft {
        return Err(SafetyViolation::PolicyViolation {
            tool: tool.to_string(),
            reason: format!("hard limit {:.2} is below soft limit {:.2}", hard, soft),
        });
    }

    let (budget_status, total_after) = match invocation.estimated_cost_usd {
        None => (BudgetStatus::Unknown, None),
        Some(estimate) => {
            if estimate < 0.0 || !estimate.is_finite() {
                return Err(SafetyViolation::PolicyViolation {
                    tool: tool.to_string(),
                    reason: format!("cost estimate must be non-negative, got {}", estimate),
                });
            }

            let total_after = invocation.total_after_usd.unwrap_or(spent + estimate);
            check_amount(tool, "total after call", total_after)?;
            if total_after > hard {
                return Err(SafetyViolation::BudgetExceeded {
                    tool: tool.to_string(),
                    total_after_usd: total_after,
                    hard_limit_usd: hard,
                });
            }

            let status = if total_after > soft {
                BudgetStatus::SoftLimit
            } else {
                BudgetStatus::Ok
            };
            (status, Some(total_after))
        }
    };

    let privacy_flags = privacy_flags(tool, invocation)?;

    Ok(SafetyReport {
        tool: tool.to_string(),
        budget_status,
        estimated_usd: invocation.estimated_cost_usd,
        spent_usd: spent,
        total_after_usd: total_after,
        soft_limit_usd: soft,
        hard_limit_usd: hard,
        privacy_flags,
    })
}

fn privacy_flags(tool: &str, invocation: &InvocationMetadata) -> Result<Vec<String>, SafetyViolation> {
    let scope = match invocation.sharing_scope.as_deref().map(str::trim) {
        None | Some("") => return Ok(Vec::new()),
        Some(scope) => scope.to_lowercase(),
    };

    if scope == LOCAL_SCOPE {
        return Ok(Vec::new());
    }

    if scope != PROJECT_SCOPE && !invocation.consent {
        return Err(SafetyViolation::PrivacyDenied {
            tool: tool.to_string(),
            scope,
        });
    }

    let mut flags = vec![format!("sharing_scope:{}", scope)];
    if invocation.consent {
        flags.push("consent:granted".to_string());
    }
    Ok(flags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Budget;

    fn project(spent: f64, soft: Option<f64>, hard: Option<f64>) -> ProjectMetadata {
        ProjectMetadata {
            budget: Budget {
                spent_usd: Some(spent),
                soft,
                hard,
            },
            ..Default::default()
        }
    }

    fn estimate(cost: f64) -> InvocationMetadata {
        InvocationMetadata {
            estimated_cost_usd: Some(cost),
            ..Default::default()
        }
    }

    #[test]
    fn test_soft_limit_proceeds() {
        let report = preflight("search", &project(4.0, Some(5.0), Some(10.0)), &estimate(3.0)).unwrap();

        assert_eq!(report.total_after_usd, Some(7.0));
        assert_eq!(report.budget_status, BudgetStatus::SoftLimit);
        assert!(report.is_soft_limited());
    }

    #[test]
    fn test_hard_limit_blocks() {
        let result = preflight("search", &project(9.0, None, Some(10.0)), &estimate(5.0));

        assert!(matches!(
            result,
            Err(SafetyViolation::BudgetExceeded { total_after_usd, .. }) if total_after_usd == 14.0
        ));
    }

    #[test]
    fn test_missing_estimate_is_unknown_not_blocked() {
        let report = preflight("search", &project(50.0, None, None), &InvocationMetadata::default()).unwrap();

        assert_eq!(report.budget_status, BudgetStatus::Unknown);
        assert_eq!(report.total_after_usd, None);
    }

    #[test]
    fn test_defaults_apply_without_budget() {
        let report = preflight("template", &ProjectMetadata::default(), &estimate(1.0)).unwrap();

        assert_eq!(report.spent_usd, 0.0);
        assert_eq!(report.soft_limit_usd, DEFAULT_SOFT_LIMIT_USD);
        assert_eq!(report.hard_limit_usd, DEFAULT_HARD_LIMIT_USD);
        assert_eq!(report.budget_status, BudgetStatus::Ok);
    }

    #[test]
    fn test_inverted_limits_are_policy_violation() {
        let result = preflight("search", &project(0.0, Some(8.0), Some(4.0)), &estimate(1.0));
        assert!(matches!(result, Err(SafetyViolation::PolicyViolation { .. })));
    }

    #[test]
    fn test_negative_estimate_is_policy_violation() {
        let result = preflight("search", &ProjectMetadata::default(), &estimate(-0.5));
        assert!(matches!(result, Err(SafetyViolation::PolicyViolation { .. })));
    }

    #[test]
    fn test_privacy_scopes() {
        let local = InvocationMetadata {
            sharing_scope: Some("local".to_string()),
            ..Default::default()
        };
        assert!(preflight("search", &ProjectMetadata::default(), &local)
            .unwrap()
            .privacy_flags
            .is_empty());

        let project_scope = InvocationMetadata {
            sharing_scope: Some("project".to_string()),
            ..Default::default()
        };
        assert_eq!(
            preflight("search", &ProjectMetadata::default(), &project_scope)
                .unwrap()
                .privacy_flags,
            vec!["sharing_scope:project"]
        );

        let public = InvocationMetadata {
            sharing_scope: Some("public".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            preflight("search", &ProjectMetadata::default(), &public),
            Err(SafetyViolation::PrivacyDenied { .. })
        ));
    }
}
