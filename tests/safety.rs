//! Safety Integration Tests
//!
//! Tests for the budget and privacy preflight and for payload scrubbing.

use serde_json::json;
use toolgate::core::redact::{REDACTED, REDACTED_EMAIL, REDACTED_TOKEN};
use toolgate::core::{postflight_scrub, preflight, BudgetStatus, SafetyViolation};
use toolgate::domain::{Budget, InvocationMetadata, ProjectMetadata};

fn project(spent: f64, soft: Option<f64>, hard: Option<f64>) -> ProjectMetadata {
    ProjectMetadata {
        project_id: "novel".to_string(),
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
fn test_soft_limit_warns_but_proceeds() {
    // spent 4 + estimate 3 = 7: above soft 5, below hard 10
    let report = preflight("search", &project(4.0, Some(5.0), Some(10.0)), &estimate(3.0)).unwrap();

    assert_eq!(report.total_after_usd, Some(7.0));
    assert_eq!(report.budget_status, BudgetStatus::SoftLimit);
    assert_eq!(report.spent_usd, 4.0);
}

#[test]
fn test_hard_limit_blocks() {
    let result = preflight("search", &project(9.0, None, Some(10.0)), &estimate(5.0));

    match result {
        Err(SafetyViolation::BudgetExceeded {
            tool,
            total_after_usd,
            hard_limit_usd,
        }) => {
            assert_eq!(tool, "search");
            assert_eq!(total_after_usd, 14.0);
            assert_eq!(hard_limit_usd, 10.0);
        }
        other => panic!("expected BudgetExceeded, got {:?}", other),
    }
}

#[test]
fn test_exactly_at_hard_limit_is_allowed() {
    let report = preflight("search", &project(6.0, Some(5.0), Some(10.0)), &estimate(4.0)).unwrap();
    assert_eq!(report.budget_status, BudgetStatus::SoftLimit);
    assert_eq!(report.total_after_usd, Some(10.0));
}

#[test]
fn test_explicit_total_after_overrides_sum() {
    let metadata = InvocationMetadata {
        estimated_cost_usd: Some(1.0),
        total_after_usd: Some(2.0),
        ..Default::default()
    };
    let report = preflight("search", &project(9.5, Some(5.0), Some(10.0)), &metadata).unwrap();

    assert_eq!(report.total_after_usd, Some(2.0));
    assert_eq!(report.budget_status, BudgetStatus::Ok);
}

#[test]
fn test_non_finite_amounts_are_policy_violations() {
    let nan_total = InvocationMetadata {
        estimated_cost_usd: Some(1.0),
        total_after_usd: Some(f64::NAN),
        ..Default::default()
    };
    let result = preflight("search", &project(0.0, Some(5.0), Some(10.0)), &nan_total);
    assert!(matches!(result, Err(SafetyViolation::PolicyViolation { .. })));

    let result = preflight("search", &project(0.0, Some(5.0), Some(f64::NAN)), &estimate(50.0));
    match result {
        Err(SafetyViolation::PolicyViolation { tool, reason }) => {
            assert_eq!(tool, "search");
            assert!(reason.contains("hard limit"));
        }
        other => panic!("expected PolicyViolation, got {:?}", other),
    }

    let result = preflight("search", &project(f64::NAN, None, None), &estimate(1.0));
    assert!(matches!(result, Err(SafetyViolation::PolicyViolation { .. })));

    let result = preflight("search", &project(0.0, None, None), &estimate(f64::INFINITY));
    assert!(matches!(result, Err(SafetyViolation::PolicyViolation { .. })));
}

#[test]
fn test_call_limits_override_project_limits() {
    let metadata = InvocationMetadata {
        estimated_cost_usd: Some(3.0),
        hard_limit_usd: Some(2.5),
        soft_limit_usd: Some(1.0),
        ..Default::default()
    };
    let result = preflight("search", &project(0.0, Some(5.0), Some(10.0)), &metadata);
    assert!(matches!(result, Err(SafetyViolation::BudgetExceeded { .. })));
}

#[test]
fn test_consent_unlocks_wider_scopes() {
    let metadata = InvocationMetadata {
        sharing_scope: Some("Public".to_string()),
        consent: true,
        ..Default::default()
    };
    let report = preflight("search", &ProjectMetadata::default(), &metadata).unwrap();

    assert_eq!(
        report.privacy_flags,
        vec!["sharing_scope:public".to_string(), "consent:granted".to_string()]
    );

    let without_consent = InvocationMetadata {
        consent: false,
        ..metadata
    };
    assert!(matches!(
        preflight("search", &ProjectMetadata::default(), &without_consent),
        Err(SafetyViolation::PrivacyDenied { scope, .. }) if scope == "public"
    ));
}

#[test]
fn test_budget_violation_checked_before_privacy() {
    let metadata = InvocationMetadata {
        estimated_cost_usd: Some(50.0),
        sharing_scope: Some("team".to_string()),
        ..Default::default()
    };
    let result = preflight("search", &project(0.0, None, None), &metadata);
    assert!(matches!(result, Err(SafetyViolation::BudgetExceeded { .. })));
}

#[test]
fn test_scrub_masks_secrets_emails_and_tokens() {
    let payload = json!({
        "query": "contact jane@example.com",
        "api_key": "abc",
        "nested": {
            "note": "use sk-ABCDEFGH12345678 for access",
            "tokens": ["one", "two"],
        },
        "count": 3,
    });

    let scrubbed = postflight_scrub(&payload);

    assert_eq!(scrubbed["query"], format!("contact {}", REDACTED_EMAIL));
    assert_eq!(scrubbed["api_key"], REDACTED);
    assert_eq!(scrubbed["nested"]["note"], format!("use {} for access", REDACTED_TOKEN));
    assert_eq!(scrubbed["nested"]["tokens"], json!(["one", "two"]));
    assert_eq!(scrubbed["count"], 3);
}

#[test]
fn test_scrub_keeps_shape_and_leaves_input_untouched() {
    let payload = json!({
        "b": [1, {"password": "hunter2"}, null],
        "a": "plain text",
    });
    let original = payload.clone();

    let scrubbed = postflight_scrub(&payload);

    assert_eq!(payload, original);
    let keys: Vec<&String> = scrubbed.as_object().unwrap().keys().collect();
    let original_keys: Vec<&String> = original.as_object().unwrap().keys().collect();
    assert_eq!(keys, original_keys);
    assert_eq!(scrubbed["b"][1]["password"], REDACTED);
    assert_eq!(scrubbed["b"][2], json!(null));
    assert_eq!(scrubbed["a"], "plain text");
}
