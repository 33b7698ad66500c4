// crates/toolwarden-core/tests/policy.rs
// ============================================================================
// Module: Policy Engine Tests
// Description: Verifies specificity ordering, tie-breaks, and fail-secure floor.
// ============================================================================
//! ## Overview
//! Ensures decisions are deterministic, rule order in the input never affects
//! the outcome, deny wins ties, higher specificity beats lower, and missing
//! or unmatched policies deny.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    clippy::missing_docs_in_private_items,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use serde_json::Map;
use serde_json::Value;
use serde_json::json;
use toolwarden_core::EvaluationRequest;
use toolwarden_core::Policy;
use toolwarden_core::PolicyEngine;
use toolwarden_core::PolicyRule;
use toolwarden_core::RuleEffect;
use toolwarden_core::ToolPattern;
use toolwarden_core::TraceId;

/// Fixed trace id for deterministic assertions.
fn trace() -> TraceId {
    TraceId::parse("0123456789abcdef0123456789abcdef").expect("trace id")
}

/// Builds a rule from inline JSON.
fn rule(value: Value) -> PolicyRule {
    serde_json::from_value(value).expect("rule json")
}

/// Builds a named policy from rules.
fn policy(rules: Vec<PolicyRule>) -> Policy {
    Policy::new("test-policy", rules)
}

/// Builds a request with parameters.
fn request_with(tool: &str, params: Value) -> EvaluationRequest {
    let Value::Object(map) = params else {
        panic!("params must be an object");
    };
    EvaluationRequest::new("agent-a", tool).with_parameters(map)
}

#[test]
fn allow_on_exact_match() {
    let engine = PolicyEngine::new();
    let policy = policy(vec![rule(json!({ "tool": "file_read", "effect": "allow" }))]);
    let outcome =
        engine.evaluate(Some(&policy), &EvaluationRequest::new("a", "file_read"), &trace());
    assert!(outcome.allowed);
    assert_eq!(outcome.applied_rules.len(), 1);
    assert_eq!(outcome.applied_rules[0].effect, RuleEffect::Allow);
}

#[test]
fn specificity_beats_wildcard_regardless_of_rule_order() {
    let engine = PolicyEngine::new();
    let wildcard = rule(json!({ "tool": "*", "effect": "allow" }));
    let exact = rule(json!({ "tool": "file_write", "effect": "deny", "reason": "No writes" }));

    for rules in [
        vec![wildcard.clone(), exact.clone()],
        vec![exact.clone(), wildcard.clone()],
    ] {
        let policy = policy(rules);
        let outcome =
            engine.evaluate(Some(&policy), &EvaluationRequest::new("a", "file_write"), &trace());
        assert!(!outcome.allowed);
        assert_eq!(outcome.reason.as_deref(), Some("No writes"));
        assert_eq!(outcome.applied_rules.len(), 2);
        assert_eq!(outcome.applied_rules[0].effect, RuleEffect::Deny);
    }
}

#[test]
fn condition_restricts_a_path() {
    let engine = PolicyEngine::new();
    let policy = policy(vec![
        rule(json!({
            "tool": "file_write",
            "effect": "deny",
            "condition": { "path": { "startsWith": "/etc/" } },
            "reason": "Forbidden path"
        })),
        rule(json!({ "tool": "*", "effect": "allow" })),
    ]);

    let denied = engine.evaluate(
        Some(&policy),
        &request_with("file_write", json!({ "path": "/etc/passwd" })),
        &trace(),
    );
    assert!(!denied.allowed);
    assert_eq!(denied.reason.as_deref(), Some("Forbidden path"));

    let allowed = engine.evaluate(
        Some(&policy),
        &request_with("file_write", json!({ "path": "/tmp/x" })),
        &trace(),
    );
    assert!(allowed.allowed);
}

#[test]
fn deny_wins_ties_at_equal_specificity() {
    let engine = PolicyEngine::new();
    let allow = rule(json!({ "tool": "shell", "effect": "allow" }));
    let deny = rule(json!({ "tool": "shell", "effect": "deny", "reason": "blocked" }));

    for rules in [vec![allow.clone(), deny.clone()], vec![deny.clone(), allow.clone()]] {
        let policy = policy(rules);
        let outcome =
            engine.evaluate(Some(&policy), &EvaluationRequest::new("a", "shell"), &trace());
        assert!(!outcome.allowed, "deny must win the tie");
        assert_eq!(outcome.applied_rules[0].effect, RuleEffect::Deny);
    }
}

#[test]
fn conditional_exact_rule_outranks_unconditional_exact_rule() {
    let engine = PolicyEngine::new();
    let policy = policy(vec![
        rule(json!({ "tool": "deploy", "effect": "allow" })),
        rule(json!({
            "tool": "deploy",
            "effect": "deny",
            "condition": { "env": { "equals": "prod" } },
            "reason": "prod is frozen"
        })),
    ]);
    let outcome =
        engine.evaluate(Some(&policy), &request_with("deploy", json!({ "env": "prod" })), &trace());
    assert!(!outcome.allowed);
    assert_eq!(outcome.applied_rules[0].specificity, 2);
    assert_eq!(outcome.applied_rules[1].specificity, 1);
}

#[test]
fn lower_specificity_insertion_does_not_change_winner() {
    let engine = PolicyEngine::new();
    let base = vec![rule(json!({ "tool": "file_read", "effect": "deny", "reason": "nope" }))];
    let with_wildcard = {
        let mut rules = base.clone();
        rules.push(rule(json!({ "tool": "*", "effect": "allow" })));
        rules
    };
    let request = EvaluationRequest::new("a", "file_read");
    let before = engine.evaluate(Some(&policy(base)), &request, &trace());
    let after = engine.evaluate(Some(&policy(with_wildcard)), &request, &trace());
    assert_eq!(before.allowed, after.allowed);
    assert_eq!(before.reason, after.reason);
}

#[test]
fn missing_policy_denies() {
    let engine = PolicyEngine::new();
    let outcome = engine.evaluate(None, &EvaluationRequest::new("a", "anything"), &trace());
    assert!(!outcome.allowed);
    assert!(outcome.reason.expect("reason").contains("no policy"));
    assert!(outcome.applied_rules.is_empty());
}

#[test]
fn unmatched_tool_denies_with_tool_and_policy_named() {
    let engine = PolicyEngine::new();
    let policy = policy(vec![rule(json!({ "tool": "file_read", "effect": "allow" }))]);
    let outcome =
        engine.evaluate(Some(&policy), &EvaluationRequest::new("a", "file_write"), &trace());
    assert!(!outcome.allowed);
    let reason = outcome.reason.expect("reason");
    assert!(reason.contains("file_write"));
    assert!(reason.contains("test-policy"));
}

#[test]
fn wildcard_with_condition_stays_specificity_zero() {
    let engine = PolicyEngine::new();
    let policy = policy(vec![
        rule(json!({
            "tool": "*",
            "effect": "deny",
            "condition": { "env": { "equals": "prod" } },
            "reason": "wildcard guard"
        })),
        rule(json!({ "tool": "deploy", "effect": "allow" })),
    ]);
    let outcome =
        engine.evaluate(Some(&policy), &request_with("deploy", json!({ "env": "prod" })), &trace());
    assert!(outcome.allowed, "exact rule must outrank conditional wildcard");
    assert_eq!(outcome.applied_rules[0].specificity, 1);
    assert_eq!(outcome.applied_rules[1].specificity, 0);
}

#[test]
fn decisions_are_deterministic() {
    let engine = PolicyEngine::new();
    let policy = policy(vec![
        rule(json!({ "tool": "*", "effect": "allow" })),
        rule(json!({ "tool": "shell", "effect": "deny", "reason": "blocked" })),
    ]);
    let request = EvaluationRequest::new("a", "shell");
    let first = engine.evaluate(Some(&policy), &request, &trace());
    let second = engine.evaluate(Some(&policy), &request, &trace());
    assert_eq!(first, second);
}

#[test]
fn deny_without_reason_synthesizes_one() {
    let engine = PolicyEngine::new();
    let policy = policy(vec![rule(json!({ "tool": "shell", "effect": "deny" }))]);
    let outcome = engine.evaluate(Some(&policy), &EvaluationRequest::new("a", "shell"), &trace());
    assert!(!outcome.allowed);
    assert!(outcome.reason.is_some());
}

// ============================================================================
// SECTION: Validation
// ============================================================================

#[test]
fn validation_rejects_empty_rule_list() {
    let empty = Policy::new("p", Vec::new());
    assert!(empty.validate().is_err());
}

#[test]
fn validation_rejects_unknown_operator() {
    let policy = policy(vec![rule(json!({
        "tool": "shell",
        "effect": "deny",
        "condition": { "cmd": { "fuzzy": "rm" } }
    }))]);
    assert!(policy.validate().is_err());
}

#[test]
fn validation_rejects_catastrophic_match_pattern() {
    let policy = policy(vec![rule(json!({
        "tool": "shell",
        "effect": "deny",
        "condition": { "cmd": { "matches": "(a+)+" } }
    }))]);
    assert!(policy.validate().is_err());
}

#[test]
fn validation_accepts_rate_limit_descriptor_without_enforcing_it() {
    let policy = policy(vec![rule(json!({
        "tool": "search",
        "effect": "allow",
        "rateLimit": { "maxCalls": 10, "windowSeconds": 60 }
    }))]);
    assert!(policy.validate().is_ok());
    let engine = PolicyEngine::new();
    let outcome = engine.evaluate(Some(&policy), &EvaluationRequest::new("a", "search"), &trace());
    assert!(outcome.allowed, "rate limit descriptor must not affect the decision");
}

#[test]
fn rule_serialization_round_trips() {
    let original = rule(json!({
        "name": "guard-etc",
        "tool": "file_write",
        "effect": "deny",
        "condition": { "path": { "startsWith": "/etc/" } },
        "reason": "Forbidden path",
        "requireApproval": true
    }));
    let text = serde_json::to_string(&original).expect("serialize");
    let parsed: PolicyRule = serde_json::from_str(&text).expect("parse");
    assert_eq!(original, parsed);
    assert_eq!(parsed.tool, ToolPattern::Exact("file_write".to_string()));
}

#[test]
fn wildcard_pattern_round_trips_as_star() {
    let parsed: PolicyRule = serde_json::from_value(json!({ "tool": "*", "effect": "allow" }))
        .expect("rule");
    assert_eq!(parsed.tool, ToolPattern::Wildcard);
    let text = serde_json::to_value(&parsed).expect("serialize");
    assert_eq!(text.get("tool"), Some(&json!("*")));
}

#[test]
fn default_allow_all_matches_everything() {
    let engine = PolicyEngine::new();
    let policy = Policy::default_allow_all();
    let mut params = Map::new();
    params.insert("anything".to_string(), json!(1));
    let outcome = engine.evaluate(
        Some(&policy),
        &EvaluationRequest::new("a", "whatever").with_parameters(params),
        &trace(),
    );
    assert!(outcome.allowed);
}
