// crates/toolwarden-core/tests/conditions.rs
// ============================================================================
// Module: Condition Evaluator Tests
// Description: Verifies the closed operator algebra and its fail-secure edges.
// ============================================================================
//! ## Overview
//! Ensures every operator matches its documented semantics, unknown operators
//! and type mismatches evaluate to false, and the regex guards refuse long or
//! catastrophic patterns without erroring.

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
use toolwarden_core::Condition;
use toolwarden_core::is_catastrophic_pattern;

/// Builds a condition from inline JSON.
fn condition(value: Value) -> Condition {
    serde_json::from_value(value).expect("condition json")
}

/// Builds a parameter map from inline JSON.
fn params(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => panic!("params must be an object"),
    }
}

#[test]
fn empty_condition_evaluates_true_without_parameters() {
    let cond = condition(json!({}));
    assert!(cond.evaluate(None));
}

#[test]
fn nonempty_condition_with_absent_parameters_is_false() {
    let cond = condition(json!({ "path": { "equals": "/tmp" } }));
    assert!(!cond.evaluate(None));
}

#[test]
fn equals_and_not_equals() {
    let eq = condition(json!({ "mode": { "equals": "fast" } }));
    let p = params(json!({ "mode": "fast" }));
    assert!(eq.evaluate(Some(&p)));
    assert!(!eq.evaluate(Some(&params(json!({ "mode": "slow" })))));

    let ne = condition(json!({ "mode": { "notEquals": "fast" } }));
    assert!(!ne.evaluate(Some(&p)));
    assert!(ne.evaluate(Some(&params(json!({ "mode": "slow" })))));
}

#[test]
fn not_equals_fails_secure_on_absent_parameter() {
    let ne = condition(json!({ "mode": { "notEquals": "fast" } }));
    assert!(!ne.evaluate(Some(&params(json!({ "other": 1 })))));
}

#[test]
fn numeric_equality_crosses_integer_and_float_forms() {
    let eq = condition(json!({ "count": { "equals": 1 } }));
    assert!(eq.evaluate(Some(&params(json!({ "count": 1.0 })))));
}

#[test]
fn string_predicates() {
    let cond = condition(json!({
        "path": { "startsWith": "/etc/", "endsWith": "passwd", "contains": "etc" }
    }));
    assert!(cond.evaluate(Some(&params(json!({ "path": "/etc/passwd" })))));
    assert!(!cond.evaluate(Some(&params(json!({ "path": "/tmp/passwd" })))));
}

#[test]
fn string_predicates_fail_on_non_string_parameter() {
    let cond = condition(json!({ "path": { "startsWith": "/etc/" } }));
    assert!(!cond.evaluate(Some(&params(json!({ "path": 42 })))));
}

#[test]
fn numeric_comparisons() {
    let cond = condition(json!({ "size": { "gt": 10, "lt": 100 } }));
    assert!(cond.evaluate(Some(&params(json!({ "size": 50 })))));
    assert!(!cond.evaluate(Some(&params(json!({ "size": 5 })))));
    assert!(!cond.evaluate(Some(&params(json!({ "size": 100 })))));

    let bounds = condition(json!({ "size": { "gte": 10, "lte": 100 } }));
    assert!(bounds.evaluate(Some(&params(json!({ "size": 10 })))));
    assert!(bounds.evaluate(Some(&params(json!({ "size": 100 })))));
}

#[test]
fn numeric_comparison_fails_on_non_numeric_sides() {
    let cond = condition(json!({ "size": { "gt": 10 } }));
    assert!(!cond.evaluate(Some(&params(json!({ "size": "big" })))));
    let cond = condition(json!({ "size": { "gt": "ten" } }));
    assert!(!cond.evaluate(Some(&params(json!({ "size": 50 })))));
}

#[test]
fn in_operator_membership() {
    let cond = condition(json!({ "env": { "in": ["dev", "staging"] } }));
    assert!(cond.evaluate(Some(&params(json!({ "env": "dev" })))));
    assert!(!cond.evaluate(Some(&params(json!({ "env": "prod" })))));
}

#[test]
fn in_operator_fails_on_non_array_operand() {
    let cond = condition(json!({ "env": { "in": "dev" } }));
    assert!(!cond.evaluate(Some(&params(json!({ "env": "dev" })))));
}

#[test]
fn in_operator_fails_on_composite_parameter() {
    let cond = condition(json!({ "env": { "in": ["dev"] } }));
    assert!(!cond.evaluate(Some(&params(json!({ "env": ["dev"] })))));
}

#[test]
fn matches_operator_applies_regex() {
    let cond = condition(json!({ "path": { "matches": "^/home/[a-z]+$" } }));
    assert!(cond.evaluate(Some(&params(json!({ "path": "/home/alice" })))));
    assert!(!cond.evaluate(Some(&params(json!({ "path": "/etc/passwd" })))));
}

#[test]
fn matches_refuses_long_patterns() {
    let long = "a".repeat(201);
    let cond = condition(json!({ "path": { "matches": long } }));
    assert!(!cond.evaluate(Some(&params(json!({ "path": "aaaa" })))));
}

#[test]
fn matches_refuses_catastrophic_patterns() {
    for pattern in ["(a+)+", "(x+x+)+y", "(.*)*b", "([a-z]+)*"] {
        let cond = condition(json!({ "path": { "matches": pattern } }));
        assert!(
            !cond.evaluate(Some(&params(json!({ "path": "aaaa" })))),
            "pattern {pattern} must be refused"
        );
    }
}

#[test]
fn matches_refuses_invalid_regex_without_error() {
    let cond = condition(json!({ "path": { "matches": "([" } }));
    assert!(!cond.evaluate(Some(&params(json!({ "path": "x" })))));
}

#[test]
fn unknown_operator_evaluates_false() {
    let cond = condition(json!({ "path": { "fuzzyMatch": "/etc" } }));
    assert!(!cond.evaluate(Some(&params(json!({ "path": "/etc" })))));
    assert!(cond.first_unknown_operator().is_some());
}

#[test]
fn operators_are_conjunctive_across_parameters() {
    let cond = condition(json!({
        "path": { "startsWith": "/tmp" },
        "mode": { "equals": "write" }
    }));
    assert!(cond.evaluate(Some(&params(json!({ "path": "/tmp/x", "mode": "write" })))));
    assert!(!cond.evaluate(Some(&params(json!({ "path": "/tmp/x", "mode": "read" })))));
}

// ============================================================================
// SECTION: Backtracking Guard
// ============================================================================

#[test]
fn guard_flags_nested_quantifiers() {
    assert!(is_catastrophic_pattern("(a+)+"));
    assert!(is_catastrophic_pattern("(x+x+)+y"));
    assert!(is_catastrophic_pattern("(.*)*b"));
    assert!(is_catastrophic_pattern("([a-z]+)*"));
}

#[test]
fn guard_accepts_plain_patterns() {
    assert!(!is_catastrophic_pattern("^/home/[a-z]+$"));
    assert!(!is_catastrophic_pattern("(abc)-(def)"));
    assert!(!is_catastrophic_pattern("file_[0-9]+\\.txt"));
}

#[test]
fn guard_ignores_quantifiers_inside_character_classes() {
    assert!(!is_catastrophic_pattern("([+*])+"));
}
