// crates/toolwarden-core/src/core/condition.rs
// ============================================================================
// Module: ToolWarden Condition Algebra
// Description: Closed operator set for rule conditions over parameter maps.
// Purpose: Evaluate parameter conditions deterministically and fail secure.
// Dependencies: regex, serde, serde_json
// ============================================================================

//! ## Overview
//! A condition maps parameter names to operator sets. Both axes are
//! conjunctive: every operator under a parameter must hold, and every
//! parameter entry must hold. The operator algebra is closed at exactly
//! eleven names; anything else deserializes into an `Unknown` variant that
//! the policy validator rejects and the evaluator scores as `false`.
//!
//! The `matches` operator compiles user-supplied regular expressions and is
//! therefore guarded twice: operands longer than 200 characters are refused,
//! and quantified groups that contain their own quantifier (the classic
//! catastrophic-backtracking shapes) are refused before compilation. Every
//! guard failure evaluates to `false`, never an error.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use regex::Regex;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum accepted length for a `matches` regex operand.
pub const MAX_MATCH_PATTERN_LENGTH: usize = 200;

// ============================================================================
// SECTION: Operators
// ============================================================================

/// One condition operator applied to a single parameter.
///
/// # Invariants
/// - The algebra is closed; `Unknown` exists only to fail secure on input
///   that slipped past validation.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionOperator {
    /// Strict equality against the operand.
    Equals(Value),
    /// Strict inequality against the operand; absent parameters fail.
    NotEquals(Value),
    /// String prefix test.
    StartsWith(Value),
    /// String suffix test.
    EndsWith(Value),
    /// String containment test.
    Contains(Value),
    /// Numeric strictly-greater comparison.
    Gt(Value),
    /// Numeric strictly-less comparison.
    Lt(Value),
    /// Numeric greater-or-equal comparison.
    Gte(Value),
    /// Numeric less-or-equal comparison.
    Lte(Value),
    /// Membership in an operand array of primitives.
    In(Value),
    /// Guarded regular-expression match over a string parameter.
    Matches(Value),
    /// Operator name outside the closed algebra; always evaluates to `false`.
    Unknown {
        /// Rejected operator name.
        name: String,
        /// Operand supplied with the rejected operator.
        operand: Value,
    },
}

impl ConditionOperator {
    /// Builds an operator from its wire name and operand.
    #[must_use]
    pub fn from_wire(name: &str, operand: Value) -> Self {
        match name {
            "equals" => Self::Equals(operand),
            "notEquals" => Self::NotEquals(operand),
            "startsWith" => Self::StartsWith(operand),
            "endsWith" => Self::EndsWith(operand),
            "contains" => Self::Contains(operand),
            "gt" => Self::Gt(operand),
            "lt" => Self::Lt(operand),
            "gte" => Self::Gte(operand),
            "lte" => Self::Lte(operand),
            "in" => Self::In(operand),
            "matches" => Self::Matches(operand),
            _ => Self::Unknown {
                name: name.to_string(),
                operand,
            },
        }
    }

    /// Returns the wire name of the operator.
    #[must_use]
    pub fn wire_name(&self) -> &str {
        match self {
            Self::Equals(_) => "equals",
            Self::NotEquals(_) => "notEquals",
            Self::StartsWith(_) => "startsWith",
            Self::EndsWith(_) => "endsWith",
            Self::Contains(_) => "contains",
            Self::Gt(_) => "gt",
            Self::Lt(_) => "lt",
            Self::Gte(_) => "gte",
            Self::Lte(_) => "lte",
            Self::In(_) => "in",
            Self::Matches(_) => "matches",
            Self::Unknown {
                name, ..
            } => name.as_str(),
        }
    }

    /// Returns the operand supplied with the operator.
    #[must_use]
    pub const fn operand(&self) -> &Value {
        match self {
            Self::Equals(operand)
            | Self::NotEquals(operand)
            | Self::StartsWith(operand)
            | Self::EndsWith(operand)
            | Self::Contains(operand)
            | Self::Gt(operand)
            | Self::Lt(operand)
            | Self::Gte(operand)
            | Self::Lte(operand)
            | Self::In(operand)
            | Self::Matches(operand)
            | Self::Unknown {
                operand, ..
            } => operand,
        }
    }

    /// Returns true for operator names outside the closed algebra.
    #[must_use]
    pub const fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown { .. })
    }

    /// Evaluates the operator against an optional parameter value.
    #[must_use]
    pub fn evaluate(&self, parameter: Option<&Value>) -> bool {
        match self {
            Self::Equals(operand) => parameter.is_some_and(|value| values_equal(value, operand)),
            Self::NotEquals(operand) => {
                parameter.is_some_and(|value| !values_equal(value, operand))
            }
            Self::StartsWith(operand) => {
                string_pair(parameter, operand).is_some_and(|(value, op)| value.starts_with(op))
            }
            Self::EndsWith(operand) => {
                string_pair(parameter, operand).is_some_and(|(value, op)| value.ends_with(op))
            }
            Self::Contains(operand) => {
                string_pair(parameter, operand).is_some_and(|(value, op)| value.contains(op))
            }
            Self::Gt(operand) => {
                numeric_pair(parameter, operand).is_some_and(|(value, op)| value > op)
            }
            Self::Lt(operand) => {
                numeric_pair(parameter, operand).is_some_and(|(value, op)| value < op)
            }
            Self::Gte(operand) => {
                numeric_pair(parameter, operand).is_some_and(|(value, op)| value >= op)
            }
            Self::Lte(operand) => {
                numeric_pair(parameter, operand).is_some_and(|(value, op)| value <= op)
            }
            Self::In(operand) => evaluate_in(parameter, operand),
            Self::Matches(operand) => evaluate_matches(parameter, operand),
            Self::Unknown {
                ..
            } => false,
        }
    }
}

// ============================================================================
// SECTION: Operator Sets
// ============================================================================

/// Conjunctive operator set applied to one parameter.
///
/// # Invariants
/// - Serializes as a JSON object from operator name to operand.
/// - Evaluation is the conjunction of all member operators.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, Value>", into = "BTreeMap<String, Value>")]
pub struct OperatorSet {
    /// Operators in deterministic (wire-name) order.
    operators: Vec<ConditionOperator>,
}

impl OperatorSet {
    /// Creates an operator set from a list of operators.
    #[must_use]
    pub fn new(operators: Vec<ConditionOperator>) -> Self {
        Self {
            operators,
        }
    }

    /// Returns the member operators.
    #[must_use]
    pub fn operators(&self) -> &[ConditionOperator] {
        &self.operators
    }

    /// Returns true when the set contains no operators.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    /// Evaluates the conjunction of all operators against a parameter value.
    #[must_use]
    pub fn evaluate(&self, parameter: Option<&Value>) -> bool {
        self.operators.iter().all(|operator| operator.evaluate(parameter))
    }
}

impl From<BTreeMap<String, Value>> for OperatorSet {
    fn from(map: BTreeMap<String, Value>) -> Self {
        let operators = map
            .into_iter()
            .map(|(name, operand)| ConditionOperator::from_wire(&name, operand))
            .collect();
        Self {
            operators,
        }
    }
}

impl From<OperatorSet> for BTreeMap<String, Value> {
    fn from(set: OperatorSet) -> Self {
        set.operators
            .into_iter()
            .map(|operator| (operator.wire_name().to_string(), operator.operand().clone()))
            .collect()
    }
}

// ============================================================================
// SECTION: Conditions
// ============================================================================

/// Mapping from parameter name to operator set, conjunctive across names.
///
/// # Invariants
/// - An empty condition evaluates to `true`; the guard is rule specificity,
///   not emptiness.
/// - A non-empty condition with an absent parameter map evaluates to `false`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Condition {
    /// Parameter-name keyed operator sets.
    entries: BTreeMap<String, OperatorSet>,
}

impl Condition {
    /// Creates a condition from parameter-keyed operator sets.
    #[must_use]
    pub const fn new(entries: BTreeMap<String, OperatorSet>) -> Self {
        Self {
            entries,
        }
    }

    /// Returns the parameter-keyed operator sets.
    #[must_use]
    pub const fn entries(&self) -> &BTreeMap<String, OperatorSet> {
        &self.entries
    }

    /// Returns true when no parameter carries any operator.
    #[must_use]
    pub fn is_effectively_empty(&self) -> bool {
        self.entries.values().all(OperatorSet::is_empty)
    }

    /// Evaluates the condition against an optional parameter map.
    #[must_use]
    pub fn evaluate(&self, parameters: Option<&Map<String, Value>>) -> bool {
        if self.is_effectively_empty() {
            return true;
        }
        let Some(parameters) = parameters else {
            return false;
        };
        self.entries
            .iter()
            .all(|(name, operators)| operators.evaluate(parameters.get(name)))
    }

    /// Returns the first operator outside the closed algebra, if any.
    #[must_use]
    pub fn first_unknown_operator(&self) -> Option<&ConditionOperator> {
        self.entries
            .values()
            .flat_map(|set| set.operators().iter())
            .find(|operator| operator.is_unknown())
    }
}

// ============================================================================
// SECTION: Operator Helpers
// ============================================================================

/// Compares values with numeric awareness (`1` equals `1.0`).
fn values_equal(left: &Value, right: &Value) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(left_num), Some(right_num)) => left_num == right_num,
        _ => left == right,
    }
}

/// Extracts a string parameter/operand pair, failing secure on other types.
fn string_pair<'a>(parameter: Option<&'a Value>, operand: &'a Value) -> Option<(&'a str, &'a str)> {
    match (parameter?.as_str(), operand.as_str()) {
        (Some(value), Some(op)) => Some((value, op)),
        _ => None,
    }
}

/// Extracts a numeric parameter/operand pair, failing secure on other types.
fn numeric_pair(parameter: Option<&Value>, operand: &Value) -> Option<(f64, f64)> {
    match (parameter?.as_f64(), operand.as_f64()) {
        (Some(value), Some(op)) => Some((value, op)),
        _ => None,
    }
}

/// Evaluates membership of a primitive parameter in an operand array.
fn evaluate_in(parameter: Option<&Value>, operand: &Value) -> bool {
    let Some(value) = parameter else {
        return false;
    };
    let Value::Array(candidates) = operand else {
        return false;
    };
    if value.is_array() || value.is_object() {
        return false;
    }
    candidates.iter().any(|candidate| values_equal(value, candidate))
}

/// Evaluates the guarded `matches` operator.
fn evaluate_matches(parameter: Option<&Value>, operand: &Value) -> bool {
    let Some(value) = parameter.and_then(Value::as_str) else {
        return false;
    };
    let Some(pattern) = operand.as_str() else {
        return false;
    };
    if pattern.len() > MAX_MATCH_PATTERN_LENGTH || is_catastrophic_pattern(pattern) {
        return false;
    }
    Regex::new(pattern).is_ok_and(|regex| regex.is_match(value))
}

// ============================================================================
// SECTION: Backtracking Guard
// ============================================================================

/// Detects quantified groups that contain their own quantifier.
///
/// Shapes such as `(a+)+`, `(x+x+)+y`, `(.*)*b`, and `([a-z]+)*` are refused.
/// Escapes and character classes are skipped so literal metacharacters do not
/// trip the guard.
#[must_use]
pub fn is_catastrophic_pattern(pattern: &str) -> bool {
    let mut group_has_quantifier: Vec<bool> = Vec::new();
    let mut in_class = false;
    let mut chars = pattern.chars().peekable();
    while let Some(ch) = chars.next() {
        if in_class {
            match ch {
                '\\' => {
                    chars.next();
                }
                ']' => in_class = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '\\' => {
                chars.next();
            }
            '[' => in_class = true,
            '(' => group_has_quantifier.push(false),
            ')' => {
                let contained = group_has_quantifier.pop().unwrap_or(false);
                let quantified = matches!(chars.peek(), Some('+' | '*' | '?' | '{'));
                if contained && quantified {
                    return true;
                }
                if contained && let Some(parent) = group_has_quantifier.last_mut() {
                    *parent = true;
                }
            }
            '+' | '*' | '?' | '{' => {
                if let Some(top) = group_has_quantifier.last_mut() {
                    *top = true;
                }
            }
            _ => {}
        }
    }
    false
}
