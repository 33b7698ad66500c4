// crates/toolwarden-core/src/core/policy.rs
// ============================================================================
// Module: ToolWarden Policy Model
// Description: Policies, rules, tool patterns, and input validation.
// Purpose: Define the rule shapes evaluated by the policy engine.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! A policy is an ordered list of rules, each binding a tool pattern to an
//! effect with an optional condition. Rule order in the input never affects
//! the outcome; the engine totally orders matches by specificity. Policies
//! are validated once at the input boundary; the evaluator still fails
//! secure if unvalidated input reaches it.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::json;

use crate::core::condition::Condition;
use crate::core::condition::ConditionOperator;
use crate::core::condition::MAX_MATCH_PATTERN_LENGTH;
use crate::core::condition::is_catastrophic_pattern;
use crate::core::error::ErrorCode;
use crate::core::error::GovernanceError;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum number of rules accepted in one policy.
pub const MAX_POLICY_RULES: usize = 1_000;

/// Name of the synthetic zero-configuration policy.
pub const DEFAULT_POLICY_NAME: &str = "default-allow-all";

// ============================================================================
// SECTION: Rule Effects
// ============================================================================

/// Effect applied when a rule wins evaluation.
///
/// # Invariants
/// - Wire names are stable `snake_case` strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleEffect {
    /// Permit the tool call.
    Allow,
    /// Deny the tool call.
    Deny,
}

impl RuleEffect {
    /// Returns the stable wire name for the effect.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
        }
    }
}

impl fmt::Display for RuleEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Tool Patterns
// ============================================================================

/// Tool pattern for a rule: an exact tool name or the literal wildcard `*`.
///
/// # Invariants
/// - Serializes as a plain string; `*` round-trips to the wildcard variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ToolPattern {
    /// Matches every tool name.
    Wildcard,
    /// Matches one tool name exactly.
    Exact(String),
}

impl ToolPattern {
    /// Returns true when the pattern matches the provided tool name.
    #[must_use]
    pub fn matches(&self, tool: &str) -> bool {
        match self {
            Self::Wildcard => true,
            Self::Exact(name) => name == tool,
        }
    }

    /// Returns true for the exact (non-wildcard) form.
    #[must_use]
    pub const fn is_exact(&self) -> bool {
        matches!(self, Self::Exact(_))
    }

    /// Returns the pattern as its wire string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Wildcard => "*",
            Self::Exact(name) => name.as_str(),
        }
    }
}

impl From<String> for ToolPattern {
    fn from(value: String) -> Self {
        if value == "*" {
            Self::Wildcard
        } else {
            Self::Exact(value)
        }
    }
}

impl From<ToolPattern> for String {
    fn from(pattern: ToolPattern) -> Self {
        pattern.as_str().to_string()
    }
}

impl fmt::Display for ToolPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Rate Limits
// ============================================================================

/// Rate-limit descriptor accepted on rules but never enforced by the core.
///
/// # Invariants
/// - The shape is preserved through storage and export for downstream
///   enforcement layers; the engine ignores it entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDescriptor {
    /// Maximum calls within the window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_calls: Option<u64>,
    /// Window length in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_seconds: Option<u64>,
}

// ============================================================================
// SECTION: Rules
// ============================================================================

/// One policy rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRule {
    /// Optional human-facing rule name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Tool pattern the rule applies to.
    pub tool: ToolPattern,
    /// Effect applied when the rule wins.
    pub effect: RuleEffect,
    /// Optional parameter condition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    /// Optional human-readable reason surfaced verbatim on a win.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Rate-limit descriptor (accepted, never enforced).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitDescriptor>,
    /// Diverts an allow into the approval workflow when set.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub require_approval: bool,
}

impl PolicyRule {
    /// Creates a minimal rule for a tool pattern and effect.
    #[must_use]
    pub const fn new(tool: ToolPattern, effect: RuleEffect) -> Self {
        Self {
            name: None,
            tool,
            effect,
            condition: None,
            reason: None,
            rate_limit: None,
            require_approval: false,
        }
    }

    /// Returns true when the rule carries at least one effective operator.
    #[must_use]
    pub fn has_effective_condition(&self) -> bool {
        self.condition
            .as_ref()
            .is_some_and(|condition| !condition.is_effectively_empty())
    }
}

// ============================================================================
// SECTION: Policies
// ============================================================================

/// Named, versioned, ordered rule list.
///
/// # Invariants
/// - `rules` holds between 1 and [`MAX_POLICY_RULES`] entries once validated.
/// - `agent_id` of `None` marks a global policy; resolution prefers
///   agent-specific policies over global ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    /// Unique policy name.
    pub name: String,
    /// Monotonic version, bumped on every upsert.
    pub version: i64,
    /// Optional agent the policy is scoped to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// Ordered rules; input order never affects the outcome.
    pub rules: Vec<PolicyRule>,
    /// Creation instant.
    pub created_at: Timestamp,
    /// Last-update instant.
    pub updated_at: Timestamp,
}

impl Policy {
    /// Creates a version-1 policy from a name and rules.
    #[must_use]
    pub fn new(name: impl Into<String>, rules: Vec<PolicyRule>) -> Self {
        let now = Timestamp::now();
        Self {
            name: name.into(),
            version: 1,
            agent_id: None,
            rules,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns the synthetic allow-all policy used when nothing is configured.
    #[must_use]
    pub fn default_allow_all() -> Self {
        Self::new(
            DEFAULT_POLICY_NAME,
            vec![PolicyRule::new(ToolPattern::Wildcard, RuleEffect::Allow)],
        )
    }

    /// Validates the policy at the input boundary.
    ///
    /// # Errors
    ///
    /// Returns an [`ErrorCode::InvalidPolicy`] error when the name is empty,
    /// the rule count is out of bounds, a tool pattern is empty, an operator
    /// falls outside the closed algebra, or a `matches` operand violates the
    /// regex guards.
    pub fn validate(&self) -> Result<(), GovernanceError> {
        if self.name.trim().is_empty() {
            return Err(GovernanceError::new(
                ErrorCode::InvalidPolicy,
                "policy name must not be empty",
            ));
        }
        if self.rules.is_empty() || self.rules.len() > MAX_POLICY_RULES {
            return Err(GovernanceError::new(
                ErrorCode::InvalidPolicy,
                format!(
                    "policy must carry between 1 and {MAX_POLICY_RULES} rules, got {}",
                    self.rules.len()
                ),
            )
            .with_context("policy", json!(self.name)));
        }
        for (index, rule) in self.rules.iter().enumerate() {
            validate_rule(&self.name, index, rule)?;
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Policy Versions
// ============================================================================

/// Snapshot of a policy taken immediately before it was overwritten.
///
/// # Invariants
/// - History records the policy as it was, not as it will be.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyVersion {
    /// Store-assigned snapshot identifier.
    pub id: i64,
    /// Name of the snapshotted policy.
    pub policy_name: String,
    /// Version the policy carried at snapshot time.
    pub version: i64,
    /// Agent scope the policy carried at snapshot time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// Rules the policy carried at snapshot time.
    pub rules: Vec<PolicyRule>,
    /// Author of the overwrite that produced the snapshot.
    pub author: String,
    /// Snapshot instant.
    pub created_at: Timestamp,
}

// ============================================================================
// SECTION: Validation Helpers
// ============================================================================

/// Validates one rule of a policy.
fn validate_rule(policy: &str, index: usize, rule: &PolicyRule) -> Result<(), GovernanceError> {
    if let ToolPattern::Exact(name) = &rule.tool
        && name.trim().is_empty()
    {
        return Err(GovernanceError::new(
            ErrorCode::InvalidPolicy,
            format!("rule {index} of policy '{policy}' has an empty tool pattern"),
        ));
    }
    let Some(condition) = &rule.condition else {
        return Ok(());
    };
    if let Some(unknown) = condition.first_unknown_operator() {
        return Err(GovernanceError::new(
            ErrorCode::InvalidPolicy,
            format!(
                "rule {index} of policy '{policy}' uses unknown operator '{}'",
                unknown.wire_name()
            ),
        ));
    }
    for operators in condition.entries().values() {
        for operator in operators.operators() {
            let Some(pattern) = match_pattern_operand(operator) else {
                continue;
            };
            if pattern.len() > MAX_MATCH_PATTERN_LENGTH {
                return Err(GovernanceError::new(
                    ErrorCode::InvalidPolicy,
                    format!(
                        "rule {index} of policy '{policy}' has a matches pattern longer than \
                         {MAX_MATCH_PATTERN_LENGTH} characters"
                    ),
                ));
            }
            if is_catastrophic_pattern(pattern) {
                return Err(GovernanceError::new(
                    ErrorCode::InvalidPolicy,
                    format!(
                        "rule {index} of policy '{policy}' has a matches pattern with nested \
                         quantifiers"
                    ),
                ));
            }
        }
    }
    Ok(())
}

/// Returns the pattern string when the operator is a `matches` with a string
/// operand.
fn match_pattern_operand(operator: &ConditionOperator) -> Option<&str> {
    match operator {
        ConditionOperator::Matches(operand) => operand.as_str(),
        _ => None,
    }
}
