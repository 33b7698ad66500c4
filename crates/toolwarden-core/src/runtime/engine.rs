// crates/toolwarden-core/src/runtime/engine.rs
// ============================================================================
// Module: ToolWarden Policy Engine
// Description: Deterministic rule selection with a specificity lattice.
// Purpose: Pick the winning rule for a request and fail secure otherwise.
// Dependencies: crate::core, serde
// ============================================================================

//! ## Overview
//! The engine is a pure function from `(policy, request)` to a decision.
//! Matching rules are totally ordered by specificity descending, with deny
//! ranked before allow at equal specificity; the first entry wins and every
//! match is reported in priority order. Rule order in the input array never
//! affects the outcome. The fail-secure floor is a deny whenever no policy
//! is present or nothing matches.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::cmp::Ordering;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

use crate::core::Policy;
use crate::core::PolicyRule;
use crate::core::RuleEffect;
use crate::core::ToolPattern;
use crate::core::TraceId;

// ============================================================================
// SECTION: Specificity
// ============================================================================

/// Specificity of an exact tool pattern with an effective condition.
pub const SPECIFICITY_EXACT_CONDITIONAL: u8 = 2;
/// Specificity of an exact tool pattern without a condition.
pub const SPECIFICITY_EXACT: u8 = 1;
/// Specificity of the wildcard pattern.
pub const SPECIFICITY_WILDCARD: u8 = 0;

/// Computes the specificity of a matching rule.
#[must_use]
pub fn rule_specificity(rule: &PolicyRule) -> u8 {
    if !rule.tool.is_exact() {
        return SPECIFICITY_WILDCARD;
    }
    if rule.has_effective_condition() {
        SPECIFICITY_EXACT_CONDITIONAL
    } else {
        SPECIFICITY_EXACT
    }
}

// ============================================================================
// SECTION: Requests
// ============================================================================

/// One evaluation request for a tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationRequest {
    /// Agent requesting the call.
    pub agent_id: String,
    /// Tool being called.
    pub tool: String,
    /// Optional call parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Map<String, Value>>,
    /// Optional caller-supplied trace id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<TraceId>,
}

impl EvaluationRequest {
    /// Creates a request without parameters.
    #[must_use]
    pub fn new(agent_id: impl Into<String>, tool: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            tool: tool.into(),
            parameters: None,
            trace_id: None,
        }
    }

    /// Attaches parameters to the request.
    #[must_use]
    pub fn with_parameters(mut self, parameters: Map<String, Value>) -> Self {
        self.parameters = Some(parameters);
        self
    }

    /// Attaches a caller-supplied trace id to the request.
    #[must_use]
    pub fn with_trace_id(mut self, trace_id: TraceId) -> Self {
        self.trace_id = Some(trace_id);
        self
    }
}

// ============================================================================
// SECTION: Outcomes
// ============================================================================

/// One matching rule reported in priority order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedRule {
    /// Rule name, when the rule carries one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Tool pattern of the rule.
    pub tool: ToolPattern,
    /// Effect of the rule.
    pub effect: RuleEffect,
    /// Reason carried by the rule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Specificity assigned by the lattice.
    pub specificity: u8,
    /// True when the rule diverts into the approval workflow.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub require_approval: bool,
}

impl AppliedRule {
    /// Projects a policy rule into its applied form.
    #[must_use]
    pub fn from_rule(rule: &PolicyRule) -> Self {
        Self {
            name: rule.name.clone(),
            tool: rule.tool.clone(),
            effect: rule.effect,
            reason: rule.reason.clone(),
            specificity: rule_specificity(rule),
            require_approval: rule.require_approval,
        }
    }
}

/// Decision produced by the engine for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyOutcome {
    /// True when the winning effect is allow.
    pub allowed: bool,
    /// Trace id of the evaluation.
    pub trace_id: TraceId,
    /// Reason surfaced with the decision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Every matching rule in priority order; the first entry is the winner.
    pub applied_rules: Vec<AppliedRule>,
}

impl PolicyOutcome {
    /// Returns the winning rule, when any rule matched.
    #[must_use]
    pub fn winner(&self) -> Option<&AppliedRule> {
        self.applied_rules.first()
    }
}

// ============================================================================
// SECTION: Engine
// ============================================================================

/// Deterministic policy evaluator.
///
/// # Invariants
/// - Stateless; identical inputs produce identical outputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyEngine;

impl PolicyEngine {
    /// Creates a policy engine.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Evaluates a request against a policy.
    ///
    /// A missing policy denies with the fail-secure floor. Otherwise every
    /// rule whose tool pattern and condition match is collected, ordered by
    /// the specificity lattice with deny before allow on ties, and the first
    /// entry decides.
    #[must_use]
    pub fn evaluate(
        &self,
        policy: Option<&Policy>,
        request: &EvaluationRequest,
        trace_id: &TraceId,
    ) -> PolicyOutcome {
        let Some(policy) = policy else {
            return PolicyOutcome {
                allowed: false,
                trace_id: trace_id.clone(),
                reason: Some(format!(
                    "no policy configured for agent '{}'",
                    request.agent_id
                )),
                applied_rules: Vec::new(),
            };
        };

        let mut matches: Vec<(usize, &PolicyRule)> = policy
            .rules
            .iter()
            .enumerate()
            .filter(|(_, rule)| rule_matches(rule, request))
            .collect();
        matches.sort_by(|left, right| compare_matches(left.1, right.1).then(left.0.cmp(&right.0)));

        let applied_rules: Vec<AppliedRule> =
            matches.iter().map(|(_, rule)| AppliedRule::from_rule(rule)).collect();

        let Some((_, winner)) = matches.first() else {
            return PolicyOutcome {
                allowed: false,
                trace_id: trace_id.clone(),
                reason: Some(format!(
                    "no rule in policy '{}' matches tool '{}'",
                    policy.name, request.tool
                )),
                applied_rules,
            };
        };

        let allowed = winner.effect == RuleEffect::Allow;
        let reason = winner.reason.clone().or_else(|| {
            if allowed {
                None
            } else {
                Some(format!(
                    "tool '{}' denied by policy '{}'",
                    request.tool, policy.name
                ))
            }
        });

        PolicyOutcome {
            allowed,
            trace_id: trace_id.clone(),
            reason,
            applied_rules,
        }
    }
}

// ============================================================================
// SECTION: Matching Helpers
// ============================================================================

/// Returns true when a rule's pattern and condition both match the request.
fn rule_matches(rule: &PolicyRule, request: &EvaluationRequest) -> bool {
    if !rule.tool.matches(&request.tool) {
        return false;
    }
    rule.condition
        .as_ref()
        .is_none_or(|condition| condition.evaluate(request.parameters.as_ref()))
}

/// Orders matching rules: specificity descending, deny before allow on ties.
fn compare_matches(left: &PolicyRule, right: &PolicyRule) -> Ordering {
    rule_specificity(right)
        .cmp(&rule_specificity(left))
        .then_with(|| effect_rank(left.effect).cmp(&effect_rank(right.effect)))
}

/// Ranks deny ahead of allow for the tie-break.
const fn effect_rank(effect: RuleEffect) -> u8 {
    match effect {
        RuleEffect::Deny => 0,
        RuleEffect::Allow => 1,
    }
}
