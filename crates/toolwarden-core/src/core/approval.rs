// crates/toolwarden-core/src/core/approval.rs
// ============================================================================
// Module: ToolWarden Approval Model
// Description: Pending-approval records and terminal resolutions.
// Purpose: Represent the durable half of the two-phase approval workflow.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! When an allow rule carries the approval flag, the decision is held in
//! abeyance as a pending record with a deadline. A record transitions once
//! to a terminal state, either through an explicit resolution or through
//! lazy timeout materialization when it is observed past its deadline. It
//! is never reopened.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

use crate::core::identifiers::TenantId;
use crate::core::time::Timestamp;
use crate::core::trace::TraceId;

// ============================================================================
// SECTION: Approval Status
// ============================================================================

/// Lifecycle state of an approval request.
///
/// # Invariants
/// - `Pending` is the only non-terminal state; terminal states never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    /// Awaiting a decision.
    Pending,
    /// Approved by an approver.
    Approved,
    /// Rejected by an approver.
    Rejected,
    /// Expired without a decision.
    Timeout,
}

impl ApprovalStatus {
    /// Returns the stable wire name for the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Timeout => "timeout",
        }
    }

    /// Parses a stable wire name into a status.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "timeout" => Some(Self::Timeout),
            _ => None,
        }
    }

    /// Returns true for terminal states.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Resolutions
// ============================================================================

/// Terminal decision applied to a pending approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    /// Grant the held allow.
    Approved,
    /// Refuse the held allow.
    Rejected,
    /// Expire the held allow.
    Timeout,
}

impl ApprovalDecision {
    /// Returns the terminal status this decision materializes.
    #[must_use]
    pub const fn terminal_status(self) -> ApprovalStatus {
        match self {
            Self::Approved => ApprovalStatus::Approved,
            Self::Rejected => ApprovalStatus::Rejected,
            Self::Timeout => ApprovalStatus::Timeout,
        }
    }
}

/// Resolution payload for a pending approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalResolution {
    /// Terminal decision to apply.
    pub status: ApprovalDecision,
    /// Optional approver identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approver: Option<String>,
    /// Optional approver comment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl ApprovalResolution {
    /// Creates a resolution carrying only a decision.
    #[must_use]
    pub const fn new(status: ApprovalDecision) -> Self {
        Self {
            status,
            approver: None,
            comment: None,
        }
    }
}

// ============================================================================
// SECTION: Requests
// ============================================================================

/// Content of an approval request before the store assigns an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalDraft {
    /// Tenant scope, when the orchestrator is tenant-scoped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<TenantId>,
    /// Agent whose call is held.
    pub agent_id: String,
    /// Tool the call targets.
    pub tool: String,
    /// Optional request parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Map<String, Value>>,
    /// Trace id of the originating evaluation.
    pub trace_id: TraceId,
    /// Policy that produced the approval-requiring rule.
    pub policy_name: String,
    /// Name of the winning rule, when it carries one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_name: Option<String>,
    /// Instant after which the request expires.
    pub deadline: Timestamp,
    /// Creation instant.
    pub created_at: Timestamp,
}

/// One durable approval request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
    /// Store-assigned identifier.
    pub id: i64,
    /// Tenant scope, when the orchestrator is tenant-scoped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<TenantId>,
    /// Agent whose call is held.
    pub agent_id: String,
    /// Tool the call targets.
    pub tool: String,
    /// Optional request parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Map<String, Value>>,
    /// Trace id of the originating evaluation.
    pub trace_id: TraceId,
    /// Policy that produced the approval-requiring rule.
    pub policy_name: String,
    /// Name of the winning rule, when it carries one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_name: Option<String>,
    /// Current lifecycle state.
    pub status: ApprovalStatus,
    /// Instant after which the request expires.
    pub deadline: Timestamp,
    /// Approver identity on explicit resolutions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approver: Option<String>,
    /// Approver comment on explicit resolutions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Creation instant.
    pub created_at: Timestamp,
    /// Resolution instant for terminal states.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<Timestamp>,
}

impl ApprovalRequest {
    /// Returns true when the record is pending past its deadline.
    #[must_use]
    pub fn is_expired(&self, now: &Timestamp) -> bool {
        self.status == ApprovalStatus::Pending && self.deadline < *now
    }
}

// ============================================================================
// SECTION: Filters
// ============================================================================

/// Filter for approval listings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalFilter {
    /// Restrict to one lifecycle state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ApprovalStatus>,
    /// Restrict to one agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// Restrict to one tool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
}
