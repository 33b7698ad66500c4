// crates/toolwarden-core/src/core/event.rs
// ============================================================================
// Module: ToolWarden Event Model
// Description: Closed event taxonomy and the observability envelope.
// Purpose: Name every event the core can emit with a stable wire form.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! The core emits exactly twenty event types, grouped by dotted prefixes.
//! The envelope carries the type, an ISO-8601 timestamp, the optional
//! trace/agent/tenant attribution, and a free-form data map. Listeners are
//! registered per type; emission of one type never triggers another.

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
// SECTION: Event Types
// ============================================================================

/// Closed set of event types emitted by the core.
///
/// # Invariants
/// - Wire names are stable dotted strings; the set is exhaustive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventType {
    /// A tool call was allowed.
    #[serde(rename = "tool_call.allowed")]
    ToolCallAllowed,
    /// A tool call was denied.
    #[serde(rename = "tool_call.denied")]
    ToolCallDenied,
    /// A tool call failed downstream of the decision.
    #[serde(rename = "tool_call.error")]
    ToolCallError,
    /// An approval was requested.
    #[serde(rename = "approval.requested")]
    ApprovalRequested,
    /// A pending approval was granted.
    #[serde(rename = "approval.granted")]
    ApprovalGranted,
    /// A pending approval was rejected.
    #[serde(rename = "approval.rejected")]
    ApprovalRejected,
    /// A pending approval expired.
    #[serde(rename = "approval.timeout")]
    ApprovalTimeout,
    /// An agent transitioned to running.
    #[serde(rename = "agent.started")]
    AgentStarted,
    /// An agent transitioned to stopped.
    #[serde(rename = "agent.stopped")]
    AgentStopped,
    /// An agent transitioned to error.
    #[serde(rename = "agent.error")]
    AgentError,
    /// An agent registration changed.
    #[serde(rename = "agent.config_changed")]
    AgentConfigChanged,
    /// A policy was created.
    #[serde(rename = "policy.created")]
    PolicyCreated,
    /// A policy was updated.
    #[serde(rename = "policy.updated")]
    PolicyUpdated,
    /// A policy was deleted.
    #[serde(rename = "policy.deleted")]
    PolicyDeleted,
    /// The kill switch was activated.
    #[serde(rename = "killswitch.activated")]
    KillSwitchActivated,
    /// The kill switch was reset.
    #[serde(rename = "killswitch.deactivated")]
    KillSwitchDeactivated,
    /// Chain verification found a broken record.
    #[serde(rename = "audit.integrity_violation")]
    AuditIntegrityViolation,
    /// An audit append failed after the decision was made.
    #[serde(rename = "audit.write_failure")]
    AuditWriteFailure,
    /// The injection detector matched a parameter.
    #[serde(rename = "injection.detected")]
    InjectionDetected,
    /// A rate limit was exceeded (reserved; never emitted by the core).
    #[serde(rename = "rate_limit.exceeded")]
    RateLimitExceeded,
}

impl EventType {
    /// Returns the stable dotted wire name for the type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ToolCallAllowed => "tool_call.allowed",
            Self::ToolCallDenied => "tool_call.denied",
            Self::ToolCallError => "tool_call.error",
            Self::ApprovalRequested => "approval.requested",
            Self::ApprovalGranted => "approval.granted",
            Self::ApprovalRejected => "approval.rejected",
            Self::ApprovalTimeout => "approval.timeout",
            Self::AgentStarted => "agent.started",
            Self::AgentStopped => "agent.stopped",
            Self::AgentError => "agent.error",
            Self::AgentConfigChanged => "agent.config_changed",
            Self::PolicyCreated => "policy.created",
            Self::PolicyUpdated => "policy.updated",
            Self::PolicyDeleted => "policy.deleted",
            Self::KillSwitchActivated => "killswitch.activated",
            Self::KillSwitchDeactivated => "killswitch.deactivated",
            Self::AuditIntegrityViolation => "audit.integrity_violation",
            Self::AuditWriteFailure => "audit.write_failure",
            Self::InjectionDetected => "injection.detected",
            Self::RateLimitExceeded => "rate_limit.exceeded",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Event Envelope
// ============================================================================

/// Envelope delivered to every listener of an event type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernanceEvent {
    /// Event type.
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Emission instant.
    pub timestamp: Timestamp,
    /// Trace id of the originating work, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<TraceId>,
    /// Agent attribution, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// Tenant attribution for scoped orchestrators.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<TenantId>,
    /// Free-form event data.
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl GovernanceEvent {
    /// Creates an envelope stamped with the current instant.
    #[must_use]
    pub fn new(event_type: EventType, data: Map<String, Value>) -> Self {
        Self {
            event_type,
            timestamp: Timestamp::now(),
            trace_id: None,
            agent_id: None,
            tenant_id: None,
            data,
        }
    }

    /// Attaches a trace id to the envelope.
    #[must_use]
    pub fn with_trace_id(mut self, trace_id: TraceId) -> Self {
        self.trace_id = Some(trace_id);
        self
    }

    /// Attaches an agent id to the envelope.
    #[must_use]
    pub fn with_agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    /// Attaches a tenant id to the envelope.
    #[must_use]
    pub fn with_tenant_id(mut self, tenant_id: TenantId) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }
}
