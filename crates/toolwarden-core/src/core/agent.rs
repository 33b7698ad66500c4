// crates/toolwarden-core/src/core/agent.rs
// ============================================================================
// Module: ToolWarden Agent Model
// Description: Agent registration records and lifecycle status.
// Purpose: Describe the agents whose tool calls the engine governs.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Agents are registered with an allowed-tool list and an optional policy
//! binding. Status transitions are free-form; the store only stamps
//! `last_active_at` on explicit status writes.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

use crate::core::error::ErrorCode;
use crate::core::error::GovernanceError;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Agent Status
// ============================================================================

/// Lifecycle status of a registered agent.
///
/// # Invariants
/// - Transitions are unrestricted; any status may follow any other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Registered but not yet started.
    Registered,
    /// Actively running.
    Running,
    /// Stopped by its operator.
    Stopped,
    /// Failed with an error.
    Error,
}

impl AgentStatus {
    /// Returns the stable wire name for the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Registered => "registered",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Error => "error",
        }
    }

    /// Parses a stable wire name into a status.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "registered" => Some(Self::Registered),
            "running" => Some(Self::Running),
            "stopped" => Some(Self::Stopped),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Agent Configuration
// ============================================================================

/// Registration record for one governed agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    /// Unique agent identifier.
    pub agent_id: String,
    /// Human-facing agent name.
    pub name: String,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Tools the agent is declared to use.
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    /// Optional policy binding by name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_name: Option<String>,
    /// Optional free-form metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    /// Current lifecycle status.
    pub status: AgentStatus,
    /// Registration instant.
    pub registered_at: Timestamp,
    /// Instant of the last explicit status write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_active_at: Option<Timestamp>,
}

impl AgentConfig {
    /// Creates a freshly registered agent record.
    #[must_use]
    pub fn new(agent_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            name: name.into(),
            description: None,
            allowed_tools: Vec::new(),
            policy_name: None,
            metadata: None,
            status: AgentStatus::Registered,
            registered_at: Timestamp::now(),
            last_active_at: None,
        }
    }

    /// Validates the configuration at the input boundary.
    ///
    /// # Errors
    ///
    /// Returns an [`ErrorCode::InvalidConfig`] error when the agent id or
    /// name is empty, or an allowed-tool entry is blank.
    pub fn validate(&self) -> Result<(), GovernanceError> {
        if self.agent_id.trim().is_empty() {
            return Err(GovernanceError::new(
                ErrorCode::InvalidConfig,
                "agent id must not be empty",
            ));
        }
        if self.name.trim().is_empty() {
            return Err(GovernanceError::new(
                ErrorCode::InvalidConfig,
                "agent name must not be empty",
            ));
        }
        if self.allowed_tools.iter().any(|tool| tool.trim().is_empty()) {
            return Err(GovernanceError::new(
                ErrorCode::InvalidConfig,
                format!("agent '{}' lists a blank allowed tool", self.agent_id),
            ));
        }
        Ok(())
    }
}
