// crates/toolwarden-core/src/core/error.rs
// ============================================================================
// Module: ToolWarden Error Taxonomy
// Description: Structured governance errors with stable codes and categories.
// Purpose: Express every caller-visible failure as one typed error kind.
// Dependencies: serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! ToolWarden surfaces failures as a single error kind carrying a stable
//! string code, a failure category from the closed audit set, and optional
//! contextual fields. Validation errors are raised synchronously and never
//! produce events or audit rows; persistence failures on the decision path
//! are converted to fail-secure denials instead of errors.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// SECTION: Failure Categories
// ============================================================================

/// Closed set of failure categories tagged on denied or errored audit rows.
///
/// # Invariants
/// - Wire names are stable `snake_case` strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    /// Downstream tool execution failed.
    ToolError,
    /// A policy rule denied the call.
    PolicyDenial,
    /// An external provider timed out.
    ProviderTimeout,
    /// An external provider failed.
    ProviderError,
    /// The injection detector raised an alert.
    InjectionAlert,
    /// Caller-supplied configuration was invalid.
    ConfigError,
    /// A rate limit was exceeded.
    RateLimit,
    /// A pending approval expired.
    ApprovalTimeout,
}

impl FailureCategory {
    /// Returns the stable wire name for the category.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ToolError => "tool_error",
            Self::PolicyDenial => "policy_denial",
            Self::ProviderTimeout => "provider_timeout",
            Self::ProviderError => "provider_error",
            Self::InjectionAlert => "injection_alert",
            Self::ConfigError => "config_error",
            Self::RateLimit => "rate_limit",
            Self::ApprovalTimeout => "approval_timeout",
        }
    }

    /// Parses a stable wire name into a category.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "tool_error" => Some(Self::ToolError),
            "policy_denial" => Some(Self::PolicyDenial),
            "provider_timeout" => Some(Self::ProviderTimeout),
            "provider_error" => Some(Self::ProviderError),
            "injection_alert" => Some(Self::InjectionAlert),
            "config_error" => Some(Self::ConfigError),
            "rate_limit" => Some(Self::RateLimit),
            "approval_timeout" => Some(Self::ApprovalTimeout),
            _ => None,
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Error Codes
// ============================================================================

/// Stable error codes for the governance core and its thin collaborators.
///
/// # Invariants
/// - Codes are stable for programmatic handling; each maps to exactly one
///   [`FailureCategory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Evaluation input failed validation.
    InvalidRequest,
    /// Agent configuration input failed validation.
    InvalidConfig,
    /// Policy input failed validation.
    InvalidPolicy,
    /// A database-requiring operation was called without a persistence layer.
    DatabaseRequired,
    /// A status update targeted a missing agent.
    AgentNotFound,
    /// A rollback referenced a non-existent policy version.
    VersionNotFound,
    /// An approval operation was called but the store lacks approval support.
    ApprovalNotSupported,
    /// The guarded dispatcher refused a call on a deny decision.
    PolicyDenied,
    /// Downstream tool execution failed inside the guarded dispatcher.
    ToolExecutionError,
    /// A persistence operation failed and the failure propagates to the caller.
    StorageFailure,
}

impl ErrorCode {
    /// Returns the stable wire name for the code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::InvalidConfig => "INVALID_CONFIG",
            Self::InvalidPolicy => "INVALID_POLICY",
            Self::DatabaseRequired => "DATABASE_REQUIRED",
            Self::AgentNotFound => "AGENT_NOT_FOUND",
            Self::VersionNotFound => "VERSION_NOT_FOUND",
            Self::ApprovalNotSupported => "APPROVAL_NOT_SUPPORTED",
            Self::PolicyDenied => "POLICY_DENIED",
            Self::ToolExecutionError => "TOOL_EXECUTION_ERROR",
            Self::StorageFailure => "STORAGE_FAILURE",
        }
    }

    /// Returns the failure category canonically associated with the code.
    #[must_use]
    pub const fn category(self) -> FailureCategory {
        match self {
            Self::InvalidRequest
            | Self::InvalidConfig
            | Self::InvalidPolicy
            | Self::DatabaseRequired
            | Self::AgentNotFound
            | Self::VersionNotFound
            | Self::ApprovalNotSupported => FailureCategory::ConfigError,
            Self::PolicyDenied => FailureCategory::PolicyDenial,
            Self::ToolExecutionError => FailureCategory::ToolError,
            Self::StorageFailure => FailureCategory::ProviderError,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Governance Error
// ============================================================================

/// Structured governance error carrying a code, category, and context map.
///
/// # Invariants
/// - `category` always equals `code.category()`.
/// - Context values are caller-facing and must not contain secrets.
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct GovernanceError {
    /// Stable error code.
    pub code: ErrorCode,
    /// Failure category derived from the code.
    pub category: FailureCategory,
    /// Human-readable message.
    pub message: String,
    /// Optional contextual fields for diagnostics.
    pub context: BTreeMap<String, Value>,
}

impl GovernanceError {
    /// Creates a governance error for a code with a message.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            category: code.category(),
            message: message.into(),
            context: BTreeMap::new(),
        }
    }

    /// Attaches a contextual field to the error.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }
}
