// crates/toolwarden-core/src/core/identifiers.rs
// ============================================================================
// Module: ToolWarden Identifiers
// Description: Opaque identifiers with stable wire forms.
// Purpose: Provide strongly typed tenant scoping identifiers.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Tenant identifiers partition kill-switch state, persistence, and event
//! attribution. They are opaque UTF-8 strings; no normalization is applied.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Tenant Identifier
// ============================================================================

/// Tenant identifier naming an isolation scope.
///
/// # Invariants
/// - Opaque UTF-8 string; no normalization or validation is applied by this type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Creates a new tenant identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for TenantId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TenantId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}
