// crates/toolwarden-core/src/interfaces/mod.rs
// ============================================================================
// Module: ToolWarden Persistence Contract
// Description: Backend-agnostic storage interfaces for the governance core.
// Purpose: Define the typed operations the orchestrator performs on a store.
// Dependencies: async-trait, crate::core, serde, thiserror
// ============================================================================

//! ## Overview
//! The orchestrator talks to persistence through these interfaces and never
//! to a concrete database. Capabilities beyond the core set are optional:
//! a store without approval support returns `None` from [`GovernanceStore::approvals`]
//! and the orchestrator fails secure; a store without tenant scoping returns
//! `None` from [`GovernanceStore::for_tenant`] and scoping becomes a no-op.
//!
//! Implementations must keep the audit table append-only and must link the
//! hash chain inside the same unit of work as the insert so ids and hashes
//! agree under concurrent writers.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::AgentConfig;
use crate::core::AgentStatus;
use crate::core::ApprovalDraft;
use crate::core::ApprovalFilter;
use crate::core::ApprovalRequest;
use crate::core::ApprovalResolution;
use crate::core::AuditDraft;
use crate::core::AuditRecord;
use crate::core::AuditResult;
use crate::core::ChainVerification;
use crate::core::FailureCategory;
use crate::core::Policy;
use crate::core::PolicyVersion;
use crate::core::TenantId;
use crate::core::Timestamp;
use crate::core::TraceId;

// ============================================================================
// SECTION: Store Errors
// ============================================================================

/// Persistence errors surfaced across the contract.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying storage I/O failed.
    #[error("store io error: {0}")]
    Io(String),
    /// A mutation violated the append-only audit constraint.
    #[error("audit log is append-only: {0}")]
    AppendOnly(String),
    /// A referenced row does not exist.
    #[error("store row not found: {0}")]
    NotFound(String),
    /// Stored data failed to serialize or deserialize.
    #[error("store serialization error: {0}")]
    Serialization(String),
    /// Input rejected by the store.
    #[error("store invalid data: {0}")]
    Invalid(String),
    /// The store reported an error.
    #[error("store error: {0}")]
    Store(String),
}

impl From<StoreError> for crate::core::GovernanceError {
    fn from(err: StoreError) -> Self {
        Self::new(crate::core::ErrorCode::StorageFailure, err.to_string())
    }
}

// ============================================================================
// SECTION: Audit Queries
// ============================================================================

/// Filter and pagination for audit queries.
///
/// # Invariants
/// - `search` applies to the reason and parameter columns and is always
///   treated as a literal (stores must escape LIKE metacharacters).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditQuery {
    /// Restrict to one agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// Restrict to one tool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    /// Restrict to one result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<AuditResult>,
    /// Restrict to one trace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<TraceId>,
    /// Inclusive lower bound on the record timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Timestamp>,
    /// Inclusive upper bound on the record timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Timestamp>,
    /// Restrict to one failure category.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_category: Option<FailureCategory>,
    /// Literal free-text search over reason and parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    /// Maximum records returned; stores apply a default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    /// Records skipped before the first returned row.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
}

/// One page of audit records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditPage {
    /// Records in ascending id order.
    pub records: Vec<AuditRecord>,
    /// Total records matching the filter, ignoring pagination.
    pub total: u64,
}

// ============================================================================
// SECTION: Governance Store
// ============================================================================

/// Typed persistence operations for the governance core.
///
/// Implementations must be safe for concurrent use; the orchestrator issues
/// operations from many tasks at once.
#[async_trait]
pub trait GovernanceStore: Send + Sync {
    /// Appends an audit record, linking it into the hash chain.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the append fails; the chain link and the
    /// insert happen in one unit of work.
    async fn append_audit(&self, draft: AuditDraft) -> Result<AuditRecord, StoreError>;

    /// Queries audit records with filters and pagination.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    async fn query_audit(&self, query: &AuditQuery) -> Result<AuditPage, StoreError>;

    /// Returns the hash of the most recently appended audit record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the lookup fails.
    async fn latest_audit_hash(&self) -> Result<Option<String>, StoreError>;

    /// Walks the full chain in ascending id order and reports the first break.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when records cannot be read.
    async fn verify_audit_chain(&self) -> Result<ChainVerification, StoreError>;

    /// Streams matching audit records as newline-delimited JSON.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query or a write to `out` fails.
    async fn export_audit(
        &self,
        query: &AuditQuery,
        out: &mut (dyn Write + Send),
    ) -> Result<u64, StoreError>;

    /// Upserts a policy, snapshotting any prior row into the version history
    /// within the same unit of work.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails; on failure neither the
    /// snapshot nor the upsert is visible.
    async fn upsert_policy(&self, policy: Policy, author: &str) -> Result<Policy, StoreError>;

    /// Lists all policies.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    async fn list_policies(&self) -> Result<Vec<Policy>, StoreError>;

    /// Fetches a policy by name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the lookup fails.
    async fn get_policy(&self, name: &str) -> Result<Option<Policy>, StoreError>;

    /// Deletes a policy by name, returning whether a row existed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the delete fails.
    async fn delete_policy(&self, name: &str) -> Result<bool, StoreError>;

    /// Resolves the active policy for an agent: agent-specific first, then
    /// global, each tie-broken by `updated_at` descending.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    async fn resolve_active_policy(&self, agent_id: &str) -> Result<Option<Policy>, StoreError>;

    /// Lists version snapshots for a policy name, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    async fn policy_history(&self, name: &str) -> Result<Vec<PolicyVersion>, StoreError>;

    /// Fetches one version snapshot by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the lookup fails.
    async fn policy_version(&self, id: i64) -> Result<Option<PolicyVersion>, StoreError>;

    /// Registers or replaces an agent record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails.
    async fn register_agent(&self, config: AgentConfig) -> Result<AgentConfig, StoreError>;

    /// Fetches an agent by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the lookup fails.
    async fn get_agent(&self, agent_id: &str) -> Result<Option<AgentConfig>, StoreError>;

    /// Updates an agent's status, stamping `last_active_at`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the agent does not exist.
    async fn update_agent_status(
        &self,
        agent_id: &str,
        status: AgentStatus,
    ) -> Result<AgentConfig, StoreError>;

    /// Lists all agents.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    async fn list_agents(&self) -> Result<Vec<AgentConfig>, StoreError>;

    /// Deletes an agent, returning whether a row existed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the delete fails.
    async fn delete_agent(&self, agent_id: &str) -> Result<bool, StoreError>;

    /// Returns the current schema version of the store.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the version cannot be read.
    async fn schema_version(&self) -> Result<i64, StoreError>;

    /// Returns the approval capability when the store supports it.
    fn approvals(&self) -> Option<&dyn ApprovalStore>;

    /// Returns a tenant-scoped handle when the store supports scoping.
    fn for_tenant(&self, tenant_id: &TenantId) -> Option<Arc<dyn GovernanceStore>>;
}

// ============================================================================
// SECTION: Approval Store
// ============================================================================

/// Optional approval capability of a governance store.
#[async_trait]
pub trait ApprovalStore: Send + Sync {
    /// Persists a pending approval and returns it with its assigned id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the insert fails.
    async fn create_approval(&self, draft: ApprovalDraft) -> Result<ApprovalRequest, StoreError>;

    /// Fetches an approval by identifier without materializing timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the lookup fails.
    async fn get_approval(&self, id: i64) -> Result<Option<ApprovalRequest>, StoreError>;

    /// Lists approvals matching a filter without materializing timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    async fn list_approvals(
        &self,
        filter: &ApprovalFilter,
    ) -> Result<Vec<ApprovalRequest>, StoreError>;

    /// Applies a terminal resolution with an optimistic conditional update.
    ///
    /// The transition succeeds only when the record is still pending and
    /// either the resolution is a timeout or the deadline has not passed.
    /// Returns `None` when the caller lost the race.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the update itself fails.
    async fn resolve_approval(
        &self,
        id: i64,
        resolution: &ApprovalResolution,
        now: Timestamp,
    ) -> Result<Option<ApprovalRequest>, StoreError>;
}
