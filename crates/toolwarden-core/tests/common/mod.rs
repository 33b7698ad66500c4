// crates/toolwarden-core/tests/common/mod.rs
// ============================================================================
// Module: Shared Test Harness
// Description: Store wrappers and capture helpers for orchestrator tests.
// ============================================================================
//! ## Overview
//! Provides a delegating store wrapper with switchable failure injection, a
//! wrapper that hides the approval capability, and an event capture helper.

#![allow(
    dead_code,
    clippy::missing_docs_in_private_items,
    reason = "Shared across test binaries that each use a different subset."
)]

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use tokio::sync::mpsc;
use toolwarden_core::AgentConfig;
use toolwarden_core::AgentStatus;
use toolwarden_core::ApprovalStore;
use toolwarden_core::AuditDraft;
use toolwarden_core::AuditPage;
use toolwarden_core::AuditQuery;
use toolwarden_core::AuditRecord;
use toolwarden_core::ChainVerification;
use toolwarden_core::EventBus;
use toolwarden_core::EventType;
use toolwarden_core::GovernanceEvent;
use toolwarden_core::GovernanceStore;
use toolwarden_core::MemoryStore;
use toolwarden_core::Policy;
use toolwarden_core::PolicyVersion;
use toolwarden_core::StoreError;
use toolwarden_core::TenantId;

/// Memory-backed store with switchable failure injection.
pub struct FlakyStore {
    /// Backing store.
    pub inner: MemoryStore,
    /// Fail `resolve_active_policy` when set.
    pub fail_resolve: AtomicBool,
    /// Fail `append_audit` when set.
    pub fail_append: AtomicBool,
    /// Count of `resolve_active_policy` calls.
    pub resolve_calls: AtomicUsize,
}

impl Default for FlakyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FlakyStore {
    /// Creates a healthy store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            fail_resolve: AtomicBool::new(false),
            fail_append: AtomicBool::new(false),
            resolve_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl GovernanceStore for FlakyStore {
    async fn append_audit(&self, draft: AuditDraft) -> Result<AuditRecord, StoreError> {
        if self.fail_append.load(Ordering::SeqCst) {
            return Err(StoreError::Io("injected append failure".to_string()));
        }
        self.inner.append_audit(draft).await
    }

    async fn query_audit(&self, query: &AuditQuery) -> Result<AuditPage, StoreError> {
        self.inner.query_audit(query).await
    }

    async fn latest_audit_hash(&self) -> Result<Option<String>, StoreError> {
        self.inner.latest_audit_hash().await
    }

    async fn verify_audit_chain(&self) -> Result<ChainVerification, StoreError> {
        self.inner.verify_audit_chain().await
    }

    async fn export_audit(
        &self,
        query: &AuditQuery,
        out: &mut (dyn Write + Send),
    ) -> Result<u64, StoreError> {
        self.inner.export_audit(query, out).await
    }

    async fn upsert_policy(&self, policy: Policy, author: &str) -> Result<Policy, StoreError> {
        self.inner.upsert_policy(policy, author).await
    }

    async fn list_policies(&self) -> Result<Vec<Policy>, StoreError> {
        self.inner.list_policies().await
    }

    async fn get_policy(&self, name: &str) -> Result<Option<Policy>, StoreError> {
        self.inner.get_policy(name).await
    }

    async fn delete_policy(&self, name: &str) -> Result<bool, StoreError> {
        self.inner.delete_policy(name).await
    }

    async fn resolve_active_policy(&self, agent_id: &str) -> Result<Option<Policy>, StoreError> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_resolve.load(Ordering::SeqCst) {
            return Err(StoreError::Io("injected resolve failure".to_string()));
        }
        self.inner.resolve_active_policy(agent_id).await
    }

    async fn policy_history(&self, name: &str) -> Result<Vec<PolicyVersion>, StoreError> {
        self.inner.policy_history(name).await
    }

    async fn policy_version(&self, id: i64) -> Result<Option<PolicyVersion>, StoreError> {
        self.inner.policy_version(id).await
    }

    async fn register_agent(&self, config: AgentConfig) -> Result<AgentConfig, StoreError> {
        self.inner.register_agent(config).await
    }

    async fn get_agent(&self, agent_id: &str) -> Result<Option<AgentConfig>, StoreError> {
        self.inner.get_agent(agent_id).await
    }

    async fn update_agent_status(
        &self,
        agent_id: &str,
        status: AgentStatus,
    ) -> Result<AgentConfig, StoreError> {
        self.inner.update_agent_status(agent_id, status).await
    }

    async fn list_agents(&self) -> Result<Vec<AgentConfig>, StoreError> {
        self.inner.list_agents().await
    }

    async fn delete_agent(&self, agent_id: &str) -> Result<bool, StoreError> {
        self.inner.delete_agent(agent_id).await
    }

    async fn schema_version(&self) -> Result<i64, StoreError> {
        self.inner.schema_version().await
    }

    fn approvals(&self) -> Option<&dyn ApprovalStore> {
        self.inner.approvals()
    }

    fn for_tenant(&self, tenant_id: &TenantId) -> Option<Arc<dyn GovernanceStore>> {
        self.inner.for_tenant(tenant_id)
    }
}

/// Memory-backed store that hides the approval capability.
#[derive(Default)]
pub struct NoApprovalStore {
    /// Backing store.
    pub inner: MemoryStore,
}

impl NoApprovalStore {
    /// Creates the wrapper.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GovernanceStore for NoApprovalStore {
    async fn append_audit(&self, draft: AuditDraft) -> Result<AuditRecord, StoreError> {
        self.inner.append_audit(draft).await
    }

    async fn query_audit(&self, query: &AuditQuery) -> Result<AuditPage, StoreError> {
        self.inner.query_audit(query).await
    }

    async fn latest_audit_hash(&self) -> Result<Option<String>, StoreError> {
        self.inner.latest_audit_hash().await
    }

    async fn verify_audit_chain(&self) -> Result<ChainVerification, StoreError> {
        self.inner.verify_audit_chain().await
    }

    async fn export_audit(
        &self,
        query: &AuditQuery,
        out: &mut (dyn Write + Send),
    ) -> Result<u64, StoreError> {
        self.inner.export_audit(query, out).await
    }

    async fn upsert_policy(&self, policy: Policy, author: &str) -> Result<Policy, StoreError> {
        self.inner.upsert_policy(policy, author).await
    }

    async fn list_policies(&self) -> Result<Vec<Policy>, StoreError> {
        self.inner.list_policies().await
    }

    async fn get_policy(&self, name: &str) -> Result<Option<Policy>, StoreError> {
        self.inner.get_policy(name).await
    }

    async fn delete_policy(&self, name: &str) -> Result<bool, StoreError> {
        self.inner.delete_policy(name).await
    }

    async fn resolve_active_policy(&self, agent_id: &str) -> Result<Option<Policy>, StoreError> {
        self.inner.resolve_active_policy(agent_id).await
    }

    async fn policy_history(&self, name: &str) -> Result<Vec<PolicyVersion>, StoreError> {
        self.inner.policy_history(name).await
    }

    async fn policy_version(&self, id: i64) -> Result<Option<PolicyVersion>, StoreError> {
        self.inner.policy_version(id).await
    }

    async fn register_agent(&self, config: AgentConfig) -> Result<AgentConfig, StoreError> {
        self.inner.register_agent(config).await
    }

    async fn get_agent(&self, agent_id: &str) -> Result<Option<AgentConfig>, StoreError> {
        self.inner.get_agent(agent_id).await
    }

    async fn update_agent_status(
        &self,
        agent_id: &str,
        status: AgentStatus,
    ) -> Result<AgentConfig, StoreError> {
        self.inner.update_agent_status(agent_id, status).await
    }

    async fn list_agents(&self) -> Result<Vec<AgentConfig>, StoreError> {
        self.inner.list_agents().await
    }

    async fn delete_agent(&self, agent_id: &str) -> Result<bool, StoreError> {
        self.inner.delete_agent(agent_id).await
    }

    async fn schema_version(&self) -> Result<i64, StoreError> {
        self.inner.schema_version().await
    }

    fn approvals(&self) -> Option<&dyn ApprovalStore> {
        None
    }

    fn for_tenant(&self, _tenant_id: &TenantId) -> Option<Arc<dyn GovernanceStore>> {
        None
    }
}

/// Captures one event type from a bus into a channel.
pub fn capture(
    bus: &EventBus,
    event_type: EventType,
) -> mpsc::UnboundedReceiver<GovernanceEvent> {
    let (sender, receiver) = mpsc::unbounded_channel();
    bus.on_fn(event_type, move |event| {
        let _ = sender.send(event);
    });
    receiver
}
