// crates/toolwarden-core/src/runtime/memory.rs
// ============================================================================
// Module: ToolWarden In-Memory Store
// Description: Reference GovernanceStore kept entirely in process memory.
// Purpose: Back zero-configuration deployments and tests without a database.
// Dependencies: async-trait, crate::core, crate::interfaces, serde_json
// ============================================================================

//! ## Overview
//! The memory store implements the full persistence contract, including the
//! approval capability, with plain maps behind one lock. The audit log is
//! append-only by construction: no mutation API exists, and the hash chain
//! is linked inside the same critical section as the insert. Tenant scoping
//! is not supported; `for_tenant` returns `None` and the orchestrator falls
//! back to the unscoped path.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use async_trait::async_trait;

use crate::core::AgentConfig;
use crate::core::AgentStatus;
use crate::core::ApprovalDecision;
use crate::core::ApprovalDraft;
use crate::core::ApprovalFilter;
use crate::core::ApprovalRequest;
use crate::core::ApprovalResolution;
use crate::core::ApprovalStatus;
use crate::core::AuditDraft;
use crate::core::AuditRecord;
use crate::core::ChainVerification;
use crate::core::Policy;
use crate::core::PolicyVersion;
use crate::core::TenantId;
use crate::core::Timestamp;
use crate::core::audit::canonical_parameters;
use crate::core::compute_record_hash;
use crate::core::verify_records;
use crate::interfaces::ApprovalStore;
use crate::interfaces::AuditPage;
use crate::interfaces::AuditQuery;
use crate::interfaces::GovernanceStore;
use crate::interfaces::StoreError;

// ============================================================================
// SECTION: State
// ============================================================================

/// Mutable state behind the store lock.
#[derive(Default)]
struct MemoryState {
    /// Audit records in ascending id order.
    audit: Vec<AuditRecord>,
    /// Next audit identifier.
    next_audit_id: i64,
    /// Policies keyed by name.
    policies: BTreeMap<String, Policy>,
    /// Version snapshots in ascending id order.
    versions: Vec<PolicyVersion>,
    /// Next snapshot identifier.
    next_version_id: i64,
    /// Agents keyed by identifier.
    agents: BTreeMap<String, AgentConfig>,
    /// Approvals keyed by identifier.
    approvals: BTreeMap<i64, ApprovalRequest>,
    /// Next approval identifier.
    next_approval_id: i64,
}

/// In-memory governance store with approval support.
#[derive(Default)]
pub struct MemoryStore {
    /// Store state; every operation takes the lock once.
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the state, recovering from poisoning.
    fn locked(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ============================================================================
// SECTION: Query Matching
// ============================================================================

/// Returns true when an audit record satisfies a query filter.
fn record_matches(record: &AuditRecord, query: &AuditQuery) -> bool {
    if query.agent_id.as_deref().is_some_and(|agent| agent != record.agent_id) {
        return false;
    }
    if query.tool.as_deref().is_some_and(|tool| tool != record.tool) {
        return false;
    }
    if query.result.is_some_and(|result| result != record.result) {
        return false;
    }
    if query.trace_id.as_ref().is_some_and(|trace| *trace != record.trace_id) {
        return false;
    }
    if query.from.is_some_and(|from| record.timestamp < from) {
        return false;
    }
    if query.to.is_some_and(|to| record.timestamp > to) {
        return false;
    }
    if let Some(category) = query.failure_category
        && record.failure_category != Some(category)
    {
        return false;
    }
    if let Some(search) = query.search.as_deref() {
        let reason_hit = record.reason.as_deref().is_some_and(|reason| reason.contains(search));
        let params_hit = canonical_parameters(record.parameters.as_ref()).contains(search);
        if !reason_hit && !params_hit {
            return false;
        }
    }
    true
}

/// Applies query pagination to a filtered record list.
fn paginate(records: Vec<AuditRecord>, query: &AuditQuery) -> AuditPage {
    let total = records.len() as u64;
    let offset = usize::try_from(query.offset.unwrap_or(0)).unwrap_or(usize::MAX);
    let limit = query.limit.map_or(usize::MAX, |limit| usize::try_from(limit).unwrap_or(usize::MAX));
    let records = records.into_iter().skip(offset).take(limit).collect();
    AuditPage {
        records,
        total,
    }
}

// ============================================================================
// SECTION: Governance Store Implementation
// ============================================================================

#[async_trait]
impl GovernanceStore for MemoryStore {
    async fn append_audit(&self, draft: AuditDraft) -> Result<AuditRecord, StoreError> {
        let mut state = self.locked();
        let previous_hash = state.audit.last().map(|record| record.hash.clone());
        let hash = compute_record_hash(&draft, previous_hash.as_deref());
        state.next_audit_id += 1;
        let record = AuditRecord {
            id: state.next_audit_id,
            trace_id: draft.trace_id,
            timestamp: draft.timestamp,
            agent_id: draft.agent_id,
            tool: draft.tool,
            parameters: draft.parameters,
            result: draft.result,
            reason: draft.reason,
            duration_ms: draft.duration_ms,
            failure_category: draft.failure_category,
            previous_hash,
            hash,
        };
        state.audit.push(record.clone());
        Ok(record)
    }

    async fn query_audit(&self, query: &AuditQuery) -> Result<AuditPage, StoreError> {
        let state = self.locked();
        let filtered: Vec<AuditRecord> = state
            .audit
            .iter()
            .filter(|record| record_matches(record, query))
            .cloned()
            .collect();
        Ok(paginate(filtered, query))
    }

    async fn latest_audit_hash(&self) -> Result<Option<String>, StoreError> {
        Ok(self.locked().audit.last().map(|record| record.hash.clone()))
    }

    async fn verify_audit_chain(&self) -> Result<ChainVerification, StoreError> {
        Ok(verify_records(&self.locked().audit))
    }

    async fn export_audit(
        &self,
        query: &AuditQuery,
        out: &mut (dyn Write + Send),
    ) -> Result<u64, StoreError> {
        let page = self.query_audit(query).await?;
        let mut written: u64 = 0;
        for record in &page.records {
            let line = serde_json::to_string(record)
                .map_err(|err| StoreError::Serialization(err.to_string()))?;
            writeln!(out, "{line}").map_err(|err| StoreError::Io(err.to_string()))?;
            written += 1;
        }
        Ok(written)
    }

    async fn upsert_policy(&self, policy: Policy, author: &str) -> Result<Policy, StoreError> {
        let mut state = self.locked();
        let now = Timestamp::now();
        let stored = if let Some(existing) = state.policies.get(&policy.name).cloned() {
            state.next_version_id += 1;
            let snapshot = PolicyVersion {
                id: state.next_version_id,
                policy_name: existing.name.clone(),
                version: existing.version,
                agent_id: existing.agent_id.clone(),
                rules: existing.rules.clone(),
                author: author.to_string(),
                created_at: now,
            };
            state.versions.push(snapshot);
            Policy {
                version: existing.version + 1,
                created_at: existing.created_at,
                updated_at: now,
                ..policy
            }
        } else {
            Policy {
                version: 1,
                created_at: now,
                updated_at: now,
                ..policy
            }
        };
        state.policies.insert(stored.name.clone(), stored.clone());
        Ok(stored)
    }

    async fn list_policies(&self) -> Result<Vec<Policy>, StoreError> {
        Ok(self.locked().policies.values().cloned().collect())
    }

    async fn get_policy(&self, name: &str) -> Result<Option<Policy>, StoreError> {
        Ok(self.locked().policies.get(name).cloned())
    }

    async fn delete_policy(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.locked().policies.remove(name).is_some())
    }

    async fn resolve_active_policy(&self, agent_id: &str) -> Result<Option<Policy>, StoreError> {
        let state = self.locked();
        let pick = |scoped: bool| -> Option<Policy> {
            state
                .policies
                .values()
                .filter(|policy| {
                    if scoped {
                        policy.agent_id.as_deref() == Some(agent_id)
                    } else {
                        policy.agent_id.is_none()
                    }
                })
                .max_by_key(|policy| policy.updated_at)
                .cloned()
        };
        Ok(pick(true).or_else(|| pick(false)))
    }

    async fn policy_history(&self, name: &str) -> Result<Vec<PolicyVersion>, StoreError> {
        let state = self.locked();
        let mut history: Vec<PolicyVersion> = state
            .versions
            .iter()
            .filter(|version| version.policy_name == name)
            .cloned()
            .collect();
        history.sort_by(|left, right| right.version.cmp(&left.version));
        Ok(history)
    }

    async fn policy_version(&self, id: i64) -> Result<Option<PolicyVersion>, StoreError> {
        Ok(self.locked().versions.iter().find(|version| version.id == id).cloned())
    }

    async fn register_agent(&self, config: AgentConfig) -> Result<AgentConfig, StoreError> {
        let mut state = self.locked();
        state.agents.insert(config.agent_id.clone(), config.clone());
        Ok(config)
    }

    async fn get_agent(&self, agent_id: &str) -> Result<Option<AgentConfig>, StoreError> {
        Ok(self.locked().agents.get(agent_id).cloned())
    }

    async fn update_agent_status(
        &self,
        agent_id: &str,
        status: AgentStatus,
    ) -> Result<AgentConfig, StoreError> {
        let mut state = self.locked();
        let Some(agent) = state.agents.get_mut(agent_id) else {
            return Err(StoreError::NotFound(format!("agent '{agent_id}'")));
        };
        agent.status = status;
        agent.last_active_at = Some(Timestamp::now());
        Ok(agent.clone())
    }

    async fn list_agents(&self) -> Result<Vec<AgentConfig>, StoreError> {
        Ok(self.locked().agents.values().cloned().collect())
    }

    async fn delete_agent(&self, agent_id: &str) -> Result<bool, StoreError> {
        Ok(self.locked().agents.remove(agent_id).is_some())
    }

    async fn schema_version(&self) -> Result<i64, StoreError> {
        Ok(0)
    }

    fn approvals(&self) -> Option<&dyn ApprovalStore> {
        Some(self)
    }

    fn for_tenant(&self, _tenant_id: &TenantId) -> Option<Arc<dyn GovernanceStore>> {
        None
    }
}

// ============================================================================
// SECTION: Approval Store Implementation
// ============================================================================

#[async_trait]
impl ApprovalStore for MemoryStore {
    async fn create_approval(&self, draft: ApprovalDraft) -> Result<ApprovalRequest, StoreError> {
        let mut state = self.locked();
        state.next_approval_id += 1;
        let request = ApprovalRequest {
            id: state.next_approval_id,
            tenant_id: draft.tenant_id,
            agent_id: draft.agent_id,
            tool: draft.tool,
            parameters: draft.parameters,
            trace_id: draft.trace_id,
            policy_name: draft.policy_name,
            rule_name: draft.rule_name,
            status: ApprovalStatus::Pending,
            deadline: draft.deadline,
            approver: None,
            comment: None,
            created_at: draft.created_at,
            resolved_at: None,
        };
        state.approvals.insert(request.id, request.clone());
        Ok(request)
    }

    async fn get_approval(&self, id: i64) -> Result<Option<ApprovalRequest>, StoreError> {
        Ok(self.locked().approvals.get(&id).cloned())
    }

    async fn list_approvals(
        &self,
        filter: &ApprovalFilter,
    ) -> Result<Vec<ApprovalRequest>, StoreError> {
        let state = self.locked();
        Ok(state
            .approvals
            .values()
            .filter(|request| {
                filter.status.is_none_or(|status| status == request.status)
                    && filter.agent_id.as_deref().is_none_or(|agent| agent == request.agent_id)
                    && filter.tool.as_deref().is_none_or(|tool| tool == request.tool)
            })
            .cloned()
            .collect())
    }

    async fn resolve_approval(
        &self,
        id: i64,
        resolution: &ApprovalResolution,
        now: Timestamp,
    ) -> Result<Option<ApprovalRequest>, StoreError> {
        let mut state = self.locked();
        let Some(request) = state.approvals.get_mut(&id) else {
            return Ok(None);
        };
        let timeout = matches!(resolution.status, ApprovalDecision::Timeout);
        if request.status != ApprovalStatus::Pending || (!timeout && request.deadline < now) {
            return Ok(None);
        }
        request.status = resolution.status.terminal_status();
        request.approver = resolution.approver.clone();
        request.comment = resolution.comment.clone();
        request.resolved_at = Some(now);
        Ok(Some(request.clone()))
    }
}
