// crates/toolwarden-core/src/runtime/orchestrator.rs
// ============================================================================
// Module: ToolWarden Orchestrator
// Description: The evaluate pipeline, approval coordinator, and management ops.
// Purpose: Compose trace, kill switch, policy engine, events, and audit.
// Dependencies: crate::core, crate::interfaces, crate::runtime, serde, tokio
// ============================================================================

//! ## Overview
//! The orchestrator is the single externally visible decision path. One
//! `evaluate` call resolves a trace context, consults the kill switch,
//! resolves a policy (inline, then persisted, then default-allow), invokes
//! the engine, and either diverts into the approval workflow or emits the
//! decision event and appends the audit record. All side effects are
//! best-effort: the returned decision never changes because an event or
//! audit write failed. An `audit.write_failure` event is the only signal
//! that durability was lost.
//!
//! Tenant-scoped views share the bus, engine, and kill-switch manager with
//! their parent; only the persistence handle and the tenant attribution on
//! emitted events differ. Inline policies on a scoped view are isolated
//! from the parent.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::sync::Arc;
use std::sync::PoisonError;
use std::sync::RwLock;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;
use tracing::warn;

use crate::core::AgentConfig;
use crate::core::AgentStatus;
use crate::core::ApprovalDecision;
use crate::core::ApprovalDraft;
use crate::core::ApprovalFilter;
use crate::core::ApprovalRequest;
use crate::core::ApprovalResolution;
use crate::core::AuditDraft;
use crate::core::AuditResult;
use crate::core::ChainVerification;
use crate::core::ErrorCode;
use crate::core::EventType;
use crate::core::FailureCategory;
use crate::core::GovernanceError;
use crate::core::GovernanceEvent;
use crate::core::Policy;
use crate::core::TenantId;
use crate::core::Timestamp;
use crate::core::TraceContext;
use crate::core::TraceId;
use crate::core::current_trace_context;
use crate::core::with_trace_context;
use crate::interfaces::ApprovalStore;
use crate::interfaces::AuditQuery;
use crate::interfaces::GovernanceStore;
use crate::interfaces::StoreError;
use crate::runtime::bus::EventBus;
use crate::runtime::engine::AppliedRule;
use crate::runtime::engine::EvaluationRequest;
use crate::runtime::engine::PolicyEngine;
use crate::runtime::engine::PolicyOutcome;
use crate::runtime::killswitch::KillSwitch;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default approval timeout in seconds.
pub const DEFAULT_APPROVAL_TIMEOUT_SECS: u64 = 3_600;

/// Audit-write failure context for the normal decision path.
const WRITE_CONTEXT_EVALUATION: &str = "policy_evaluation";
/// Audit-write failure context for kill-switch denials.
const WRITE_CONTEXT_KILLSWITCH: &str = "killswitch_denial";
/// Audit-write failure context for approval resolutions.
const WRITE_CONTEXT_APPROVAL: &str = "approval_resolution";

// ============================================================================
// SECTION: Results
// ============================================================================

/// Caller-visible result of one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    /// True when the call may proceed now.
    pub allowed: bool,
    /// Trace id stamped on every artifact of this call.
    pub trace_id: TraceId,
    /// Reason; populated on denials and approval interceptions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Every matching rule in priority order.
    pub applied_rules: Vec<AppliedRule>,
    /// True when the decision is held for approval.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub requires_approval: bool,
    /// Identifier of the pending approval, on the interception path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_id: Option<i64>,
    /// Deadline of the pending approval, on the interception path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<Timestamp>,
}

impl EvaluationResult {
    /// Creates a denial result without approval involvement.
    fn denied(trace_id: TraceId, reason: String, applied_rules: Vec<AppliedRule>) -> Self {
        Self {
            allowed: false,
            trace_id,
            reason: Some(reason),
            applied_rules,
            requires_approval: false,
            approval_id: None,
            deadline: None,
        }
    }
}

/// Outcome of resolving one approval request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalOutcome {
    /// True when this caller applied the terminal transition.
    pub resolved: bool,
    /// The resolved record, when this caller won.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<ApprovalRequest>,
}

// ============================================================================
// SECTION: Builder
// ============================================================================

/// Builder for an orchestrator.
#[derive(Default)]
pub struct OrchestratorBuilder {
    /// Optional persistence layer.
    store: Option<Arc<dyn GovernanceStore>>,
    /// Optional shared event bus.
    bus: Option<Arc<EventBus>>,
    /// Optional inline policy.
    policy: Option<Policy>,
    /// Approval timeout override in seconds.
    approval_timeout_secs: Option<u64>,
}

impl OrchestratorBuilder {
    /// Sets the persistence layer.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn GovernanceStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets a shared event bus; a fresh bus is created otherwise.
    #[must_use]
    pub fn bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Sets an inline policy used ahead of any persisted policy.
    #[must_use]
    pub fn policy(mut self, policy: Policy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Overrides the approval timeout in seconds.
    #[must_use]
    pub const fn approval_timeout_secs(mut self, seconds: u64) -> Self {
        self.approval_timeout_secs = Some(seconds);
        self
    }

    /// Builds the orchestrator, validating any inline policy.
    ///
    /// # Errors
    ///
    /// Returns an [`ErrorCode::InvalidPolicy`] error when the inline policy
    /// fails validation.
    pub fn build(self) -> Result<Orchestrator, GovernanceError> {
        if let Some(policy) = &self.policy {
            policy.validate()?;
        }
        let bus = self.bus.unwrap_or_else(|| Arc::new(EventBus::new()));
        bus.set_trace_resolver(Some(Arc::new(|| {
            current_trace_context().map(|ctx| ctx.trace_id)
        })));
        let kill_switch = Arc::new(KillSwitch::with_bus(Arc::clone(&bus)));
        Ok(Orchestrator {
            store: self.store,
            bus,
            kill_switch,
            engine: PolicyEngine::new(),
            inline_policy: RwLock::new(self.policy.map(Arc::new)),
            tenant_id: None,
            approval_timeout_secs: self
                .approval_timeout_secs
                .unwrap_or(DEFAULT_APPROVAL_TIMEOUT_SECS),
        })
    }
}

// ============================================================================
// SECTION: Orchestrator
// ============================================================================

/// Governance orchestrator composing every core subsystem.
pub struct Orchestrator {
    /// Optional persistence layer.
    store: Option<Arc<dyn GovernanceStore>>,
    /// Shared event bus.
    bus: Arc<EventBus>,
    /// Shared kill-switch manager.
    kill_switch: Arc<KillSwitch>,
    /// Pure policy evaluator.
    engine: PolicyEngine,
    /// Inline policy; single writer, many readers.
    inline_policy: RwLock<Option<Arc<Policy>>>,
    /// Tenant scope of this view, when derived via [`Self::for_tenant`].
    tenant_id: Option<TenantId>,
    /// Approval timeout in seconds.
    approval_timeout_secs: u64,
}

impl Orchestrator {
    /// Returns a builder.
    #[must_use]
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::default()
    }

    /// Returns the shared event bus.
    #[must_use]
    pub const fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Returns the shared kill-switch manager.
    #[must_use]
    pub const fn kill_switch(&self) -> &Arc<KillSwitch> {
        &self.kill_switch
    }

    /// Returns the persistence layer, when configured.
    #[must_use]
    pub const fn store(&self) -> Option<&Arc<dyn GovernanceStore>> {
        self.store.as_ref()
    }

    /// Returns the tenant scope of this view, when any.
    #[must_use]
    pub const fn tenant_id(&self) -> Option<&TenantId> {
        self.tenant_id.as_ref()
    }

    /// Derives a tenant-scoped view.
    ///
    /// The view shares the bus, engine, and kill-switch manager (kill-switch
    /// state is already per tenant). Its persistence handle is the scoped
    /// handle from the underlying store, or the same store when scoping is
    /// unsupported. Inline policies on the view are isolated from the
    /// parent; listeners are shared because the bus is shared.
    #[must_use]
    pub fn for_tenant(&self, tenant_id: TenantId) -> Self {
        let store = self.store.as_ref().map(|store| {
            store.for_tenant(&tenant_id).unwrap_or_else(|| Arc::clone(store))
        });
        Self {
            store,
            bus: Arc::clone(&self.bus),
            kill_switch: Arc::clone(&self.kill_switch),
            engine: self.engine,
            inline_policy: RwLock::new(None),
            tenant_id: Some(tenant_id),
            approval_timeout_secs: self.approval_timeout_secs,
        }
    }

    /// Installs an inline policy, replacing any previous one atomically.
    ///
    /// # Errors
    ///
    /// Returns an [`ErrorCode::InvalidPolicy`] error when validation fails.
    pub fn set_policy(&self, policy: Policy) -> Result<(), GovernanceError> {
        policy.validate()?;
        *self.policy_slot() = Some(Arc::new(policy));
        Ok(())
    }

    /// Clears the inline policy.
    pub fn clear_policy(&self) {
        *self.policy_slot() = None;
    }

    // ------------------------------------------------------------------
    // Evaluation pipeline
    // ------------------------------------------------------------------

    /// Evaluates one tool-call request.
    ///
    /// # Errors
    ///
    /// Returns an [`ErrorCode::InvalidRequest`] error when validation fails,
    /// or an [`ErrorCode::StorageFailure`] error when persisting a pending
    /// approval fails. Persistence failures during policy resolution and
    /// audit writes never surface as errors; they fail secure or degrade to
    /// an `audit.write_failure` event.
    pub async fn evaluate(
        &self,
        request: EvaluationRequest,
    ) -> Result<EvaluationResult, GovernanceError> {
        validate_request(&request)?;
        let trace_id = request
            .trace_id
            .clone()
            .unwrap_or_else(TraceId::generate);
        let ctx = TraceContext::for_trace(trace_id.clone());
        with_trace_context(ctx, self.evaluate_traced(request, trace_id)).await
    }

    /// Runs the pipeline inside the ambient trace scope.
    async fn evaluate_traced(
        &self,
        request: EvaluationRequest,
        trace_id: TraceId,
    ) -> Result<EvaluationResult, GovernanceError> {
        let started = Timestamp::now();

        if self.kill_switch.is_active(self.tenant_id.as_ref()) {
            return Ok(self.deny_for_kill_switch(&request, trace_id, &started).await);
        }

        let policy = match self.resolve_policy(&request).await {
            Ok(policy) => policy,
            Err(reason) => {
                let mut data = Map::new();
                data.insert("reason".to_string(), json!(reason));
                data.insert("failSecure".to_string(), json!(true));
                self.emit_decision(EventType::ToolCallDenied, &trace_id, &request.agent_id, data);
                return Ok(EvaluationResult::denied(trace_id, reason, Vec::new()));
            }
        };

        let outcome = self.engine.evaluate(Some(policy.as_ref()), &request, &trace_id);

        let wants_approval =
            outcome.allowed && outcome.winner().is_some_and(|rule| rule.require_approval);
        if wants_approval {
            return self.intercept_for_approval(&request, &policy, trace_id, outcome).await;
        }

        let mut data = Map::new();
        data.insert("tool".to_string(), json!(request.tool));
        data.insert("appliedRules".to_string(), json!(outcome.applied_rules));
        let event_type = if outcome.allowed {
            EventType::ToolCallAllowed
        } else {
            data.insert("reason".to_string(), json!(outcome.reason));
            EventType::ToolCallDenied
        };
        self.emit_decision(event_type, &trace_id, &request.agent_id, data);

        let now = Timestamp::now();
        let draft = AuditDraft {
            trace_id: trace_id.clone(),
            timestamp: now,
            agent_id: request.agent_id.clone(),
            tool: request.tool.clone(),
            parameters: request.parameters.clone(),
            result: if outcome.allowed {
                AuditResult::Allowed
            } else {
                AuditResult::Denied
            },
            reason: outcome.reason.clone(),
            duration_ms: now.millis_since(&started),
            failure_category: (!outcome.allowed).then_some(FailureCategory::PolicyDenial),
        };
        self.append_audit_best_effort(draft, WRITE_CONTEXT_EVALUATION).await;

        Ok(EvaluationResult {
            allowed: outcome.allowed,
            trace_id,
            reason: outcome.reason,
            applied_rules: outcome.applied_rules,
            requires_approval: false,
            approval_id: None,
            deadline: None,
        })
    }

    /// Denies a request because the kill switch is active for this scope.
    async fn deny_for_kill_switch(
        &self,
        request: &EvaluationRequest,
        trace_id: TraceId,
        started: &Timestamp,
    ) -> EvaluationResult {
        let status = self.kill_switch.status(self.tenant_id.as_ref());
        let reason = format!(
            "Kill-Switch active: {}",
            status.reason.as_deref().unwrap_or("no reason recorded")
        );

        let mut data = Map::new();
        data.insert("reason".to_string(), json!(reason));
        data.insert("killSwitch".to_string(), json!(true));
        self.emit_decision(EventType::ToolCallDenied, &trace_id, &request.agent_id, data);

        let now = Timestamp::now();
        let draft = AuditDraft {
            trace_id: trace_id.clone(),
            timestamp: now,
            agent_id: request.agent_id.clone(),
            tool: request.tool.clone(),
            parameters: request.parameters.clone(),
            result: AuditResult::Denied,
            reason: Some(reason.clone()),
            duration_ms: now.millis_since(started),
            failure_category: Some(FailureCategory::PolicyDenial),
        };
        self.append_audit_best_effort(draft, WRITE_CONTEXT_KILLSWITCH).await;

        EvaluationResult::denied(trace_id, reason, Vec::new())
    }

    /// Resolves the effective policy: inline, persisted, then default-allow.
    ///
    /// A persistence failure is fatal to the request and reported as a
    /// fail-secure denial reason.
    async fn resolve_policy(&self, request: &EvaluationRequest) -> Result<Arc<Policy>, String> {
        if let Some(policy) = self.policy_snapshot() {
            return Ok(policy);
        }
        let Some(store) = &self.store else {
            return Ok(Arc::new(Policy::default_allow_all()));
        };
        match store.resolve_active_policy(&request.agent_id).await {
            Ok(Some(policy)) => Ok(Arc::new(policy)),
            Ok(None) => Ok(Arc::new(Policy::default_allow_all())),
            Err(err) => Err(format!("policy resolution failed (fail-secure): {err}")),
        }
    }

    /// Diverts an approval-requiring allow into the pending workflow.
    async fn intercept_for_approval(
        &self,
        request: &EvaluationRequest,
        policy: &Arc<Policy>,
        trace_id: TraceId,
        outcome: PolicyOutcome,
    ) -> Result<EvaluationResult, GovernanceError> {
        let rule_name = outcome.winner().and_then(|rule| rule.name.clone());
        let reason = outcome
            .winner()
            .and_then(|rule| rule.reason.clone())
            .unwrap_or_else(|| format!("tool '{}' requires approval", request.tool));

        let Some(approvals) = self.approval_capability() else {
            let reason = "approval infrastructure not available".to_string();
            let mut data = Map::new();
            data.insert("reason".to_string(), json!(reason));
            data.insert("requiresApproval".to_string(), json!(true));
            self.emit_decision(EventType::ToolCallDenied, &trace_id, &request.agent_id, data);
            return Ok(EvaluationResult {
                allowed: false,
                trace_id,
                reason: Some(reason),
                applied_rules: outcome.applied_rules,
                requires_approval: true,
                approval_id: None,
                deadline: None,
            });
        };

        let now = Timestamp::now();
        let deadline = now.plus_seconds(self.approval_timeout_secs);
        let draft = ApprovalDraft {
            tenant_id: self.tenant_id.clone(),
            agent_id: request.agent_id.clone(),
            tool: request.tool.clone(),
            parameters: request.parameters.clone(),
            trace_id: trace_id.clone(),
            policy_name: policy.name.clone(),
            rule_name: rule_name.clone(),
            deadline,
            created_at: now,
        };
        let created = approvals.create_approval(draft).await?;

        let mut data = Map::new();
        data.insert("approvalId".to_string(), json!(created.id));
        data.insert("tool".to_string(), json!(request.tool));
        if let Some(parameters) = &request.parameters {
            data.insert("parameters".to_string(), Value::Object(parameters.clone()));
        }
        data.insert("policyName".to_string(), json!(policy.name));
        data.insert("ruleName".to_string(), json!(rule_name));
        data.insert("deadline".to_string(), json!(created.deadline));
        self.emit_decision(EventType::ApprovalRequested, &trace_id, &request.agent_id, data);

        Ok(EvaluationResult {
            allowed: false,
            trace_id,
            reason: Some(reason),
            applied_rules: outcome.applied_rules,
            requires_approval: true,
            approval_id: Some(created.id),
            deadline: Some(created.deadline),
        })
    }

    // ------------------------------------------------------------------
    // Approval coordination
    // ------------------------------------------------------------------

    /// Applies a terminal resolution to a pending approval.
    ///
    /// A contention loser receives `resolved = false` with no further
    /// action. A winner triggers the matching approval event and an audit
    /// record; the `approval_timeout` category is set only on the timeout
    /// branch.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::DatabaseRequired`] without a store,
    /// [`ErrorCode::ApprovalNotSupported`] when the store lacks approval
    /// operations, or [`ErrorCode::StorageFailure`] when the update fails.
    pub async fn resolve_approval(
        &self,
        id: i64,
        resolution: ApprovalResolution,
    ) -> Result<ApprovalOutcome, GovernanceError> {
        let approvals = self.require_approvals()?;
        let now = Timestamp::now();
        let Some(request) = approvals.resolve_approval(id, &resolution, now).await? else {
            return Ok(ApprovalOutcome {
                resolved: false,
                request: None,
            });
        };

        let event_type = match resolution.status {
            ApprovalDecision::Approved => EventType::ApprovalGranted,
            ApprovalDecision::Rejected => EventType::ApprovalRejected,
            ApprovalDecision::Timeout => EventType::ApprovalTimeout,
        };
        let mut data = Map::new();
        data.insert("approvalId".to_string(), json!(request.id));
        data.insert("tool".to_string(), json!(request.tool));
        data.insert("policyName".to_string(), json!(request.policy_name));
        data.insert("ruleName".to_string(), json!(request.rule_name));
        data.insert("approver".to_string(), json!(request.approver));
        data.insert("comment".to_string(), json!(request.comment));
        self.emit_decision(event_type, &request.trace_id, &request.agent_id, data);

        let (result, failure_category) = match resolution.status {
            ApprovalDecision::Approved => (AuditResult::Allowed, None),
            ApprovalDecision::Rejected => (AuditResult::Denied, None),
            ApprovalDecision::Timeout => {
                (AuditResult::Denied, Some(FailureCategory::ApprovalTimeout))
            }
        };
        let reason = request.comment.clone().unwrap_or_else(|| {
            format!("approval request {} resolved: {}", request.id, request.status)
        });
        let draft = AuditDraft {
            trace_id: request.trace_id.clone(),
            timestamp: now,
            agent_id: request.agent_id.clone(),
            tool: request.tool.clone(),
            parameters: request.parameters.clone(),
            result,
            reason: Some(reason),
            duration_ms: now.millis_since(&request.created_at),
            failure_category,
        };
        self.append_audit_best_effort(draft, WRITE_CONTEXT_APPROVAL).await;

        Ok(ApprovalOutcome {
            resolved: true,
            request: Some(request),
        })
    }

    /// Fetches one approval, lazily materializing an expired pending record
    /// as a timeout before returning it.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::DatabaseRequired`], [`ErrorCode::ApprovalNotSupported`],
    /// or [`ErrorCode::StorageFailure`] as for [`Self::resolve_approval`].
    pub async fn get_approval_request(
        &self,
        id: i64,
    ) -> Result<Option<ApprovalRequest>, GovernanceError> {
        let approvals = self.require_approvals()?;
        let Some(request) = approvals.get_approval(id).await? else {
            return Ok(None);
        };
        if request.is_expired(&Timestamp::now()) {
            self.resolve_approval(id, ApprovalResolution::new(ApprovalDecision::Timeout))
                .await?;
            return Ok(self.require_approvals()?.get_approval(id).await?);
        }
        Ok(Some(request))
    }

    /// Lists approvals, lazily materializing every expired pending record as
    /// a timeout, then re-reading so returned statuses are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::DatabaseRequired`], [`ErrorCode::ApprovalNotSupported`],
    /// or [`ErrorCode::StorageFailure`] as for [`Self::resolve_approval`].
    pub async fn list_approval_requests(
        &self,
        filter: &ApprovalFilter,
    ) -> Result<Vec<ApprovalRequest>, GovernanceError> {
        let approvals = self.require_approvals()?;
        let now = Timestamp::now();
        let first_pass = approvals.list_approvals(filter).await?;
        let expired: Vec<i64> = first_pass
            .iter()
            .filter(|request| request.is_expired(&now))
            .map(|request| request.id)
            .collect();
        if expired.is_empty() {
            return Ok(first_pass);
        }
        for id in expired {
            self.resolve_approval(id, ApprovalResolution::new(ApprovalDecision::Timeout))
                .await?;
        }
        Ok(self.require_approvals()?.list_approvals(filter).await?)
    }

    // ------------------------------------------------------------------
    // Management surface
    // ------------------------------------------------------------------

    /// Persists a policy, snapshotting any prior version, and emits
    /// `policy.created` or `policy.updated`.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::InvalidPolicy`] on validation failure,
    /// [`ErrorCode::DatabaseRequired`] without a store, or
    /// [`ErrorCode::StorageFailure`] when the write fails.
    pub async fn save_policy(
        &self,
        policy: Policy,
        author: &str,
    ) -> Result<Policy, GovernanceError> {
        policy.validate()?;
        let store = self.require_store()?;
        let existed = store.get_policy(&policy.name).await?.is_some();
        let stored = store.upsert_policy(policy, author).await?;
        let event_type = if existed {
            EventType::PolicyUpdated
        } else {
            EventType::PolicyCreated
        };
        let mut data = Map::new();
        data.insert("policy".to_string(), json!(stored.name));
        data.insert("version".to_string(), json!(stored.version));
        data.insert("author".to_string(), json!(author));
        self.emit_management(event_type, data);
        Ok(stored)
    }

    /// Deletes a persisted policy, emitting `policy.deleted` when a row
    /// existed.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::DatabaseRequired`] without a store or
    /// [`ErrorCode::StorageFailure`] when the delete fails.
    pub async fn delete_policy(&self, name: &str) -> Result<bool, GovernanceError> {
        let store = self.require_store()?;
        let deleted = store.delete_policy(name).await?;
        if deleted {
            let mut data = Map::new();
            data.insert("policy".to_string(), json!(name));
            self.emit_management(EventType::PolicyDeleted, data);
        }
        Ok(deleted)
    }

    /// Restores a historical policy version as a new upsert.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::VersionNotFound`] when the named version does
    /// not exist in the history, plus the persistence errors of
    /// [`Self::save_policy`].
    pub async fn rollback_policy(
        &self,
        name: &str,
        version: i64,
        author: &str,
    ) -> Result<Policy, GovernanceError> {
        let store = self.require_store()?;
        let history = store.policy_history(name).await?;
        let Some(snapshot) = history.iter().find(|entry| entry.version == version) else {
            return Err(GovernanceError::new(
                ErrorCode::VersionNotFound,
                format!("policy '{name}' has no version {version}"),
            )
            .with_context("policy", json!(name))
            .with_context("version", json!(version)));
        };
        let current = store.get_policy(name).await?;
        let now = Timestamp::now();
        let restored = Policy {
            name: snapshot.policy_name.clone(),
            version: current.as_ref().map_or(snapshot.version, |policy| policy.version),
            agent_id: snapshot.agent_id.clone(),
            rules: snapshot.rules.clone(),
            created_at: current.as_ref().map_or(now, |policy| policy.created_at),
            updated_at: now,
        };
        self.save_policy(restored, author).await
    }

    /// Registers an agent and emits `agent.config_changed`.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::InvalidConfig`] on validation failure,
    /// [`ErrorCode::DatabaseRequired`] without a store, or
    /// [`ErrorCode::StorageFailure`] when the write fails.
    pub async fn register_agent(
        &self,
        config: AgentConfig,
    ) -> Result<AgentConfig, GovernanceError> {
        config.validate()?;
        let store = self.require_store()?;
        let stored = store.register_agent(config).await?;
        let mut data = Map::new();
        data.insert("agentId".to_string(), json!(stored.agent_id));
        data.insert("status".to_string(), json!(stored.status));
        let mut event = GovernanceEvent::new(EventType::AgentConfigChanged, data);
        event.agent_id = Some(stored.agent_id.clone());
        event.tenant_id = self.tenant_id.clone();
        self.bus.emit_event(event);
        Ok(stored)
    }

    /// Updates an agent's status and emits the matching lifecycle event.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::AgentNotFound`] when the agent does not exist,
    /// [`ErrorCode::DatabaseRequired`] without a store, or
    /// [`ErrorCode::StorageFailure`] when the write fails.
    pub async fn update_agent_status(
        &self,
        agent_id: &str,
        status: AgentStatus,
    ) -> Result<AgentConfig, GovernanceError> {
        let store = self.require_store()?;
        let updated = match store.update_agent_status(agent_id, status).await {
            Ok(updated) => updated,
            Err(StoreError::NotFound(_)) => {
                return Err(GovernanceError::new(
                    ErrorCode::AgentNotFound,
                    format!("agent '{agent_id}' is not registered"),
                )
                .with_context("agentId", json!(agent_id)));
            }
            Err(err) => return Err(err.into()),
        };
        let event_type = match status {
            AgentStatus::Running => EventType::AgentStarted,
            AgentStatus::Stopped => EventType::AgentStopped,
            AgentStatus::Error => EventType::AgentError,
            AgentStatus::Registered => EventType::AgentConfigChanged,
        };
        let mut data = Map::new();
        data.insert("agentId".to_string(), json!(agent_id));
        data.insert("status".to_string(), json!(status));
        let mut event = GovernanceEvent::new(event_type, data);
        event.agent_id = Some(agent_id.to_string());
        event.tenant_id = self.tenant_id.clone();
        self.bus.emit_event(event);
        Ok(updated)
    }

    /// Walks the audit chain and emits `audit.integrity_violation` on a
    /// break.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::DatabaseRequired`] without a store or
    /// [`ErrorCode::StorageFailure`] when records cannot be read.
    pub async fn verify_audit_chain(&self) -> Result<ChainVerification, GovernanceError> {
        let store = self.require_store()?;
        let verification = store.verify_audit_chain().await?;
        if !verification.valid {
            let mut data = Map::new();
            data.insert("brokenAt".to_string(), json!(verification.broken_at));
            data.insert("totalEvents".to_string(), json!(verification.total_events));
            data.insert(
                "verifiedEvents".to_string(),
                json!(verification.verified_events),
            );
            self.emit_management(EventType::AuditIntegrityViolation, data);
        }
        Ok(verification)
    }

    /// Streams matching audit records as newline-delimited JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::DatabaseRequired`] without a store or
    /// [`ErrorCode::StorageFailure`] when the export fails.
    pub async fn export_audit(
        &self,
        query: &AuditQuery,
        out: &mut (dyn Write + Send),
    ) -> Result<u64, GovernanceError> {
        let store = self.require_store()?;
        Ok(store.export_audit(query, out).await?)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Returns the store or the `DATABASE_REQUIRED` error.
    fn require_store(&self) -> Result<&Arc<dyn GovernanceStore>, GovernanceError> {
        self.store.as_ref().ok_or_else(|| {
            GovernanceError::new(
                ErrorCode::DatabaseRequired,
                "operation requires a persistence layer",
            )
        })
    }

    /// Returns the approval capability when both store and capability exist.
    fn approval_capability(&self) -> Option<&dyn ApprovalStore> {
        self.store.as_ref().and_then(|store| store.approvals())
    }

    /// Returns the approval capability or the matching configuration error.
    fn require_approvals(&self) -> Result<&dyn ApprovalStore, GovernanceError> {
        let store = self.require_store()?;
        store.approvals().ok_or_else(|| {
            GovernanceError::new(
                ErrorCode::ApprovalNotSupported,
                "persistence layer does not expose approval operations",
            )
        })
    }

    /// Locks the inline-policy slot for writing, recovering from poisoning.
    fn policy_slot(&self) -> std::sync::RwLockWriteGuard<'_, Option<Arc<Policy>>> {
        self.inline_policy.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes an atomic snapshot of the inline policy.
    fn policy_snapshot(&self) -> Option<Arc<Policy>> {
        self.inline_policy
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Emits a decision-path event with full attribution.
    fn emit_decision(
        &self,
        event_type: EventType,
        trace_id: &TraceId,
        agent_id: &str,
        mut data: Map<String, Value>,
    ) {
        if let Some(tenant) = &self.tenant_id {
            data.insert("tenantId".to_string(), json!(tenant.as_str()));
        }
        let mut event = GovernanceEvent::new(event_type, data);
        event.trace_id = Some(trace_id.clone());
        event.agent_id = Some(agent_id.to_string());
        event.tenant_id = self.tenant_id.clone();
        self.bus.emit_event(event);
    }

    /// Emits a management-path event with tenant attribution only.
    fn emit_management(&self, event_type: EventType, data: Map<String, Value>) {
        let mut event = GovernanceEvent::new(event_type, data);
        event.tenant_id = self.tenant_id.clone();
        self.bus.emit_event(event);
    }

    /// Records a downstream tool failure: emits `tool_call.error` and appends
    /// an `error` audit row with the `tool_error` category, best-effort.
    pub(crate) async fn record_tool_error(
        &self,
        request: &EvaluationRequest,
        trace_id: &TraceId,
        message: &str,
        started: &Timestamp,
    ) {
        let mut data = Map::new();
        data.insert("tool".to_string(), json!(request.tool));
        data.insert("error".to_string(), json!(message));
        self.emit_decision(EventType::ToolCallError, trace_id, &request.agent_id, data);

        let now = Timestamp::now();
        let draft = AuditDraft {
            trace_id: trace_id.clone(),
            timestamp: now,
            agent_id: request.agent_id.clone(),
            tool: request.tool.clone(),
            parameters: request.parameters.clone(),
            result: AuditResult::Error,
            reason: Some(message.to_string()),
            duration_ms: now.millis_since(started),
            failure_category: Some(FailureCategory::ToolError),
        };
        self.append_audit_best_effort(draft, WRITE_CONTEXT_EVALUATION).await;
    }

    /// Appends an audit record, degrading failures to `audit.write_failure`.
    async fn append_audit_best_effort(&self, draft: AuditDraft, context: &str) {
        let Some(store) = &self.store else {
            return;
        };
        let trace_id = draft.trace_id.clone();
        let agent_id = draft.agent_id.clone();
        if let Err(err) = store.append_audit(draft).await {
            warn!(context, error = %err, "audit write failed; decision stands");
            let mut data = Map::new();
            data.insert("context".to_string(), json!(context));
            data.insert("error".to_string(), json!(err.to_string()));
            self.emit_decision(EventType::AuditWriteFailure, &trace_id, &agent_id, data);
        }
    }
}

// ============================================================================
// SECTION: Validation
// ============================================================================

/// Validates an evaluation request at the call boundary.
fn validate_request(request: &EvaluationRequest) -> Result<(), GovernanceError> {
    if request.agent_id.trim().is_empty() {
        return Err(GovernanceError::new(
            ErrorCode::InvalidRequest,
            "agent id must not be empty",
        ));
    }
    if request.tool.trim().is_empty() {
        return Err(GovernanceError::new(
            ErrorCode::InvalidRequest,
            "tool name must not be empty",
        ));
    }
    Ok(())
}
