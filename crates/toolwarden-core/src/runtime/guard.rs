// crates/toolwarden-core/src/runtime/guard.rs
// ============================================================================
// Module: ToolWarden Guarded Dispatcher
// Description: Interposition wrapper around a downstream tool dispatcher.
// Purpose: Evaluate before dispatch and surface denials as typed errors.
// Dependencies: async-trait, crate::core, crate::runtime, thiserror
// ============================================================================

//! ## Overview
//! The guarded dispatcher wraps whatever executes tools downstream. Every
//! call is evaluated first; a deny becomes a `POLICY_DENIED` error and the
//! inner dispatcher is never invoked. When the inner dispatcher fails, the
//! failure is recorded as an `error` audit row with the `tool_error`
//! category and surfaced as `TOOL_EXECUTION_ERROR`. The injection detector
//! runs over the parameters on every call and emits `injection.detected`
//! findings without blocking; blocking is the policy's job.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;

use crate::core::ErrorCode;
use crate::core::EventType;
use crate::core::GovernanceError;
use crate::core::GovernanceEvent;
use crate::core::Timestamp;
use crate::core::scan_parameters;
use crate::runtime::engine::EvaluationRequest;
use crate::runtime::orchestrator::Orchestrator;

// ============================================================================
// SECTION: Tool Dispatcher
// ============================================================================

/// Error raised by a downstream tool dispatcher.
#[derive(Debug, Error)]
#[error("tool dispatch failed: {0}")]
pub struct DispatchError(pub String);

/// Downstream executor of tool calls.
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    /// Executes one tool call and returns its result value.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] when execution fails.
    async fn dispatch(
        &self,
        tool: &str,
        parameters: Option<&Map<String, Value>>,
    ) -> Result<Value, DispatchError>;
}

#[async_trait]
impl<T> ToolDispatcher for Arc<T>
where
    T: ToolDispatcher + ?Sized,
{
    async fn dispatch(
        &self,
        tool: &str,
        parameters: Option<&Map<String, Value>>,
    ) -> Result<Value, DispatchError> {
        self.as_ref().dispatch(tool, parameters).await
    }
}

// ============================================================================
// SECTION: Guarded Dispatcher
// ============================================================================

/// Dispatcher wrapper that interposes the governance decision path.
pub struct GuardedDispatcher<D> {
    /// Orchestrator consulted before every dispatch.
    orchestrator: Arc<Orchestrator>,
    /// Wrapped downstream dispatcher.
    inner: D,
}

impl<D> GuardedDispatcher<D>
where
    D: ToolDispatcher,
{
    /// Wraps a downstream dispatcher behind an orchestrator.
    pub const fn new(orchestrator: Arc<Orchestrator>, inner: D) -> Self {
        Self {
            orchestrator,
            inner,
        }
    }

    /// Evaluates a request and, when allowed, dispatches the tool call.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::PolicyDenied`] on a deny or approval
    /// interception, [`ErrorCode::ToolExecutionError`] when downstream
    /// execution fails, and propagates the evaluation errors of
    /// [`Orchestrator::evaluate`].
    pub async fn call(&self, request: EvaluationRequest) -> Result<Value, GovernanceError> {
        let started = Timestamp::now();
        let decision = self.orchestrator.evaluate(request.clone()).await?;

        if let Some(parameters) = &request.parameters {
            for finding in scan_parameters(parameters) {
                let mut data = Map::new();
                data.insert("tool".to_string(), json!(request.tool));
                data.insert("parameter".to_string(), json!(finding.parameter));
                data.insert("kind".to_string(), json!(finding.kind));
                data.insert("excerpt".to_string(), json!(finding.excerpt));
                let mut event = GovernanceEvent::new(EventType::InjectionDetected, data);
                event.trace_id = Some(decision.trace_id.clone());
                event.agent_id = Some(request.agent_id.clone());
                self.orchestrator.bus().emit_event(event);
            }
        }

        if !decision.allowed {
            let reason = decision
                .reason
                .clone()
                .unwrap_or_else(|| format!("tool '{}' denied by policy", request.tool));
            let mut err = GovernanceError::new(ErrorCode::PolicyDenied, reason)
                .with_context("traceId", json!(decision.trace_id));
            if decision.requires_approval {
                err = err.with_context("requiresApproval", json!(true));
                if let Some(approval_id) = decision.approval_id {
                    err = err.with_context("approvalId", json!(approval_id));
                }
            }
            return Err(err);
        }

        match self.inner.dispatch(&request.tool, request.parameters.as_ref()).await {
            Ok(value) => Ok(value),
            Err(err) => {
                let message = err.to_string();
                self.orchestrator
                    .record_tool_error(&request, &decision.trace_id, &message, &started)
                    .await;
                Err(GovernanceError::new(ErrorCode::ToolExecutionError, message)
                    .with_context("traceId", json!(decision.trace_id))
                    .with_context("tool", json!(request.tool)))
            }
        }
    }
}
