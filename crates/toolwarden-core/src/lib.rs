// crates/toolwarden-core/src/lib.rs
// ============================================================================
// Module: ToolWarden Core Library
// Description: Public API surface for the ToolWarden governance core.
// Purpose: Expose core types, interfaces, and runtime machinery.
// Dependencies: crate::{core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! ToolWarden is an in-process governance decision engine interposed between
//! autonomous agents and the tools they invoke. Every call is decided by a
//! deterministic rule evaluator, bound into a hash-chained audit log, and
//! surfaced through a non-blocking event bus. No language model participates
//! in the decision path.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod core;
pub mod interfaces;
pub mod runtime;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use core::*;

pub use interfaces::ApprovalStore;
pub use interfaces::AuditPage;
pub use interfaces::AuditQuery;
pub use interfaces::GovernanceStore;
pub use interfaces::StoreError;
pub use runtime::AppliedRule;
pub use runtime::ApprovalOutcome;
pub use runtime::DEFAULT_APPROVAL_TIMEOUT_SECS;
pub use runtime::DispatchError;
pub use runtime::EvaluationRequest;
pub use runtime::EvaluationResult;
pub use runtime::EventBus;
pub use runtime::EventListener;
pub use runtime::GuardedDispatcher;
pub use runtime::KillSwitch;
pub use runtime::KillSwitchStatus;
pub use runtime::LISTENER_DEADLINE;
pub use runtime::ListenerError;
pub use runtime::ListenerToken;
pub use runtime::MemoryStore;
pub use runtime::Orchestrator;
pub use runtime::OrchestratorBuilder;
pub use runtime::PolicyEngine;
pub use runtime::PolicyOutcome;
pub use runtime::ToolDispatcher;
