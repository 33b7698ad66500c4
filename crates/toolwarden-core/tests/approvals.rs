// crates/toolwarden-core/tests/approvals.rs
// ============================================================================
// Module: Approval Workflow Tests
// Description: Verifies interception, resolution, contention, and lazy timeout.
// ============================================================================
//! ## Overview
//! Exercises the two-phase decision: pending creation on approval-requiring
//! allows, the no-database fail-secure fallback, optimistic resolution with
//! a single winner, and lazy timeout materialization on get and list.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    clippy::missing_docs_in_private_items,
    reason = "Test-only output and panic-based assertions are permitted."
)]

mod common;

use std::sync::Arc;

use common::NoApprovalStore;
use common::capture;
use serde_json::json;
use toolwarden_core::ApprovalDecision;
use toolwarden_core::ApprovalFilter;
use toolwarden_core::ApprovalResolution;
use toolwarden_core::ApprovalStatus;
use toolwarden_core::AuditQuery;
use toolwarden_core::AuditResult;
use toolwarden_core::ErrorCode;
use toolwarden_core::EvaluationRequest;
use toolwarden_core::EventType;
use toolwarden_core::FailureCategory;
use toolwarden_core::GovernanceStore;
use toolwarden_core::MemoryStore;
use toolwarden_core::Orchestrator;
use toolwarden_core::Policy;
use toolwarden_core::Timestamp;

/// Builds a policy whose single rule allows `dangerous` behind approval.
fn approval_policy() -> Policy {
    Policy::new(
        "needs-approval",
        vec![serde_json::from_value(json!({
            "name": "hold-dangerous",
            "tool": "dangerous",
            "effect": "allow",
            "requireApproval": true
        }))
        .expect("rule")],
    )
}

/// Builds an orchestrator over a memory store with the given timeout.
fn orchestrator_with_timeout(seconds: u64) -> (Orchestrator, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let orchestrator = Orchestrator::builder()
        .store(Arc::clone(&store) as Arc<dyn GovernanceStore>)
        .approval_timeout_secs(seconds)
        .build()
        .expect("build orchestrator");
    orchestrator.set_policy(approval_policy()).expect("set policy");
    (orchestrator, store)
}

#[tokio::test]
async fn approval_interception_persists_a_pending_record() {
    let (orchestrator, store) = orchestrator_with_timeout(3_600);
    let mut requested = capture(orchestrator.bus(), EventType::ApprovalRequested);
    let mut allowed = capture(orchestrator.bus(), EventType::ToolCallAllowed);

    let before = Timestamp::now();
    let result = orchestrator
        .evaluate(EvaluationRequest::new("a", "dangerous"))
        .await
        .expect("evaluate");

    assert!(!result.allowed);
    assert!(result.requires_approval);
    let approval_id = result.approval_id.expect("approval id");
    let deadline = result.deadline.expect("deadline");
    assert!(deadline >= before.plus_seconds(3_599));

    let event = requested.recv().await.expect("approval.requested");
    assert_eq!(event.data.get("approvalId"), Some(&json!(approval_id)));
    assert_eq!(event.data.get("ruleName"), Some(&json!("hold-dangerous")));

    tokio::task::yield_now().await;
    assert!(allowed.try_recv().is_err(), "tool_call.allowed must not fire");

    let pending = store
        .approvals()
        .expect("capability")
        .get_approval(approval_id)
        .await
        .expect("get")
        .expect("row");
    assert_eq!(pending.status, ApprovalStatus::Pending);
    assert_eq!(pending.policy_name, "needs-approval");

    let page = store.query_audit(&AuditQuery::default()).await.expect("query");
    assert!(page.records.is_empty(), "decision is in abeyance; no audit yet");
}

#[tokio::test]
async fn missing_approval_infrastructure_fails_secure_without_audit() {
    let store = Arc::new(NoApprovalStore::new());
    let orchestrator = Orchestrator::builder()
        .store(Arc::clone(&store) as Arc<dyn GovernanceStore>)
        .build()
        .expect("build orchestrator");
    orchestrator.set_policy(approval_policy()).expect("set policy");
    let mut denied = capture(orchestrator.bus(), EventType::ToolCallDenied);

    let result = orchestrator
        .evaluate(EvaluationRequest::new("a", "dangerous"))
        .await
        .expect("evaluate");
    assert!(!result.allowed);
    assert!(result.requires_approval);
    assert_eq!(result.approval_id, None);
    assert_eq!(
        result.reason.as_deref(),
        Some("approval infrastructure not available")
    );

    denied.recv().await.expect("tool_call.denied");
    let page = store.query_audit(&AuditQuery::default()).await.expect("query");
    assert!(page.records.is_empty(), "no audit write in this fallback");
}

#[tokio::test]
async fn granting_an_approval_emits_and_audits_allowed() {
    let (orchestrator, store) = orchestrator_with_timeout(3_600);
    let mut granted = capture(orchestrator.bus(), EventType::ApprovalGranted);

    let result = orchestrator
        .evaluate(EvaluationRequest::new("a", "dangerous"))
        .await
        .expect("evaluate");
    let id = result.approval_id.expect("approval id");

    let outcome = orchestrator
        .resolve_approval(
            id,
            ApprovalResolution {
                status: ApprovalDecision::Approved,
                approver: Some("alice".to_string()),
                comment: Some("looks safe".to_string()),
            },
        )
        .await
        .expect("resolve");
    assert!(outcome.resolved);
    let request = outcome.request.expect("request");
    assert_eq!(request.status, ApprovalStatus::Approved);
    assert_eq!(request.approver.as_deref(), Some("alice"));
    assert!(request.resolved_at.is_some());

    let event = granted.recv().await.expect("approval.granted");
    assert_eq!(event.data.get("approver"), Some(&json!("alice")));

    let page = store.query_audit(&AuditQuery::default()).await.expect("query");
    assert_eq!(page.records.len(), 1);
    assert_eq!(page.records[0].result, AuditResult::Allowed);
    assert_eq!(page.records[0].failure_category, None);
}

#[tokio::test]
async fn contention_has_exactly_one_winner() {
    let (orchestrator, _store) = orchestrator_with_timeout(3_600);
    let result = orchestrator
        .evaluate(EvaluationRequest::new("a", "dangerous"))
        .await
        .expect("evaluate");
    let id = result.approval_id.expect("approval id");

    let first = orchestrator
        .resolve_approval(id, ApprovalResolution::new(ApprovalDecision::Approved))
        .await
        .expect("first resolve");
    assert!(first.resolved);

    let second = orchestrator
        .resolve_approval(id, ApprovalResolution::new(ApprovalDecision::Rejected))
        .await
        .expect("second resolve");
    assert!(!second.resolved, "loser gets resolved=false");
    assert_eq!(second.request, None);
}

#[tokio::test]
async fn rejecting_audits_denied_without_timeout_category() {
    let (orchestrator, store) = orchestrator_with_timeout(3_600);
    let mut rejected = capture(orchestrator.bus(), EventType::ApprovalRejected);

    let result = orchestrator
        .evaluate(EvaluationRequest::new("a", "dangerous"))
        .await
        .expect("evaluate");
    let id = result.approval_id.expect("approval id");
    orchestrator
        .resolve_approval(id, ApprovalResolution::new(ApprovalDecision::Rejected))
        .await
        .expect("resolve");

    rejected.recv().await.expect("approval.rejected");
    let page = store.query_audit(&AuditQuery::default()).await.expect("query");
    assert_eq!(page.records[0].result, AuditResult::Denied);
    assert_eq!(page.records[0].failure_category, None);
}

#[tokio::test]
async fn late_explicit_resolution_loses_to_the_deadline() {
    let (orchestrator, _store) = orchestrator_with_timeout(0);
    let result = orchestrator
        .evaluate(EvaluationRequest::new("a", "dangerous"))
        .await
        .expect("evaluate");
    let id = result.approval_id.expect("approval id");
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;

    let outcome = orchestrator
        .resolve_approval(id, ApprovalResolution::new(ApprovalDecision::Approved))
        .await
        .expect("resolve");
    assert!(!outcome.resolved, "deadline has passed; only timeout may transition");
}

#[tokio::test]
async fn get_materializes_an_expired_pending_as_timeout() {
    let (orchestrator, store) = orchestrator_with_timeout(0);
    let mut timed_out = capture(orchestrator.bus(), EventType::ApprovalTimeout);

    let result = orchestrator
        .evaluate(EvaluationRequest::new("a", "dangerous"))
        .await
        .expect("evaluate");
    let id = result.approval_id.expect("approval id");
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;

    let observed = orchestrator
        .get_approval_request(id)
        .await
        .expect("get")
        .expect("row");
    assert_eq!(observed.status, ApprovalStatus::Timeout);

    timed_out.recv().await.expect("approval.timeout");
    let page = store.query_audit(&AuditQuery::default()).await.expect("query");
    assert_eq!(page.records[0].result, AuditResult::Denied);
    assert_eq!(
        page.records[0].failure_category,
        Some(FailureCategory::ApprovalTimeout)
    );
}

#[tokio::test]
async fn list_materializes_expired_records_and_rereads() {
    let (orchestrator, _store) = orchestrator_with_timeout(0);
    for _ in 0..3 {
        orchestrator
            .evaluate(EvaluationRequest::new("a", "dangerous"))
            .await
            .expect("evaluate");
    }
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;

    let listed = orchestrator
        .list_approval_requests(&ApprovalFilter::default())
        .await
        .expect("list");
    assert_eq!(listed.len(), 3);
    assert!(listed.iter().all(|request| request.status == ApprovalStatus::Timeout));
}

#[tokio::test]
async fn resolving_a_missing_id_reports_no_winner() {
    let (orchestrator, _store) = orchestrator_with_timeout(3_600);
    let outcome = orchestrator
        .resolve_approval(999, ApprovalResolution::new(ApprovalDecision::Approved))
        .await
        .expect("resolve");
    assert!(!outcome.resolved);
}

#[tokio::test]
async fn approval_operations_require_the_capability() {
    let store = Arc::new(NoApprovalStore::new());
    let orchestrator = Orchestrator::builder()
        .store(store as Arc<dyn GovernanceStore>)
        .build()
        .expect("build orchestrator");
    let err = orchestrator
        .resolve_approval(1, ApprovalResolution::new(ApprovalDecision::Approved))
        .await
        .expect_err("unsupported");
    assert_eq!(err.code, ErrorCode::ApprovalNotSupported);

    let no_store = Orchestrator::builder().build().expect("build orchestrator");
    let err = no_store
        .resolve_approval(1, ApprovalResolution::new(ApprovalDecision::Approved))
        .await
        .expect_err("no database");
    assert_eq!(err.code, ErrorCode::DatabaseRequired);
}
