// crates/toolwarden-core/tests/chain.rs
// ============================================================================
// Module: Audit Chain Tests
// Description: Verifies canonical hashing, chain walks, and break localization.
// ============================================================================
//! ## Overview
//! Ensures record hashing is deterministic and key-order independent, the
//! genesis sentinel is structurally distinct, chain verification accepts
//! every honest append sequence, and a single tampered hash is localized to
//! its record with the correct verified count.

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

use serde_json::Map;
use serde_json::json;
use toolwarden_core::AuditDraft;
use toolwarden_core::AuditRecord;
use toolwarden_core::AuditResult;
use toolwarden_core::Timestamp;
use toolwarden_core::TraceId;
use toolwarden_core::compute_record_hash;
use toolwarden_core::verify_record;
use toolwarden_core::verify_records;

/// Builds a draft with a fixed timestamp and the provided tool name.
fn draft(tool: &str) -> AuditDraft {
    AuditDraft {
        trace_id: TraceId::parse("0123456789abcdef0123456789abcdef").expect("trace"),
        timestamp: Timestamp::parse("2026-08-01T10:00:00Z").expect("timestamp"),
        agent_id: "agent-a".to_string(),
        tool: tool.to_string(),
        parameters: None,
        result: AuditResult::Allowed,
        reason: None,
        duration_ms: 3,
        failure_category: None,
    }
}

/// Chains drafts into records the way a store append does.
fn chain(drafts: Vec<AuditDraft>) -> Vec<AuditRecord> {
    let mut records: Vec<AuditRecord> = Vec::new();
    for (index, draft) in drafts.into_iter().enumerate() {
        let previous_hash = records.last().map(|record| record.hash.clone());
        let hash = compute_record_hash(&draft, previous_hash.as_deref());
        records.push(AuditRecord {
            id: i64::try_from(index).expect("id") + 1,
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
        });
    }
    records
}

#[test]
fn hash_is_64_lower_hex() {
    let hash = compute_record_hash(&draft("file_read"), None);
    assert_eq!(hash.len(), 64);
    assert!(hash.bytes().all(|byte| matches!(byte, b'0'..=b'9' | b'a'..=b'f')));
}

#[test]
fn hash_is_deterministic() {
    let record = draft("file_read");
    assert_eq!(compute_record_hash(&record, None), compute_record_hash(&record, None));
    assert_eq!(
        compute_record_hash(&record, Some("ab".repeat(32).as_str())),
        compute_record_hash(&record, Some("ab".repeat(32).as_str()))
    );
}

#[test]
fn genesis_and_chained_hashes_differ() {
    let record = draft("file_read");
    let genesis = compute_record_hash(&record, None);
    let chained = compute_record_hash(&record, Some(&genesis));
    assert_ne!(genesis, chained);
}

#[test]
fn parameter_key_order_does_not_affect_the_hash() {
    let mut forward = Map::new();
    forward.insert("a".to_string(), json!(1));
    forward.insert("b".to_string(), json!(2));
    let mut reverse = Map::new();
    reverse.insert("b".to_string(), json!(2));
    reverse.insert("a".to_string(), json!(1));

    let mut left = draft("file_read");
    left.parameters = Some(forward);
    let mut right = draft("file_read");
    right.parameters = Some(reverse);
    assert_eq!(compute_record_hash(&left, None), compute_record_hash(&right, None));
}

#[test]
fn absent_and_empty_parameters_hash_differently() {
    let absent = draft("file_read");
    let mut empty = draft("file_read");
    empty.parameters = Some(Map::new());
    assert_ne!(compute_record_hash(&absent, None), compute_record_hash(&empty, None));
}

#[test]
fn every_content_field_is_hash_relevant() {
    let base = compute_record_hash(&draft("file_read"), None);

    let mut other = draft("file_read");
    other.reason = Some("why".to_string());
    assert_ne!(base, compute_record_hash(&other, None));

    let mut other = draft("file_read");
    other.duration_ms = 4;
    assert_ne!(base, compute_record_hash(&other, None));

    let mut other = draft("file_read");
    other.result = AuditResult::Denied;
    assert_ne!(base, compute_record_hash(&other, None));
}

#[test]
fn verify_record_accepts_honest_records() {
    let records = chain(vec![draft("a"), draft("b")]);
    for record in &records {
        assert!(verify_record(record));
    }
}

#[test]
fn verify_record_rejects_tampered_content() {
    let mut records = chain(vec![draft("a")]);
    records[0].tool = "b".to_string();
    assert!(!verify_record(&records[0]));
}

#[test]
fn chain_is_valid_under_append() {
    for n in [0_usize, 1, 2, 5, 20] {
        let records = chain((0..n).map(|i| draft(&format!("tool-{i}"))).collect());
        let verification = verify_records(&records);
        assert!(verification.valid);
        assert_eq!(verification.total_events, n as u64);
        assert_eq!(verification.verified_events, n as u64);
        assert_eq!(verification.broken_at, None);
    }
}

#[test]
fn tampered_hash_is_localized_to_its_record() {
    let mut records = chain(vec![draft("a"), draft("b"), draft("c")]);
    records[1].hash = "deadbeef".repeat(8);
    let verification = verify_records(&records);
    assert!(!verification.valid);
    assert_eq!(verification.broken_at, Some(2));
    assert_eq!(verification.total_events, 3);
    assert_eq!(verification.verified_events, 1);
}

#[test]
fn broken_link_is_detected_even_with_recomputed_hash() {
    let mut records = chain(vec![draft("a"), draft("b"), draft("c")]);
    // Rewrite record 2's content and recompute its hash so only the link to
    // record 3 disagrees.
    records[1].tool = "tampered".to_string();
    let rewritten = records[1].clone();
    records[1].hash = compute_record_hash(&rewritten.to_draft(), rewritten.previous_hash.as_deref());
    let verification = verify_records(&records);
    assert!(!verification.valid);
    assert_eq!(verification.broken_at, Some(3));
    assert_eq!(verification.verified_events, 2);
}

#[test]
fn first_record_must_carry_no_previous_hash() {
    let mut records = chain(vec![draft("a")]);
    records[0].previous_hash = Some("ab".repeat(32));
    let verification = verify_records(&records);
    assert!(!verification.valid);
    assert_eq!(verification.broken_at, Some(1));
    assert_eq!(verification.verified_events, 0);
}
