// crates/toolwarden-core/src/core/audit.rs
// ============================================================================
// Module: ToolWarden Audit Chain
// Description: Hash-chained audit records with canonical hashing and verify.
// Purpose: Bind every decision into a tamper-evident, append-only chain.
// Dependencies: serde, serde_jcs, serde_json, sha2, subtle
// ============================================================================

//! ## Overview
//! Every decision appends one audit record. Records are bound into a SHA-256
//! hash chain: each record's hash covers its full content plus the previous
//! record's hash, with a structurally distinct sentinel marking the genesis
//! record. Verification recomputes hashes in id order and reports the first
//! break. Hash comparison is constant time over equal-length buffers.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use sha2::Digest;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::core::error::FailureCategory;
use crate::core::time::Timestamp;
use crate::core::trace::TraceId;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Sentinel marker hashed in place of a predecessor for the first record.
pub const GENESIS_MARKER: &str = "GENESIS_NULL";
/// Prefix binding a record to its predecessor's hash in the preimage.
const CHAIN_PREFIX: &str = "CHAIN:";
/// Length of a lowercase-hex SHA-256 digest.
pub const HASH_HEX_LENGTH: usize = 64;

// ============================================================================
// SECTION: Audit Results
// ============================================================================

/// Outcome recorded on an audit row.
///
/// # Invariants
/// - Wire names are stable strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditResult {
    /// The call was allowed.
    #[serde(rename = "allowed")]
    Allowed,
    /// The call was denied.
    #[serde(rename = "denied")]
    Denied,
    /// The call failed downstream of the decision.
    #[serde(rename = "error")]
    Error,
    /// Synthetic row marking a retention cut-off.
    #[serde(rename = "retention-boundary")]
    RetentionBoundary,
}

impl AuditResult {
    /// Returns the stable wire name for the result.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Allowed => "allowed",
            Self::Denied => "denied",
            Self::Error => "error",
            Self::RetentionBoundary => "retention-boundary",
        }
    }

    /// Parses a stable wire name into a result.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "allowed" => Some(Self::Allowed),
            "denied" => Some(Self::Denied),
            "error" => Some(Self::Error),
            "retention-boundary" => Some(Self::RetentionBoundary),
            _ => None,
        }
    }
}

impl fmt::Display for AuditResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Records
// ============================================================================

/// Content of an audit record before the store assigns id and chain links.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditDraft {
    /// Trace id of the originating evaluation.
    pub trace_id: TraceId,
    /// Decision instant.
    pub timestamp: Timestamp,
    /// Agent that requested the tool call.
    pub agent_id: String,
    /// Tool name requested.
    pub tool: String,
    /// Optional request parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Map<String, Value>>,
    /// Decision outcome.
    pub result: AuditResult,
    /// Optional human-readable reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Evaluation duration in milliseconds.
    pub duration_ms: u64,
    /// Optional failure category for denied or errored rows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_category: Option<FailureCategory>,
}

/// One persisted row of the append-only audit log.
///
/// # Invariants
/// - Rows are inserted only; updates and deletes are rejected at the storage
///   boundary.
/// - `previous_hash` is `None` exactly for the first record; otherwise it
///   equals the `hash` of the record with the immediately preceding id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    /// Store-assigned monotonically increasing identifier.
    pub id: i64,
    /// Trace id of the originating evaluation.
    pub trace_id: TraceId,
    /// Decision instant.
    pub timestamp: Timestamp,
    /// Agent that requested the tool call.
    pub agent_id: String,
    /// Tool name requested.
    pub tool: String,
    /// Optional request parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Map<String, Value>>,
    /// Decision outcome.
    pub result: AuditResult,
    /// Optional human-readable reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Evaluation duration in milliseconds.
    pub duration_ms: u64,
    /// Optional failure category for denied or errored rows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_category: Option<FailureCategory>,
    /// Hash of the predecessor record; `None` for the genesis record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_hash: Option<String>,
    /// SHA-256 hash over the record content and the previous marker.
    pub hash: String,
}

impl AuditRecord {
    /// Borrows the record content as a draft for hashing.
    #[must_use]
    pub fn to_draft(&self) -> AuditDraft {
        AuditDraft {
            trace_id: self.trace_id.clone(),
            timestamp: self.timestamp,
            agent_id: self.agent_id.clone(),
            tool: self.tool.clone(),
            parameters: self.parameters.clone(),
            result: self.result,
            reason: self.reason.clone(),
            duration_ms: self.duration_ms,
            failure_category: self.failure_category,
        }
    }
}

// ============================================================================
// SECTION: Canonical Hashing
// ============================================================================

/// Computes the chain hash for a record draft and its predecessor hash.
///
/// The preimage is the JSON serialization of an ordered field list; object
/// keys inside the parameter map are canonicalized with RFC 8785 so key
/// order never affects the digest. Absent parameters serialize to the empty
/// string and the duration is hashed in its decimal string form.
#[must_use]
pub fn compute_record_hash(draft: &AuditDraft, previous_hash: Option<&str>) -> String {
    let marker = previous_hash.map_or_else(
        || GENESIS_MARKER.to_string(),
        |hash| format!("{CHAIN_PREFIX}{hash}"),
    );
    let preimage = vec![
        marker,
        draft.trace_id.as_str().to_string(),
        draft.timestamp.to_rfc3339(),
        draft.agent_id.clone(),
        draft.tool.clone(),
        canonical_parameters(draft.parameters.as_ref()),
        draft.result.as_str().to_string(),
        draft.reason.clone().unwrap_or_default(),
        draft.duration_ms.to_string(),
        draft
            .failure_category
            .map(|category| category.as_str().to_string())
            .unwrap_or_default(),
    ];
    let bytes = serde_json::to_vec(&preimage).unwrap_or_default();
    let digest = Sha256::digest(&bytes);
    hex_encode(&digest)
}

/// Recomputes a record's hash and compares it to the stored value.
///
/// Comparison is constant time over equal-length buffers; unequal lengths
/// short-circuit to `false`.
#[must_use]
pub fn verify_record(record: &AuditRecord) -> bool {
    let expected = compute_record_hash(&record.to_draft(), record.previous_hash.as_deref());
    if expected.len() != record.hash.len() {
        return false;
    }
    expected.as_bytes().ct_eq(record.hash.as_bytes()).into()
}

/// Canonicalizes a parameter map with RFC 8785 key ordering.
#[must_use]
pub fn canonical_parameters(parameters: Option<&Map<String, Value>>) -> String {
    parameters.map_or_else(String::new, |map| {
        serde_jcs::to_string(map).unwrap_or_default()
    })
}

/// Encodes bytes as a lowercase hex string.
fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}

// ============================================================================
// SECTION: Chain Verification
// ============================================================================

/// Result of walking the full audit chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainVerification {
    /// True when every record verifies and every link agrees.
    pub valid: bool,
    /// Identifier of the first broken record, when any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broken_at: Option<i64>,
    /// Total records inspected.
    pub total_events: u64,
    /// Records verified before the first break (all of them on success).
    pub verified_events: u64,
}

impl ChainVerification {
    /// Returns a verification result for an empty or fully valid chain.
    #[must_use]
    pub const fn valid(total_events: u64) -> Self {
        Self {
            valid: true,
            broken_at: None,
            total_events,
            verified_events: total_events,
        }
    }
}

/// Walks records in ascending id order and reports the first chain break.
///
/// Each record must (a) carry a `previous_hash` equal to the running value
/// and (b) verify against its own stored hash. The running value starts at
/// the genesis sentinel (absent predecessor).
#[must_use]
pub fn verify_records(records: &[AuditRecord]) -> ChainVerification {
    let total = records.len() as u64;
    let mut running: Option<&str> = None;
    let mut verified: u64 = 0;
    for record in records {
        let link_ok = record.previous_hash.as_deref() == running;
        if !link_ok || !verify_record(record) {
            return ChainVerification {
                valid: false,
                broken_at: Some(record.id),
                total_events: total,
                verified_events: verified,
            };
        }
        running = Some(record.hash.as_str());
        verified += 1;
    }
    ChainVerification::valid(total)
}
