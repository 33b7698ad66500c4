// crates/toolwarden-core/src/core/trace.rs
// ============================================================================
// Module: ToolWarden Trace Carrier
// Description: W3C trace-context identifiers and ambient propagation.
// Purpose: Generate, validate, and propagate trace ids across one evaluation.
// Dependencies: rand, serde, tokio
// ============================================================================

//! ## Overview
//! Every evaluation is stamped with a W3C trace context: a 32-hex trace id,
//! a 16-hex span id, and the `traceparent` rendering `00-{trace}-{span}-01`.
//! Generation draws from the operating system RNG. Parsing of foreign
//! headers is strict and returns `None` instead of a fallback so callers
//! decide whether to regenerate.
//!
//! The ambient primitive is a tokio task-local scope: work wrapped in
//! [`with_trace_context`] observes the same context from
//! [`current_trace_context`], including the event bus trace resolver.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use rand::RngCore;
use rand::rngs::OsRng;
use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Byte length of a W3C trace id.
const TRACE_ID_BYTES: usize = 16;
/// Byte length of a W3C span id.
const SPAN_ID_BYTES: usize = 8;
/// Version prefix emitted and accepted for `traceparent` headers.
const TRACEPARENT_VERSION: &str = "00";
/// Flags suffix emitted for `traceparent` headers (always sampled).
const TRACEPARENT_FLAGS: &str = "01";

// ============================================================================
// SECTION: Trace Identifiers
// ============================================================================

/// W3C trace identifier (32 lowercase hex characters, non-zero).
///
/// # Invariants
/// - Constructed values always satisfy the format; invalid input is rejected
///   at the parsing boundary, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TraceId(String);

impl TraceId {
    /// Generates a fresh trace id from the operating system RNG.
    #[must_use]
    pub fn generate() -> Self {
        Self(generate_hex_id(TRACE_ID_BYTES))
    }

    /// Parses a candidate trace id, returning `None` when invalid.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        if is_valid_hex_id(value, TRACE_ID_BYTES * 2) {
            Some(Self(value.to_string()))
        } else {
            None
        }
    }

    /// Returns the trace id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// W3C span identifier (16 lowercase hex characters, non-zero).
///
/// # Invariants
/// - Constructed values always satisfy the format; invalid input is rejected
///   at the parsing boundary, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpanId(String);

impl SpanId {
    /// Generates a fresh span id from the operating system RNG.
    #[must_use]
    pub fn generate() -> Self {
        Self(generate_hex_id(SPAN_ID_BYTES))
    }

    /// Parses a candidate span id, returning `None` when invalid.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        if is_valid_hex_id(value, SPAN_ID_BYTES * 2) {
            Some(Self(value.to_string()))
        } else {
            None
        }
    }

    /// Returns the span id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ============================================================================
// SECTION: Trace Context
// ============================================================================

/// Immutable trace context for one unit of governed work.
///
/// # Invariants
/// - Both identifiers satisfy the W3C format once the context exists.
/// - The `traceparent` rendering is always version `00` with sampled flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceContext {
    /// Trace identifier shared by every artifact of the evaluation.
    pub trace_id: TraceId,
    /// Span identifier for this unit of work.
    pub span_id: SpanId,
}

impl TraceContext {
    /// Creates a context with freshly generated identifiers.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            trace_id: TraceId::generate(),
            span_id: SpanId::generate(),
        }
    }

    /// Creates a context for an existing trace id with a fresh span id.
    #[must_use]
    pub fn for_trace(trace_id: TraceId) -> Self {
        Self {
            trace_id,
            span_id: SpanId::generate(),
        }
    }

    /// Renders the W3C `traceparent` header value.
    #[must_use]
    pub fn traceparent(&self) -> String {
        format!(
            "{TRACEPARENT_VERSION}-{}-{}-{TRACEPARENT_FLAGS}",
            self.trace_id, self.span_id
        )
    }

    /// Parses a W3C `traceparent` header.
    ///
    /// Returns `None` for unknown versions, malformed fields, or all-zero
    /// identifiers, so the caller can regenerate instead of inheriting a
    /// broken context.
    #[must_use]
    pub fn parse_traceparent(header: &str) -> Option<Self> {
        let mut parts = header.trim().split('-');
        let version = parts.next()?;
        let trace_id = parts.next()?;
        let span_id = parts.next()?;
        let flags = parts.next()?;
        if parts.next().is_some() {
            return None;
        }
        if version != TRACEPARENT_VERSION {
            return None;
        }
        if flags.len() != 2 || !flags.bytes().all(is_lower_hex_byte) {
            return None;
        }
        Some(Self {
            trace_id: TraceId::parse(trace_id)?,
            span_id: SpanId::parse(span_id)?,
        })
    }
}

// ============================================================================
// SECTION: Ambient Context
// ============================================================================

tokio::task_local! {
    /// Task-local trace context for the current region of governed work.
    static CURRENT_CONTEXT: TraceContext;
}

/// Runs a future within an ambient trace-context scope.
///
/// Any code executed on this task during `fut` observes `ctx` through
/// [`current_trace_context`]. Subtasks spawned onto other tasks must be
/// wrapped in their own scope with the same context.
pub async fn with_trace_context<F>(ctx: TraceContext, fut: F) -> F::Output
where
    F: Future,
{
    CURRENT_CONTEXT.scope(ctx, fut).await
}

/// Returns the ambient trace context for the current task, when present.
#[must_use]
pub fn current_trace_context() -> Option<TraceContext> {
    CURRENT_CONTEXT.try_with(Clone::clone).ok()
}

// ============================================================================
// SECTION: Hex Helpers
// ============================================================================

/// Generates a non-zero lowercase-hex identifier of `bytes` random bytes.
fn generate_hex_id(bytes: usize) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut buf = vec![0_u8; bytes];
    loop {
        OsRng.fill_bytes(&mut buf);
        if buf.iter().any(|byte| *byte != 0) {
            break;
        }
    }
    let mut out = String::with_capacity(bytes * 2);
    for byte in &buf {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}

/// Returns true when `value` is exactly `len` lowercase hex chars, not all zero.
fn is_valid_hex_id(value: &str, len: usize) -> bool {
    value.len() == len
        && value.bytes().all(is_lower_hex_byte)
        && value.bytes().any(|byte| byte != b'0')
}

/// Returns true for ASCII lowercase hex digits.
const fn is_lower_hex_byte(byte: u8) -> bool {
    matches!(byte, b'0'..=b'9' | b'a'..=b'f')
}
