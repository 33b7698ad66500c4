// crates/toolwarden-core/src/core/time.rs
// ============================================================================
// Module: ToolWarden Time Model
// Description: Canonical ISO-8601 timestamps for audit records and approvals.
// Purpose: Provide a single wall-clock representation with stable wire form.
// Dependencies: serde, time
// ============================================================================

//! ## Overview
//! ToolWarden stamps every audit record, approval deadline, and event
//! envelope with an RFC 3339 timestamp. The wire form is always an ISO-8601
//! string in UTC so records remain comparable across stores and exports.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use time::Duration;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

// ============================================================================
// SECTION: Timestamp
// ============================================================================

/// Canonical UTC timestamp used across ToolWarden records.
///
/// # Invariants
/// - Serializes as an RFC 3339 string; parsing rejects non-conforming input.
/// - Ordering follows the underlying instant, not the string form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(#[serde(with = "time::serde::rfc3339")] OffsetDateTime);

impl Timestamp {
    /// Returns the current wall-clock time in UTC.
    #[must_use]
    pub fn now() -> Self {
        Self(OffsetDateTime::now_utc())
    }

    /// Creates a timestamp from unix milliseconds.
    #[must_use]
    pub fn from_unix_millis(millis: i64) -> Option<Self> {
        OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
            .ok()
            .map(Self)
    }

    /// Returns the timestamp as unix milliseconds.
    #[must_use]
    pub fn as_unix_millis(&self) -> i64 {
        i64::try_from(self.0.unix_timestamp_nanos() / 1_000_000).unwrap_or(i64::MAX)
    }

    /// Returns a timestamp shifted forward by the provided number of seconds.
    #[must_use]
    pub fn plus_seconds(&self, seconds: u64) -> Self {
        let shift = i64::try_from(seconds).unwrap_or(i64::MAX);
        Self(self.0.saturating_add(Duration::seconds(shift)))
    }

    /// Returns a timestamp shifted backward by the provided number of seconds.
    #[must_use]
    pub fn minus_seconds(&self, seconds: u64) -> Self {
        let shift = i64::try_from(seconds).unwrap_or(i64::MAX);
        Self(self.0.saturating_sub(Duration::seconds(shift)))
    }

    /// Returns whole milliseconds elapsed since an earlier timestamp.
    ///
    /// Saturates to zero when `earlier` is in the future.
    #[must_use]
    pub fn millis_since(&self, earlier: &Self) -> u64 {
        let delta = self.0 - earlier.0;
        u64::try_from(delta.whole_milliseconds()).unwrap_or(0)
    }

    /// Parses an RFC 3339 string into a timestamp.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        OffsetDateTime::parse(value, &Rfc3339).ok().map(Self)
    }

    /// Renders the timestamp as an RFC 3339 string.
    ///
    /// Falls back to the unix-millis rendering in the unreachable case where
    /// formatting fails.
    #[must_use]
    pub fn to_rfc3339(&self) -> String {
        self.0
            .format(&Rfc3339)
            .unwrap_or_else(|_| self.as_unix_millis().to_string())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_rfc3339())
    }
}
