// crates/toolwarden-core/src/core/injection.rs
// ============================================================================
// Module: ToolWarden Injection Detector
// Description: Pure pattern scan over tool-call parameters.
// Purpose: Surface prompt-injection shapes in parameters without blocking.
// Dependencies: regex, serde, serde_json
// ============================================================================

//! ## Overview
//! The detector is a pure function over a parameter map. It walks every
//! string value, including nested objects and arrays, against a fixed
//! pattern table and reports findings. It never blocks a call by itself;
//! the guarded dispatcher emits `injection.detected` for each finding and
//! proceeds with whatever the policy decided.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum length of the matched excerpt carried on a finding.
const MAX_EXCERPT_LENGTH: usize = 80;

// ============================================================================
// SECTION: Finding Model
// ============================================================================

/// Classification of a detected injection shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectionKind {
    /// Attempts to override or discard prior instructions.
    InstructionOverride,
    /// Attempts to rewrite the assistant's role or persona.
    RoleHijack,
    /// Shell or network exfiltration shapes.
    Exfiltration,
    /// Long encoded payloads smuggled through parameters.
    EncodedPayload,
}

impl InjectionKind {
    /// Returns the stable wire name for the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InstructionOverride => "instruction_override",
            Self::RoleHijack => "role_hijack",
            Self::Exfiltration => "exfiltration",
            Self::EncodedPayload => "encoded_payload",
        }
    }
}

impl fmt::Display for InjectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One detected injection shape inside a parameter value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InjectionFinding {
    /// Dotted path of the parameter that matched.
    pub parameter: String,
    /// Classification of the match.
    pub kind: InjectionKind,
    /// Truncated excerpt of the matched text.
    pub excerpt: String,
}

// ============================================================================
// SECTION: Pattern Table
// ============================================================================

/// Fixed, case-insensitive pattern table for the detector.
static PATTERNS: LazyLock<Vec<(InjectionKind, Regex)>> = LazyLock::new(|| {
    let table = [
        (
            InjectionKind::InstructionOverride,
            r"(?i)\b(?:ignore|disregard|forget)\b[^.\n]{0,40}\b(?:previous|prior|above|all)\b[^.\n]{0,40}\binstructions?\b",
        ),
        (
            InjectionKind::InstructionOverride,
            r"(?i)\bsystem\s+prompt\b",
        ),
        (
            InjectionKind::RoleHijack,
            r"(?i)\byou\s+are\s+(?:now|no\s+longer)\b",
        ),
        (
            InjectionKind::RoleHijack,
            r"(?i)\bact\s+as\s+(?:an?\s+)?(?:unrestricted|jailbroken|developer\s+mode)\b",
        ),
        (
            InjectionKind::Exfiltration,
            r"(?i)\bcurl\b[^\n]{0,120}\|\s*(?:sh|bash)\b",
        ),
        (
            InjectionKind::Exfiltration,
            r"(?i)\b(?:send|post|upload|exfiltrate)\b[^\n]{0,60}\bhttps?://",
        ),
        (
            InjectionKind::EncodedPayload,
            r"[A-Za-z0-9+/]{120,}={0,2}",
        ),
    ];
    table
        .into_iter()
        .filter_map(|(kind, pattern)| Regex::new(pattern).ok().map(|regex| (kind, regex)))
        .collect()
});

// ============================================================================
// SECTION: Scanning
// ============================================================================

/// Scans a parameter map for injection shapes.
///
/// The scan is pure and side-effect free; callers decide whether findings
/// block, warn, or merely annotate.
#[must_use]
pub fn scan_parameters(parameters: &Map<String, Value>) -> Vec<InjectionFinding> {
    let mut findings = Vec::new();
    for (name, value) in parameters {
        scan_value(name, value, &mut findings);
    }
    findings
}

/// Recursively scans one value, extending the dotted path per level.
fn scan_value(path: &str, value: &Value, findings: &mut Vec<InjectionFinding>) {
    match value {
        Value::String(text) => scan_text(path, text, findings),
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                scan_value(&format!("{path}[{index}]"), item, findings);
            }
        }
        Value::Object(map) => {
            for (key, item) in map {
                scan_value(&format!("{path}.{key}"), item, findings);
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

/// Matches one string value against the pattern table.
fn scan_text(path: &str, text: &str, findings: &mut Vec<InjectionFinding>) {
    for (kind, regex) in PATTERNS.iter() {
        if let Some(matched) = regex.find(text) {
            findings.push(InjectionFinding {
                parameter: path.to_string(),
                kind: *kind,
                excerpt: truncate_excerpt(matched.as_str()),
            });
        }
    }
}

/// Truncates a matched excerpt on a character boundary.
fn truncate_excerpt(text: &str) -> String {
    if text.len() <= MAX_EXCERPT_LENGTH {
        return text.to_string();
    }
    let mut end = MAX_EXCERPT_LENGTH;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}
