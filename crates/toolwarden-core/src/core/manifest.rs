// crates/toolwarden-core/src/core/manifest.rs
// ============================================================================
// Module: ToolWarden Manifest Import
// Description: MCP tool-manifest import and schema-to-parameter conversion.
// Purpose: Turn imported tool definitions into governed parameter shapes.
// Dependencies: serde, serde_json, tracing
// ============================================================================

//! ## Overview
//! Agent deployments describe their tools with MCP-style manifests: an array
//! of named definitions, each optionally carrying a JSON-schema input shape.
//! The importer is forgiving by contract: entries without a name are skipped
//! with a warning and never fail the import. The schema converter covers the
//! primitive constructs (typed properties, required lists, enum and const
//! narrowing) and degrades everything else to an untyped parameter.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

// ============================================================================
// SECTION: Manifest Model
// ============================================================================

/// One tool definition as imported from an MCP manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpToolDefinition {
    /// Tool name; empty names are skipped at import.
    #[serde(default)]
    pub name: String,
    /// Optional human-facing description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Optional JSON-schema input shape.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
}

/// Parameter kind derived from a JSON-schema `type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterKind {
    /// JSON string.
    String,
    /// JSON number.
    Number,
    /// JSON integer.
    Integer,
    /// JSON boolean.
    Boolean,
    /// JSON array.
    Array,
    /// JSON object.
    Object,
    /// Unrecognized or absent type.
    Any,
}

impl ParameterKind {
    /// Maps a JSON-schema `type` name onto a kind.
    #[must_use]
    pub fn from_schema_type(name: &str) -> Self {
        match name {
            "string" => Self::String,
            "number" => Self::Number,
            "integer" => Self::Integer,
            "boolean" => Self::Boolean,
            "array" => Self::Array,
            "object" => Self::Object,
            _ => Self::Any,
        }
    }
}

/// One converted parameter of an imported tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterSpec {
    /// Parameter name.
    pub name: String,
    /// Derived kind.
    pub kind: ParameterKind,
    /// True when the schema lists the parameter as required.
    pub required: bool,
    /// Narrowed value set from `enum` or `const`, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_values: Option<Vec<Value>>,
    /// Optional per-parameter description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// One successfully imported tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportedTool {
    /// Tool name.
    pub name: String,
    /// Optional human-facing description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Converted parameter shapes.
    pub parameters: Vec<ParameterSpec>,
}

/// Result of importing a manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestImport {
    /// Tools imported in manifest order.
    pub tools: Vec<ImportedTool>,
    /// Count of entries skipped for missing names.
    pub skipped: usize,
}

// ============================================================================
// SECTION: Import
// ============================================================================

/// Imports MCP tool definitions, skipping unnamed entries with a warning.
#[must_use]
pub fn import_manifest(definitions: &[McpToolDefinition]) -> ManifestImport {
    let mut tools = Vec::with_capacity(definitions.len());
    let mut skipped = 0_usize;
    for (index, definition) in definitions.iter().enumerate() {
        if definition.name.trim().is_empty() {
            warn!(index, "skipping manifest entry without a tool name");
            skipped += 1;
            continue;
        }
        tools.push(ImportedTool {
            name: definition.name.clone(),
            description: definition.description.clone(),
            parameters: definition
                .input_schema
                .as_ref()
                .map(convert_input_schema)
                .unwrap_or_default(),
        });
    }
    ManifestImport {
        tools,
        skipped,
    }
}

// ============================================================================
// SECTION: Schema Conversion
// ============================================================================

/// Converts a JSON-schema object shape into parameter specs.
///
/// Non-object schemas and unknown constructs convert to an empty list or
/// untyped parameters; conversion never fails.
#[must_use]
pub fn convert_input_schema(schema: &Value) -> Vec<ParameterSpec> {
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Vec::new();
    };
    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|entries| entries.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    properties
        .iter()
        .map(|(name, property)| ParameterSpec {
            name: name.clone(),
            kind: property
                .get("type")
                .and_then(Value::as_str)
                .map_or(ParameterKind::Any, ParameterKind::from_schema_type),
            required: required.contains(&name.as_str()),
            allowed_values: allowed_values(property),
            description: property
                .get("description")
                .and_then(Value::as_str)
                .map(ToString::to_string),
        })
        .collect()
}

/// Extracts `enum` or `const` narrowing from one property schema.
fn allowed_values(property: &Value) -> Option<Vec<Value>> {
    if let Some(values) = property.get("enum").and_then(Value::as_array) {
        return Some(values.clone());
    }
    property.get("const").map(|value| vec![value.clone()])
}
