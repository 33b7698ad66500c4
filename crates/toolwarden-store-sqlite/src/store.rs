// crates/toolwarden-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Governance Store
// Description: Durable GovernanceStore over SQLite WAL with audit triggers.
// Purpose: Persist audit, policy, agent, and approval state append-safely.
// Dependencies: async-trait, rusqlite, serde, serde_json, thiserror, toolwarden-core
// ============================================================================

//! ## Overview
//! This module implements the persistence contract over an embedded `SQLite`
//! database. The audit table carries `BEFORE UPDATE` and `BEFORE DELETE`
//! triggers that abort with a message naming the append-only constraint, so
//! tampering is rejected below the application layer. Appends link the hash
//! chain inside one transaction: latest hash, recompute, insert. Timestamps
//! are stored both as their exact RFC 3339 strings (hash-stable) and as unix
//! milliseconds for range comparisons.
//!
//! Tenant scoping stamps and filters audit rows and approval listings; the
//! hash chain itself stays global in id order. Policies and agents share a
//! global namespace; row-level tenant isolation belongs to server-RDBMS
//! implementations of the contract.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use async_trait::async_trait;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::Row;
use rusqlite::params;
use rusqlite::params_from_iter;
use rusqlite::types::Value as SqlValue;
use serde::Deserialize;
use serde_json::Map;
use serde_json::Value;
use thiserror::Error;
use toolwarden_core::AgentConfig;
use toolwarden_core::AgentStatus;
use toolwarden_core::ApprovalDecision;
use toolwarden_core::ApprovalDraft;
use toolwarden_core::ApprovalFilter;
use toolwarden_core::ApprovalRequest;
use toolwarden_core::ApprovalResolution;
use toolwarden_core::ApprovalStatus;
use toolwarden_core::ApprovalStore;
use toolwarden_core::AuditDraft;
use toolwarden_core::AuditPage;
use toolwarden_core::AuditQuery;
use toolwarden_core::AuditRecord;
use toolwarden_core::AuditResult;
use toolwarden_core::ChainVerification;
use toolwarden_core::FailureCategory;
use toolwarden_core::GovernanceStore;
use toolwarden_core::Policy;
use toolwarden_core::PolicyRule;
use toolwarden_core::PolicyVersion;
use toolwarden_core::StoreError;
use toolwarden_core::TenantId;
use toolwarden_core::Timestamp;
use toolwarden_core::TraceId;
use toolwarden_core::compute_record_hash;
use toolwarden_core::verify_records;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Current `SQLite` schema version.
pub const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Default page size for audit queries without an explicit limit.
const DEFAULT_QUERY_LIMIT: u64 = 100;
/// Message fragment raised by the append-only triggers.
const APPEND_ONLY_MESSAGE: &str = "audit log is append-only";

/// Schema statements applied by the migration runner, in version order.
const MIGRATIONS: &[(i64, &str)] = &[(
    1,
    "CREATE TABLE IF NOT EXISTS audit_log (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        tenant_id TEXT,
        trace_id TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        timestamp_ms INTEGER NOT NULL,
        agent_id TEXT NOT NULL,
        tool TEXT NOT NULL,
        parameters TEXT,
        result TEXT NOT NULL,
        reason TEXT,
        duration_ms INTEGER NOT NULL,
        failure_category TEXT,
        previous_hash TEXT,
        hash TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_audit_agent ON audit_log (agent_id);
    CREATE INDEX IF NOT EXISTS idx_audit_trace ON audit_log (trace_id);
    CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log (timestamp_ms);
    CREATE TRIGGER IF NOT EXISTS audit_log_no_update
        BEFORE UPDATE ON audit_log
        BEGIN
            SELECT RAISE(ABORT, 'audit log is append-only: update rejected');
        END;
    CREATE TRIGGER IF NOT EXISTS audit_log_no_delete
        BEFORE DELETE ON audit_log
        BEGIN
            SELECT RAISE(ABORT, 'audit log is append-only: delete rejected');
        END;
    CREATE TABLE IF NOT EXISTS policies (
        name TEXT PRIMARY KEY,
        version INTEGER NOT NULL,
        agent_id TEXT,
        rules TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        updated_at_ms INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS policy_versions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        policy_name TEXT NOT NULL,
        version INTEGER NOT NULL,
        agent_id TEXT,
        rules TEXT NOT NULL,
        author TEXT NOT NULL,
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_policy_versions_name ON policy_versions (policy_name);
    CREATE TABLE IF NOT EXISTS agents (
        agent_id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        description TEXT,
        allowed_tools TEXT NOT NULL,
        policy_name TEXT,
        metadata TEXT,
        status TEXT NOT NULL,
        registered_at TEXT NOT NULL,
        last_active_at TEXT
    );
    CREATE TABLE IF NOT EXISTS approvals (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        tenant_id TEXT,
        agent_id TEXT NOT NULL,
        tool TEXT NOT NULL,
        parameters TEXT,
        trace_id TEXT NOT NULL,
        policy_name TEXT NOT NULL,
        rule_name TEXT,
        status TEXT NOT NULL,
        deadline TEXT NOT NULL,
        deadline_ms INTEGER NOT NULL,
        approver TEXT,
        comment TEXT,
        created_at TEXT NOT NULL,
        resolved_at TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_approvals_status ON approvals (status);",
)];

// ============================================================================
// SECTION: Config
// ============================================================================

/// Configuration for the `SQLite` governance store.
///
/// # Invariants
/// - `path` must resolve to a file path (not a directory).
/// - `busy_timeout_ms` is interpreted as milliseconds.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl SqliteStoreConfig {
    /// Creates a configuration with defaults for the provided path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while opening or migrating the store.
#[derive(Debug, Error)]
pub enum SqliteStoreError {
    /// Database could not be opened.
    #[error("sqlite open failure: {0}")]
    Open(String),
    /// A migration failed to apply.
    #[error("sqlite migration failure: {0}")]
    Migration(String),
}

/// Maps a rusqlite error onto the contract error set.
fn map_sql_err(err: &rusqlite::Error) -> StoreError {
    let message = err.to_string();
    if message.contains(APPEND_ONLY_MESSAGE) {
        StoreError::AppendOnly(message)
    } else {
        StoreError::Io(message)
    }
}

/// Builds a serialization error for a malformed stored value.
fn corrupt(field: &str) -> StoreError {
    StoreError::Serialization(format!("stored value for '{field}' is malformed"))
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// Shared connection state behind every handle.
struct SqliteInner {
    /// Single writer connection; `SQLite` serializes writes anyway.
    conn: Mutex<Connection>,
}

impl SqliteInner {
    /// Locks the connection, recovering from poisoning.
    fn locked(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// `SQLite`-backed governance store.
pub struct SqliteStore {
    /// Shared connection state.
    inner: Arc<SqliteInner>,
    /// Tenant scope of this handle, when derived via `for_tenant`.
    tenant: Option<TenantId>,
}

impl SqliteStore {
    /// Opens (or creates) the database at the configured path and applies
    /// pending migrations.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the database cannot be opened or a
    /// migration fails.
    pub fn open(config: &SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        let conn = Connection::open(&config.path)
            .map_err(|err| SqliteStoreError::Open(err.to_string()))?;
        Self::initialize(conn, config.busy_timeout_ms)
    }

    /// Opens a private in-memory database, mainly for tests and tooling.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when initialization fails.
    pub fn open_in_memory() -> Result<Self, SqliteStoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|err| SqliteStoreError::Open(err.to_string()))?;
        Self::initialize(conn, DEFAULT_BUSY_TIMEOUT_MS)
    }

    /// Applies pragmas and migrations to a fresh connection.
    fn initialize(conn: Connection, busy_timeout_ms: u64) -> Result<Self, SqliteStoreError> {
        conn.execute_batch("PRAGMA journal_mode = wal;")
            .map_err(|err| SqliteStoreError::Open(err.to_string()))?;
        conn.execute_batch("PRAGMA synchronous = full;")
            .map_err(|err| SqliteStoreError::Open(err.to_string()))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|err| SqliteStoreError::Open(err.to_string()))?;
        conn.execute_batch(&format!("PRAGMA busy_timeout = {busy_timeout_ms};"))
            .map_err(|err| SqliteStoreError::Open(err.to_string()))?;
        let mut conn = conn;
        apply_migrations(&mut conn)?;
        Ok(Self {
            inner: Arc::new(SqliteInner {
                conn: Mutex::new(conn),
            }),
            tenant: None,
        })
    }

    /// Returns the tenant scope of this handle, when any.
    #[must_use]
    pub const fn tenant(&self) -> Option<&TenantId> {
        self.tenant.as_ref()
    }
}

/// Applies every pending migration inside one transaction per version.
fn apply_migrations(conn: &mut Connection) -> Result<(), SqliteStoreError> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")
        .map_err(|err| SqliteStoreError::Migration(err.to_string()))?;
    let current: Option<i64> = conn
        .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
        .optional()
        .map_err(|err| SqliteStoreError::Migration(err.to_string()))?;
    let mut version = current.unwrap_or(0);
    for (target, sql) in MIGRATIONS {
        if *target <= version {
            continue;
        }
        let tx = conn
            .transaction()
            .map_err(|err| SqliteStoreError::Migration(err.to_string()))?;
        tx.execute_batch(sql).map_err(|err| SqliteStoreError::Migration(err.to_string()))?;
        if version == 0 {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![target])
                .map_err(|err| SqliteStoreError::Migration(err.to_string()))?;
        } else {
            tx.execute("UPDATE store_meta SET version = ?1", params![target])
                .map_err(|err| SqliteStoreError::Migration(err.to_string()))?;
        }
        tx.commit().map_err(|err| SqliteStoreError::Migration(err.to_string()))?;
        version = *target;
    }
    Ok(())
}

// ============================================================================
// SECTION: Row Mapping
// ============================================================================

/// Raw audit row before typed conversion.
struct RawAuditRow {
    /// Row id.
    id: i64,
    /// Trace id string.
    trace_id: String,
    /// RFC 3339 timestamp string.
    timestamp: String,
    /// Agent id.
    agent_id: String,
    /// Tool name.
    tool: String,
    /// JSON parameter text.
    parameters: Option<String>,
    /// Result wire name.
    result: String,
    /// Reason text.
    reason: Option<String>,
    /// Duration in milliseconds.
    duration_ms: i64,
    /// Failure-category wire name.
    failure_category: Option<String>,
    /// Predecessor hash.
    previous_hash: Option<String>,
    /// Record hash.
    hash: String,
}

/// Reads the raw audit columns from a query row.
fn raw_audit_row(row: &Row<'_>) -> rusqlite::Result<RawAuditRow> {
    Ok(RawAuditRow {
        id: row.get("id")?,
        trace_id: row.get("trace_id")?,
        timestamp: row.get("timestamp")?,
        agent_id: row.get("agent_id")?,
        tool: row.get("tool")?,
        parameters: row.get("parameters")?,
        result: row.get("result")?,
        reason: row.get("reason")?,
        duration_ms: row.get("duration_ms")?,
        failure_category: row.get("failure_category")?,
        previous_hash: row.get("previous_hash")?,
        hash: row.get("hash")?,
    })
}

impl TryFrom<RawAuditRow> for AuditRecord {
    type Error = StoreError;

    fn try_from(raw: RawAuditRow) -> Result<Self, StoreError> {
        Ok(Self {
            id: raw.id,
            trace_id: TraceId::parse(&raw.trace_id).ok_or_else(|| corrupt("trace_id"))?,
            timestamp: Timestamp::parse(&raw.timestamp).ok_or_else(|| corrupt("timestamp"))?,
            agent_id: raw.agent_id,
            tool: raw.tool,
            parameters: raw.parameters.as_deref().map(parse_parameters).transpose()?,
            result: AuditResult::parse(&raw.result).ok_or_else(|| corrupt("result"))?,
            reason: raw.reason,
            duration_ms: u64::try_from(raw.duration_ms).map_err(|_| corrupt("duration_ms"))?,
            failure_category: raw
                .failure_category
                .as_deref()
                .map(|name| FailureCategory::parse(name).ok_or_else(|| corrupt("failure_category")))
                .transpose()?,
            previous_hash: raw.previous_hash,
            hash: raw.hash,
        })
    }
}

/// Parses a stored JSON parameter map.
fn parse_parameters(text: &str) -> Result<Map<String, Value>, StoreError> {
    serde_json::from_str(text).map_err(|_| corrupt("parameters"))
}

/// Parses a stored JSON rule list.
fn parse_rules(text: &str) -> Result<Vec<PolicyRule>, StoreError> {
    serde_json::from_str(text).map_err(|_| corrupt("rules"))
}

/// Reads a policy from a query row.
fn policy_from_row(row: &Row<'_>) -> rusqlite::Result<(String, i64, Option<String>, String, String, String)> {
    Ok((
        row.get("name")?,
        row.get("version")?,
        row.get("agent_id")?,
        row.get("rules")?,
        row.get("created_at")?,
        row.get("updated_at")?,
    ))
}

/// Converts raw policy columns into a policy.
fn policy_from_raw(
    raw: (String, i64, Option<String>, String, String, String),
) -> Result<Policy, StoreError> {
    let (name, version, agent_id, rules, created_at, updated_at) = raw;
    Ok(Policy {
        name,
        version,
        agent_id,
        rules: parse_rules(&rules)?,
        created_at: Timestamp::parse(&created_at).ok_or_else(|| corrupt("created_at"))?,
        updated_at: Timestamp::parse(&updated_at).ok_or_else(|| corrupt("updated_at"))?,
    })
}

/// Raw agent row before typed conversion.
struct RawAgentRow {
    /// Agent id.
    agent_id: String,
    /// Display name.
    name: String,
    /// Description text.
    description: Option<String>,
    /// JSON array of allowed tools.
    allowed_tools: String,
    /// Bound policy name.
    policy_name: Option<String>,
    /// JSON metadata map.
    metadata: Option<String>,
    /// Status wire name.
    status: String,
    /// Registration timestamp.
    registered_at: String,
    /// Last status-write timestamp.
    last_active_at: Option<String>,
}

/// Reads the raw agent columns from a query row.
fn raw_agent_row(row: &Row<'_>) -> rusqlite::Result<RawAgentRow> {
    Ok(RawAgentRow {
        agent_id: row.get("agent_id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        allowed_tools: row.get("allowed_tools")?,
        policy_name: row.get("policy_name")?,
        metadata: row.get("metadata")?,
        status: row.get("status")?,
        registered_at: row.get("registered_at")?,
        last_active_at: row.get("last_active_at")?,
    })
}

impl TryFrom<RawAgentRow> for AgentConfig {
    type Error = StoreError;

    fn try_from(raw: RawAgentRow) -> Result<Self, StoreError> {
        Ok(Self {
            agent_id: raw.agent_id,
            name: raw.name,
            description: raw.description,
            allowed_tools: serde_json::from_str(&raw.allowed_tools)
                .map_err(|_| corrupt("allowed_tools"))?,
            policy_name: raw.policy_name,
            metadata: raw.metadata.as_deref().map(parse_parameters).transpose()?,
            status: AgentStatus::parse(&raw.status).ok_or_else(|| corrupt("status"))?,
            registered_at: Timestamp::parse(&raw.registered_at)
                .ok_or_else(|| corrupt("registered_at"))?,
            last_active_at: raw
                .last_active_at
                .as_deref()
                .map(|value| Timestamp::parse(value).ok_or_else(|| corrupt("last_active_at")))
                .transpose()?,
        })
    }
}

/// Raw approval row before typed conversion.
struct RawApprovalRow {
    /// Row id.
    id: i64,
    /// Tenant scope.
    tenant_id: Option<String>,
    /// Agent id.
    agent_id: String,
    /// Tool name.
    tool: String,
    /// JSON parameter text.
    parameters: Option<String>,
    /// Trace id string.
    trace_id: String,
    /// Policy name.
    policy_name: String,
    /// Rule name.
    rule_name: Option<String>,
    /// Status wire name.
    status: String,
    /// Deadline timestamp.
    deadline: String,
    /// Approver identity.
    approver: Option<String>,
    /// Approver comment.
    comment: Option<String>,
    /// Creation timestamp.
    created_at: String,
    /// Resolution timestamp.
    resolved_at: Option<String>,
}

/// Reads the raw approval columns from a query row.
fn raw_approval_row(row: &Row<'_>) -> rusqlite::Result<RawApprovalRow> {
    Ok(RawApprovalRow {
        id: row.get("id")?,
        tenant_id: row.get("tenant_id")?,
        agent_id: row.get("agent_id")?,
        tool: row.get("tool")?,
        parameters: row.get("parameters")?,
        trace_id: row.get("trace_id")?,
        policy_name: row.get("policy_name")?,
        rule_name: row.get("rule_name")?,
        status: row.get("status")?,
        deadline: row.get("deadline")?,
        approver: row.get("approver")?,
        comment: row.get("comment")?,
        created_at: row.get("created_at")?,
        resolved_at: row.get("resolved_at")?,
    })
}

impl TryFrom<RawApprovalRow> for ApprovalRequest {
    type Error = StoreError;

    fn try_from(raw: RawApprovalRow) -> Result<Self, StoreError> {
        Ok(Self {
            id: raw.id,
            tenant_id: raw.tenant_id.map(TenantId::new),
            agent_id: raw.agent_id,
            tool: raw.tool,
            parameters: raw.parameters.as_deref().map(parse_parameters).transpose()?,
            trace_id: TraceId::parse(&raw.trace_id).ok_or_else(|| corrupt("trace_id"))?,
            policy_name: raw.policy_name,
            rule_name: raw.rule_name,
            status: ApprovalStatus::parse(&raw.status).ok_or_else(|| corrupt("status"))?,
            deadline: Timestamp::parse(&raw.deadline).ok_or_else(|| corrupt("deadline"))?,
            approver: raw.approver,
            comment: raw.comment,
            created_at: Timestamp::parse(&raw.created_at).ok_or_else(|| corrupt("created_at"))?,
            resolved_at: raw
                .resolved_at
                .as_deref()
                .map(|value| Timestamp::parse(value).ok_or_else(|| corrupt("resolved_at")))
                .transpose()?,
        })
    }
}

// ============================================================================
// SECTION: Query Builders
// ============================================================================

/// Escapes LIKE metacharacters so search input is always literal.
fn escape_like(input: &str) -> String {
    input.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

/// Serializes an optional JSON map column.
fn json_column(map: Option<&Map<String, Value>>) -> Result<Option<String>, StoreError> {
    map.map(|map| serde_json::to_string(map).map_err(|err| StoreError::Serialization(err.to_string())))
        .transpose()
}

/// Builds the WHERE clause and parameters for an audit query.
fn audit_filter(
    query: &AuditQuery,
    tenant: Option<&TenantId>,
) -> (String, Vec<SqlValue>) {
    let mut clauses: Vec<String> = Vec::new();
    let mut values: Vec<SqlValue> = Vec::new();
    if let Some(tenant) = tenant {
        clauses.push("tenant_id = ?".to_string());
        values.push(SqlValue::Text(tenant.as_str().to_string()));
    }
    if let Some(agent_id) = &query.agent_id {
        clauses.push("agent_id = ?".to_string());
        values.push(SqlValue::Text(agent_id.clone()));
    }
    if let Some(tool) = &query.tool {
        clauses.push("tool = ?".to_string());
        values.push(SqlValue::Text(tool.clone()));
    }
    if let Some(result) = query.result {
        clauses.push("result = ?".to_string());
        values.push(SqlValue::Text(result.as_str().to_string()));
    }
    if let Some(trace_id) = &query.trace_id {
        clauses.push("trace_id = ?".to_string());
        values.push(SqlValue::Text(trace_id.as_str().to_string()));
    }
    if let Some(from) = query.from {
        clauses.push("timestamp_ms >= ?".to_string());
        values.push(SqlValue::Integer(from.as_unix_millis()));
    }
    if let Some(to) = query.to {
        clauses.push("timestamp_ms <= ?".to_string());
        values.push(SqlValue::Integer(to.as_unix_millis()));
    }
    if let Some(category) = query.failure_category {
        clauses.push("failure_category = ?".to_string());
        values.push(SqlValue::Text(category.as_str().to_string()));
    }
    if let Some(search) = &query.search {
        let pattern = format!("%{}%", escape_like(search));
        clauses.push(
            "(reason LIKE ? ESCAPE '\\' OR parameters LIKE ? ESCAPE '\\')".to_string(),
        );
        values.push(SqlValue::Text(pattern.clone()));
        values.push(SqlValue::Text(pattern));
    }
    let clause = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };
    (clause, values)
}

// ============================================================================
// SECTION: Governance Store Implementation
// ============================================================================

#[async_trait]
impl GovernanceStore for SqliteStore {
    async fn append_audit(&self, draft: AuditDraft) -> Result<AuditRecord, StoreError> {
        let parameters = json_column(draft.parameters.as_ref())?;
        let mut conn = self.inner.locked();
        let tx = conn.transaction().map_err(|err| map_sql_err(&err))?;
        let previous_hash: Option<String> = tx
            .query_row("SELECT hash FROM audit_log ORDER BY id DESC LIMIT 1", params![], |row| {
                row.get(0)
            })
            .optional()
            .map_err(|err| map_sql_err(&err))?;
        let hash = compute_record_hash(&draft, previous_hash.as_deref());
        tx.execute(
            "INSERT INTO audit_log (tenant_id, trace_id, timestamp, timestamp_ms, agent_id, \
             tool, parameters, result, reason, duration_ms, failure_category, previous_hash, \
             hash) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                self.tenant.as_ref().map(|tenant| tenant.as_str().to_string()),
                draft.trace_id.as_str(),
                draft.timestamp.to_rfc3339(),
                draft.timestamp.as_unix_millis(),
                draft.agent_id,
                draft.tool,
                parameters,
                draft.result.as_str(),
                draft.reason,
                i64::try_from(draft.duration_ms).unwrap_or(i64::MAX),
                draft.failure_category.map(FailureCategory::as_str),
                previous_hash,
                hash,
            ],
        )
        .map_err(|err| map_sql_err(&err))?;
        let id = tx.last_insert_rowid();
        tx.commit().map_err(|err| map_sql_err(&err))?;
        Ok(AuditRecord {
            id,
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
        })
    }

    async fn query_audit(&self, query: &AuditQuery) -> Result<AuditPage, StoreError> {
        let (clause, values) = audit_filter(query, self.tenant.as_ref());
        let conn = self.inner.locked();

        let count_sql = format!("SELECT COUNT(*) FROM audit_log{clause}");
        let total: i64 = conn
            .query_row(&count_sql, params_from_iter(values.iter().cloned()), |row| row.get(0))
            .map_err(|err| map_sql_err(&err))?;

        let limit = i64::try_from(query.limit.unwrap_or(DEFAULT_QUERY_LIMIT)).unwrap_or(i64::MAX);
        let offset = i64::try_from(query.offset.unwrap_or(0)).unwrap_or(i64::MAX);
        let page_sql = format!(
            "SELECT * FROM audit_log{clause} ORDER BY id ASC LIMIT {limit} OFFSET {offset}"
        );
        let mut stmt = conn.prepare(&page_sql).map_err(|err| map_sql_err(&err))?;
        let rows = stmt
            .query_map(params_from_iter(values.iter().cloned()), raw_audit_row)
            .map_err(|err| map_sql_err(&err))?;
        let mut records = Vec::new();
        for row in rows {
            records.push(AuditRecord::try_from(row.map_err(|err| map_sql_err(&err))?)?);
        }
        Ok(AuditPage {
            records,
            total: u64::try_from(total).unwrap_or(0),
        })
    }

    async fn latest_audit_hash(&self) -> Result<Option<String>, StoreError> {
        let conn = self.inner.locked();
        conn.query_row("SELECT hash FROM audit_log ORDER BY id DESC LIMIT 1", params![], |row| {
            row.get(0)
        })
        .optional()
        .map_err(|err| map_sql_err(&err))
    }

    async fn verify_audit_chain(&self) -> Result<ChainVerification, StoreError> {
        let conn = self.inner.locked();
        let mut stmt = conn
            .prepare("SELECT * FROM audit_log ORDER BY id ASC")
            .map_err(|err| map_sql_err(&err))?;
        let rows = stmt.query_map(params![], raw_audit_row).map_err(|err| map_sql_err(&err))?;
        let mut records = Vec::new();
        for row in rows {
            records.push(AuditRecord::try_from(row.map_err(|err| map_sql_err(&err))?)?);
        }
        Ok(verify_records(&records))
    }

    async fn export_audit(
        &self,
        query: &AuditQuery,
        out: &mut (dyn Write + Send),
    ) -> Result<u64, StoreError> {
        let page = self.query_audit(query).await?;
        let mut written: u64 = 0;
        for record in &page.records {
            let line = serde_json::to_string(record)
                .map_err(|err| StoreError::Serialization(err.to_string()))?;
            writeln!(out, "{line}").map_err(|err| StoreError::Io(err.to_string()))?;
            written += 1;
        }
        Ok(written)
    }

    async fn upsert_policy(&self, policy: Policy, author: &str) -> Result<Policy, StoreError> {
        let rules_json = serde_json::to_string(&policy.rules)
            .map_err(|err| StoreError::Serialization(err.to_string()))?;
        let now = Timestamp::now();
        let mut conn = self.inner.locked();
        let tx = conn.transaction().map_err(|err| map_sql_err(&err))?;

        let existing = tx
            .query_row(
                "SELECT name, version, agent_id, rules, created_at, updated_at FROM policies \
                 WHERE name = ?1",
                params![policy.name],
                policy_from_row,
            )
            .optional()
            .map_err(|err| map_sql_err(&err))?
            .map(policy_from_raw)
            .transpose()?;

        let stored = if let Some(previous) = existing {
            tx.execute(
                "INSERT INTO policy_versions (policy_name, version, agent_id, rules, author, \
                 created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    previous.name,
                    previous.version,
                    previous.agent_id,
                    serde_json::to_string(&previous.rules)
                        .map_err(|err| StoreError::Serialization(err.to_string()))?,
                    author,
                    now.to_rfc3339(),
                ],
            )
            .map_err(|err| map_sql_err(&err))?;
            Policy {
                version: previous.version + 1,
                created_at: previous.created_at,
                updated_at: now,
                ..policy
            }
        } else {
            Policy {
                version: 1,
                created_at: now,
                updated_at: now,
                ..policy
            }
        };

        tx.execute(
            "INSERT INTO policies (name, version, agent_id, rules, created_at, updated_at, \
             updated_at_ms) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) ON CONFLICT(name) DO UPDATE SET \
             version = excluded.version, agent_id = excluded.agent_id, rules = excluded.rules, \
             updated_at = excluded.updated_at, updated_at_ms = excluded.updated_at_ms",
            params![
                stored.name,
                stored.version,
                stored.agent_id,
                rules_json,
                stored.created_at.to_rfc3339(),
                stored.updated_at.to_rfc3339(),
                stored.updated_at.as_unix_millis(),
            ],
        )
        .map_err(|err| map_sql_err(&err))?;
        tx.commit().map_err(|err| map_sql_err(&err))?;
        Ok(stored)
    }

    async fn list_policies(&self) -> Result<Vec<Policy>, StoreError> {
        let conn = self.inner.locked();
        let mut stmt = conn
            .prepare(
                "SELECT name, version, agent_id, rules, created_at, updated_at FROM policies \
                 ORDER BY name ASC",
            )
            .map_err(|err| map_sql_err(&err))?;
        let rows = stmt.query_map(params![], policy_from_row).map_err(|err| map_sql_err(&err))?;
        let mut policies = Vec::new();
        for row in rows {
            policies.push(policy_from_raw(row.map_err(|err| map_sql_err(&err))?)?);
        }
        Ok(policies)
    }

    async fn get_policy(&self, name: &str) -> Result<Option<Policy>, StoreError> {
        let conn = self.inner.locked();
        conn.query_row(
            "SELECT name, version, agent_id, rules, created_at, updated_at FROM policies \
             WHERE name = ?1",
            params![name],
            policy_from_row,
        )
        .optional()
        .map_err(|err| map_sql_err(&err))?
        .map(policy_from_raw)
        .transpose()
    }

    async fn delete_policy(&self, name: &str) -> Result<bool, StoreError> {
        let conn = self.inner.locked();
        let changed = conn
            .execute("DELETE FROM policies WHERE name = ?1", params![name])
            .map_err(|err| map_sql_err(&err))?;
        Ok(changed > 0)
    }

    async fn resolve_active_policy(&self, agent_id: &str) -> Result<Option<Policy>, StoreError> {
        let conn = self.inner.locked();
        let scoped = conn
            .query_row(
                "SELECT name, version, agent_id, rules, created_at, updated_at FROM policies \
                 WHERE agent_id = ?1 ORDER BY updated_at_ms DESC LIMIT 1",
                params![agent_id],
                policy_from_row,
            )
            .optional()
            .map_err(|err| map_sql_err(&err))?
            .map(policy_from_raw)
            .transpose()?;
        if scoped.is_some() {
            return Ok(scoped);
        }
        conn.query_row(
            "SELECT name, version, agent_id, rules, created_at, updated_at FROM policies \
             WHERE agent_id IS NULL ORDER BY updated_at_ms DESC LIMIT 1",
            params![],
            policy_from_row,
        )
        .optional()
        .map_err(|err| map_sql_err(&err))?
        .map(policy_from_raw)
        .transpose()
    }

    async fn policy_history(&self, name: &str) -> Result<Vec<PolicyVersion>, StoreError> {
        let conn = self.inner.locked();
        let mut stmt = conn
            .prepare(
                "SELECT id, policy_name, version, agent_id, rules, author, created_at FROM \
                 policy_versions WHERE policy_name = ?1 ORDER BY version DESC",
            )
            .map_err(|err| map_sql_err(&err))?;
        let rows = stmt
            .query_map(params![name], version_from_row)
            .map_err(|err| map_sql_err(&err))?;
        let mut versions = Vec::new();
        for row in rows {
            versions.push(version_from_raw(row.map_err(|err| map_sql_err(&err))?)?);
        }
        Ok(versions)
    }

    async fn policy_version(&self, id: i64) -> Result<Option<PolicyVersion>, StoreError> {
        let conn = self.inner.locked();
        conn.query_row(
            "SELECT id, policy_name, version, agent_id, rules, author, created_at FROM \
             policy_versions WHERE id = ?1",
            params![id],
            version_from_row,
        )
        .optional()
        .map_err(|err| map_sql_err(&err))?
        .map(version_from_raw)
        .transpose()
    }

    async fn register_agent(&self, config: AgentConfig) -> Result<AgentConfig, StoreError> {
        let allowed_tools = serde_json::to_string(&config.allowed_tools)
            .map_err(|err| StoreError::Serialization(err.to_string()))?;
        let metadata = json_column(config.metadata.as_ref())?;
        let conn = self.inner.locked();
        conn.execute(
            "INSERT INTO agents (agent_id, name, description, allowed_tools, policy_name, \
             metadata, status, registered_at, last_active_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, \
             ?7, ?8, ?9) ON CONFLICT(agent_id) DO UPDATE SET name = excluded.name, description \
             = excluded.description, allowed_tools = excluded.allowed_tools, policy_name = \
             excluded.policy_name, metadata = excluded.metadata, status = excluded.status",
            params![
                config.agent_id,
                config.name,
                config.description,
                allowed_tools,
                config.policy_name,
                metadata,
                config.status.as_str(),
                config.registered_at.to_rfc3339(),
                config.last_active_at.map(|at| at.to_rfc3339()),
            ],
        )
        .map_err(|err| map_sql_err(&err))?;
        Ok(config)
    }

    async fn get_agent(&self, agent_id: &str) -> Result<Option<AgentConfig>, StoreError> {
        let conn = self.inner.locked();
        conn.query_row("SELECT * FROM agents WHERE agent_id = ?1", params![agent_id], raw_agent_row)
            .optional()
            .map_err(|err| map_sql_err(&err))?
            .map(AgentConfig::try_from)
            .transpose()
    }

    async fn update_agent_status(
        &self,
        agent_id: &str,
        status: AgentStatus,
    ) -> Result<AgentConfig, StoreError> {
        let now = Timestamp::now();
        let changed = {
            let conn = self.inner.locked();
            conn.execute(
                "UPDATE agents SET status = ?1, last_active_at = ?2 WHERE agent_id = ?3",
                params![status.as_str(), now.to_rfc3339(), agent_id],
            )
            .map_err(|err| map_sql_err(&err))?
        };
        if changed == 0 {
            return Err(StoreError::NotFound(format!("agent '{agent_id}'")));
        }
        self.get_agent(agent_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("agent '{agent_id}'")))
    }

    async fn list_agents(&self) -> Result<Vec<AgentConfig>, StoreError> {
        let conn = self.inner.locked();
        let mut stmt = conn
            .prepare("SELECT * FROM agents ORDER BY agent_id ASC")
            .map_err(|err| map_sql_err(&err))?;
        let rows = stmt.query_map(params![], raw_agent_row).map_err(|err| map_sql_err(&err))?;
        let mut agents = Vec::new();
        for row in rows {
            agents.push(AgentConfig::try_from(row.map_err(|err| map_sql_err(&err))?)?);
        }
        Ok(agents)
    }

    async fn delete_agent(&self, agent_id: &str) -> Result<bool, StoreError> {
        let conn = self.inner.locked();
        let changed = conn
            .execute("DELETE FROM agents WHERE agent_id = ?1", params![agent_id])
            .map_err(|err| map_sql_err(&err))?;
        Ok(changed > 0)
    }

    async fn schema_version(&self) -> Result<i64, StoreError> {
        let conn = self.inner.locked();
        conn.query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
            .optional()
            .map_err(|err| map_sql_err(&err))
            .map(|version| version.unwrap_or(0))
    }

    fn approvals(&self) -> Option<&dyn ApprovalStore> {
        Some(self)
    }

    fn for_tenant(&self, tenant_id: &TenantId) -> Option<Arc<dyn GovernanceStore>> {
        Some(Arc::new(Self {
            inner: Arc::clone(&self.inner),
            tenant: Some(tenant_id.clone()),
        }))
    }
}

/// Reads raw policy-version columns from a query row.
fn version_from_row(
    row: &Row<'_>,
) -> rusqlite::Result<(i64, String, i64, Option<String>, String, String, String)> {
    Ok((
        row.get("id")?,
        row.get("policy_name")?,
        row.get("version")?,
        row.get("agent_id")?,
        row.get("rules")?,
        row.get("author")?,
        row.get("created_at")?,
    ))
}

/// Converts raw policy-version columns into a snapshot.
fn version_from_raw(
    raw: (i64, String, i64, Option<String>, String, String, String),
) -> Result<PolicyVersion, StoreError> {
    let (id, policy_name, version, agent_id, rules, author, created_at) = raw;
    Ok(PolicyVersion {
        id,
        policy_name,
        version,
        agent_id,
        rules: parse_rules(&rules)?,
        author,
        created_at: Timestamp::parse(&created_at).ok_or_else(|| corrupt("created_at"))?,
    })
}

// ============================================================================
// SECTION: Approval Store Implementation
// ============================================================================

#[async_trait]
impl ApprovalStore for SqliteStore {
    async fn create_approval(&self, draft: ApprovalDraft) -> Result<ApprovalRequest, StoreError> {
        let parameters = json_column(draft.parameters.as_ref())?;
        let conn = self.inner.locked();
        conn.execute(
            "INSERT INTO approvals (tenant_id, agent_id, tool, parameters, trace_id, \
             policy_name, rule_name, status, deadline, deadline_ms, created_at) VALUES (?1, ?2, \
             ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                draft.tenant_id.as_ref().map(|tenant| tenant.as_str().to_string()),
                draft.agent_id,
                draft.tool,
                parameters,
                draft.trace_id.as_str(),
                draft.policy_name,
                draft.rule_name,
                ApprovalStatus::Pending.as_str(),
                draft.deadline.to_rfc3339(),
                draft.deadline.as_unix_millis(),
                draft.created_at.to_rfc3339(),
            ],
        )
        .map_err(|err| map_sql_err(&err))?;
        let id = conn.last_insert_rowid();
        Ok(ApprovalRequest {
            id,
            tenant_id: draft.tenant_id,
            agent_id: draft.agent_id,
            tool: draft.tool,
            parameters: draft.parameters,
            trace_id: draft.trace_id,
            policy_name: draft.policy_name,
            rule_name: draft.rule_name,
            status: ApprovalStatus::Pending,
            deadline: draft.deadline,
            approver: None,
            comment: None,
            created_at: draft.created_at,
            resolved_at: None,
        })
    }

    async fn get_approval(&self, id: i64) -> Result<Option<ApprovalRequest>, StoreError> {
        let conn = self.inner.locked();
        conn.query_row("SELECT * FROM approvals WHERE id = ?1", params![id], raw_approval_row)
            .optional()
            .map_err(|err| map_sql_err(&err))?
            .map(ApprovalRequest::try_from)
            .transpose()
    }

    async fn list_approvals(
        &self,
        filter: &ApprovalFilter,
    ) -> Result<Vec<ApprovalRequest>, StoreError> {
        let mut clauses: Vec<String> = Vec::new();
        let mut values: Vec<SqlValue> = Vec::new();
        if let Some(tenant) = &self.tenant {
            clauses.push("tenant_id = ?".to_string());
            values.push(SqlValue::Text(tenant.as_str().to_string()));
        }
        if let Some(status) = filter.status {
            clauses.push("status = ?".to_string());
            values.push(SqlValue::Text(status.as_str().to_string()));
        }
        if let Some(agent_id) = &filter.agent_id {
            clauses.push("agent_id = ?".to_string());
            values.push(SqlValue::Text(agent_id.clone()));
        }
        if let Some(tool) = &filter.tool {
            clauses.push("tool = ?".to_string());
            values.push(SqlValue::Text(tool.clone()));
        }
        let clause = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        let sql = format!("SELECT * FROM approvals{clause} ORDER BY id ASC");
        let conn = self.inner.locked();
        let mut stmt = conn.prepare(&sql).map_err(|err| map_sql_err(&err))?;
        let rows = stmt
            .query_map(params_from_iter(values.iter().cloned()), raw_approval_row)
            .map_err(|err| map_sql_err(&err))?;
        let mut approvals = Vec::new();
        for row in rows {
            approvals.push(ApprovalRequest::try_from(row.map_err(|err| map_sql_err(&err))?)?);
        }
        Ok(approvals)
    }

    async fn resolve_approval(
        &self,
        id: i64,
        resolution: &ApprovalResolution,
        now: Timestamp,
    ) -> Result<Option<ApprovalRequest>, StoreError> {
        let timeout = matches!(resolution.status, ApprovalDecision::Timeout);
        let changed = {
            let conn = self.inner.locked();
            conn.execute(
                "UPDATE approvals SET status = ?1, approver = ?2, comment = ?3, resolved_at = \
                 ?4 WHERE id = ?5 AND status = ?6 AND (?7 = 1 OR deadline_ms >= ?8)",
                params![
                    resolution.status.terminal_status().as_str(),
                    resolution.approver,
                    resolution.comment,
                    now.to_rfc3339(),
                    id,
                    ApprovalStatus::Pending.as_str(),
                    i64::from(timeout),
                    now.as_unix_millis(),
                ],
            )
            .map_err(|err| map_sql_err(&err))?
        };
        if changed == 0 {
            return Ok(None);
        }
        self.get_approval(id).await
    }
}
