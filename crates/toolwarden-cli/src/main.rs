// crates/toolwarden-cli/src/main.rs
// ============================================================================
// Module: ToolWarden CLI Entry Point
// Description: Command harness over the governance orchestrator and store.
// Purpose: Evaluate calls and administer policies, agents, audit, approvals.
// Dependencies: clap, serde, serde_json, tokio, toolwarden-core, toolwarden-store-sqlite
// ============================================================================

//! ## Overview
//! The ToolWarden CLI is a thin harness over the in-process engine: it opens
//! the `SQLite` store, builds an orchestrator, executes one command, and
//! prints line-oriented JSON. The database path comes from `--db`, falling
//! back to the `GOVERNANCE_DB_PATH` environment variable, then a local
//! default file.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;
use toolwarden_core::AgentConfig;
use toolwarden_core::AgentStatus;
use toolwarden_core::ApprovalDecision;
use toolwarden_core::ApprovalFilter;
use toolwarden_core::ApprovalResolution;
use toolwarden_core::ApprovalStatus;
use toolwarden_core::AuditQuery;
use toolwarden_core::AuditResult;
use toolwarden_core::EvaluationRequest;
use toolwarden_core::GovernanceStore;
use toolwarden_core::McpToolDefinition;
use toolwarden_core::Orchestrator;
use toolwarden_core::Policy;
use toolwarden_core::PolicyRule;
use toolwarden_core::TenantId;
use toolwarden_core::TraceId;
use toolwarden_core::import_manifest;
use toolwarden_store_sqlite::SqliteStore;
use toolwarden_store_sqlite::SqliteStoreConfig;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Environment variable overriding the default database path.
const DB_PATH_ENV: &str = "GOVERNANCE_DB_PATH";
/// Default database file when neither flag nor environment is set.
const DEFAULT_DB_PATH: &str = "toolwarden.db";

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "toolwarden", version, about = "Governance engine for agent tool calls")]
struct Cli {
    /// Database path (overrides `GOVERNANCE_DB_PATH`).
    #[arg(long, value_name = "PATH", global = true)]
    db: Option<PathBuf>,
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Evaluate one tool-call request.
    Evaluate(EvaluateCommand),
    /// Policy administration.
    Policy {
        /// Selected policy subcommand.
        #[command(subcommand)]
        command: PolicyCommand,
    },
    /// Agent administration.
    Agent {
        /// Selected agent subcommand.
        #[command(subcommand)]
        command: AgentCommand,
    },
    /// Audit log inspection.
    Audit {
        /// Selected audit subcommand.
        #[command(subcommand)]
        command: AuditCommand,
    },
    /// Approval workflow administration.
    Approval {
        /// Selected approval subcommand.
        #[command(subcommand)]
        command: ApprovalCommand,
    },
    /// Kill-switch control for this process.
    Killswitch {
        /// Selected kill-switch subcommand.
        #[command(subcommand)]
        command: KillswitchCommand,
    },
    /// Import an MCP tool manifest as an agent registration.
    ImportMcp(ImportMcpCommand),
}

/// Arguments for `evaluate`.
#[derive(Args, Debug)]
struct EvaluateCommand {
    /// Agent identifier.
    #[arg(long)]
    agent: String,
    /// Tool name.
    #[arg(long)]
    tool: String,
    /// JSON object of call parameters.
    #[arg(long, value_name = "JSON")]
    params: Option<String>,
    /// Caller-supplied trace id (32 lowercase hex).
    #[arg(long, value_name = "TRACE_ID")]
    trace: Option<String>,
}

/// Policy subcommands.
#[derive(Subcommand, Debug)]
enum PolicyCommand {
    /// Upsert a policy from a JSON file.
    Set {
        /// Path to the policy JSON file.
        file: PathBuf,
        /// Author recorded in the version history.
        #[arg(long, default_value = "cli")]
        author: String,
    },
    /// Print one policy.
    Get {
        /// Policy name.
        name: String,
    },
    /// List all policies.
    List,
    /// Delete one policy.
    Delete {
        /// Policy name.
        name: String,
    },
    /// Print the version history of one policy.
    History {
        /// Policy name.
        name: String,
    },
    /// Restore a historical version as a new upsert.
    Rollback {
        /// Policy name.
        name: String,
        /// Version to restore.
        #[arg(long)]
        version: i64,
        /// Author recorded in the version history.
        #[arg(long, default_value = "cli")]
        author: String,
    },
}

/// Agent subcommands.
#[derive(Subcommand, Debug)]
enum AgentCommand {
    /// Register an agent from a JSON configuration file.
    Register {
        /// Path to the agent configuration JSON file.
        file: PathBuf,
    },
    /// Print one agent.
    Get {
        /// Agent identifier.
        agent_id: String,
    },
    /// List all agents.
    List,
    /// Update an agent's lifecycle status.
    Status {
        /// Agent identifier.
        agent_id: String,
        /// New status.
        #[arg(value_enum)]
        status: StatusArg,
    },
    /// Delete one agent.
    Delete {
        /// Agent identifier.
        agent_id: String,
    },
}

/// Agent status argument.
#[derive(ValueEnum, Clone, Copy, Debug)]
enum StatusArg {
    /// Registered but not yet started.
    Registered,
    /// Actively running.
    Running,
    /// Stopped by its operator.
    Stopped,
    /// Failed with an error.
    Error,
}

impl From<StatusArg> for AgentStatus {
    fn from(arg: StatusArg) -> Self {
        match arg {
            StatusArg::Registered => Self::Registered,
            StatusArg::Running => Self::Running,
            StatusArg::Stopped => Self::Stopped,
            StatusArg::Error => Self::Error,
        }
    }
}

/// Audit subcommands.
#[derive(Subcommand, Debug)]
enum AuditCommand {
    /// Query audit records.
    Query(AuditQueryCommand),
    /// Verify the full hash chain.
    Verify,
    /// Export matching records as newline-delimited JSON.
    Export {
        /// Output file (defaults to stdout).
        #[arg(long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

/// Arguments for `audit query`.
#[derive(Args, Debug)]
struct AuditQueryCommand {
    /// Restrict to one agent.
    #[arg(long)]
    agent: Option<String>,
    /// Restrict to one tool.
    #[arg(long)]
    tool: Option<String>,
    /// Restrict to one result (allowed, denied, error, retention-boundary).
    #[arg(long)]
    result: Option<String>,
    /// Restrict to one trace id.
    #[arg(long)]
    trace: Option<String>,
    /// Literal free-text search over reason and parameters.
    #[arg(long)]
    search: Option<String>,
    /// Maximum records returned.
    #[arg(long)]
    limit: Option<u64>,
    /// Records skipped before the first returned row.
    #[arg(long)]
    offset: Option<u64>,
}

/// Approval subcommands.
#[derive(Subcommand, Debug)]
enum ApprovalCommand {
    /// List approvals, materializing expired timeouts.
    List {
        /// Restrict to one status.
        #[arg(long)]
        status: Option<String>,
        /// Restrict to one agent.
        #[arg(long)]
        agent: Option<String>,
    },
    /// Print one approval, materializing an expired timeout.
    Get {
        /// Approval identifier.
        id: i64,
    },
    /// Apply a terminal resolution.
    Resolve {
        /// Approval identifier.
        id: i64,
        /// Terminal decision.
        #[arg(long, value_enum)]
        status: DecisionArg,
        /// Approver identity.
        #[arg(long)]
        approver: Option<String>,
        /// Approver comment.
        #[arg(long)]
        comment: Option<String>,
    },
}

/// Approval decision argument.
#[derive(ValueEnum, Clone, Copy, Debug)]
enum DecisionArg {
    /// Grant the held allow.
    Approved,
    /// Refuse the held allow.
    Rejected,
    /// Expire the held allow.
    Timeout,
}

impl From<DecisionArg> for ApprovalDecision {
    fn from(arg: DecisionArg) -> Self {
        match arg {
            DecisionArg::Approved => Self::Approved,
            DecisionArg::Rejected => Self::Rejected,
            DecisionArg::Timeout => Self::Timeout,
        }
    }
}

/// Kill-switch subcommands.
#[derive(Subcommand, Debug)]
enum KillswitchCommand {
    /// Activate the kill switch for this process.
    Activate {
        /// Activation reason.
        #[arg(long)]
        reason: String,
        /// Tenant scope (global when absent).
        #[arg(long)]
        tenant: Option<String>,
    },
    /// Reset the kill switch for this process.
    Reset {
        /// Tenant scope (global when absent).
        #[arg(long)]
        tenant: Option<String>,
        /// Reset reason.
        #[arg(long)]
        reason: Option<String>,
    },
    /// Print kill-switch status for this process.
    Status {
        /// Tenant scope (global when absent).
        #[arg(long)]
        tenant: Option<String>,
    },
}

/// Arguments for `import-mcp`.
#[derive(Args, Debug)]
struct ImportMcpCommand {
    /// Path to the MCP tool-manifest JSON file.
    file: PathBuf,
    /// Agent to register with the imported tools.
    #[arg(long)]
    agent: String,
    /// Display name for the registered agent.
    #[arg(long)]
    name: Option<String>,
}

// ============================================================================
// SECTION: Input Shapes
// ============================================================================

/// Policy file shape accepted by `policy set`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PolicyInput {
    /// Policy name.
    name: String,
    /// Optional agent scope.
    #[serde(default)]
    agent_id: Option<String>,
    /// Ordered rules.
    rules: Vec<PolicyRule>,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI failure with a user-facing message.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// User-facing message.
    message: String,
}

impl CliError {
    /// Creates a CLI error from a message.
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Result alias for CLI operations.
type CliResult<T> = Result<T, CliError>;

/// Converts any displayable error into a CLI error.
fn cli_err(err: impl std::fmt::Display) -> CliError {
    CliError::new(err.to_string())
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point: dispatch one command and map failures to exit codes.
#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    match run().await {
        Ok(code) => code,
        Err(err) => {
            let _ = write_stderr_line(&format!("error: {err}"));
            ExitCode::FAILURE
        }
    }
}

/// Executes the CLI command dispatcher.
async fn run() -> CliResult<ExitCode> {
    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db);
    let store = Arc::new(
        SqliteStore::open(&SqliteStoreConfig::new(db_path)).map_err(cli_err)?,
    );
    let orchestrator = Orchestrator::builder()
        .store(Arc::clone(&store) as Arc<dyn GovernanceStore>)
        .build()
        .map_err(cli_err)?;

    match cli.command {
        Commands::Evaluate(command) => command_evaluate(&orchestrator, command).await,
        Commands::Policy {
            command,
        } => command_policy(&orchestrator, store.as_ref(), command).await,
        Commands::Agent {
            command,
        } => command_agent(&orchestrator, store.as_ref(), command).await,
        Commands::Audit {
            command,
        } => command_audit(&orchestrator, store.as_ref(), command).await,
        Commands::Approval {
            command,
        } => command_approval(&orchestrator, command).await,
        Commands::Killswitch {
            command,
        } => command_killswitch(&orchestrator, command),
        Commands::ImportMcp(command) => command_import_mcp(&orchestrator, command).await,
    }
}

/// Resolves the database path from flag, environment, then default.
fn resolve_db_path(flag: Option<PathBuf>) -> PathBuf {
    flag.or_else(|| std::env::var_os(DB_PATH_ENV).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH))
}

// ============================================================================
// SECTION: Command Handlers
// ============================================================================

/// Handles `evaluate`.
async fn command_evaluate(
    orchestrator: &Orchestrator,
    command: EvaluateCommand,
) -> CliResult<ExitCode> {
    let mut request = EvaluationRequest::new(command.agent, command.tool);
    if let Some(params) = command.params {
        let parsed: Map<String, Value> = serde_json::from_str(&params)
            .map_err(|err| CliError::new(format!("invalid --params JSON: {err}")))?;
        request = request.with_parameters(parsed);
    }
    if let Some(trace) = command.trace {
        let trace_id = TraceId::parse(&trace)
            .ok_or_else(|| CliError::new("invalid --trace: expected 32 lowercase hex chars"))?;
        request = request.with_trace_id(trace_id);
    }
    let result = orchestrator.evaluate(request).await.map_err(cli_err)?;
    print_json(&result)?;
    Ok(if result.allowed { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

/// Handles `policy` subcommands.
async fn command_policy(
    orchestrator: &Orchestrator,
    store: &SqliteStore,
    command: PolicyCommand,
) -> CliResult<ExitCode> {
    match command {
        PolicyCommand::Set {
            file,
            author,
        } => {
            let text = fs::read_to_string(&file).map_err(cli_err)?;
            let input: PolicyInput = serde_json::from_str(&text)
                .map_err(|err| CliError::new(format!("invalid policy file: {err}")))?;
            let mut policy = Policy::new(input.name, input.rules);
            policy.agent_id = input.agent_id;
            let stored = orchestrator.save_policy(policy, &author).await.map_err(cli_err)?;
            print_json(&stored)?;
        }
        PolicyCommand::Get {
            name,
        } => {
            let policy = store.get_policy(&name).await.map_err(cli_err)?;
            let Some(policy) = policy else {
                return Err(CliError::new(format!("policy '{name}' not found")));
            };
            print_json(&policy)?;
        }
        PolicyCommand::List => {
            for policy in store.list_policies().await.map_err(cli_err)? {
                print_json(&policy)?;
            }
        }
        PolicyCommand::Delete {
            name,
        } => {
            let deleted = orchestrator.delete_policy(&name).await.map_err(cli_err)?;
            print_json(&json!({ "policy": name, "deleted": deleted }))?;
        }
        PolicyCommand::History {
            name,
        } => {
            for version in store.policy_history(&name).await.map_err(cli_err)? {
                print_json(&version)?;
            }
        }
        PolicyCommand::Rollback {
            name,
            version,
            author,
        } => {
            let restored =
                orchestrator.rollback_policy(&name, version, &author).await.map_err(cli_err)?;
            print_json(&restored)?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Handles `agent` subcommands.
async fn command_agent(
    orchestrator: &Orchestrator,
    store: &SqliteStore,
    command: AgentCommand,
) -> CliResult<ExitCode> {
    match command {
        AgentCommand::Register {
            file,
        } => {
            let text = fs::read_to_string(&file).map_err(cli_err)?;
            let config: AgentConfig = serde_json::from_str(&text)
                .map_err(|err| CliError::new(format!("invalid agent configuration: {err}")))?;
            let stored = orchestrator.register_agent(config).await.map_err(cli_err)?;
            print_json(&stored)?;
        }
        AgentCommand::Get {
            agent_id,
        } => {
            let Some(agent) = store.get_agent(&agent_id).await.map_err(cli_err)? else {
                return Err(CliError::new(format!("agent '{agent_id}' not found")));
            };
            print_json(&agent)?;
        }
        AgentCommand::List => {
            for agent in store.list_agents().await.map_err(cli_err)? {
                print_json(&agent)?;
            }
        }
        AgentCommand::Status {
            agent_id,
            status,
        } => {
            let updated = orchestrator
                .update_agent_status(&agent_id, status.into())
                .await
                .map_err(cli_err)?;
            print_json(&updated)?;
        }
        AgentCommand::Delete {
            agent_id,
        } => {
            let deleted = store.delete_agent(&agent_id).await.map_err(cli_err)?;
            print_json(&json!({ "agentId": agent_id, "deleted": deleted }))?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Handles `audit` subcommands.
async fn command_audit(
    orchestrator: &Orchestrator,
    store: &SqliteStore,
    command: AuditCommand,
) -> CliResult<ExitCode> {
    match command {
        AuditCommand::Query(query) => {
            let query = build_audit_query(query)?;
            let page = store.query_audit(&query).await.map_err(cli_err)?;
            for record in &page.records {
                print_json(record)?;
            }
            print_json(&json!({ "total": page.total }))?;
            Ok(ExitCode::SUCCESS)
        }
        AuditCommand::Verify => {
            let verification = orchestrator.verify_audit_chain().await.map_err(cli_err)?;
            print_json(&verification)?;
            Ok(if verification.valid { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
        AuditCommand::Export {
            output,
        } => {
            let query = AuditQuery {
                limit: Some(u64::MAX),
                ..AuditQuery::default()
            };
            let written = match output {
                Some(path) => {
                    let mut file = fs::File::create(&path).map_err(cli_err)?;
                    orchestrator.export_audit(&query, &mut file).await.map_err(cli_err)?
                }
                None => {
                    let mut stdout = std::io::stdout();
                    orchestrator.export_audit(&query, &mut stdout).await.map_err(cli_err)?
                }
            };
            write_stderr_line(&format!("exported {written} records"))?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Builds an audit query from CLI arguments.
fn build_audit_query(command: AuditQueryCommand) -> CliResult<AuditQuery> {
    let result = command
        .result
        .as_deref()
        .map(|value| {
            AuditResult::parse(value)
                .ok_or_else(|| CliError::new(format!("unknown result '{value}'")))
        })
        .transpose()?;
    let trace_id = command
        .trace
        .as_deref()
        .map(|value| {
            TraceId::parse(value).ok_or_else(|| CliError::new(format!("invalid trace '{value}'")))
        })
        .transpose()?;
    Ok(AuditQuery {
        agent_id: command.agent,
        tool: command.tool,
        result,
        trace_id,
        from: None,
        to: None,
        failure_category: None,
        search: command.search,
        limit: command.limit,
        offset: command.offset,
    })
}

/// Handles `approval` subcommands.
async fn command_approval(
    orchestrator: &Orchestrator,
    command: ApprovalCommand,
) -> CliResult<ExitCode> {
    match command {
        ApprovalCommand::List {
            status,
            agent,
        } => {
            let status = status
                .as_deref()
                .map(|value| {
                    ApprovalStatus::parse(value)
                        .ok_or_else(|| CliError::new(format!("unknown status '{value}'")))
                })
                .transpose()?;
            let filter = ApprovalFilter {
                status,
                agent_id: agent,
                tool: None,
            };
            for request in orchestrator.list_approval_requests(&filter).await.map_err(cli_err)? {
                print_json(&request)?;
            }
        }
        ApprovalCommand::Get {
            id,
        } => {
            let Some(request) =
                orchestrator.get_approval_request(id).await.map_err(cli_err)?
            else {
                return Err(CliError::new(format!("approval {id} not found")));
            };
            print_json(&request)?;
        }
        ApprovalCommand::Resolve {
            id,
            status,
            approver,
            comment,
        } => {
            let resolution = ApprovalResolution {
                status: status.into(),
                approver,
                comment,
            };
            let outcome = orchestrator.resolve_approval(id, resolution).await.map_err(cli_err)?;
            print_json(&outcome)?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Handles `killswitch` subcommands.
fn command_killswitch(
    orchestrator: &Orchestrator,
    command: KillswitchCommand,
) -> CliResult<ExitCode> {
    let kill_switch = orchestrator.kill_switch();
    match command {
        KillswitchCommand::Activate {
            reason,
            tenant,
        } => {
            let tenant = tenant.map(TenantId::new);
            kill_switch.activate(&reason, tenant.as_ref());
            print_json(&kill_switch.status(tenant.as_ref()))?;
        }
        KillswitchCommand::Reset {
            tenant,
            reason,
        } => {
            let tenant = tenant.map(TenantId::new);
            kill_switch.reset(tenant.as_ref(), reason.as_deref());
            print_json(&kill_switch.status(tenant.as_ref()))?;
        }
        KillswitchCommand::Status {
            tenant,
        } => {
            let tenant = tenant.map(TenantId::new);
            print_json(&kill_switch.status(tenant.as_ref()))?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Handles `import-mcp`.
async fn command_import_mcp(
    orchestrator: &Orchestrator,
    command: ImportMcpCommand,
) -> CliResult<ExitCode> {
    let text = fs::read_to_string(&command.file).map_err(cli_err)?;
    let definitions: Vec<McpToolDefinition> = serde_json::from_str(&text)
        .map_err(|err| CliError::new(format!("invalid manifest: {err}")))?;
    let import = import_manifest(&definitions);
    let mut config = AgentConfig::new(
        command.agent.clone(),
        command.name.unwrap_or(command.agent),
    );
    config.allowed_tools = import.tools.iter().map(|tool| tool.name.clone()).collect();
    let stored = orchestrator.register_agent(config).await.map_err(cli_err)?;
    print_json(&json!({
        "agent": stored,
        "importedTools": import.tools.len(),
        "skipped": import.skipped,
    }))?;
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Output Helpers
// ============================================================================

/// Serializes a value as one JSON line on stdout.
fn print_json<T: Serialize>(value: &T) -> CliResult<()> {
    let line = serde_json::to_string(value).map_err(cli_err)?;
    write_stdout_line(&line)
}

/// Writes one line to stdout.
fn write_stdout_line(message: &str) -> CliResult<()> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}").map_err(|err| CliError::new(format!("stdout: {err}")))
}

/// Writes one line to stderr.
fn write_stderr_line(message: &str) -> CliResult<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}").map_err(|err| CliError::new(format!("stderr: {err}")))
}

// ============================================================================
// SECTION: Tests
// ============================================================================

/// Unit tests for argument parsing and input shapes.
#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        reason = "Test-only panic-based assertions are permitted."
    )]

    use super::*;

    #[test]
    fn db_path_prefers_the_flag() {
        let path = resolve_db_path(Some(PathBuf::from("/tmp/custom.db")));
        assert_eq!(path, PathBuf::from("/tmp/custom.db"));
    }

    #[test]
    fn policy_input_accepts_the_documented_shape() {
        let input: PolicyInput = serde_json::from_str(
            r#"{
                "name": "no-writes",
                "agentId": "agent-a",
                "rules": [
                    { "tool": "file_write", "effect": "deny", "reason": "No writes" },
                    { "tool": "*", "effect": "allow" }
                ]
            }"#,
        )
        .expect("policy input");
        assert_eq!(input.name, "no-writes");
        assert_eq!(input.agent_id.as_deref(), Some("agent-a"));
        assert_eq!(input.rules.len(), 2);
    }

    #[test]
    fn audit_query_rejects_unknown_results() {
        let command = AuditQueryCommand {
            agent: None,
            tool: None,
            result: Some("maybe".to_string()),
            trace: None,
            search: None,
            limit: None,
            offset: None,
        };
        assert!(build_audit_query(command).is_err());
    }

    #[test]
    fn audit_query_accepts_known_filters() {
        let command = AuditQueryCommand {
            agent: Some("agent-a".to_string()),
            tool: None,
            result: Some("denied".to_string()),
            trace: None,
            search: Some("blocked".to_string()),
            limit: Some(10),
            offset: None,
        };
        let query = build_audit_query(command).expect("query");
        assert_eq!(query.result, Some(AuditResult::Denied));
        assert_eq!(query.limit, Some(10));
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
