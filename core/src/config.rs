use std::path::PathBuf;

use serde::Deserialize;

use crate::error::ConfigError;

/// Immutable runtime configuration, assembled once by [`RuntimeConfig::load`]
/// and held behind an `Arc` by the Runtime Facade. No component mutates a
/// shared `RuntimeConfig` in place; a reload constructs a new value and a
/// fresh `Runtime` is built from it (§9 "Shared mutable configuration").
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    /// Directory the write-ahead log backing the approval record log lives
    /// in.
    pub wal_dir: PathBuf,
    pub wal_segment_limit_bytes: u64,

    /// Filesystem roots the sandbox's path resolver admits.
    pub sandbox_writable_roots: Vec<PathBuf>,
    pub sandbox_network_domains: Vec<String>,
    pub sandbox_max_path_depth: usize,
    pub sandbox_max_command_args: usize,
    pub sandbox_max_command_bytes: usize,

    /// Default approval policy applied when no `PermissionRequest` hook
    /// expresses an opinion: `true` routes the call through the approval
    /// queue (bounded by `tool_default_timeout_ms`); `false` allows it
    /// outright. Consumed by [`crate::tools::ToolExecutor`].
    pub approval_ask_by_default: bool,
    pub whitelist_default_ttl_seconds: Option<u64>,
    pub record_log_path: PathBuf,

    /// Token budget the history store trims against.
    pub history_token_budget: usize,
    pub history_persist_root: Option<PathBuf>,

    pub middleware_default_timeout_ms: u64,

    pub agent_max_iterations: u32,
    pub tool_default_timeout_ms: u64,
    pub stream_channel_capacity: usize,

    pub workflow_branch_timeout_ms: u64,

    /// Cap on resident sessions before LRU eviction.
    pub max_sessions: usize,
    pub scratch_root: PathBuf,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let scratch_root = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("agent-runtime")
            .join("scratch");
        Self {
            wal_dir: PathBuf::from(".agent/wal"),
            wal_segment_limit_bytes: agent_wal::DEFAULT_SEGMENT_LIMIT,
            sandbox_writable_roots: Vec::new(),
            sandbox_network_domains: Vec::new(),
            sandbox_max_path_depth: agent_sandbox::DEFAULT_MAX_DEPTH,
            sandbox_max_command_args: 256,
            sandbox_max_command_bytes: 8192,
            approval_ask_by_default: false,
            whitelist_default_ttl_seconds: None,
            record_log_path: PathBuf::from(".agent/approvals.jsonl"),
            history_token_budget: 32_000,
            history_persist_root: None,
            middleware_default_timeout_ms: 5_000,
            agent_max_iterations: 25,
            tool_default_timeout_ms: 30_000,
            stream_channel_capacity: 256,
            workflow_branch_timeout_ms: 30_000,
            max_sessions: 256,
            scratch_root,
        }
    }
}

/// The plain `serde`-deserialized shape of an on-disk `config.toml`
/// overlay. Every field is optional; absent fields fall back to
/// [`RuntimeConfig::default`]. Parsing argv/env is explicitly out of scope
/// (§1); callers assemble overrides programmatically or from this struct.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RuntimeConfigToml {
    pub wal_dir: Option<PathBuf>,
    pub wal_segment_limit_bytes: Option<u64>,
    pub sandbox_writable_roots: Option<Vec<PathBuf>>,
    pub sandbox_network_domains: Option<Vec<String>>,
    pub sandbox_max_path_depth: Option<usize>,
    pub sandbox_max_command_args: Option<usize>,
    pub sandbox_max_command_bytes: Option<usize>,
    pub approval_ask_by_default: Option<bool>,
    pub whitelist_default_ttl_seconds: Option<u64>,
    pub record_log_path: Option<PathBuf>,
    pub history_token_budget: Option<usize>,
    pub history_persist_root: Option<PathBuf>,
    pub middleware_default_timeout_ms: Option<u64>,
    pub agent_max_iterations: Option<u32>,
    pub tool_default_timeout_ms: Option<u64>,
    pub stream_channel_capacity: Option<usize>,
    pub workflow_branch_timeout_ms: Option<u64>,
    pub max_sessions: Option<usize>,
    pub scratch_root: Option<PathBuf>,
}

impl RuntimeConfig {
    /// Parses `toml_source` as a [`RuntimeConfigToml`] overlay and merges it
    /// over the built-in defaults.
    pub fn load(toml_source: &str) -> Result<Self, ConfigError> {
        let overlay: RuntimeConfigToml = toml::from_str(toml_source)?;
        Ok(Self::from_overlay(overlay))
    }

    pub fn from_overlay(overlay: RuntimeConfigToml) -> Self {
        let defaults = Self::default();
        Self {
            wal_dir: overlay.wal_dir.unwrap_or(defaults.wal_dir),
            wal_segment_limit_bytes: overlay
                .wal_segment_limit_bytes
                .unwrap_or(defaults.wal_segment_limit_bytes),
            sandbox_writable_roots: overlay
                .sandbox_writable_roots
                .unwrap_or(defaults.sandbox_writable_roots),
            sandbox_network_domains: overlay
                .sandbox_network_domains
                .unwrap_or(defaults.sandbox_network_domains),
            sandbox_max_path_depth: overlay
                .sandbox_max_path_depth
                .unwrap_or(defaults.sandbox_max_path_depth),
            sandbox_max_command_args: overlay
                .sandbox_max_command_args
                .unwrap_or(defaults.sandbox_max_command_args),
            sandbox_max_command_bytes: overlay
                .sandbox_max_command_bytes
                .unwrap_or(defaults.sandbox_max_command_bytes),
            approval_ask_by_default: overlay
                .approval_ask_by_default
                .unwrap_or(defaults.approval_ask_by_default),
            whitelist_default_ttl_seconds: overlay
                .whitelist_default_ttl_seconds
                .or(defaults.whitelist_default_ttl_seconds),
            record_log_path: overlay.record_log_path.unwrap_or(defaults.record_log_path),
            history_token_budget: overlay
                .history_token_budget
                .unwrap_or(defaults.history_token_budget),
            history_persist_root: overlay.history_persist_root.or(defaults.history_persist_root),
            middleware_default_timeout_ms: overlay
                .middleware_default_timeout_ms
                .unwrap_or(defaults.middleware_default_timeout_ms),
            agent_max_iterations: overlay
                .agent_max_iterations
                .unwrap_or(defaults.agent_max_iterations),
            tool_default_timeout_ms: overlay
                .tool_default_timeout_ms
                .unwrap_or(defaults.tool_default_timeout_ms),
            stream_channel_capacity: overlay
                .stream_channel_capacity
                .unwrap_or(defaults.stream_channel_capacity),
            workflow_branch_timeout_ms: overlay
                .workflow_branch_timeout_ms
                .unwrap_or(defaults.workflow_branch_timeout_ms),
            max_sessions: overlay.max_sessions.unwrap_or(defaults.max_sessions),
            scratch_root: overlay.scratch_root.unwrap_or(defaults.scratch_root),
        }
    }
}
