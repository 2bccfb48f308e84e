use agent_protocol::ApprovalDecision;

/// Errors raised by the approval queue (C4).
///
/// Invariant violations (re-approving a terminated record, transitioning
/// from a terminal state) are represented here and are never fatal to the
/// process.
#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    #[error("no pending approval record with id {0}")]
    NotFound(u64),

    #[error("approval record {id} is already in a terminal state ({decision:?})")]
    InvalidState {
        id: u64,
        decision: ApprovalDecision,
    },

    #[error("wal error: {0}")]
    Wal(#[from] agent_wal::WalError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Errors raised by the tool registry and executor (C5).
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("tool {0} is not in this request's whitelist")]
    NotWhitelisted(String),

    #[error("a tool named {0} is already registered")]
    DuplicateTool(String),

    #[error("permission denied for tool {0}")]
    PermissionDenied(String),

    #[error("tool call was rejected by the approval queue: {0}")]
    ApprovalRejected(String),

    #[error("tool call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("tool call was cancelled")]
    Cancelled,

    #[error("duplicate async task id: {0}")]
    DuplicateTaskId(String),

    #[error("unknown async task id: {0}")]
    UnknownTaskId(String),

    #[error("sandbox denied the call: {0}")]
    Sandbox(#[from] agent_sandbox::SandboxError),

    #[error("approval error: {0}")]
    Approval(#[from] ApprovalError),

    #[error("hook error: {0}")]
    Hook(#[from] HookError),

    #[error("tool execution failed: {0}")]
    Execution(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the event/hook executor (C3).
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("hook {0} timed out")]
    Timeout(String),

    #[error("hook {0} failed: {1}")]
    Failed(String, String),

    #[error("io error launching shell hook: {0}")]
    Io(#[from] std::io::Error),

    #[error("shell hook produced invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// Errors raised by the message history store (C6).
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("tool message references unknown tool_call_id {0}")]
    UnknownToolCallId(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Errors raised by the middleware chain (C7).
#[derive(Debug, thiserror::Error)]
pub enum MiddlewareError {
    #[error("middleware {0} timed out")]
    Timeout(String),

    #[error("middleware {0} failed: {1}")]
    Failed(String, String),
}

/// Errors raised by the workflow graph executor (C9).
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("node {0} is unknown")]
    UnknownNode(String),

    #[error("graph has no start node")]
    NoStartNode,

    #[error("node {0} has more than one default transition")]
    MultipleDefaultTransitions(String),

    #[error("parallel branch {0} is unreachable from start")]
    UnreachableBranch(String),

    #[error("graph already closed; cannot mutate")]
    AlreadyClosed,

    #[error("node {0} has no applicable transition and no default edge")]
    NoTransition(String),

    #[error("decision node {0} returned unknown next node {1}")]
    UnknownDecisionTarget(String, String),

    #[error("branch failed: {0}")]
    BranchFailed(String),

    #[error("parallel branch {0} timed out")]
    BranchTimeout(String),

    #[error("workflow was cancelled")]
    Cancelled,
}

/// Top-level error for the runtime facade (C10), composing every child
/// component's error type with `#[from]` so callers rarely need to match on
/// anything but this one enum.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Approval(#[from] ApprovalError),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Hook(#[from] HookError),

    #[error(transparent)]
    History(#[from] HistoryError),

    #[error(transparent)]
    Middleware(#[from] MiddlewareError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Wal(#[from] agent_wal::WalError),

    #[error("model adapter error: {0}")]
    Model(String),

    #[error("run was cancelled")]
    Cancelled,

    #[error("run timed out")]
    Timeout,

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while loading a [`crate::config::RuntimeConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse config toml: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("io error reading config: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
