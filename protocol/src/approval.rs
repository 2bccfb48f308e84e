use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;

/// Terminal (and pending) states of an [`ApprovalRecord`].
///
/// Invariant (enforced by the approval queue, not this type): a record
/// transitions monotonically from `Pending` to exactly one of the other
/// four states; `Auto` implies `decided_at == requested_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Pending,
    Approved,
    Rejected,
    Timeout,
    Auto,
}

impl ApprovalDecision {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ApprovalDecision::Pending)
    }
}

/// A persisted request for human (or whitelist-automatic) consent to execute
/// a tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRecord {
    /// Monotonically increasing within the process.
    pub id: u64,
    pub session_id: String,
    pub tool: String,
    pub args: Value,
    pub decision: ApprovalDecision,
    #[serde(with = "time::serde::rfc3339")]
    pub requested_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub decided_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub comment: String,
    pub auto: bool,
    /// "whitelist" for auto-approved records; otherwise the identity of the
    /// approver (e.g. "user"), empty while pending.
    #[serde(default)]
    pub approver: String,
}

impl ApprovalRecord {
    pub fn new_pending(id: u64, session_id: impl Into<String>, tool: impl Into<String>, args: Value) -> Self {
        Self {
            id,
            session_id: session_id.into(),
            tool: tool.into(),
            args,
            decision: ApprovalDecision::Pending,
            requested_at: OffsetDateTime::now_utc(),
            decided_at: None,
            comment: String::new(),
            auto: false,
            approver: String::new(),
        }
    }

    pub fn new_auto(id: u64, session_id: impl Into<String>, tool: impl Into<String>, args: Value) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id,
            session_id: session_id.into(),
            tool: tool.into(),
            args,
            decision: ApprovalDecision::Auto,
            requested_at: now,
            decided_at: Some(now),
            comment: "whitelisted".to_string(),
            auto: true,
            approver: "whitelist".to_string(),
        }
    }
}

/// Key identifying an entry in the [`crate::session::Session`] whitelist:
/// `(session id, tool name, stable hash of argument mapping)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WhitelistKey {
    pub session_id: String,
    pub tool: String,
    pub args_hash: u64,
}

/// A single whitelist grant, optionally time-limited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhitelistEntry {
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
}

impl WhitelistEntry {
    pub fn new(ttl_seconds: Option<u64>) -> Self {
        Self {
            created_at: OffsetDateTime::now_utc(),
            ttl_seconds,
        }
    }

    pub fn is_active_at(&self, now: OffsetDateTime) -> bool {
        match self.ttl_seconds {
            None => true,
            Some(ttl) => now < self.created_at + time::Duration::seconds(ttl as i64),
        }
    }
}
