use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use strum_macros::Display;
use time::OffsetDateTime;

/// Decision returned by a `PermissionRequest` hook, mapped from shell exit
/// codes as `{0 -> Allow, 1 -> Deny, 2 -> Ask, other -> Deny}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionDecision {
    Allow,
    Deny,
    Ask,
}

impl PermissionDecision {
    pub fn from_exit_code(code: i32) -> Self {
        match code {
            0 => PermissionDecision::Allow,
            2 => PermissionDecision::Ask,
            _ => PermissionDecision::Deny,
        }
    }
}

/// The closed set of lifecycle events the hook executor dispatches.
///
/// Each variant carries exactly the payload its hooks need; this mirrors the
/// typed `EventMsg` the runtime's wire protocol uses for session events,
/// generalised to the fixed event catalogue of the hook system.
#[derive(Debug, Clone, Serialize, Deserialize, Display)]
#[serde(tag = "type", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventMsg {
    SessionStart {
        session_id: String,
    },
    SessionEnd {
        session_id: String,
    },
    UserPromptSubmit {
        session_id: String,
        prompt: String,
    },
    PreToolUse {
        session_id: String,
        call_id: String,
        tool: String,
        arguments: Value,
    },
    PostToolUse {
        session_id: String,
        call_id: String,
        tool: String,
        latency_ms: u64,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    PermissionRequest {
        session_id: String,
        call_id: String,
        tool: String,
        arguments: Value,
    },
    Notification {
        session_id: String,
        message: String,
    },
    SubagentStart {
        session_id: String,
        subagent_id: String,
    },
    SubagentStop {
        session_id: String,
        subagent_id: String,
    },
    Stop {
        session_id: String,
        reason: String,
    },
}

impl EventMsg {
    /// Stable short name of the variant, used for dedup keys and logging.
    pub fn kind(&self) -> String {
        self.to_string()
    }

    pub fn session_id(&self) -> &str {
        match self {
            EventMsg::SessionStart { session_id }
            | EventMsg::SessionEnd { session_id }
            | EventMsg::UserPromptSubmit { session_id, .. }
            | EventMsg::PreToolUse { session_id, .. }
            | EventMsg::PostToolUse { session_id, .. }
            | EventMsg::PermissionRequest { session_id, .. }
            | EventMsg::Notification { session_id, .. }
            | EventMsg::SubagentStart { session_id, .. }
            | EventMsg::SubagentStop { session_id, .. }
            | EventMsg::Stop { session_id, .. } => session_id,
        }
    }
}

/// An envelope around [`EventMsg`] carrying an optional dedup id and the
/// timestamp at which it was published.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(flatten)]
    pub msg: EventMsg,
}

impl Event {
    pub fn new(msg: EventMsg) -> Self {
        Self {
            id: None,
            timestamp: OffsetDateTime::now_utc(),
            msg,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Key used by the dedup ring: `(type, id)`. Events without an id are
    /// never deduplicated.
    pub fn dedup_key(&self) -> Option<(String, String)> {
        self.id.clone().map(|id| (self.msg.kind(), id))
    }
}
