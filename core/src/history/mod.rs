mod persist;

use std::collections::HashMap;
use std::sync::Mutex;

use agent_protocol::Message;
use agent_protocol::Role;

pub use persist::HistoryPersister;
pub use persist::SessionSnapshot;

use crate::error::HistoryError;

/// Per-session conversation log with a token-budget trim policy (§4.6).
/// Trimming always keeps the most recent system message (if any) and drops
/// the oldest non-system messages until the running token estimate is
/// within budget.
pub struct HistoryStore {
    token_budget: usize,
    sessions: Mutex<HashMap<String, Vec<Message>>>,
}

impl HistoryStore {
    pub fn new(token_budget: usize) -> Self {
        Self {
            token_budget,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn append(&self, session_id: &str, message: Message) -> Result<(), HistoryError> {
        if message.role == Role::Tool {
            let call_id = message
                .tool_call_id
                .clone()
                .ok_or_else(|| HistoryError::UnknownToolCallId(String::new()))?;
            let sessions = self.sessions.lock().expect("history lock poisoned");
            let known = sessions
                .get(session_id)
                .map(|history| {
                    history
                        .iter()
                        .any(|m| m.role == Role::Assistant && m.tool_calls.iter().any(|c| c.id == call_id))
                })
                .unwrap_or(false);
            if !known {
                return Err(HistoryError::UnknownToolCallId(call_id));
            }
        }

        let mut sessions = self.sessions.lock().expect("history lock poisoned");
        let history = sessions.entry(session_id.to_string()).or_default();
        history.push(message);
        trim(history, self.token_budget);
        Ok(())
    }

    pub fn snapshot(&self, session_id: &str) -> Vec<Message> {
        self.sessions
            .lock()
            .expect("history lock poisoned")
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn clear(&self, session_id: &str) {
        self.sessions.lock().expect("history lock poisoned").remove(session_id);
    }

    pub fn replace(&self, session_id: &str, messages: Vec<Message>) {
        self.sessions
            .lock()
            .expect("history lock poisoned")
            .insert(session_id.to_string(), messages);
    }
}

/// Drops the oldest non-system messages until `history`'s summed token
/// estimate is within `budget`, preserving the most recent system message.
fn trim(history: &mut Vec<Message>, budget: usize) {
    let total = |h: &[Message]| h.iter().map(Message::estimated_tokens).sum::<usize>();
    let mut last_system_index = history.iter().rposition(|m| m.role == Role::System);

    let mut index = 0;
    while total(history) > budget && index < history.len() {
        if Some(index) == last_system_index {
            index += 1;
            continue;
        }
        history.remove(index);
        if let Some(last) = last_system_index {
            if index < last {
                last_system_index = Some(last - 1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use agent_protocol::ToolCall;

    use super::*;

    #[test]
    fn trim_drops_oldest_non_system_messages_first() {
        let store = HistoryStore::new(10);
        store.append("s1", Message::system("sys")).expect("append");
        for i in 0..10 {
            store
                .append("s1", Message::user(format!("message number {i} is fairly long")))
                .expect("append");
        }
        let snapshot = store.snapshot("s1");
        assert!(snapshot.iter().any(|m| m.role == Role::System));
        assert!(snapshot.iter().map(Message::estimated_tokens).sum::<usize>() <= 10 || snapshot.len() <= 2);
    }

    #[test]
    fn tool_message_requires_known_tool_call_id() {
        let store = HistoryStore::new(10_000);
        let err = store.append("s1", Message::tool("missing-call", "result")).expect_err("should fail");
        assert!(matches!(err, HistoryError::UnknownToolCallId(_)));
    }

    #[test]
    fn tool_message_is_accepted_after_matching_assistant_call() {
        let store = HistoryStore::new(10_000);
        store
            .append(
                "s1",
                Message::assistant_with_tool_calls(
                    "",
                    vec![ToolCall {
                        id: "call-1".to_string(),
                        name: "echo".to_string(),
                        arguments: serde_json::json!({}),
                    }],
                ),
            )
            .expect("append assistant");
        store.append("s1", Message::tool("call-1", "done")).expect("append tool");
        assert_eq!(store.snapshot("s1").len(), 2);
    }
}
