use std::collections::HashMap;

use serde::Deserialize;
use serde::Serialize;
use time::OffsetDateTime;

/// Session identifiers are opaque caller-supplied strings.
pub type SessionId = String;

/// Metadata the Runtime's Session Store tracks per session.
///
/// The conversation history itself lives in the Message History Store (C6),
/// keyed by [`Session::id`]; this type only carries the bookkeeping an LRU
/// session store needs to decide what to evict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_used_at: OffsetDateTime,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: id.into(),
            created_at: now,
            last_used_at: now,
            tags: HashMap::new(),
        }
    }

    pub fn touch(&mut self) {
        self.last_used_at = OffsetDateTime::now_utc();
    }
}
