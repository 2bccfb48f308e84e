use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;
use std::time::SystemTime;

use agent_protocol::Message;
use serde::Deserialize;
use serde::Serialize;
use time::OffsetDateTime;

use crate::error::HistoryError;

/// On-disk envelope for a session's history snapshot: the message array plus
/// the session's tag map and creation timestamp (§10.5), so a reopened
/// snapshot round-trips the full `Session` value, not just its messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    pub messages: Vec<Message>,
}

/// Writes/reads session snapshots to `<root>/.history/<session>.json`
/// (§4.6).
pub struct HistoryPersister {
    root: PathBuf,
}

impl HistoryPersister {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.root.join(".history").join(format!("{session_id}.json"))
    }

    pub fn save(&self, snapshot: &SessionSnapshot) -> Result<(), HistoryError> {
        let path = self.path_for(&snapshot.session_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(snapshot)?;
        fs::write(path, data)?;
        Ok(())
    }

    pub fn load(&self, session_id: &str) -> Result<Option<SessionSnapshot>, HistoryError> {
        let path = self.path_for(session_id);
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read(path)?;
        Ok(Some(serde_json::from_slice(&data)?))
    }

    /// Removes snapshots whose mtime is older than `max_age`.
    pub fn cleanup(&self, max_age: Duration) -> Result<usize, HistoryError> {
        let dir = self.root.join(".history");
        if !dir.exists() {
            return Ok(0);
        }
        let now = SystemTime::now();
        let mut removed = 0;
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                let modified = entry.metadata()?.modified()?;
                if now.duration_since(modified).unwrap_or(Duration::ZERO) > max_age {
                    fs::remove_file(&path)?;
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}
