mod record_log;

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::hash::Hash;
use std::hash::Hasher;
use std::path::PathBuf;
use std::sync::Mutex;

use agent_protocol::ApprovalDecision;
use agent_protocol::ApprovalRecord;
use agent_protocol::WhitelistEntry;
use agent_protocol::WhitelistKey;
use serde_json::Value;
use time::OffsetDateTime;

use crate::error::ApprovalError;
use record_log::RecordLog;

/// Thresholds for [`ApprovalQueue::gc`]. `None` disables that threshold.
#[derive(Debug, Clone, Copy, Default)]
pub struct GcOptions {
    pub max_age_days: Option<i64>,
    pub max_count: Option<usize>,
}

/// Outcome of a GC pass (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcStats {
    pub dropped: usize,
    pub before_count: usize,
    pub after_count: usize,
    pub before_bytes: u64,
    pub after_bytes: u64,
}

struct Inner {
    next_id: u64,
    records: BTreeMap<u64, ApprovalRecord>,
    /// Most recent WAL position at which each record id was last written;
    /// used to pick a safe GC truncation cutoff.
    anchors: BTreeMap<u64, u64>,
    whitelist: HashMap<WhitelistKey, WhitelistEntry>,
    gc_options: GcOptions,
}

/// Human/automatic gate on dangerous tool invocations: a pending-approval
/// queue, a per-session whitelist of previously approved `(tool, args)`
/// shapes, and a crash-safe append-only record log (§4.4).
pub struct ApprovalQueue {
    inner: Mutex<Inner>,
    log: RecordLog,
}

impl ApprovalQueue {
    pub fn open(
        wal_dir: impl Into<PathBuf>,
        segment_limit: u64,
        jsonl_path: impl Into<PathBuf>,
    ) -> Result<Self, ApprovalError> {
        let (log, entries) = RecordLog::open(wal_dir, segment_limit, jsonl_path)?;

        let mut records = BTreeMap::new();
        let mut anchors = BTreeMap::new();
        for (position, record) in entries {
            anchors.insert(record.id, position);
            records.insert(record.id, record);
        }
        let next_id = records.keys().next_back().map(|id| id + 1).unwrap_or(0);

        tracing::debug!(recovered = records.len(), "approval queue recovered from record log");

        Ok(Self {
            inner: Mutex::new(Inner {
                next_id,
                records,
                anchors,
                whitelist: HashMap::new(),
                gc_options: GcOptions::default(),
            }),
            log,
        })
    }

    /// `Request(session, tool, args) → (record, auto-approved)` (§4.4).
    pub fn request(&self, session_id: &str, tool: &str, args: Value) -> Result<(ApprovalRecord, bool), ApprovalError> {
        let key = whitelist_key(session_id, tool, &args);
        let mut inner = self.inner.lock().expect("approval queue lock poisoned");

        let now = OffsetDateTime::now_utc();
        if let Some(entry) = inner.whitelist.get(&key) {
            if entry.is_active_at(now) {
                let id = inner.next_id;
                inner.next_id += 1;
                let record = ApprovalRecord::new_auto(id, session_id, tool, args);
                let position = self.log.append(&record)?;
                inner.anchors.insert(id, position);
                inner.records.insert(id, record.clone());
                tracing::debug!(id, session_id, tool, "approval auto-granted from whitelist");
                return Ok((record, true));
            }
        }

        let id = inner.next_id;
        inner.next_id += 1;
        let record = ApprovalRecord::new_pending(id, session_id, tool, args);
        let position = self.log.append(&record)?;
        inner.anchors.insert(id, position);
        inner.records.insert(id, record.clone());
        tracing::debug!(id, session_id, tool, "approval request pending");
        Ok((record, false))
    }

    pub fn approve(&self, id: u64, comment: impl Into<String>, ttl_seconds: Option<u64>) -> Result<ApprovalRecord, ApprovalError> {
        self.transition(id, ApprovalDecision::Approved, comment, "user", Some(ttl_seconds))
    }

    pub fn reject(&self, id: u64, comment: impl Into<String>) -> Result<ApprovalRecord, ApprovalError> {
        self.transition(id, ApprovalDecision::Rejected, comment, "user", None)
    }

    pub fn timeout(&self, id: u64) -> Result<ApprovalRecord, ApprovalError> {
        self.transition(id, ApprovalDecision::Timeout, String::new(), "timeout", None)
    }

    fn transition(
        &self,
        id: u64,
        decision: ApprovalDecision,
        comment: impl Into<String>,
        approver: &str,
        whitelist_ttl: Option<Option<u64>>,
    ) -> Result<ApprovalRecord, ApprovalError> {
        let mut inner = self.inner.lock().expect("approval queue lock poisoned");

        let existing = inner.records.get(&id).ok_or(ApprovalError::NotFound(id))?.clone();
        if existing.decision.is_terminal() {
            return Err(ApprovalError::InvalidState {
                id,
                decision: existing.decision,
            });
        }

        let mut record = existing;
        record.decision = decision;
        record.decided_at = Some(OffsetDateTime::now_utc());
        record.comment = comment.into();
        record.approver = approver.to_string();

        if decision == ApprovalDecision::Approved {
            if let Some(ttl) = whitelist_ttl {
                let key = WhitelistKey {
                    session_id: record.session_id.clone(),
                    tool: record.tool.clone(),
                    args_hash: compute_args_hash(&record.args),
                };
                inner.whitelist.insert(key, WhitelistEntry::new(ttl));
            }
        }

        let position = self.log.append(&record)?;
        inner.anchors.insert(id, position);
        inner.records.insert(id, record.clone());
        tracing::debug!(id, decision = ?decision, "approval record transitioned");
        Ok(record)
    }

    /// Ordered list of pending records for `session_id` (§4.4).
    pub fn pending(&self, session_id: &str) -> Vec<ApprovalRecord> {
        let inner = self.inner.lock().expect("approval queue lock poisoned");
        inner
            .records
            .values()
            .filter(|r| r.session_id == session_id && r.decision == ApprovalDecision::Pending)
            .cloned()
            .collect()
    }

    pub fn get(&self, id: u64) -> Option<ApprovalRecord> {
        self.inner.lock().expect("approval queue lock poisoned").records.get(&id).cloned()
    }

    pub fn configure_gc(&self, options: GcOptions) {
        self.inner.lock().expect("approval queue lock poisoned").gc_options = options;
    }

    /// Stop-the-world GC: drops records older than the configured max age
    /// and/or beyond the configured most-recent count (§4.4, §9 decision:
    /// duplicate pending rows are a caller concern, not GC's).
    pub fn gc(&self) -> Result<GcStats, ApprovalError> {
        let mut inner = self.inner.lock().expect("approval queue lock poisoned");
        let before_count = inner.records.len();
        let before_bytes = self.log.jsonl_size();

        let options = inner.gc_options;
        if options.max_age_days.is_none() && options.max_count.is_none() {
            return Ok(GcStats {
                dropped: 0,
                before_count,
                after_count: before_count,
                before_bytes,
                after_bytes: before_bytes,
            });
        }

        let mut by_age: Vec<u64> = inner.records.keys().copied().collect();
        by_age.sort_by_key(|id| inner.records[id].requested_at);

        let now = OffsetDateTime::now_utc();
        let mut keep_ids: Vec<u64> = by_age.clone();

        if let Some(max_age_days) = options.max_age_days {
            let cutoff = now - time::Duration::days(max_age_days);
            keep_ids.retain(|id| inner.records[id].requested_at >= cutoff);
        }
        if let Some(max_count) = options.max_count {
            if keep_ids.len() > max_count {
                let drop_n = keep_ids.len() - max_count;
                keep_ids.drain(0..drop_n);
            }
        }

        let keep_ids: std::collections::HashSet<u64> = keep_ids.into_iter().collect();
        let dropped = before_count - keep_ids.len();

        if dropped == 0 {
            return Ok(GcStats {
                dropped: 0,
                before_count,
                after_count: before_count,
                before_bytes,
                after_bytes: before_bytes,
            });
        }

        let cutoff_position = keep_ids
            .iter()
            .filter_map(|id| inner.anchors.get(id).copied())
            .min()
            .unwrap_or(u64::MAX);

        inner.records.retain(|id, _| keep_ids.contains(id));
        inner.anchors.retain(|id, _| keep_ids.contains(id));

        self.log.gc(cutoff_position, &inner.records)?;

        let after_count = inner.records.len();
        let after_bytes = self.log.jsonl_size();
        tracing::info!(dropped, after_count, "approval record log gc complete");

        Ok(GcStats {
            dropped,
            before_count,
            after_count,
            before_bytes,
            after_bytes,
        })
    }

    pub fn is_whitelisted(&self, session_id: &str, tool: &str, args: &Value) -> bool {
        let key = whitelist_key(session_id, tool, args);
        let inner = self.inner.lock().expect("approval queue lock poisoned");
        inner
            .whitelist
            .get(&key)
            .map(|entry| entry.is_active_at(OffsetDateTime::now_utc()))
            .unwrap_or(false)
    }

    pub fn close(&self) -> Result<(), ApprovalError> {
        self.log.close()
    }
}

fn whitelist_key(session_id: &str, tool: &str, args: &Value) -> WhitelistKey {
    WhitelistKey {
        session_id: session_id.to_string(),
        tool: tool.to_string(),
        args_hash: compute_args_hash(args),
    }
}

/// Stable hash over a JSON value, independent of object-key insertion order.
fn compute_args_hash(args: &Value) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    hash_canonical(args, &mut hasher);
    hasher.finish()
}

fn hash_canonical(value: &Value, hasher: &mut impl Hasher) {
    match value {
        Value::Null => 0u8.hash(hasher),
        Value::Bool(b) => {
            1u8.hash(hasher);
            b.hash(hasher);
        }
        Value::Number(n) => {
            2u8.hash(hasher);
            n.to_string().hash(hasher);
        }
        Value::String(s) => {
            3u8.hash(hasher);
            s.hash(hasher);
        }
        Value::Array(items) => {
            4u8.hash(hasher);
            items.len().hash(hasher);
            for item in items {
                hash_canonical(item, hasher);
            }
        }
        Value::Object(map) => {
            5u8.hash(hasher);
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            keys.len().hash(hasher);
            for key in keys {
                key.hash(hasher);
                hash_canonical(&map[key], hasher);
            }
        }
    }
}
