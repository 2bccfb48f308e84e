use std::collections::BTreeMap;
use std::fs;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use agent_protocol::ApprovalRecord;
use agent_wal::Wal;

use crate::error::ApprovalError;

/// Append-only persistence for [`ApprovalRecord`]s: a `Wal` for crash-safe
/// binary durability plus a mirrored `.jsonl` file in the exact wire format
/// named by §6 ("JSON-lines, one serialised record per line, UTF-8, LF
/// terminator"). Every mutation of a record (creation, then each terminal
/// transition) appends a fresh line; replay folds by id, last line wins.
pub struct RecordLog {
    wal: Wal,
    jsonl_path: PathBuf,
}

impl RecordLog {
    /// Opens (or creates) the log rooted at `wal_dir`/`jsonl_path`, folding
    /// every persisted line by record id (last write wins) to rebuild the
    /// in-memory index. Returns the log plus `(position, record)` pairs in
    /// append order, which callers use to recover `next_id` and the
    /// id→position anchor map.
    pub fn open(
        wal_dir: impl Into<PathBuf>,
        segment_limit: u64,
        jsonl_path: impl Into<PathBuf>,
    ) -> Result<(Self, Vec<(u64, ApprovalRecord)>), ApprovalError> {
        let wal = Wal::open(wal_dir, segment_limit)?;
        let jsonl_path = jsonl_path.into();
        if let Some(parent) = jsonl_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut entries = Vec::new();
        wal.replay(|entry| {
            if entry.entry_type == "approval_record" {
                let record: ApprovalRecord = serde_json::from_slice(&entry.payload)?;
                entries.push((entry.position, record));
            }
            Ok(())
        })?;

        Ok((Self { wal, jsonl_path }, entries))
    }

    /// Appends one line representing the current state of `record`, to both
    /// the WAL and the JSON-lines mirror, returning the WAL position it was
    /// assigned.
    pub fn append(&self, record: &ApprovalRecord) -> Result<u64, ApprovalError> {
        let payload = serde_json::to_vec(record)?;
        let position = self.wal.append("approval_record", &payload)?;
        self.wal.sync()?;

        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = OpenOptions::new().create(true).append(true).open(&self.jsonl_path)?;
        file.write_all(line.as_bytes())?;
        file.sync_data()?;

        Ok(position)
    }

    /// Drops every physical line with position `< cutoff`, then rewrites the
    /// JSON-lines mirror to contain exactly `surviving` (one line per
    /// surviving record, atomic temp-file rename per §6).
    pub fn gc(&self, cutoff: u64, surviving: &BTreeMap<u64, ApprovalRecord>) -> Result<(), ApprovalError> {
        self.wal.truncate(cutoff)?;

        let tmp_path = self.jsonl_path.with_extension("jsonl.tmp");
        {
            let mut tmp = fs::File::create(&tmp_path)?;
            for record in surviving.values() {
                let mut line = serde_json::to_string(record)?;
                line.push('\n');
                tmp.write_all(line.as_bytes())?;
            }
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &self.jsonl_path)?;
        Ok(())
    }

    pub fn jsonl_size(&self) -> u64 {
        fs::metadata(&self.jsonl_path).map(|m| m.len()).unwrap_or(0)
    }

    pub fn jsonl_path(&self) -> &Path {
        &self.jsonl_path
    }

    pub fn close(&self) -> Result<(), ApprovalError> {
        Ok(self.wal.close()?)
    }
}
