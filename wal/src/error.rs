use std::io;

/// Errors surfaced by the write-ahead log.
///
/// Corruption (`Corrupt`) is always fatal and never silently skipped; a torn
/// write at the tail of a segment (a dangling partial record) is not an
/// error at all — it is discarded during `Open`/`Replay`.
#[derive(Debug, thiserror::Error)]
pub enum WalError {
    #[error("wal is closed")]
    Closed,

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("corrupt wal entry in {path}: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("invalid wal entry: {0}")]
    InvalidEntry(String),

    #[error("meta file error: {0}")]
    Meta(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, WalError>;
