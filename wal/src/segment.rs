use std::path::Path;
use std::path::PathBuf;

pub const META_FILE: &str = "wal.meta";

pub fn segment_file_name(index: u64) -> String {
    format!("segment-{index:06}.wal")
}

pub fn segment_path(dir: &Path, index: u64) -> PathBuf {
    dir.join(segment_file_name(index))
}

/// Parses `segment-NNNNNN.wal` back into its index. Returns `None` for any
/// other file name found in the WAL directory (e.g. `wal.meta`).
pub fn parse_segment_index(file_name: &str) -> Option<u64> {
    let stripped = file_name
        .strip_prefix("segment-")?
        .strip_suffix(".wal")?;
    stripped.parse().ok()
}

/// Bookkeeping the log keeps for each file on disk.
#[derive(Debug, Clone)]
pub struct SegmentMeta {
    pub index: u64,
    pub path: PathBuf,
    /// Position of the first entry in this segment, if any have been
    /// written yet.
    pub start: Option<u64>,
    /// Position of the last entry in this segment, if any have been written
    /// yet.
    pub end: Option<u64>,
    pub size: u64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Default)]
pub struct WalMeta {
    pub base: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_round_trip() {
        let name = segment_file_name(42);
        assert_eq!(name, "segment-000042.wal");
        assert_eq!(parse_segment_index(&name), Some(42));
    }

    #[test]
    fn rejects_unrelated_names() {
        assert_eq!(parse_segment_index("wal.meta"), None);
        assert_eq!(parse_segment_index("segment-abc.wal"), None);
    }
}
