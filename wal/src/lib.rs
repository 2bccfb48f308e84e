//! A segmented, CRC-guarded write-ahead log.
//!
//! Scoped to a directory; every operation is serialised by a single mutex so
//! `Append` is effectively O(1) amortised and `Replay` always observes a
//! consistent, fsynced view of prior writers.

mod entry;
mod error;
mod segment;

pub use entry::WalEntry;
pub use error::Result;
pub use error::WalError;

use std::fs;
use std::fs::File;
use std::fs::OpenOptions;
use std::io::Read;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;

use segment::SegmentMeta;
use segment::WalMeta;
use segment::META_FILE;
use segment::parse_segment_index;
use segment::segment_path;

/// Default rotation threshold for a single segment file (§4.1).
pub const DEFAULT_SEGMENT_LIMIT: u64 = 10 * 1024 * 1024;

struct ActiveSegment {
    index: u64,
    file: File,
}

struct Inner {
    base: u64,
    next_position: u64,
    segments: Vec<SegmentMeta>,
    active: ActiveSegment,
    closed: bool,
}

/// A segmented append-only log. Cheap to clone-by-reference (wrap in `Arc`
/// at the call site); internally single-writer via a mutex, matching the
/// "one internal mutex" concurrency policy of the durable components that
/// sit on top of it (the approval record log, in particular).
pub struct Wal {
    dir: PathBuf,
    segment_limit: u64,
    inner: Mutex<Inner>,
}

impl Wal {
    /// Opens (creating if necessary) a WAL rooted at `dir`, replaying any
    /// existing segments to recover `base` and the next position to assign.
    pub fn open(dir: impl Into<PathBuf>, segment_limit: u64) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let base = read_meta(&dir)?.base;

        let mut indices: Vec<u64> = fs::read_dir(&dir)?
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().into_string().ok())
            .filter_map(|name| parse_segment_index(&name))
            .collect();
        indices.sort_unstable();

        let mut segments = Vec::with_capacity(indices.len());
        let mut cursor = base;

        for index in &indices {
            let path = segment_path(&dir, *index);
            let mut bytes = Vec::new();
            File::open(&path)?.read_to_end(&mut bytes)?;

            let mut offset = 0usize;
            let mut start: Option<u64> = None;
            let mut end: Option<u64> = None;

            loop {
                match entry::decode(&bytes[offset..]) {
                    Ok(entry::Decoded::Entry { consumed, .. }) => {
                        let position = cursor;
                        cursor += 1;
                        start.get_or_insert(position);
                        end = Some(position);
                        offset += consumed;
                    }
                    Ok(entry::Decoded::Partial) => {
                        if offset < bytes.len() {
                            tracing::warn!(
                                path = %path.display(),
                                discarded_bytes = bytes.len() - offset,
                                "discarding torn write at wal segment tail"
                            );
                            let f = OpenOptions::new().write(true).open(&path)?;
                            f.set_len(offset as u64)?;
                        }
                        break;
                    }
                    Err(reason) => {
                        return Err(WalError::Corrupt {
                            path: path.display().to_string(),
                            reason,
                        });
                    }
                }
            }

            segments.push(SegmentMeta {
                index: *index,
                path,
                start,
                end,
                size: offset as u64,
            });
        }

        if segments.is_empty() {
            let path = segment_path(&dir, 0);
            File::create(&path)?;
            segments.push(SegmentMeta {
                index: 0,
                path,
                start: None,
                end: None,
                size: 0,
            });
        }

        let active_index = segments
            .last()
            .expect("segments is non-empty by construction")
            .index;
        let active_path = segments
            .last()
            .expect("segments is non-empty by construction")
            .path
            .clone();
        let active_file = OpenOptions::new().append(true).open(&active_path)?;

        Ok(Self {
            dir,
            segment_limit,
            inner: Mutex::new(Inner {
                base,
                next_position: cursor,
                segments,
                active: ActiveSegment {
                    index: active_index,
                    file: active_file,
                },
                closed: false,
            }),
        })
    }

    /// Appends an entry, returning the dense position assigned to it.
    pub fn append(&self, entry_type: &str, payload: &[u8]) -> Result<u64> {
        let encoded =
            entry::encode(entry_type, payload).map_err(WalError::InvalidEntry)?;

        let mut inner = self.inner.lock().expect("wal mutex poisoned");
        if inner.closed {
            return Err(WalError::Closed);
        }

        let active_size = inner
            .segments
            .last()
            .expect("segments is non-empty")
            .size;
        if active_size > 0 && active_size + encoded.len() as u64 > self.segment_limit {
            self.rotate(&mut inner)?;
        }

        inner.active.file.write_all(&encoded)?;

        let position = inner.next_position;
        inner.next_position += 1;

        let seg = inner.segments.last_mut().expect("segments is non-empty");
        seg.start.get_or_insert(position);
        seg.end = Some(position);
        seg.size += encoded.len() as u64;

        Ok(position)
    }

    fn rotate(&self, inner: &mut Inner) -> Result<()> {
        inner.active.file.flush()?;
        let next_index = inner.active.index + 1;
        let path = segment_path(&self.dir, next_index);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;

        inner.segments.push(SegmentMeta {
            index: next_index,
            path,
            start: None,
            end: None,
            size: 0,
        });
        inner.active = ActiveSegment {
            index: next_index,
            file,
        };
        Ok(())
    }

    /// Flushes and fsyncs the active segment.
    pub fn sync(&self) -> Result<()> {
        let mut inner = self.inner.lock().expect("wal mutex poisoned");
        if inner.closed {
            return Err(WalError::Closed);
        }
        inner.active.file.flush()?;
        inner.active.file.sync_data()?;
        Ok(())
    }

    /// Invokes `f` for every entry currently on disk, in append order,
    /// stopping at the first error `f` returns.
    pub fn replay<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(WalEntry) -> Result<()>,
    {
        let inner = self.inner.lock().expect("wal mutex poisoned");
        let mut cursor = inner.base;

        for seg in &inner.segments {
            let mut bytes = Vec::new();
            File::open(&seg.path)?.read_to_end(&mut bytes)?;

            let mut offset = 0usize;
            loop {
                match entry::decode(&bytes[offset..]) {
                    Ok(entry::Decoded::Entry {
                        entry_type,
                        payload,
                        consumed,
                    }) => {
                        let position = cursor;
                        cursor += 1;
                        offset += consumed;
                        f(WalEntry {
                            position,
                            entry_type,
                            payload: payload.to_vec(),
                        })?;
                    }
                    Ok(entry::Decoded::Partial) => break,
                    Err(reason) => {
                        return Err(WalError::Corrupt {
                            path: seg.path.display().to_string(),
                            reason,
                        });
                    }
                }
            }
        }

        Ok(())
    }

    /// Drops all entries with position `< upto`, rewriting any segment that
    /// straddles the boundary. `base` advances to `upto`.
    pub fn truncate(&self, upto: u64) -> Result<()> {
        let mut inner = self.inner.lock().expect("wal mutex poisoned");
        if inner.closed {
            return Err(WalError::Closed);
        }
        if upto <= inner.base {
            return Ok(());
        }

        let active_index = inner.active.index;
        let mut removed_active = false;
        let mut kept = Vec::with_capacity(inner.segments.len());

        for seg in std::mem::take(&mut inner.segments) {
            match seg.end {
                None => kept.push(seg),
                Some(end) if end < upto => {
                    fs::remove_file(&seg.path)?;
                    if seg.index == active_index {
                        removed_active = true;
                    }
                }
                Some(_) if seg.start.map(|s| s >= upto).unwrap_or(false) => kept.push(seg),
                Some(end) => {
                    let seg_start = seg.start.expect("a sealed segment with an end has a start");
                    let rewritten = rewrite_segment_from(&seg.path, seg_start, upto)?;
                    if seg.index == active_index {
                        inner.active.file.flush()?;
                        inner.active.file = OpenOptions::new().append(true).open(&seg.path)?;
                    }
                    kept.push(SegmentMeta {
                        index: seg.index,
                        path: seg.path,
                        start: Some(upto),
                        end: Some(end),
                        size: rewritten,
                    });
                }
            }
        }

        if removed_active {
            let next_index = kept.last().map(|s| s.index + 1).unwrap_or(active_index + 1);
            let path = segment_path(&self.dir, next_index);
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            kept.push(SegmentMeta {
                index: next_index,
                path,
                start: None,
                end: None,
                size: 0,
            });
            inner.active = ActiveSegment {
                index: next_index,
                file,
            };
        }

        inner.segments = kept;
        inner.base = upto;
        write_meta(&self.dir, &WalMeta { base: upto })?;
        Ok(())
    }

    /// Flushes and marks the log closed; further operations return
    /// [`WalError::Closed`].
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock().expect("wal mutex poisoned");
        if inner.closed {
            return Ok(());
        }
        inner.active.file.flush()?;
        inner.active.file.sync_data()?;
        inner.closed = true;
        Ok(())
    }

    pub fn base(&self) -> u64 {
        self.inner.lock().expect("wal mutex poisoned").base
    }

    pub fn next_position(&self) -> u64 {
        self.inner.lock().expect("wal mutex poisoned").next_position
    }
}

/// Rewrites `path` in place (via temp file + atomic rename) keeping only
/// entries whose absolute position (`seg_start + index-within-segment`) is
/// `>= upto`. Returns the new file size in bytes.
fn rewrite_segment_from(path: &Path, seg_start: u64, upto: u64) -> Result<u64> {
    let mut bytes = Vec::new();
    File::open(path)?.read_to_end(&mut bytes)?;

    let mut offset = 0usize;
    let mut position = seg_start;
    let mut kept = Vec::new();

    loop {
        match entry::decode(&bytes[offset..]) {
            Ok(entry::Decoded::Entry {
                entry_type,
                payload,
                consumed,
            }) => {
                if position >= upto {
                    let enc =
                        entry::encode(&entry_type, payload).map_err(WalError::InvalidEntry)?;
                    kept.extend_from_slice(&enc);
                }
                position += 1;
                offset += consumed;
            }
            Ok(entry::Decoded::Partial) => break,
            Err(reason) => {
                return Err(WalError::Corrupt {
                    path: path.display().to_string(),
                    reason,
                });
            }
        }
    }

    let tmp_path = path.with_extension("wal.tmp");
    {
        let mut tmp = File::create(&tmp_path)?;
        tmp.write_all(&kept)?;
        tmp.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(kept.len() as u64)
}

fn read_meta(dir: &Path) -> Result<WalMeta> {
    let path = dir.join(META_FILE);
    if !path.exists() {
        return Ok(WalMeta::default());
    }
    let data = fs::read(&path)?;
    Ok(serde_json::from_slice(&data)?)
}

fn write_meta(dir: &Path, meta: &WalMeta) -> Result<()> {
    let path = dir.join(META_FILE);
    let tmp_path = dir.join(format!("{META_FILE}.tmp"));
    let data = serde_json::to_vec(meta)?;
    {
        let mut tmp = File::create(&tmp_path)?;
        tmp.write_all(&data)?;
        tmp.sync_all()?;
    }
    fs::rename(&tmp_path, &path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Seek;
    use std::io::SeekFrom;

    fn replay_all(wal: &Wal) -> Vec<WalEntry> {
        let mut out = Vec::new();
        wal.replay(|e| {
            out.push(e);
            Ok(())
        })
        .expect("replay");
        out
    }

    #[test]
    fn append_assigns_dense_monotonic_positions() {
        let dir = tempfile::tempdir().expect("tempdir");
        let wal = Wal::open(dir.path(), DEFAULT_SEGMENT_LIMIT).expect("open");

        let positions: Vec<u64> = (0..5)
            .map(|i| wal.append("t", format!("entry-{i}").as_bytes()).expect("append"))
            .collect();
        assert_eq!(positions, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn replay_after_reopen_preserves_order_and_positions() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let wal = Wal::open(dir.path(), DEFAULT_SEGMENT_LIMIT).expect("open");
            for i in 0..5 {
                wal.append("t", format!("entry-{i}").as_bytes()).expect("append");
            }
            wal.sync().expect("sync");
        }

        let wal = Wal::open(dir.path(), DEFAULT_SEGMENT_LIMIT).expect("reopen");
        let entries = replay_all(&wal);
        assert_eq!(entries.len(), 5);
        for (i, e) in entries.iter().enumerate() {
            assert_eq!(e.position, i as u64);
            assert_eq!(e.payload, format!("entry-{i}").into_bytes());
        }
        assert_eq!(wal.next_position(), 5);
    }

    #[test]
    fn crash_recovery_discards_torn_tail_write() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let wal = Wal::open(dir.path(), DEFAULT_SEGMENT_LIMIT).expect("open");
            for i in 0..5 {
                wal.append("t", format!("E{i}").as_bytes()).expect("append");
            }
            wal.sync().expect("sync");
        }

        // Manually append a dangling, truncated record to the active segment.
        let seg_path = segment_path(dir.path(), 0);
        {
            let mut f = OpenOptions::new().append(true).open(&seg_path).expect("open segment");
            f.write_all(&[1, 2, 3]).expect("write torn bytes");
        }

        let wal = Wal::open(dir.path(), DEFAULT_SEGMENT_LIMIT).expect("reopen after crash");
        let entries = replay_all(&wal);
        assert_eq!(entries.len(), 5);
        assert_eq!(entries.iter().map(|e| e.position).collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);

        let next = wal.append("t", b"E5").expect("append after recovery");
        assert_eq!(next, 5);
    }

    #[test]
    fn truncate_drops_entries_before_upto() {
        let dir = tempfile::tempdir().expect("tempdir");
        let wal = Wal::open(dir.path(), DEFAULT_SEGMENT_LIMIT).expect("open");
        for i in 0..10 {
            wal.append("t", format!("E{i}").as_bytes()).expect("append");
        }

        wal.truncate(4).expect("truncate");
        let entries = replay_all(&wal);
        assert_eq!(entries.first().expect("non-empty").position, 4);
        assert_eq!(entries.len(), 6);
        assert_eq!(wal.base(), 4);

        // Positions keep advancing from where they left off, not from upto.
        let next = wal.append("t", b"E10").expect("append");
        assert_eq!(next, 10);
    }

    #[test]
    fn truncate_persists_across_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let wal = Wal::open(dir.path(), DEFAULT_SEGMENT_LIMIT).expect("open");
            for i in 0..10 {
                wal.append("t", format!("E{i}").as_bytes()).expect("append");
            }
            wal.truncate(7).expect("truncate");
            wal.sync().expect("sync");
        }

        let wal = Wal::open(dir.path(), DEFAULT_SEGMENT_LIMIT).expect("reopen");
        let entries = replay_all(&wal);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries.first().expect("non-empty").position, 7);
    }

    #[test]
    fn empty_directory_opens_and_replays_cleanly() {
        let dir = tempfile::tempdir().expect("tempdir");
        let wal = Wal::open(dir.path(), DEFAULT_SEGMENT_LIMIT).expect("open");
        assert!(replay_all(&wal).is_empty());
        assert_eq!(wal.next_position(), 0);
    }

    #[test]
    fn segment_rotates_before_exceeding_cap() {
        let dir = tempfile::tempdir().expect("tempdir");
        // A tiny cap forces rotation after just a couple of entries.
        let wal = Wal::open(dir.path(), 64).expect("open");
        for i in 0..20 {
            wal.append("t", format!("payload-{i:03}").as_bytes())
                .expect("append");
        }
        wal.sync().expect("sync");

        let segment_count = fs::read_dir(dir.path())
            .expect("read_dir")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("segment-"))
            .count();
        assert!(segment_count > 1, "expected rotation to create multiple segments");

        for entry in fs::read_dir(dir.path()).expect("read_dir").filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.extension().map(|e| e == "wal").unwrap_or(false) {
                let len = entry.metadata().expect("metadata").len();
                assert!(len <= 64 + 64, "segment {path:?} grew well past the cap: {len}");
            }
        }

        let entries = replay_all(&wal);
        assert_eq!(entries.len(), 20);
    }

    #[test]
    fn close_rejects_further_operations() {
        let dir = tempfile::tempdir().expect("tempdir");
        let wal = Wal::open(dir.path(), DEFAULT_SEGMENT_LIMIT).expect("open");
        wal.append("t", b"x").expect("append");
        wal.close().expect("close");

        assert!(matches!(wal.append("t", b"y"), Err(WalError::Closed)));
        assert!(matches!(wal.sync(), Err(WalError::Closed)));
        assert!(matches!(wal.truncate(1), Err(WalError::Closed)));
    }

    #[test]
    fn bad_crc_on_open_is_fatal_corruption() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let wal = Wal::open(dir.path(), DEFAULT_SEGMENT_LIMIT).expect("open");
            wal.append("t", b"hello").expect("append");
            wal.sync().expect("sync");
        }

        let seg_path = segment_path(dir.path(), 0);
        let mut f = OpenOptions::new().write(true).open(&seg_path).expect("open segment");
        // Flip a byte inside the body (past the fixed header) to corrupt the CRC
        // without merely truncating the record.
        f.seek(SeekFrom::Start(12)).expect("seek");
        f.write_all(&[0xFF]).expect("corrupt a body byte");

        let result = Wal::open(dir.path(), DEFAULT_SEGMENT_LIMIT);
        assert!(matches!(result, Err(WalError::Corrupt { .. })));
    }
}
