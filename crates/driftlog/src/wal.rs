//! The log engine.
//!
//! Orchestrates the append path (buffering, flushing, rotation,
//! retention), the recovery path, random reads by logical index, and
//! forward/reverse iteration.
//!
//! ```text
//! write(payload) ──► record codec ──► write buffer
//!                                          │ buffer threshold
//!                                          ▼
//!                                   active segment file ──► fsync
//!                                          │ size threshold
//!                                          ▼
//!                                       rotation ──► retention
//! ```
//!
//! A single readers-writer lock guards engine state: writers take it
//! exclusively, readers share it. The write buffer and the record cache
//! carry their own mutexes because readers touch both under the shared
//! lock.
//!
//! Retention is a hard cap: when a rotation would push the retained
//! segment count past `max_segment_file`, EVERY existing segment is
//! deleted, including the one that was just written, and logical indices
//! restart at zero. Size the cap accordingly.

use crate::buffer::WriteBuffer;
use crate::config::WalOptions;
use crate::error::{Error, Result};
use crate::janitor::{self, JanitorEvent, RetiredSegment};
use crate::record::{self, Record};
use crate::segment::{self, RecordPos, Segment};
use bytes::Bytes;
use crossbeam_channel::{unbounded, Sender};
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use std::fs::{self, File};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// A durable, append-only record log split across segment files.
///
/// All methods take `&self`; the engine is safe to share across threads
/// behind an `Arc`.
pub struct Wal {
    shared: Arc<WalShared>,
    janitor: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Wal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wal").finish_non_exhaustive()
    }
}

pub(crate) struct WalShared {
    pub(crate) options: WalOptions,
    state: RwLock<WalState>,
    buffer: WriteBuffer,
    cache: Mutex<LruCache<u64, Record>>,
    janitor_tx: Sender<JanitorEvent>,
}

struct WalState {
    /// Ordered by segment index; the last entry is the active segment.
    segments: Vec<Segment>,
    /// Next filename index. Climbs for the process lifetime, even across
    /// retention events.
    segment_index: u64,
    /// Logical index of the next record to write.
    pos: u64,
    closed: bool,
}

impl WalState {
    fn active_mut(&mut self) -> Option<&mut Segment> {
        self.segments.last_mut()
    }

    fn create_segment(&mut self, options: &WalOptions) -> Result<()> {
        let segment = Segment::create(&options.dir, &options.prefix, self.segment_index)?;
        debug!(
            segment = self.segment_index,
            path = %segment.path.display(),
            "created segment"
        );
        self.segments.push(segment);
        self.segment_index += 1;
        Ok(())
    }

    /// Close and unlink every segment; logical indices restart at zero.
    fn remove_all_segments(&mut self) -> Result<()> {
        for segment in &mut self.segments {
            segment.close_writer()?;
            fs::remove_file(&segment.path)?;
        }
        self.segments.clear();
        self.pos = 0;
        Ok(())
    }
}

impl Wal {
    /// Open a log in `options.dir`, recovering any existing segments.
    ///
    /// Recovery verifies the checksum of every record on disk; a mismatch
    /// or a truncated record aborts the open with [`Error::Corruption`].
    /// A fresh active segment is created for incoming writes.
    pub fn open(options: WalOptions) -> Result<Self> {
        let cache_size = NonZeroUsize::new(options.cache_size).ok_or_else(|| {
            Error::InvalidConfig("cache_size must be greater than zero".to_string())
        })?;

        fs::create_dir_all(&options.dir)?;

        let (segments, segment_index, pos) = load_segments(&options)?;
        info!(
            dir = %options.dir.display(),
            segments = segments.len(),
            records = pos,
            "log opened"
        );

        let mut state = WalState {
            segments,
            segment_index,
            pos,
            closed: false,
        };
        state.create_segment(&options)?;

        let (janitor_tx, janitor_rx) = unbounded();
        let lifetime_days = options.max_file_lifetime;
        let shared = Arc::new(WalShared {
            options,
            state: RwLock::new(state),
            buffer: WriteBuffer::new(),
            cache: Mutex::new(LruCache::new(cache_size)),
            janitor_tx,
        });

        let janitor = if lifetime_days > 0 {
            let worker = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name("wal-janitor".to_string())
                .spawn(move || janitor::run(worker, janitor_rx))?;
            Some(handle)
        } else {
            None
        };

        Ok(Self {
            shared,
            janitor: Mutex::new(janitor),
        })
    }

    /// Append a payload and return its logical index.
    ///
    /// The record is staged in the write buffer; it reaches disk once the
    /// buffer crosses its threshold, on [`sync`](Self::sync), or on
    /// [`close`](Self::close).
    pub fn write(&self, payload: &[u8]) -> Result<u64> {
        let mut state = self.shared.state.write();
        if state.closed {
            return Err(Error::closed());
        }

        let frame = record::encode(payload);
        let active = state.active_mut().ok_or_else(Error::closed)?;
        active.positions.push(RecordPos {
            offset: active.size,
            length: payload.len() as u32,
        });
        active.size += frame.len() as u64;

        state.pos += 1;
        let index = state.pos - 1;

        self.shared.buffer.write(&frame);
        if self.shared.buffer.len() >= self.shared.options.max_write_buffer_size {
            self.shared.flush_buffer(&mut state)?;
        }

        Ok(index)
    }

    /// Read the record at a logical index.
    ///
    /// Serves from the record cache when possible; otherwise decodes from
    /// the write buffer (for records not yet flushed) or from the segment
    /// file. Checksums are trusted from recovery-time validation.
    pub fn read_index(&self, index: u64) -> Result<Record> {
        self.shared.read_index(index)
    }

    /// Visit every record in insertion order. The callback receives the
    /// logical index and the record; returning `false` stops immediately.
    pub fn iter<F>(&self, callback: F) -> Result<()>
    where
        F: FnMut(u64, &Record) -> bool,
    {
        self.shared.iterate(Direction::Forward, callback)
    }

    /// Visit every record in reverse insertion order. The callback
    /// receives the logical index and the record; returning `false` stops
    /// immediately.
    pub fn iter_reverse<F>(&self, callback: F) -> Result<()>
    where
        F: FnMut(u64, &Record) -> bool,
    {
        self.shared.iterate(Direction::Reverse, callback)
    }

    /// Make every prior write durable: drain the write buffer into the
    /// active segment and fsync it. Never rotates the segment or touches
    /// retention; only the threshold-crossing flush inside
    /// [`write`](Self::write) does that.
    pub fn sync(&self) -> Result<()> {
        let mut state = self.shared.state.write();
        if state.closed {
            return Err(Error::closed());
        }
        self.shared.drain_and_sync(&mut state)
    }

    /// Drain the buffer, fsync and close every segment, and stop the
    /// janitor. Reads keep working afterwards; writes fail.
    pub fn close(&self) -> Result<()> {
        {
            let mut state = self.shared.state.write();
            if !state.closed {
                self.shared.drain_and_sync(&mut state)?;
                for segment in &mut state.segments {
                    segment.close_writer()?;
                }
                state.closed = true;
            }
        }
        let _ = self.shared.janitor_tx.send(JanitorEvent::Shutdown);
        if let Some(handle) = self.janitor.lock().take() {
            let _ = handle.join();
        }
        Ok(())
    }

    /// Close every handle, unlink every segment file, and reset the
    /// logical position. The log is unusable for writes afterwards.
    pub fn delete(&self) -> Result<()> {
        let mut state = self.shared.state.write();
        state.remove_all_segments()?;
        state.closed = true;
        self.shared.buffer.clear();
        self.shared.cache.lock().clear();
        let _ = self.shared.janitor_tx.send(JanitorEvent::Retained);
        info!(dir = %self.shared.options.dir.display(), "log deleted");
        Ok(())
    }

    /// Logical index of the most recently written record, or `None` when
    /// the log is empty (or was just reset by retention).
    pub fn current_position(&self) -> Option<u64> {
        self.shared.state.read().pos.checked_sub(1)
    }

    /// Filename index of the active segment, or `None` after `delete`.
    pub fn active_segment_index(&self) -> Option<u64> {
        self.shared
            .state
            .read()
            .segments
            .last()
            .map(|segment| segment.index)
    }

    /// Number of currently retained segments, the active one included.
    pub fn segment_count(&self) -> usize {
        self.shared.state.read().segments.len()
    }

    #[cfg(test)]
    pub(crate) fn shared(&self) -> &WalShared {
        &self.shared
    }
}

#[derive(Clone, Copy)]
enum Direction {
    Forward,
    Reverse,
}

impl WalShared {
    /// Drain the write buffer into the active segment and fsync it.
    fn drain_and_sync(&self, state: &mut WalState) -> Result<()> {
        let active = state.active_mut().ok_or_else(Error::closed)?;
        {
            let writer = active.writer_mut().ok_or_else(Error::closed)?;
            self.buffer.flush_to(writer)?;
        }
        active.sync()
    }

    /// The engine flush behind the buffer-threshold crossing: drain,
    /// fsync, then rotate if the active segment has reached its size
    /// threshold. Rotation (and with it retention) happens on this path
    /// only.
    fn flush_buffer(&self, state: &mut WalState) -> Result<()> {
        self.drain_and_sync(state)?;

        let rotation_due = state
            .segments
            .last()
            .is_some_and(|active| active.size >= self.options.max_segment_size);
        if rotation_due {
            self.rotate(state)?;
        }
        Ok(())
    }

    /// Close the active segment and open the next one. If the retained
    /// count would exceed the cap, every existing segment is retired
    /// first and logical indices restart at zero.
    fn rotate(&self, state: &mut WalState) -> Result<()> {
        let over_cap = self.options.max_segment_file > 0
            && state.segments.len() + 1 > self.options.max_segment_file;

        if over_cap {
            let dropped = state.segments.len();
            state.remove_all_segments()?;
            self.cache.lock().clear();
            info!(
                segments = dropped,
                cap = self.options.max_segment_file,
                "segment cap reached, retired all segments"
            );
        } else if let Some(active) = state.active_mut() {
            active.close_writer()?;
        }

        state.create_segment(&self.options)?;

        if over_cap {
            // Wake the janitor: the segment it was watching is gone.
            let _ = self.janitor_tx.send(JanitorEvent::Retained);
        }
        Ok(())
    }

    fn read_index(&self, index: u64) -> Result<Record> {
        let state = self.state.read();

        if let Some(record) = self.cache.lock().get(&index) {
            return Ok(record.clone());
        }

        let mut base = 0u64;
        for seg in &state.segments {
            let next = base + seg.record_count() as u64;
            if index >= base && index < next {
                let local = (index - base) as usize;
                let pos = seg.positions[local];
                let record = if seg.on_active_buffer(local) {
                    let snapshot = self.buffer.snapshot();
                    decode_buffered(seg, pos, &snapshot)?
                } else {
                    seg.read_at(pos.offset)?
                };
                self.cache.lock().put(index, record.clone());
                return Ok(record);
            }
            base = next;
        }

        Err(Error::NotFound(index))
    }

    fn iterate<F>(&self, direction: Direction, mut callback: F) -> Result<()>
    where
        F: FnMut(u64, &Record) -> bool,
    {
        let state = self.state.read();
        let snapshot = self.buffer.snapshot();

        match direction {
            Direction::Forward => {
                let mut index = 0u64;
                'segments: for seg in &state.segments {
                    let mut file: Option<File> = None;
                    for local in 0..seg.record_count() {
                        let record = load_record(seg, local, &snapshot, &mut file)?;
                        if !callback(index, &record) {
                            break 'segments;
                        }
                        index += 1;
                    }
                }
            }
            Direction::Reverse => {
                let mut index: u64 = state
                    .segments
                    .iter()
                    .map(|seg| seg.record_count() as u64)
                    .sum();
                'segments_rev: for seg in state.segments.iter().rev() {
                    let mut file: Option<File> = None;
                    for local in (0..seg.record_count()).rev() {
                        index -= 1;
                        let record = load_record(seg, local, &snapshot, &mut file)?;
                        if !callback(index, &record) {
                            break 'segments_rev;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Oldest segment's filename index and durable modification time, for
    /// the janitor.
    pub(crate) fn oldest_segment(&self) -> Option<(u64, SystemTime)> {
        self.state
            .read()
            .segments
            .first()
            .map(|segment| (segment.index, segment.mod_time))
    }

    /// Thread-safe retire entry point used by the janitor. Pops the
    /// oldest segment if it still matches `expected_index` and is not the
    /// active segment, then applies the configured retention hook to it
    /// outside the lock.
    pub(crate) fn retire_oldest(&self, expected_index: u64) {
        let retired = {
            let mut state = self.state.write();
            match state.segments.first() {
                Some(first) if first.index == expected_index => {
                    if !first.is_closed() {
                        debug!(
                            segment = first.index,
                            "oldest segment is still active, skipping retirement"
                        );
                        return;
                    }
                }
                _ => return,
            }

            let segment = state.segments.remove(0);
            state.pos = state.pos.saturating_sub(segment.record_count() as u64);
            // Remaining records shift down; cached mappings are stale.
            self.cache.lock().clear();
            RetiredSegment {
                index: segment.index,
                path: segment.path.clone(),
                mod_time: segment.mod_time,
            }
        };

        info!(
            segment = retired.index,
            path = %retired.path.display(),
            "retiring expired segment"
        );
        (self.options.janitor_hook)(&retired);
    }
}

/// Decode the record at `pos` for `seg`, from the buffer snapshot when it
/// has not been flushed yet, otherwise from the segment file. `file`
/// caches the transient read handle across calls for the same segment.
fn load_record(
    seg: &Segment,
    local: usize,
    snapshot: &Bytes,
    file: &mut Option<File>,
) -> Result<Record> {
    let pos = seg.positions[local];
    if seg.on_active_buffer(local) {
        return decode_buffered(seg, pos, snapshot);
    }
    if file.is_none() {
        *file = Some(File::open(&seg.path)?);
    }
    segment::read_record_at(file.as_ref().unwrap(), pos.offset)
}

/// Decode a buffer-resident record from a write-buffer snapshot.
fn decode_buffered(seg: &Segment, pos: RecordPos, snapshot: &Bytes) -> Result<Record> {
    let start = (pos.offset - seg.durable_size) as usize;
    let end = (pos.frame_end() - seg.durable_size) as usize;
    let Some(frame) = snapshot.get(start..end) else {
        return Err(Error::Corruption(format!(
            "buffered record at offset {} extends past the write buffer",
            pos.offset
        )));
    };

    let mut reader = frame;
    match record::read_record(&mut reader)? {
        Some(record) => Ok(record),
        None => Err(Error::Corruption(format!(
            "empty frame for buffered record at offset {}",
            pos.offset
        ))),
    }
}

/// Enumerate, verify, and order the segments already on disk.
fn load_segments(options: &WalOptions) -> Result<(Vec<Segment>, u64, u64)> {
    let mut discovered = Vec::new();
    for entry in fs::read_dir(&options.dir)? {
        let path = entry?.path();
        if !segment::is_segment_file(&path) {
            continue;
        }
        match segment::parse_segment_index(&path) {
            Some(index) => discovered.push((index, path)),
            None => warn!(path = %path.display(), "skipping unparseable segment filename"),
        }
    }
    // Directory walk order is not numeric order.
    discovered.sort_by_key(|(index, _)| *index);

    let mut segments = Vec::with_capacity(discovered.len());
    let mut pos = 0u64;
    let mut segment_index = 0u64;
    for (index, path) in discovered {
        let segment = Segment::recover(path, index)?;
        debug!(
            segment = index,
            records = segment.record_count(),
            "recovered segment"
        );
        pos += segment.record_count() as u64;
        segment_index = index + 1;
        segments.push(segment);
    }

    Ok((segments, segment_index, pos))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WalOptions;
    use std::sync::Arc as StdArc;
    use tempfile::TempDir;

    fn options_in(dir: &TempDir) -> WalOptions {
        WalOptions::new().with_dir(dir.path()).with_cache_size(8)
    }

    #[test]
    fn test_write_and_read_buffered() {
        let dir = TempDir::new().unwrap();
        let wal = Wal::open(options_in(&dir)).unwrap();

        for i in 0..5 {
            let index = wal.write(format!("payload {i}").as_bytes()).unwrap();
            assert_eq!(index, i);
        }

        // Nothing has crossed the buffer threshold yet; reads come from
        // the buffer snapshot.
        let record = wal.read_index(3).unwrap();
        assert_eq!(record.data.as_ref(), b"payload 3");

        wal.sync().unwrap();
        let record = wal.read_index(3).unwrap();
        assert_eq!(record.data.as_ref(), b"payload 3");
        wal.close().unwrap();
    }

    #[test]
    fn test_current_position_tracks_writes() {
        let dir = TempDir::new().unwrap();
        let wal = Wal::open(options_in(&dir)).unwrap();

        assert_eq!(wal.current_position(), None);
        for i in 0..10 {
            wal.write(b"x").unwrap();
            assert_eq!(wal.current_position(), Some(i));
        }
        wal.close().unwrap();
    }

    #[test]
    fn test_read_index_not_found() {
        let dir = TempDir::new().unwrap();
        let wal = Wal::open(options_in(&dir)).unwrap();
        wal.write(b"only one").unwrap();

        assert!(matches!(wal.read_index(1), Err(Error::NotFound(1))));
        wal.close().unwrap();
    }

    #[test]
    fn test_rotation_advances_active_segment() {
        let dir = TempDir::new().unwrap();
        let options = options_in(&dir)
            .with_max_write_buffer_size(1)
            .with_max_segment_size(64);
        let wal = Wal::open(options).unwrap();
        assert_eq!(wal.active_segment_index(), Some(0));

        // 26-byte frames, flushed every write; the third flush crosses
        // the 64-byte segment threshold.
        for _ in 0..3 {
            wal.write(b"0123456789").unwrap();
        }
        assert_eq!(wal.active_segment_index(), Some(1));
        assert_eq!(wal.segment_count(), 2);

        // Records in the now-closed segment stay readable.
        let record = wal.read_index(0).unwrap();
        assert_eq!(record.data.as_ref(), b"0123456789");
        wal.close().unwrap();
    }

    #[test]
    fn test_bulk_retention_resets_position() {
        let dir = TempDir::new().unwrap();
        let options = options_in(&dir)
            .with_max_write_buffer_size(1)
            .with_max_segment_size(64)
            .with_max_segment_file(2);
        let wal = Wal::open(options).unwrap();

        // Segments hold three 26-byte frames each. The third rotation
        // would retain a third segment, so everything is cleared.
        for _ in 0..7 {
            wal.write(b"0123456789").unwrap();
        }

        assert_eq!(wal.current_position(), Some(0));
        assert_eq!(wal.segment_count(), 1);

        let log_files: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "log"))
            .collect();
        assert_eq!(log_files.len(), 1);

        let record = wal.read_index(0).unwrap();
        assert_eq!(record.data.as_ref(), b"0123456789");
        wal.close().unwrap();
    }

    #[test]
    fn test_reopen_recovers_records() {
        let dir = TempDir::new().unwrap();
        {
            let wal = Wal::open(options_in(&dir)).unwrap();
            for i in 0..20 {
                wal.write(format!("entry {i}").as_bytes()).unwrap();
            }
            wal.close().unwrap();
        }

        let wal = Wal::open(options_in(&dir)).unwrap();
        assert_eq!(wal.current_position(), Some(19));
        for i in 0..20u64 {
            let record = wal.read_index(i).unwrap();
            assert_eq!(record.data.as_ref(), format!("entry {i}").as_bytes());
        }
        wal.close().unwrap();
    }

    #[test]
    fn test_write_after_close_fails() {
        let dir = TempDir::new().unwrap();
        let wal = Wal::open(options_in(&dir)).unwrap();
        wal.write(b"before").unwrap();
        wal.close().unwrap();

        assert!(wal.write(b"after").is_err());
        assert!(wal.sync().is_err());
        // Durable data stays readable.
        assert_eq!(wal.read_index(0).unwrap().data.as_ref(), b"before");
    }

    #[test]
    fn test_delete_removes_everything() {
        let dir = TempDir::new().unwrap();
        let wal = Wal::open(options_in(&dir)).unwrap();
        for _ in 0..5 {
            wal.write(b"doomed").unwrap();
        }
        wal.delete().unwrap();

        assert_eq!(wal.current_position(), None);
        assert_eq!(wal.segment_count(), 0);
        assert!(wal.write(b"too late").is_err());

        let log_files = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "log"))
            .count();
        assert_eq!(log_files, 0);
        wal.close().unwrap();
    }

    #[test]
    fn test_zero_cache_size_rejected() {
        let dir = TempDir::new().unwrap();
        let err = Wal::open(options_in(&dir).with_cache_size(0)).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_retire_oldest_shifts_indices() {
        let dir = TempDir::new().unwrap();
        let seen: StdArc<parking_lot::Mutex<Vec<u64>>> = StdArc::default();
        let seen_by_hook = StdArc::clone(&seen);
        let options = options_in(&dir)
            .with_max_write_buffer_size(1)
            .with_max_segment_size(64)
            .with_janitor_hook(StdArc::new(move |segment: &RetiredSegment| {
                seen_by_hook.lock().push(segment.index);
            }));
        let wal = Wal::open(options).unwrap();

        for i in 0..6 {
            wal.write(format!("payload {i}").as_bytes()).unwrap();
        }
        assert!(wal.segment_count() >= 2);

        wal.shared().retire_oldest(0);
        assert_eq!(seen.lock().as_slice(), &[0]);

        // Indices shift down by the retired segment's record count.
        let record = wal.read_index(0).unwrap();
        assert_eq!(record.data.as_ref(), b"payload 3");
        assert_eq!(wal.current_position(), Some(2));
        wal.close().unwrap();
    }

    #[test]
    fn test_retire_oldest_skips_active_segment() {
        let dir = TempDir::new().unwrap();
        let wal = Wal::open(options_in(&dir)).unwrap();
        wal.write(b"keep me").unwrap();

        wal.shared().retire_oldest(0);
        assert_eq!(wal.segment_count(), 1);
        assert_eq!(wal.read_index(0).unwrap().data.as_ref(), b"keep me");
        wal.close().unwrap();
    }

    #[test]
    fn test_recovery_sorts_segments_numerically() {
        let dir = TempDir::new().unwrap();
        let options = options_in(&dir)
            .with_max_write_buffer_size(1)
            .with_max_segment_size(26)
            .with_max_segment_file(0);
        {
            let wal = Wal::open(options.clone()).unwrap();
            // 28-byte frames against a 26-byte segment threshold: every
            // flush triggers a rotation, one record per segment.
            for i in 0..12 {
                wal.write(format!("log record {i}").as_bytes()).unwrap();
            }
            wal.close().unwrap();
        }

        let wal = Wal::open(options).unwrap();
        let mut order = Vec::new();
        wal.iter(|_, record| {
            order.push(String::from_utf8(record.data.to_vec()).unwrap());
            true
        })
        .unwrap();

        let expected: Vec<String> = (0..12).map(|i| format!("log record {i}")).collect();
        assert_eq!(order, expected);
        wal.close().unwrap();
    }
}
