//! The key-value engine.
//!
//! ## Directory Layout
//!
//! ```text
//! <path>/
//! ├─ LOCK          # Advisory lock for single-process access
//! └─ commit.log    # Append-only log of write batches
//! ```
//!
//! ## Recovery Policy
//!
//! On open, every frame of the commit log is replayed in order.
//!
//! - A frame running past the end of the log is a torn write from a crash
//!   mid-append. It is discarded and the log is truncated to the last
//!   complete frame.
//! - A complete frame failing its CRC, carrying an undecodable batch or a
//!   non-increasing sequence number is corruption. The engine refuses to
//!   open rather than silently drop committed data.

use crate::backend::StorageBackend;
use crate::batch::{encode_frame, read_frame, BatchOp, FrameRead, WriteBatch};
use crate::error::{StorageError, StorageResult};
use crate::file::FileBackend;
use crate::memory::InMemoryBackend;
use crate::memtable::Memtable;
use crate::range::{Direction, KeyRange};
use crate::snapshot::EngineSnapshot;
use crate::types::SequenceNumber;
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Name of the advisory lock file inside the engine directory.
pub const LOCK_FILE: &str = "LOCK";
/// Name of the commit log inside the engine directory.
pub const LOG_FILE: &str = "commit.log";

/// Read access shared by the live engine and its snapshots.
pub trait KvRead: Send + Sync {
    /// Returns the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine is closed.
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>>;

    /// Visits every key in `range` in `direction` order until `visit`
    /// returns false.
    ///
    /// The engine holds a read lock for the duration of the scan, so
    /// `visit` must not call back into the engine.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine is closed.
    fn scan(
        &self,
        range: &KeyRange,
        direction: Direction,
        visit: &mut dyn FnMut(&[u8], &[u8]) -> bool,
    ) -> StorageResult<()>;

    /// Returns true if `key` is present.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine is closed.
    fn contains(&self, key: &[u8]) -> StorageResult<bool> {
        Ok(self.get(key)?.is_some())
    }
}

/// Options for opening an [`Engine`].
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Create the directory if it doesn't exist.
    pub create_if_missing: bool,
    /// Fail if the directory already holds a non-empty commit log.
    pub error_if_exists: bool,
    /// `fsync` the commit log on every write (safer but slower).
    pub sync_on_commit: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            error_if_exists: false,
            sync_on_commit: true,
        }
    }
}

pub(crate) struct EngineState {
    pub(crate) memtable: Memtable,
    pub(crate) latest: SequenceNumber,
}

pub(crate) struct EngineInner {
    options: EngineOptions,
    /// Lock order: `log`, then `state`, then `pins`.
    log: Mutex<Box<dyn StorageBackend>>,
    pub(crate) state: RwLock<EngineState>,
    /// Pinned snapshot sequences with their reference counts.
    pins: Mutex<BTreeMap<u64, usize>>,
    closed: AtomicBool,
    /// Set when a failed append could not be cut back out of the log.
    poisoned: AtomicBool,
    _lock_file: Option<File>,
}

impl EngineInner {
    fn pinned(&self) -> Vec<u64> {
        self.pins.lock().keys().copied().collect()
    }

    pub(crate) fn pin(&self, seq: SequenceNumber) {
        *self.pins.lock().entry(seq.as_u64()).or_insert(0) += 1;
    }

    pub(crate) fn unpin(&self, seq: SequenceNumber) {
        let mut state = self.state.write();
        let remaining = {
            let mut pins = self.pins.lock();
            if let Some(count) = pins.get_mut(&seq.as_u64()) {
                *count -= 1;
                if *count == 0 {
                    pins.remove(&seq.as_u64());
                }
            }
            pins.keys().copied().collect::<Vec<_>>()
        };
        state.memtable.prune_all(&remaining);
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        let _ = self.log.get_mut().sync();
    }
}

/// An ordered, durable map of byte keys to byte values.
///
/// `Engine` is a cheap handle; clones share the same underlying state.
///
/// # Example
///
/// ```rust
/// use meshdb_storage::{Engine, KvRead, WriteBatch};
///
/// let engine = Engine::in_memory();
/// let mut batch = WriteBatch::new();
/// batch.put(b"k".to_vec(), b"v1".to_vec());
/// engine.write(batch).unwrap();
///
/// let snapshot = engine.snapshot();
///
/// let mut batch = WriteBatch::new();
/// batch.put(b"k".to_vec(), b"v2".to_vec());
/// engine.write(batch).unwrap();
///
/// assert_eq!(snapshot.get(b"k").unwrap(), Some(b"v1".to_vec()));
/// assert_eq!(engine.get(b"k").unwrap(), Some(b"v2".to_vec()));
/// ```
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Opens or creates an engine in the directory `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory is missing and `create_if_missing` is false
    /// - The log exists and `error_if_exists` is true
    /// - Another process holds the lock (`StorageError::Locked`)
    /// - The commit log is corrupted
    pub fn open(path: &Path, options: EngineOptions) -> StorageResult<Self> {
        if !path.exists() {
            if !options.create_if_missing {
                return Err(StorageError::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("database directory does not exist: {}", path.display()),
                )));
            }
            fs::create_dir_all(path)?;
        }
        if !path.is_dir() {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("path is not a directory: {}", path.display()),
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked);
        }

        let log_path = path.join(LOG_FILE);
        let existing = fs::metadata(&log_path).map(|m| m.len() > 0).unwrap_or(false);
        if existing && options.error_if_exists {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("database already exists: {}", path.display()),
            )));
        }

        let backend = FileBackend::open(&log_path)?;
        info!(path = %path.display(), "opening engine");
        Self::recover(Box::new(backend), options, Some(lock_file))
    }

    /// Opens an engine over an arbitrary backend, replaying its content.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend content is corrupted.
    pub fn with_backend(
        backend: Box<dyn StorageBackend>,
        options: EngineOptions,
    ) -> StorageResult<Self> {
        Self::recover(backend, options, None)
    }

    /// Creates an empty, non-persistent engine.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::assemble(
            Box::new(InMemoryBackend::new()),
            EngineOptions::default(),
            None,
            Memtable::default(),
            SequenceNumber::ZERO,
        )
    }

    fn recover(
        mut backend: Box<dyn StorageBackend>,
        options: EngineOptions,
        lock_file: Option<File>,
    ) -> StorageResult<Self> {
        let data = backend.read_all()?;
        let mut memtable = Memtable::default();
        let mut latest = SequenceNumber::ZERO;
        let mut offset = 0usize;
        let mut frames = 0usize;

        loop {
            match read_frame(&data[offset..], offset as u64)? {
                FrameRead::End => break,
                FrameRead::Torn => {
                    warn!(
                        offset,
                        discarded = data.len() - offset,
                        "discarding torn commit log tail"
                    );
                    backend.truncate(offset as u64)?;
                    break;
                }
                FrameRead::Frame {
                    sequence,
                    batch,
                    len,
                } => {
                    if sequence <= latest {
                        return Err(StorageError::corrupted(
                            offset as u64,
                            format!("sequence {sequence} does not follow {latest}"),
                        ));
                    }
                    apply_batch(&mut memtable, sequence, &batch, &[]);
                    latest = sequence;
                    offset += len;
                    frames += 1;
                }
            }
        }

        info!(frames, latest = latest.as_u64(), "recovered commit log");
        Ok(Self::assemble(backend, options, lock_file, memtable, latest))
    }

    fn assemble(
        backend: Box<dyn StorageBackend>,
        options: EngineOptions,
        lock_file: Option<File>,
        memtable: Memtable,
        latest: SequenceNumber,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                options,
                log: Mutex::new(backend),
                state: RwLock::new(EngineState { memtable, latest }),
                pins: Mutex::new(BTreeMap::new()),
                closed: AtomicBool::new(false),
                poisoned: AtomicBool::new(false),
                _lock_file: lock_file,
            }),
        }
    }

    /// Applies `batch` atomically and returns its sequence number.
    ///
    /// The batch is appended to the commit log before it becomes visible.
    /// If the append fails, the log is cut back and nothing is applied.
    /// If cutting back fails too, the engine is poisoned: the frame may
    /// survive a reopen, and every later write or compaction fails with
    /// [`StorageError::Poisoned`].
    /// An empty batch is a no-op returning the current sequence.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine is closed or poisoned, or the log
    /// append fails.
    pub fn write(&self, batch: WriteBatch) -> StorageResult<SequenceNumber> {
        self.ensure_open()?;
        if batch.is_empty() {
            return Ok(self.latest_seq());
        }

        let mut log = self.inner.log.lock();
        self.ensure_writable()?;
        let seq = self.inner.state.read().latest.next();
        let frame = encode_frame(seq, &batch);

        let before = log.size()?;
        let appended = log.append(&frame).and_then(|_| {
            if self.inner.options.sync_on_commit {
                log.sync()
            } else {
                log.flush()
            }
        });
        if let Err(e) = appended {
            if let Err(rollback) = log.truncate(before) {
                self.inner.poisoned.store(true, Ordering::SeqCst);
                error!(
                    seq = seq.as_u64(),
                    offset = before,
                    error = %rollback,
                    "failed to roll back commit log; engine poisoned"
                );
            }
            return Err(e);
        }

        let mut state = self.inner.state.write();
        let pinned = self.inner.pinned();
        apply_batch(&mut state.memtable, seq, &batch, &pinned);
        state.latest = seq;
        debug!(seq = seq.as_u64(), ops = batch.len(), "applied write batch");
        Ok(seq)
    }

    /// Pins the current state and returns a read view of it.
    #[must_use]
    pub fn snapshot(&self) -> EngineSnapshot {
        let state = self.inner.state.read();
        let seq = state.latest;
        self.inner.pin(seq);
        drop(state);
        EngineSnapshot::new(Arc::clone(&self.inner), seq)
    }

    /// Returns the sequence number of the last applied batch.
    #[must_use]
    pub fn latest_seq(&self) -> SequenceNumber {
        self.inner.state.read().latest
    }

    /// Returns the number of distinct sequences pinned by live snapshots.
    #[must_use]
    pub fn pinned_count(&self) -> usize {
        self.inner.pins.lock().len()
    }

    /// Returns the current commit log size in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot report its size.
    pub fn log_size(&self) -> StorageResult<u64> {
        self.inner.log.lock().size()
    }

    /// Rewrites the commit log as a single frame holding the live state.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine is closed or poisoned, or the rewrite
    /// fails; the old log stays in place on failure.
    pub fn compact(&self) -> StorageResult<()> {
        self.ensure_open()?;
        let mut log = self.inner.log.lock();
        self.ensure_writable()?;
        let state = self.inner.state.read();

        let batch: WriteBatch = state
            .memtable
            .live_entries(state.latest)
            .into_iter()
            .map(|(key, value)| BatchOp::Put { key, value })
            .collect();
        let data = if batch.is_empty() {
            Vec::new()
        } else {
            encode_frame(state.latest, &batch)
        };

        let before = log.size()?;
        log.replace(&data)?;
        debug!(
            before,
            after = data.len(),
            keys = batch.len(),
            "compacted commit log"
        );
        Ok(())
    }

    /// Makes every applied batch durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    pub fn sync(&self) -> StorageResult<()> {
        self.inner.log.lock().sync()
    }

    /// Syncs the log and rejects further reads and writes.
    ///
    /// Snapshots taken before closing stay readable. Closing twice is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the final sync fails.
    pub fn close(&self) -> StorageResult<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.sync()
    }

    /// Returns true once [`Engine::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.is_closed() {
            Err(StorageError::Closed)
        } else {
            Ok(())
        }
    }

    /// Returns true once a failed write could not be rolled back.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.inner.poisoned.load(Ordering::SeqCst)
    }

    fn ensure_writable(&self) -> StorageResult<()> {
        if self.is_poisoned() {
            Err(StorageError::Poisoned)
        } else {
            Ok(())
        }
    }
}

impl KvRead for Engine {
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        self.ensure_open()?;
        let state = self.inner.state.read();
        Ok(state.memtable.get(key, state.latest).map(<[u8]>::to_vec))
    }

    fn scan(
        &self,
        range: &KeyRange,
        direction: Direction,
        visit: &mut dyn FnMut(&[u8], &[u8]) -> bool,
    ) -> StorageResult<()> {
        self.ensure_open()?;
        let state = self.inner.state.read();
        state.memtable.scan(range, direction, state.latest, visit);
        Ok(())
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("latest_seq", &self.latest_seq())
            .field("pinned", &self.pinned_count())
            .field("closed", &self.is_closed())
            .field("poisoned", &self.is_poisoned())
            .finish_non_exhaustive()
    }
}

fn apply_batch(memtable: &mut Memtable, seq: SequenceNumber, batch: &WriteBatch, pinned: &[u64]) {
    let writes = batch.ops().iter().map(|op| match op {
        BatchOp::Put { key, value } => (key.as_slice(), Some(value.as_slice())),
        BatchOp::Delete { key } => (key.as_slice(), None),
    });
    memtable.apply(seq, writes, pinned);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tempfile::tempdir;

    /// Backend whose `sync` fails a set number of times and whose
    /// `truncate` fails while `deny_truncate` is set.
    struct FailingBackend {
        inner: InMemoryBackend,
        failing_syncs: Arc<AtomicUsize>,
        deny_truncate: Arc<AtomicBool>,
    }

    impl FailingBackend {
        fn io_error(what: &str) -> StorageError {
            StorageError::Io(io::Error::other(format!("injected {what} failure")))
        }
    }

    impl StorageBackend for FailingBackend {
        fn read_all(&self) -> StorageResult<Vec<u8>> {
            self.inner.read_all()
        }

        fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
            self.inner.append(data)
        }

        fn flush(&mut self) -> StorageResult<()> {
            self.inner.flush()
        }

        fn sync(&mut self) -> StorageResult<()> {
            let failing = self.failing_syncs.load(Ordering::SeqCst);
            if failing > 0 {
                self.failing_syncs.store(failing - 1, Ordering::SeqCst);
                return Err(Self::io_error("sync"));
            }
            self.inner.sync()
        }

        fn size(&self) -> StorageResult<u64> {
            self.inner.size()
        }

        fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
            if self.deny_truncate.load(Ordering::SeqCst) {
                return Err(Self::io_error("truncate"));
            }
            self.inner.truncate(new_size)
        }

        fn replace(&mut self, data: &[u8]) -> StorageResult<()> {
            self.inner.replace(data)
        }
    }

    fn failing_engine(deny_truncate: bool) -> (Engine, InMemoryBackend, Arc<AtomicUsize>) {
        let memory = InMemoryBackend::new();
        let failing_syncs = Arc::new(AtomicUsize::new(0));
        let backend = FailingBackend {
            inner: memory.clone(),
            failing_syncs: Arc::clone(&failing_syncs),
            deny_truncate: Arc::new(AtomicBool::new(deny_truncate)),
        };
        let engine = Engine::with_backend(Box::new(backend), EngineOptions::default()).unwrap();
        (engine, memory, failing_syncs)
    }

    fn put(engine: &Engine, key: &[u8], value: &[u8]) -> SequenceNumber {
        let mut batch = WriteBatch::new();
        batch.put(key.to_vec(), value.to_vec());
        engine.write(batch).unwrap()
    }

    fn collect(reader: &dyn KvRead, range: &KeyRange, direction: Direction) -> Vec<Vec<u8>> {
        let mut keys = Vec::new();
        reader
            .scan(range, direction, &mut |k, _| {
                keys.push(k.to_vec());
                true
            })
            .unwrap();
        keys
    }

    #[test]
    fn write_and_get() {
        let engine = Engine::in_memory();
        let seq = put(&engine, b"a", b"1");
        assert_eq!(seq, SequenceNumber::new(1));
        assert_eq!(engine.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert!(engine.contains(b"a").unwrap());
        assert!(!engine.contains(b"b").unwrap());
    }

    #[test]
    fn empty_batch_is_noop() {
        let engine = Engine::in_memory();
        assert_eq!(engine.write(WriteBatch::new()).unwrap(), SequenceNumber::ZERO);
        assert_eq!(engine.log_size().unwrap(), 0);
    }

    #[test]
    fn batch_is_atomic_and_ordered() {
        let engine = Engine::in_memory();
        let mut batch = WriteBatch::new();
        batch.put(b"b".to_vec(), b"2".to_vec());
        batch.put(b"a".to_vec(), b"1".to_vec());
        batch.delete(b"b".to_vec());
        engine.write(batch).unwrap();

        assert_eq!(
            collect(&engine, &KeyRange::all(), Direction::Forward),
            vec![b"a".to_vec()]
        );
    }

    #[test]
    fn snapshot_isolation() {
        let engine = Engine::in_memory();
        put(&engine, b"a", b"1");
        let snapshot = engine.snapshot();
        put(&engine, b"a", b"2");
        put(&engine, b"b", b"1");

        assert_eq!(snapshot.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(snapshot.get(b"b").unwrap(), None);
        assert_eq!(
            collect(&snapshot, &KeyRange::all(), Direction::Reverse),
            vec![b"a".to_vec()]
        );
        assert_eq!(engine.pinned_count(), 1);

        snapshot.release();
        assert_eq!(engine.pinned_count(), 0);
        assert_eq!(engine.get(b"a").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn cloned_snapshot_keeps_pin() {
        let engine = Engine::in_memory();
        put(&engine, b"a", b"1");
        let first = engine.snapshot();
        let second = first.clone();
        first.release();
        put(&engine, b"a", b"2");
        assert_eq!(second.get(b"a").unwrap(), Some(b"1".to_vec()));
        drop(second);
        assert_eq!(engine.pinned_count(), 0);
    }

    #[test]
    fn reopen_replays_log() {
        let backend = InMemoryBackend::new();
        {
            let engine =
                Engine::with_backend(Box::new(backend.clone()), EngineOptions::default()).unwrap();
            put(&engine, b"a", b"1");
            put(&engine, b"b", b"2");
            let mut batch = WriteBatch::new();
            batch.delete(b"a".to_vec());
            engine.write(batch).unwrap();
        }

        let engine = Engine::with_backend(Box::new(backend), EngineOptions::default()).unwrap();
        assert_eq!(engine.latest_seq(), SequenceNumber::new(3));
        assert_eq!(engine.get(b"a").unwrap(), None);
        assert_eq!(engine.get(b"b").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn torn_tail_is_discarded() {
        let backend = InMemoryBackend::new();
        {
            let engine =
                Engine::with_backend(Box::new(backend.clone()), EngineOptions::default()).unwrap();
            put(&engine, b"a", b"1");
            put(&engine, b"b", b"2");
        }
        let mut bytes = backend.data();
        bytes.truncate(bytes.len() - 5);
        let torn = InMemoryBackend::with_data(bytes);

        let engine = Engine::with_backend(Box::new(torn.clone()), EngineOptions::default()).unwrap();
        assert_eq!(engine.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(engine.get(b"b").unwrap(), None);
        // the log was cut back to the last complete frame
        assert!(torn.data().len() < backend.data().len() - 5);
    }

    #[test]
    fn corrupted_frame_refuses_to_open() {
        let backend = InMemoryBackend::new();
        {
            let engine =
                Engine::with_backend(Box::new(backend.clone()), EngineOptions::default()).unwrap();
            put(&engine, b"a", b"1");
            put(&engine, b"b", b"2");
        }
        let mut bytes = backend.data();
        bytes[14] ^= 0x55;

        let result =
            Engine::with_backend(Box::new(InMemoryBackend::with_data(bytes)), EngineOptions::default());
        assert!(matches!(result, Err(StorageError::Corrupted { offset: 0, .. })));
    }

    #[test]
    fn compact_preserves_state() {
        let backend = InMemoryBackend::new();
        {
            let engine =
                Engine::with_backend(Box::new(backend.clone()), EngineOptions::default()).unwrap();
            for i in 0..20u8 {
                put(&engine, &[b'k', i % 4], &[i]);
            }
            let before = engine.log_size().unwrap();
            engine.compact().unwrap();
            assert!(engine.log_size().unwrap() < before);
            put(&engine, b"z", b"after");
        }

        let engine = Engine::with_backend(Box::new(backend), EngineOptions::default()).unwrap();
        assert_eq!(engine.get(&[b'k', 3]).unwrap(), Some(vec![19]));
        assert_eq!(engine.get(b"z").unwrap(), Some(b"after".to_vec()));
        assert_eq!(
            collect(&engine, &KeyRange::prefix(b"k"), Direction::Forward).len(),
            4
        );
    }

    #[test]
    fn closed_engine_rejects_operations() {
        let engine = Engine::in_memory();
        put(&engine, b"a", b"1");
        let snapshot = engine.snapshot();
        engine.close().unwrap();
        engine.close().unwrap();

        assert!(matches!(engine.get(b"a"), Err(StorageError::Closed)));
        assert!(matches!(engine.write(WriteBatch::new()), Err(StorageError::Closed)));
        assert_eq!(snapshot.get(b"a").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn failed_sync_rolls_back_frame() {
        let (engine, memory, failing_syncs) = failing_engine(false);
        put(&engine, b"a", b"1");
        let size = memory.data().len();

        failing_syncs.store(1, Ordering::SeqCst);
        let mut batch = WriteBatch::new();
        batch.put(b"b".to_vec(), b"2".to_vec());
        assert!(matches!(engine.write(batch), Err(StorageError::Io(_))));
        assert_eq!(memory.data().len(), size);
        assert!(!engine.is_poisoned());
        assert_eq!(engine.get(b"b").unwrap(), None);

        assert_eq!(put(&engine, b"c", b"3"), SequenceNumber::new(2));
        drop(engine);
        let reopened = Engine::with_backend(Box::new(memory), EngineOptions::default()).unwrap();
        assert_eq!(reopened.latest_seq(), SequenceNumber::new(2));
        assert_eq!(reopened.get(b"b").unwrap(), None);
    }

    #[test]
    fn failed_rollback_poisons_engine() {
        let (engine, memory, failing_syncs) = failing_engine(true);
        put(&engine, b"a", b"1");

        failing_syncs.store(1, Ordering::SeqCst);
        let mut batch = WriteBatch::new();
        batch.put(b"b".to_vec(), b"2".to_vec());
        assert!(matches!(engine.write(batch), Err(StorageError::Io(_))));
        assert!(engine.is_poisoned());

        let mut batch = WriteBatch::new();
        batch.put(b"c".to_vec(), b"3".to_vec());
        assert!(matches!(engine.write(batch), Err(StorageError::Poisoned)));
        assert!(matches!(engine.compact(), Err(StorageError::Poisoned)));
        assert_eq!(engine.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(engine.get(b"b").unwrap(), None);

        // the stranded frame is the last one, so the log still opens
        drop(engine);
        let reopened = Engine::with_backend(Box::new(memory), EngineOptions::default()).unwrap();
        assert_eq!(reopened.latest_seq(), SequenceNumber::new(2));
        assert_eq!(reopened.get(b"b").unwrap(), Some(b"2".to_vec()));
        assert_eq!(reopened.get(b"c").unwrap(), None);
        assert_eq!(put(&reopened, b"d", b"4"), SequenceNumber::new(3));
    }

    #[test]
    fn directory_lock_is_exclusive() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db");
        let engine = Engine::open(&path, EngineOptions::default()).unwrap();
        put(&engine, b"a", b"1");

        let second = Engine::open(&path, EngineOptions::default());
        assert!(matches!(second, Err(StorageError::Locked)));

        drop(engine);
        let reopened = Engine::open(&path, EngineOptions::default()).unwrap();
        assert_eq!(reopened.get(b"a").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn open_options_are_honoured() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing");
        let options = EngineOptions {
            create_if_missing: false,
            ..EngineOptions::default()
        };
        assert!(Engine::open(&path, options).is_err());

        {
            let engine = Engine::open(&path, EngineOptions::default()).unwrap();
            put(&engine, b"a", b"1");
        }
        let options = EngineOptions {
            error_if_exists: true,
            ..EngineOptions::default()
        };
        assert!(Engine::open(&path, options).is_err());
    }
}
