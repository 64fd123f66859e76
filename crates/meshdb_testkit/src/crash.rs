//! Crash recovery testing for MeshDB.
//!
//! [`CrashableBackend`] stops accepting bytes at a chosen offset, leaving a
//! torn frame behind exactly as a power cut mid-append would.
//! [`CrashRecoveryHarness`] runs a workload against it, reopens a database
//! from whatever reached the backend and checks that every acknowledged
//! commit survived, nothing else did and the indexes still agree.
//!
//! ## Usage
//!
//! ```rust
//! use meshdb_testkit::crash::CrashRecoveryHarness;
//!
//! let harness = CrashRecoveryHarness::new(5);
//! for result in harness.run_all() {
//!     assert!(result.passed, "{:?}", result);
//! }
//! ```

use crate::fixtures::{people_collection, Person};
use meshdb_core::{Config, Database};
use meshdb_storage::{InMemoryBackend, StorageBackend, StorageError, StorageResult};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Result of a crash recovery test.
#[derive(Debug, Clone)]
pub struct CrashRecoveryResult {
    /// Whether the test passed.
    pub passed: bool,
    /// Byte offset at which the crash was injected.
    pub crash_at: usize,
    /// Commits acknowledged before the crash.
    pub expected_models: usize,
    /// Models found after recovery.
    pub actual_models: usize,
    /// Any error message.
    pub error: Option<String>,
}

impl CrashRecoveryResult {
    fn pass(crash_at: usize, models: usize) -> Self {
        Self {
            passed: true,
            crash_at,
            expected_models: models,
            actual_models: models,
            error: None,
        }
    }

    fn fail(crash_at: usize, expected: usize, actual: usize, error: &str) -> Self {
        Self {
            passed: false,
            crash_at,
            expected_models: expected,
            actual_models: actual,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug)]
struct CrashState {
    crash_after_bytes: AtomicUsize,
    bytes_written: AtomicUsize,
    crashed: AtomicBool,
}

/// A storage backend wrapper that can simulate crashes.
///
/// Once crashed, every mutating call fails, so the torn bytes stay behind.
pub struct CrashableBackend {
    inner: Box<dyn StorageBackend>,
    state: Arc<CrashState>,
}

/// A handle for arming and observing a [`CrashableBackend`] after it has
/// been handed to a database.
#[derive(Debug, Clone)]
pub struct CrashSwitch {
    state: Arc<CrashState>,
}

impl CrashSwitch {
    /// Makes the backend crash once `bytes` bytes have been appended.
    pub fn crash_after(&self, bytes: usize) {
        self.state.crash_after_bytes.store(bytes, Ordering::SeqCst);
    }

    /// Returns whether the backend has crashed.
    pub fn has_crashed(&self) -> bool {
        self.state.crashed.load(Ordering::SeqCst)
    }

    /// Bytes appended so far, the torn part of a crashing append included.
    pub fn bytes_written(&self) -> usize {
        self.state
            .bytes_written
            .load(Ordering::SeqCst)
            .min(self.state.crash_after_bytes.load(Ordering::SeqCst))
    }
}

impl CrashableBackend {
    /// Wraps `inner`, returning the backend and its switch.
    pub fn new(inner: Box<dyn StorageBackend>) -> (Self, CrashSwitch) {
        let state = Arc::new(CrashState {
            crash_after_bytes: AtomicUsize::new(usize::MAX),
            bytes_written: AtomicUsize::new(0),
            crashed: AtomicBool::new(false),
        });
        let switch = CrashSwitch {
            state: Arc::clone(&state),
        };
        (Self { inner, state }, switch)
    }

    fn crashed_error(what: &str) -> StorageError {
        StorageError::Io(std::io::Error::other(format!("simulated crash during {what}")))
    }

    fn check(&self, what: &str) -> StorageResult<()> {
        if self.state.crashed.load(Ordering::SeqCst) {
            Err(Self::crashed_error(what))
        } else {
            Ok(())
        }
    }
}

impl StorageBackend for CrashableBackend {
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        self.inner.read_all()
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        self.check("write")?;
        let current = self.state.bytes_written.fetch_add(data.len(), Ordering::SeqCst);
        let threshold = self.state.crash_after_bytes.load(Ordering::SeqCst);

        if current + data.len() > threshold {
            self.state.crashed.store(true, Ordering::SeqCst);
            let partial = threshold.saturating_sub(current);
            if partial > 0 {
                self.inner.append(&data[..partial])?;
            }
            return Err(Self::crashed_error("write"));
        }
        self.inner.append(data)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.check("flush")?;
        self.inner.flush()
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.check("sync")?;
        self.inner.sync()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.check("truncate")?;
        self.inner.truncate(new_size)
    }

    fn replace(&mut self, data: &[u8]) -> StorageResult<()> {
        self.check("replace")?;
        self.inner.replace(data)
    }
}

/// Test harness for crash recovery scenarios.
///
/// The workload inserts one person per commit. Crashing at every byte
/// offset of the resulting log covers torn headers, torn payloads and torn
/// checksums of every frame.
#[derive(Debug, Clone)]
pub struct CrashRecoveryHarness {
    commits: usize,
}

impl CrashRecoveryHarness {
    /// Creates a harness whose workload makes `commits` commits.
    pub fn new(commits: usize) -> Self {
        Self { commits }
    }

    fn person(i: usize) -> Person {
        Person::new(&format!("person-{i}"), (i % 3) as u32)
    }

    /// Runs the workload until the backend crashes, returning the backend
    /// contents and the number of acknowledged commits.
    fn run_workload(&self, crash_at: usize) -> (InMemoryBackend, usize) {
        let memory = InMemoryBackend::new();
        let (backend, switch) = CrashableBackend::new(Box::new(memory.clone()));
        switch.crash_after(crash_at);

        let mut acknowledged = 0;
        if let Ok(db) = Database::open_with_backend(Box::new(backend), Config::default()) {
            let (people, _) = people_collection(&db);
            for i in 0..self.commits {
                if people.insert(&Self::person(i)).is_err() {
                    break;
                }
                acknowledged += 1;
            }
        }
        (memory, acknowledged)
    }

    /// Size of the log the full workload produces.
    pub fn log_size(&self) -> usize {
        let (memory, _) = self.run_workload(usize::MAX);
        memory.data().len()
    }

    /// Crashes after `crash_at` bytes and verifies recovery.
    pub fn run_crash_at(&self, crash_at: usize) -> CrashRecoveryResult {
        let (memory, acknowledged) = self.run_workload(crash_at);

        let db = match Database::open_with_backend(
            Box::new(InMemoryBackend::with_data(memory.data())),
            Config::default(),
        ) {
            Ok(db) => db,
            Err(err) => {
                return CrashRecoveryResult::fail(crash_at, acknowledged, 0, &err.to_string())
            }
        };
        let (people, _) = people_collection(&db);

        let actual = match people.count() {
            Ok(count) => count as usize,
            Err(err) => {
                return CrashRecoveryResult::fail(crash_at, acknowledged, 0, &err.to_string())
            }
        };
        if actual != acknowledged {
            return CrashRecoveryResult::fail(
                crash_at,
                acknowledged,
                actual,
                "recovered state does not match acknowledged commits",
            );
        }
        for i in 0..acknowledged {
            if !people.contains(Self::person(i).name.as_bytes()).unwrap_or(false) {
                return CrashRecoveryResult::fail(
                    crash_at,
                    acknowledged,
                    actual,
                    "acknowledged model lost",
                );
            }
        }
        if let Err(err) = db.check_integrity() {
            return CrashRecoveryResult::fail(crash_at, acknowledged, actual, &err.to_string());
        }
        CrashRecoveryResult::pass(crash_at, actual)
    }

    /// Runs [`Self::run_crash_at`] for every byte offset of the log.
    pub fn run_all(&self) -> Vec<CrashRecoveryResult> {
        (0..=self.log_size())
            .map(|crash_at| self.run_crash_at(crash_at))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn switch_reports_crash() {
        let (mut backend, switch) = CrashableBackend::new(Box::new(InMemoryBackend::new()));
        switch.crash_after(4);
        backend.append(b"ab").unwrap();
        assert!(!switch.has_crashed());
        assert!(backend.append(b"cdef").is_err());
        assert!(switch.has_crashed());
        assert_eq!(switch.bytes_written(), 4);
        assert_eq!(backend.read_all().unwrap(), b"abcd");
        assert!(backend.truncate(0).is_err());
    }

    #[test]
    fn full_workload_survives() {
        let harness = CrashRecoveryHarness::new(3);
        let result = harness.run_crash_at(usize::MAX);
        assert!(result.passed, "{result:?}");
        assert_eq!(result.actual_models, 3);
    }

    #[test]
    fn every_crash_point_recovers() {
        let harness = CrashRecoveryHarness::new(3);
        let results = harness.run_all();
        assert!(results.len() > 3);
        for result in &results {
            assert!(result.passed, "{result:?}");
        }
        assert_eq!(results[0].actual_models, 0);
    }
}
