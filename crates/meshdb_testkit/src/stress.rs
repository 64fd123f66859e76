//! Stress drivers for MeshDB.
//!
//! These drive a database under heavy load and concurrent access. Each
//! driver returns throughput figures; callers assert on the database state
//! afterwards.

use crate::fixtures::{people_collection, Person};
use meshdb_core::{Collection, Database};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of operations to perform per thread.
    pub operations: usize,
    /// Number of concurrent threads.
    pub threads: usize,
    /// Number of distinct IDs each thread cycles through.
    pub id_space: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 1_000,
            threads: 4,
            id_space: 64,
        }
    }
}

fn tally<F>(threads: usize, work: F) -> StressTestResult
where
    F: Fn(usize, &AtomicUsize, &AtomicUsize) + Send + Sync + 'static,
{
    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let work = Arc::new(work);
    let start = Instant::now();

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            let work = Arc::clone(&work);
            thread::spawn(move || work(t, &successful, &failed))
        })
        .collect();
    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

fn record<T, E>(result: Result<T, E>, successful: &AtomicUsize, failed: &AtomicUsize) {
    let counter = if result.is_ok() { successful } else { failed };
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Threads insert, update and delete people in one shared collection.
///
/// Operations on IDs another thread touched first fail, which is counted
/// rather than treated as an error.
pub fn stress_shared_collection(people: &Collection<Person>, config: &StressConfig) -> StressTestResult {
    let people = people.clone();
    let config = config.clone();
    tally(config.threads, move |t, ok, failed| {
        for i in 0..config.operations {
            let name = format!("p{}", (t * 7 + i) % config.id_space);
            let person = Person::new(&name, (i % 10) as u32);
            let result = match i % 3 {
                0 => people.insert(&person),
                1 => people.update(&person),
                _ => people.delete(name.as_bytes()),
            };
            record(result, ok, failed);
        }
    })
}

/// Each thread owns a collection and writes to it while the others do the
/// same, so no writer ever waits on another.
pub fn stress_independent_collections(db: &Database, config: &StressConfig) -> StressTestResult {
    let collections: Vec<Collection<Person>> = (0..config.threads)
        .map(|t| {
            db.register_collection::<Person>(&format!("people-{t}"))
                .expect("Failed to register collection")
        })
        .collect();
    let config = config.clone();
    tally(config.threads, move |t, ok, failed| {
        let people = &collections[t];
        for i in 0..config.operations {
            let name = format!("p{i}");
            record(people.insert(&Person::new(&name, 0)), ok, failed);
        }
    })
}

/// Half the threads write through global transactions spanning two
/// collections while the rest take snapshots and check that both
/// collections always hold the same number of models.
///
/// A snapshot that sees the two counts disagree is counted as a failure.
pub fn stress_global_snapshots(db: &Database, config: &StressConfig) -> StressTestResult {
    let (left, _) = people_collection(db);
    let right = db
        .register_collection::<Person>("mirror")
        .expect("Failed to register mirror");
    let db = db.clone();
    let config = config.clone();
    let writers = (config.threads / 2).max(1);

    tally(config.threads.max(2), move |t, ok, failed| {
        for i in 0..config.operations {
            if t < writers {
                let person = Person::new(&format!("w{t}-{i}"), 0);
                let result = db.open_global_transaction().and_then(|mut global| {
                    global.insert(&left, &person)?;
                    global.insert(&right, &person)?;
                    global.commit().map(drop)
                });
                record(result, ok, failed);
            } else {
                let consistent = db.snapshot().and_then(|snapshot| {
                    let l = left.snapshot_at(&snapshot).count()?;
                    let r = right.snapshot_at(&snapshot).count()?;
                    Ok(l == r)
                });
                record(consistent.ok().filter(|&same| same).ok_or(()), ok, failed);
            }
        }
    })
}
