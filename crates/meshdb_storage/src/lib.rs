//! # MeshDB Storage
//!
//! Ordered byte-string key-value engine for MeshDB.
//!
//! The engine is the lowest layer of the store. It knows nothing about
//! models, collections or indexes: it maps byte keys to byte values, applies
//! write batches atomically and serves consistent point-in-time reads.
//!
//! ## Design Principles
//!
//! - Every committed batch is one CRC-framed record in an append-only
//!   commit log, written before the batch becomes visible
//! - Visible state lives in an MVCC memtable keyed by `(key, sequence)`
//! - Snapshots pin a sequence number; versions are kept until no pinned
//!   snapshot can observe them
//! - Log bytes go through a [`StorageBackend`], so tests can run entirely
//!   in memory
//!
//! ## Example
//!
//! ```rust
//! use meshdb_storage::{Direction, Engine, KeyRange, KvRead, WriteBatch};
//!
//! let engine = Engine::in_memory();
//! let mut batch = WriteBatch::new();
//! batch.put(b"a:1".to_vec(), b"one".to_vec());
//! batch.put(b"a:2".to_vec(), b"two".to_vec());
//! engine.write(batch).unwrap();
//!
//! let mut keys = Vec::new();
//! engine
//!     .scan(&KeyRange::prefix(b"a:"), Direction::Forward, &mut |k, _| {
//!         keys.push(k.to_vec());
//!         true
//!     })
//!     .unwrap();
//! assert_eq!(keys.len(), 2);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod batch;
mod engine;
mod error;
mod file;
mod memory;
mod memtable;
mod range;
mod snapshot;
mod types;

pub use backend::StorageBackend;
pub use batch::{compute_crc32, BatchOp, WriteBatch};
pub use engine::{Engine, EngineOptions, KvRead, LOCK_FILE, LOG_FILE};
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
pub use range::{Direction, KeyRange};
pub use snapshot::EngineSnapshot;
pub use types::SequenceNumber;
