//! CLI command implementations.
//!
//! The commands work on the raw key layout and need no model types, so they
//! can be pointed at any MeshDB directory.

pub mod compact;
pub mod inspect;
pub mod verify;

use meshdb_core::keys::{self, ParsedKey};
use meshdb_storage::{Direction, Engine, EngineOptions, KeyRange, KvRead, StorageError};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Errors reported by the CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// The database directory does not exist.
    #[error("no database at {}", .path.display())]
    MissingDatabase {
        /// Path that was given.
        path: PathBuf,
    },

    /// The storage engine failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// `verify` found problems.
    #[error("verification failed: {problems} problem(s) found")]
    VerificationFailed {
        /// Number of problems reported.
        problems: usize,
    },
}

/// Output format shared by the reporting commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human readable text.
    Text,
    /// Pretty-printed JSON.
    Json,
}

/// Opens an existing database directory without creating anything.
pub fn open_engine(path: &Path) -> Result<Engine, CliError> {
    if !path.is_dir() {
        return Err(CliError::MissingDatabase {
            path: path.to_path_buf(),
        });
    }
    let options = EngineOptions {
        create_if_missing: false,
        ..EngineOptions::default()
    };
    Ok(Engine::open(path, options)?)
}

/// Per-collection tally of the stored keys.
#[derive(Debug, Default, Clone)]
pub struct CollectionLayout {
    /// Number of primary keys.
    pub models: u64,
    /// Raw value of the count key, if present.
    pub stored_count: Option<Vec<u8>>,
    /// Index entries per index name.
    pub index_entries: BTreeMap<String, u64>,
    /// IDs of every primary key, in key order.
    pub ids: Vec<Vec<u8>>,
    /// `(index, id, full key)` for every index entry.
    pub references: Vec<(String, Vec<u8>, Vec<u8>)>,
}

/// Everything learned from one full scan of the keyspace.
#[derive(Debug, Default)]
pub struct Layout {
    /// Collections by name.
    pub collections: BTreeMap<String, CollectionLayout>,
    /// Keys that don't parse, with the reason.
    pub unparsed: Vec<(Vec<u8>, String)>,
    /// Total number of live keys.
    pub total_keys: u64,
}

impl Layout {
    /// Scans every key visible to `reader`.
    pub fn scan(reader: &dyn KvRead) -> Result<Self, CliError> {
        let mut layout = Self::default();
        reader.scan(&KeyRange::all(), Direction::Forward, &mut |key, value| {
            layout.record(key, value);
            true
        })?;
        debug!(
            keys = layout.total_keys,
            collections = layout.collections.len(),
            "scanned keyspace"
        );
        Ok(layout)
    }

    fn record(&mut self, key: &[u8], value: &[u8]) {
        self.total_keys += 1;
        let parsed = match keys::parse_key(key) {
            Ok(parsed) => parsed,
            Err(err) => {
                self.unparsed.push((key.to_vec(), err.to_string()));
                return;
            }
        };
        let entry = self
            .collections
            .entry(parsed.collection().to_string())
            .or_default();
        match parsed {
            ParsedKey::Model { id, .. } => {
                entry.models += 1;
                entry.ids.push(id);
            }
            ParsedKey::Index { index, id, .. } => {
                *entry.index_entries.entry(index.clone()).or_default() += 1;
                entry.references.push((index, id, key.to_vec()));
            }
            ParsedKey::Count { .. } => entry.stored_count = Some(value.to_vec()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshdb_storage::WriteBatch;

    #[test]
    fn layout_groups_keys_by_collection() {
        let engine = Engine::in_memory();
        let mut batch = WriteBatch::new();
        batch.put(keys::model_key("people", b"foo"), b"x".to_vec());
        batch.put(keys::index_key("people", "age", b"42", b"foo"), Vec::new());
        batch.put(keys::count_key("people"), keys::encode_count(1));
        batch.put(b"junk".to_vec(), Vec::new());
        engine.write(batch).unwrap();

        let layout = Layout::scan(&engine).unwrap();
        assert_eq!(layout.total_keys, 4);
        assert_eq!(layout.unparsed.len(), 1);
        let people = &layout.collections["people"];
        assert_eq!(people.models, 1);
        assert_eq!(people.index_entries["age"], 1);
        assert_eq!(people.stored_count.as_deref(), Some(&b"1"[..]));
    }

    #[test]
    fn missing_directory_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = open_engine(&dir.path().join("absent")).unwrap_err();
        assert!(matches!(err, CliError::MissingDatabase { .. }));
    }
}
