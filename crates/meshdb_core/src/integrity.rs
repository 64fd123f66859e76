//! Consistency audit of one collection.
//!
//! Checks, in order, against a single engine snapshot:
//!
//! 1. every primary payload decodes
//! 2. every model has an entry in every declared index for each value its
//!    getter yields
//! 3. every entry of a declared index names a stored model whose getter
//!    still yields the entry's value
//! 4. the stored row count equals the number of primary keys
//!
//! The first violation is returned as [`CoreError::Integrity`]. Nothing is
//! repaired. Entries of indexes that are not declared on the collection are
//! not inspected, since their getters are unknown.

use crate::collection::CollectionShared;
use crate::error::{CoreError, CoreResult};
use crate::keys::{self, ParsedKey};
use crate::model::{decode_stored, Model};
use meshdb_storage::{Direction, EngineSnapshot, KeyRange, KvRead};
use std::collections::HashMap;
use tracing::debug;

fn entries(snapshot: &EngineSnapshot, prefix: &[u8]) -> CoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
    let mut out = Vec::new();
    snapshot.scan(&KeyRange::prefix(prefix), Direction::Forward, &mut |k, v| {
        out.push((k.to_vec(), v.to_vec()));
        true
    })?;
    Ok(out)
}

pub(crate) fn check_collection<M: Model>(
    collection: &CollectionShared<M>,
    snapshot: &EngineSnapshot,
) -> CoreResult<()> {
    let name = collection.name.as_str();
    let indexes = collection.indexes();

    let mut models: HashMap<Vec<u8>, M> = HashMap::new();
    for (key, payload) in entries(snapshot, &keys::model_prefix(name))? {
        let id = keys::id_from_key(&key)
            .map_err(|e| CoreError::integrity(name, None, &key, e.to_string()))?;
        let model: M = decode_stored(name, &key, &payload).map_err(|e| {
            CoreError::integrity(name, None, &key, format!("undecodable payload: {e}"))
        })?;

        for index in &indexes {
            for entry in index.entry_keys(&model, &id) {
                if !snapshot.contains(&entry)? {
                    return Err(CoreError::integrity(
                        name,
                        Some(index.name()),
                        &entry,
                        "missing index entry",
                    ));
                }
            }
        }
        models.insert(id, model);
    }

    for index in &indexes {
        for (key, _) in entries(snapshot, &keys::index_prefix(name, index.name()))? {
            let violation = |message: &str| CoreError::integrity(name, Some(index.name()), &key, message);
            let (value, id) = match keys::parse_key(&key) {
                Ok(ParsedKey::Index { value, id, .. }) => (value, id),
                _ => return Err(violation("malformed index key")),
            };
            let model = models
                .get(&id)
                .ok_or_else(|| violation("index entry refers to a missing model"))?;
            if !index.values(model).contains(&value) {
                return Err(violation("index entry does not match the stored model"));
            }
        }
    }

    let count_key = keys::count_key(name);
    let stored = collection
        .read_count(snapshot)
        .map_err(|e| CoreError::integrity(name, None, &count_key, e.to_string()))?;
    if stored != models.len() as u64 {
        return Err(CoreError::integrity(
            name,
            None,
            &count_key,
            format!("stored count {stored} but {} models", models.len()),
        ));
    }

    debug!(
        collection = name,
        models = models.len(),
        indexes = indexes.len(),
        "collection passed integrity check"
    );
    Ok(())
}
