//! Filtered, ordered, deduplicated iteration over a collection.

use crate::collection::CollectionShared;
use crate::error::{CoreError, CoreResult};
use crate::index::Filter;
use crate::keys;
use crate::model::{decode_stored, Model};
use meshdb_storage::{Direction, EngineSnapshot, KvRead};
use std::collections::HashSet;
use std::sync::Arc;

/// The state a query reads.
pub(crate) enum View {
    /// The latest committed state, pinned afresh for every execution.
    Live,
    /// A caller-held snapshot and the indexes declared when it was taken.
    Pinned {
        snapshot: EngineSnapshot,
        indexes: Vec<String>,
    },
}

/// A query over the models of one collection matching a [`Filter`].
///
/// Built with [`Collection::new_query`](crate::Collection::new_query) or
/// [`CollectionSnapshot::new_query`](crate::CollectionSnapshot::new_query)
/// and refined with [`max`](Self::max), [`offset`](Self::offset) and
/// [`reverse`](Self::reverse). Nothing is read until [`run`](Self::run) or
/// [`count`](Self::count).
///
/// Results follow key order of the filter's range: index value then ID for
/// index filters, ID for [`Collection::all_filter`](crate::Collection::all_filter).
/// A model matched by several entries of a multi-value index is returned
/// once, at its first position.
pub struct Query<M: Model> {
    collection: Arc<CollectionShared<M>>,
    view: View,
    filter: Filter,
    max: usize,
    offset: usize,
    direction: Direction,
}

impl<M: Model> Query<M> {
    pub(crate) fn new(collection: Arc<CollectionShared<M>>, view: View, filter: Filter) -> Self {
        Self {
            collection,
            view,
            filter,
            max: 0,
            offset: 0,
            direction: Direction::Forward,
        }
    }

    /// Stops after `max` distinct models. Zero means unbounded.
    #[must_use]
    pub fn max(mut self, max: usize) -> Self {
        self.max = max;
        self
    }

    /// Skips the first `offset` distinct models.
    #[must_use]
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Iterates in descending key order.
    #[must_use]
    pub fn reverse(mut self) -> Self {
        self.direction = Direction::Reverse;
        self
    }

    /// Fetches and decodes every matching model.
    ///
    /// # Errors
    ///
    /// Fails as a whole if any payload cannot be decoded or an index entry
    /// points at a missing model.
    pub fn run(&self) -> CoreResult<Vec<M>> {
        self.with_reader(|reader| {
            let name = &self.collection.name;
            self.matching_ids(reader)?
                .into_iter()
                .map(|id| {
                    let key = keys::model_key(name, &id);
                    let bytes = reader.get(&key)?.ok_or_else(|| {
                        CoreError::integrity(
                            name,
                            self.filter.index(),
                            &key,
                            "index entry refers to a missing model",
                        )
                    })?;
                    decode_stored(name, &key, &bytes)
                })
                .collect()
        })
    }

    /// Returns the number of matching models without decoding them.
    ///
    /// # Errors
    ///
    /// Returns an error if a visited key is malformed.
    pub fn count(&self) -> CoreResult<usize> {
        self.with_reader(|reader| Ok(self.matching_ids(reader)?.len()))
    }

    /// Returns the IDs of the matching models in result order.
    ///
    /// # Errors
    ///
    /// Returns an error if a visited key is malformed.
    pub fn ids(&self) -> CoreResult<Vec<Vec<u8>>> {
        self.with_reader(|reader| self.matching_ids(reader))
    }

    fn with_reader<T>(&self, run: impl FnOnce(&EngineSnapshot) -> CoreResult<T>) -> CoreResult<T> {
        if self.filter.collection() != self.collection.name {
            return Err(CoreError::invalid_key(format!(
                "filter over collection {} used to query {}",
                self.filter.collection(),
                self.collection.name
            )));
        }
        match &self.view {
            View::Pinned { snapshot, indexes } => {
                if let Some(index) = self.filter.index() {
                    if !indexes.iter().any(|name| name == index) {
                        return Err(CoreError::invalid_key(format!(
                            "index {index} of {} was declared after the snapshot",
                            self.collection.name
                        )));
                    }
                }
                run(snapshot)
            }
            View::Live => {
                self.collection.ensure_open()?;
                run(&self.collection.engine.snapshot())
            }
        }
    }

    fn matching_ids(&self, reader: &EngineSnapshot) -> CoreResult<Vec<Vec<u8>>> {
        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        let mut skipped = 0;
        let mut failure = None;

        reader.scan(&self.filter.range, self.direction, &mut |key, _| {
            let id = match keys::id_from_key(key) {
                Ok(id) => id,
                Err(e) => {
                    failure = Some(e);
                    return false;
                }
            };
            if !seen.insert(id.clone()) {
                return true;
            }
            if skipped < self.offset {
                skipped += 1;
                return true;
            }
            ids.push(id);
            self.max == 0 || ids.len() < self.max
        })?;

        match failure {
            Some(e) => Err(e),
            None => Ok(ids),
        }
    }
}

impl<M: Model> std::fmt::Debug for Query<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("filter", &self.filter)
            .field("max", &self.max)
            .field("offset", &self.offset)
            .field("direction", &self.direction)
            .finish_non_exhaustive()
    }
}
