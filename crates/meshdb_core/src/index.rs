//! Secondary indexes and the filters built from them.

use crate::keys;
use meshdb_storage::KeyRange;
use std::fmt;
use std::sync::Arc;

pub(crate) type Getter<M> = Arc<dyn Fn(&M) -> Vec<Vec<u8>> + Send + Sync>;

/// A named secondary index over a collection.
///
/// An index maps each model to zero or more byte-string values through a
/// getter. Entries are written for models inserted or updated after the
/// index is declared; existing models are not backfilled.
pub struct Index<M> {
    collection: String,
    name: String,
    getter: Getter<M>,
}

impl<M> Index<M> {
    pub(crate) fn new(collection: &str, name: &str, getter: Getter<M>) -> Self {
        Self {
            collection: collection.to_string(),
            name: name.to_string(),
            getter,
        }
    }

    /// Returns the index name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the name of the indexed collection.
    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Returns the values `model` is indexed under, without duplicates.
    #[must_use]
    pub fn values(&self, model: &M) -> Vec<Vec<u8>> {
        let mut values = (self.getter)(model);
        values.sort();
        values.dedup();
        values
    }

    /// Returns the entry keys `model` owns in this index.
    pub(crate) fn entry_keys(&self, model: &M, id: &[u8]) -> Vec<Vec<u8>> {
        self.values(model)
            .iter()
            .map(|value| keys::index_key(&self.collection, &self.name, value, id))
            .collect()
    }

    /// Matches models indexed under exactly `value`.
    #[must_use]
    pub fn value_filter(&self, value: &[u8]) -> Filter {
        let mut prefix = keys::index_prefix(&self.collection, &self.name);
        prefix.extend_from_slice(&keys::escape(value));
        prefix.push(b':');
        self.filter(KeyRange::prefix(&prefix))
    }

    /// Matches models indexed under a value in `[start, limit)`.
    ///
    /// Bounds compare escaped values, which orders the same as raw values
    /// for bytes other than `:` and `\`.
    #[must_use]
    pub fn range_filter(&self, start: &[u8], limit: &[u8]) -> Filter {
        let prefix = keys::index_prefix(&self.collection, &self.name);
        let mut from = prefix.clone();
        from.extend_from_slice(&keys::escape(start));
        let mut to = prefix;
        to.extend_from_slice(&keys::escape(limit));
        self.filter(KeyRange::new(from, to))
    }

    /// Matches models indexed under a value starting with `prefix`.
    #[must_use]
    pub fn prefix_filter(&self, prefix: &[u8]) -> Filter {
        let mut key = keys::index_prefix(&self.collection, &self.name);
        key.extend_from_slice(&keys::escape(prefix));
        self.filter(KeyRange::prefix(&key))
    }

    fn filter(&self, range: KeyRange) -> Filter {
        Filter {
            collection: self.collection.clone(),
            index: Some(self.name.clone()),
            range,
        }
    }
}

impl<M> fmt::Debug for Index<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Index")
            .field("collection", &self.collection)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// A key range selecting models of one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub(crate) collection: String,
    /// `None` for a scan over primary keys.
    pub(crate) index: Option<String>,
    pub(crate) range: KeyRange,
}

impl Filter {
    /// Matches every model of `collection`.
    pub(crate) fn all(collection: &str) -> Self {
        Self {
            collection: collection.to_string(),
            index: None,
            range: KeyRange::prefix(&keys::model_prefix(collection)),
        }
    }

    /// Returns the collection the filter applies to.
    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Returns the index the filter ranges over, or `None` for primary keys.
    #[must_use]
    pub fn index(&self) -> Option<&str> {
        self.index.as_deref()
    }

    /// Returns the engine key range the filter covers.
    #[must_use]
    pub fn range(&self) -> &KeyRange {
        &self.range
    }
}
