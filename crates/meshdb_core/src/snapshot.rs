//! Point-in-time read views.

use crate::collection::CollectionShared;
use crate::error::{CoreError, CoreResult};
use crate::index::{Filter, Index};
use crate::model::Model;
use crate::query::{Query, View};
use meshdb_storage::{EngineSnapshot, KvRead, SequenceNumber};
use std::sync::Arc;
use tracing::debug;

/// A frozen view of the whole store.
///
/// Use [`Collection::snapshot_at`](crate::Collection::snapshot_at) to read
/// several collections as of the same instant. The view stays valid until
/// the snapshot and every collection view derived from it are released.
#[derive(Debug)]
pub struct DbSnapshot {
    snapshot: EngineSnapshot,
}

impl DbSnapshot {
    pub(crate) fn new(snapshot: EngineSnapshot) -> Self {
        debug!(seq = snapshot.sequence().as_u64(), "pinned database snapshot");
        Self { snapshot }
    }

    pub(crate) fn engine_snapshot(&self) -> &EngineSnapshot {
        &self.snapshot
    }

    /// Returns the sequence number the snapshot reads at.
    #[must_use]
    pub fn sequence(&self) -> SequenceNumber {
        self.snapshot.sequence()
    }

    /// Releases the snapshot. Equivalent to dropping it.
    pub fn release(self) {}
}

/// A frozen view of one collection.
///
/// Writes committed after the snapshot was taken are invisible to it.
/// Reads never block writers.
pub struct CollectionSnapshot<M: Model> {
    collection: Arc<CollectionShared<M>>,
    indexes: Vec<Arc<Index<M>>>,
    snapshot: EngineSnapshot,
}

impl<M: Model> CollectionSnapshot<M> {
    pub(crate) fn new(collection: Arc<CollectionShared<M>>, snapshot: EngineSnapshot) -> Self {
        debug!(
            collection = %collection.name,
            seq = snapshot.sequence().as_u64(),
            "pinned collection snapshot"
        );
        let indexes = collection.indexes();
        Self {
            collection,
            indexes,
            snapshot,
        }
    }

    /// Returns the sequence number the snapshot reads at.
    #[must_use]
    pub fn sequence(&self) -> SequenceNumber {
        self.snapshot.sequence()
    }

    /// Returns the indexes declared when the snapshot was taken.
    #[must_use]
    pub fn indexes(&self) -> &[Arc<Index<M>>] {
        &self.indexes
    }

    /// Returns model `id` as of the snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if absent at the snapshot.
    pub fn find_by_id(&self, id: &[u8]) -> CoreResult<M> {
        self.collection
            .read_model(&self.snapshot, id)?
            .ok_or_else(|| CoreError::not_found(&self.collection.name, id))
    }

    /// Returns true if model `id` existed at the snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine read fails.
    pub fn contains(&self, id: &[u8]) -> CoreResult<bool> {
        let key = crate::keys::model_key(&self.collection.name, id);
        Ok(self.snapshot.contains(&key)?)
    }

    /// Returns every model as of the snapshot.
    ///
    /// # Errors
    ///
    /// Fails if any payload cannot be decoded.
    pub fn find_all(&self) -> CoreResult<Vec<M>> {
        self.new_query(Filter::all(&self.collection.name)).run()
    }

    /// Returns the row count as of the snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored count is unreadable.
    pub fn count(&self) -> CoreResult<u64> {
        self.collection.read_count(&self.snapshot)
    }

    /// Starts a query that reads the snapshot.
    ///
    /// Only filters over the primary keys or over an index in
    /// [`indexes`](Self::indexes) can run; any other index filter fails
    /// with [`CoreError::InvalidKey`] when executed.
    #[must_use]
    pub fn new_query(&self, filter: Filter) -> Query<M> {
        let indexes = self.indexes.iter().map(|i| i.name().to_string()).collect();
        Query::new(
            Arc::clone(&self.collection),
            View::Pinned {
                snapshot: self.snapshot.clone(),
                indexes,
            },
            filter,
        )
    }

    /// Releases the snapshot. Equivalent to dropping it.
    pub fn release(self) {}
}

impl<M: Model> Drop for CollectionSnapshot<M> {
    fn drop(&mut self) {
        debug!(
            collection = %self.collection.name,
            seq = self.snapshot.sequence().as_u64(),
            "released collection snapshot"
        );
    }
}

impl<M: Model> std::fmt::Debug for CollectionSnapshot<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionSnapshot")
            .field("collection", &self.collection.name)
            .field("seq", &self.snapshot.sequence())
            .finish_non_exhaustive()
    }
}
