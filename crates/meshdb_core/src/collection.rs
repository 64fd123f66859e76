//! Typed collections.

use crate::error::{CoreError, CoreResult};
use crate::index::{Filter, Getter, Index};
use crate::integrity;
use crate::keys;
use crate::lock::WriteGate;
use crate::model::{decode_stored, Model};
use crate::query::{Query, View};
use crate::snapshot::{CollectionSnapshot, DbSnapshot};
use crate::transaction::Transaction;
use meshdb_storage::{Engine, EngineSnapshot, KvRead, SequenceNumber};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// State shared by every handle to one collection.
pub(crate) struct CollectionShared<M> {
    pub(crate) name: String,
    pub(crate) engine: Engine,
    pub(crate) gate: Arc<WriteGate>,
    indexes: RwLock<Vec<Arc<Index<M>>>>,
    closed: Arc<AtomicBool>,
}

impl<M: Model> CollectionShared<M> {
    pub(crate) fn new(name: &str, engine: Engine, closed: Arc<AtomicBool>) -> Self {
        Self {
            name: name.to_string(),
            engine,
            gate: WriteGate::new(),
            indexes: RwLock::new(Vec::new()),
            closed,
        }
    }

    pub(crate) fn ensure_open(&self) -> CoreResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(CoreError::DatabaseClosed)
        } else {
            Ok(())
        }
    }

    pub(crate) fn indexes(&self) -> Vec<Arc<Index<M>>> {
        self.indexes.read().clone()
    }

    /// Reads and decodes model `id` through `reader`.
    pub(crate) fn read_model(&self, reader: &dyn KvRead, id: &[u8]) -> CoreResult<Option<M>> {
        let key = keys::model_key(&self.name, id);
        reader
            .get(&key)?
            .map(|bytes| decode_stored(&self.name, &key, &bytes))
            .transpose()
    }

    /// Reads the persisted row count through `reader`.
    pub(crate) fn read_count(&self, reader: &dyn KvRead) -> CoreResult<u64> {
        let key = keys::count_key(&self.name);
        match reader.get(&key)? {
            Some(value) => keys::decode_count(&value)
                .map_err(|e| CoreError::decode(&self.name, &key, e.to_string())),
            None => Ok(0),
        }
    }
}

/// The type-erased view of a collection the database keeps in its registry.
pub(crate) trait ErasedCollection: Send + Sync {
    fn name(&self) -> &str;
    fn gate(&self) -> &Arc<WriteGate>;
    fn check_integrity(&self, snapshot: &EngineSnapshot) -> CoreResult<()>;
}

impl<M: Model> ErasedCollection for CollectionShared<M> {
    fn name(&self) -> &str {
        &self.name
    }

    fn gate(&self) -> &Arc<WriteGate> {
        &self.gate
    }

    fn check_integrity(&self, snapshot: &EngineSnapshot) -> CoreResult<()> {
        integrity::check_collection(self, snapshot)
    }
}

/// A named set of models of type `M`.
///
/// Obtained from [`Database::register_collection`](crate::Database::register_collection)
/// or [`Database::collection`](crate::Database::collection). Handles are cheap
/// to clone and all clones refer to the same collection.
///
/// Writes go through transactions that hold the collection's write lock;
/// [`insert`](Self::insert), [`update`](Self::update) and
/// [`delete`](Self::delete) each run as a one-operation transaction. Reads
/// never take the write lock.
///
/// # Example
///
/// ```rust
/// # use meshdb_core::{from_cbor, to_cbor, CoreResult, Database, Model};
/// # use serde::{Deserialize, Serialize};
/// # #[derive(Debug, PartialEq, Serialize, Deserialize)]
/// # struct Person { name: String, age: u32 }
/// # impl Model for Person {
/// #     fn id(&self) -> Vec<u8> { self.name.as_bytes().to_vec() }
/// #     fn encode(&self) -> CoreResult<Vec<u8>> { to_cbor(self) }
/// #     fn decode(bytes: &[u8]) -> CoreResult<Self> { from_cbor(bytes) }
/// # }
/// let db = Database::open_in_memory().unwrap();
/// let people = db.register_collection::<Person>("people").unwrap();
/// let age = people
///     .add_index("age", |p: &Person| p.age.to_string().into_bytes())
///     .unwrap();
///
/// people.insert(&Person { name: "foo".into(), age: 42 }).unwrap();
/// people.insert(&Person { name: "bar".into(), age: 30 }).unwrap();
///
/// let found = people.new_query(age.value_filter(b"42")).run().unwrap();
/// assert_eq!(found.len(), 1);
/// assert_eq!(people.count().unwrap(), 2);
/// ```
pub struct Collection<M: Model> {
    pub(crate) shared: Arc<CollectionShared<M>>,
}

impl<M: Model> Clone for Collection<M> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<M: Model> Collection<M> {
    pub(crate) fn from_shared(shared: Arc<CollectionShared<M>>) -> Self {
        Self { shared }
    }

    /// Returns the collection name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Declares a single-value index.
    ///
    /// Only models written after this call are indexed.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IndexExists`] if the name is taken.
    pub fn add_index<F>(&self, name: &str, getter: F) -> CoreResult<Arc<Index<M>>>
    where
        F: Fn(&M) -> Vec<u8> + Send + Sync + 'static,
    {
        self.declare_index(name, Arc::new(move |model: &M| vec![getter(model)]))
    }

    /// Declares an index whose getter yields any number of values per model.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IndexExists`] if the name is taken.
    pub fn add_multi_index<F>(&self, name: &str, getter: F) -> CoreResult<Arc<Index<M>>>
    where
        F: Fn(&M) -> Vec<Vec<u8>> + Send + Sync + 'static,
    {
        self.declare_index(name, Arc::new(getter))
    }

    fn declare_index(&self, name: &str, getter: Getter<M>) -> CoreResult<Arc<Index<M>>> {
        self.shared.ensure_open()?;
        let mut indexes = self.shared.indexes.write();
        if indexes.iter().any(|index| index.name() == name) {
            return Err(CoreError::IndexExists {
                collection: self.shared.name.clone(),
                index: name.to_string(),
            });
        }
        let index = Arc::new(Index::new(&self.shared.name, name, getter));
        indexes.push(Arc::clone(&index));
        debug!(collection = %self.shared.name, index = name, "declared index");
        Ok(index)
    }

    /// Returns the declared indexes in declaration order.
    #[must_use]
    pub fn indexes(&self) -> Vec<Arc<Index<M>>> {
        self.shared.indexes()
    }

    /// Returns the index named `name`.
    #[must_use]
    pub fn index(&self, name: &str) -> Option<Arc<Index<M>>> {
        self.shared
            .indexes
            .read()
            .iter()
            .find(|index| index.name() == name)
            .cloned()
    }

    /// Returns a filter matching every model.
    #[must_use]
    pub fn all_filter(&self) -> Filter {
        Filter::all(&self.shared.name)
    }

    /// Inserts `model`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::AlreadyExists`] if a model with the same ID is
    /// stored.
    pub fn insert(&self, model: &M) -> CoreResult<SequenceNumber> {
        let mut txn = self.open_transaction()?;
        txn.insert(model)?;
        txn.commit()
    }

    /// Replaces the stored model with the same ID as `model`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if no such model is stored.
    pub fn update(&self, model: &M) -> CoreResult<SequenceNumber> {
        let mut txn = self.open_transaction()?;
        txn.update(model)?;
        txn.commit()
    }

    /// Deletes the model `id`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if no such model is stored.
    pub fn delete(&self, id: &[u8]) -> CoreResult<SequenceNumber> {
        let mut txn = self.open_transaction()?;
        txn.delete(id)?;
        txn.commit()
    }

    /// Returns the model `id`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if absent, or a decode error if the
    /// stored payload is unreadable.
    pub fn find_by_id(&self, id: &[u8]) -> CoreResult<M> {
        self.shared.ensure_open()?;
        self.shared
            .read_model(&self.shared.engine, id)?
            .ok_or_else(|| CoreError::not_found(&self.shared.name, id))
    }

    /// Returns true if the model `id` is stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the database is closed.
    pub fn contains(&self, id: &[u8]) -> CoreResult<bool> {
        self.shared.ensure_open()?;
        Ok(self
            .shared
            .engine
            .contains(&keys::model_key(&self.shared.name, id))?)
    }

    /// Returns every model in ID order.
    ///
    /// # Errors
    ///
    /// Fails if any stored payload cannot be decoded.
    pub fn find_all(&self) -> CoreResult<Vec<M>> {
        self.new_query(self.all_filter()).run()
    }

    /// Returns the number of stored models.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored count is unreadable.
    pub fn count(&self) -> CoreResult<u64> {
        self.shared.ensure_open()?;
        self.shared.read_count(&self.shared.engine)
    }

    /// Starts a query over the models matching `filter`.
    #[must_use]
    pub fn new_query(&self, filter: Filter) -> Query<M> {
        Query::new(Arc::clone(&self.shared), View::Live, filter)
    }

    /// Opens a transaction, blocking until the collection's write lock is
    /// free.
    ///
    /// The lock is held until the transaction is committed, discarded or
    /// dropped.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DatabaseClosed`] if the database is closed.
    pub fn open_transaction(&self) -> CoreResult<Transaction<M>> {
        Transaction::open(self.clone())
    }

    /// Pins the current state of the collection.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DatabaseClosed`] if the database is closed.
    pub fn snapshot(&self) -> CoreResult<CollectionSnapshot<M>> {
        self.shared.ensure_open()?;
        Ok(CollectionSnapshot::new(
            Arc::clone(&self.shared),
            self.shared.engine.snapshot(),
        ))
    }

    /// Returns a view of the collection as of a database-wide snapshot.
    #[must_use]
    pub fn snapshot_at(&self, snapshot: &DbSnapshot) -> CollectionSnapshot<M> {
        CollectionSnapshot::new(Arc::clone(&self.shared), snapshot.engine_snapshot().clone())
    }
}

impl<M: Model> std::fmt::Debug for Collection<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.shared.name)
            .field("model", &std::any::type_name::<M>())
            .finish_non_exhaustive()
    }
}
