//! Single-collection and global transactions.
//!
//! Both kinds queue mutations in a [`WriteSet`] and apply them with one
//! engine write at commit. While a transaction is open it holds the write
//! lock of every collection it may touch, so the state it reads cannot
//! change underneath it and the row counts it folds into the batch are
//! current.

use crate::collection::{Collection, CollectionShared};
use crate::error::{CoreError, CoreResult};
use crate::keys;
use crate::lock::GateGuard;
use crate::model::{decode_stored, Model};
use meshdb_storage::{Engine, KvRead, SequenceNumber, WriteBatch};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Mutations queued by a transaction, plus per-collection row count deltas.
#[derive(Debug, Default)]
pub(crate) struct WriteSet {
    /// Final state of every touched key; `None` deletes it.
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    counts: BTreeMap<String, i64>,
    ops: usize,
}

impl WriteSet {
    fn read(&self, engine: &Engine, key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        match self.writes.get(key) {
            Some(pending) => Ok(pending.clone()),
            None => Ok(engine.get(key)?),
        }
    }

    fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.writes.insert(key, Some(value));
    }

    fn remove(&mut self, key: Vec<u8>) {
        self.writes.insert(key, None);
    }

    /// Reads model `id`, seeing this write set's own changes.
    pub(crate) fn find<M: Model>(
        &self,
        collection: &CollectionShared<M>,
        id: &[u8],
    ) -> CoreResult<Option<M>> {
        let key = keys::model_key(&collection.name, id);
        self.read(&collection.engine, &key)?
            .map(|bytes| decode_stored(&collection.name, &key, &bytes))
            .transpose()
    }

    pub(crate) fn insert<M: Model>(
        &mut self,
        collection: &CollectionShared<M>,
        model: &M,
    ) -> CoreResult<()> {
        let id = model.id();
        let key = keys::model_key(&collection.name, &id);
        if self.read(&collection.engine, &key)?.is_some() {
            return Err(CoreError::already_exists(&collection.name, &id));
        }
        let payload = model.encode()?;

        self.put(key, payload);
        for index in collection.indexes() {
            for entry in index.entry_keys(model, &id) {
                self.put(entry, Vec::new());
            }
        }
        *self.counts.entry(collection.name.clone()).or_default() += 1;
        self.ops += 1;
        Ok(())
    }

    pub(crate) fn update<M: Model>(
        &mut self,
        collection: &CollectionShared<M>,
        model: &M,
    ) -> CoreResult<()> {
        let id = model.id();
        let key = keys::model_key(&collection.name, &id);
        let stored = self
            .read(&collection.engine, &key)?
            .ok_or_else(|| CoreError::not_found(&collection.name, &id))?;
        // Stale entries come from what is stored, not from the caller's copy.
        let previous: M = decode_stored(&collection.name, &key, &stored)?;
        let payload = model.encode()?;

        let mut stale = BTreeSet::new();
        let mut fresh = BTreeSet::new();
        for index in collection.indexes() {
            stale.extend(index.entry_keys(&previous, &id));
            fresh.extend(index.entry_keys(model, &id));
        }
        for entry in stale.difference(&fresh) {
            self.remove(entry.clone());
        }
        self.put(key, payload);
        for entry in fresh {
            self.put(entry, Vec::new());
        }
        self.ops += 1;
        Ok(())
    }

    pub(crate) fn delete<M: Model>(
        &mut self,
        collection: &CollectionShared<M>,
        id: &[u8],
    ) -> CoreResult<()> {
        let key = keys::model_key(&collection.name, id);
        let stored = self
            .read(&collection.engine, &key)?
            .ok_or_else(|| CoreError::not_found(&collection.name, id))?;
        let previous: M = decode_stored(&collection.name, &key, &stored)?;

        self.remove(key);
        for index in collection.indexes() {
            for entry in index.entry_keys(&previous, id) {
                self.remove(entry);
            }
        }
        *self.counts.entry(collection.name.clone()).or_default() -= 1;
        self.ops += 1;
        Ok(())
    }

    pub(crate) fn len(&self) -> usize {
        self.ops
    }

    /// Builds the batch, folding count deltas into it, and writes it.
    ///
    /// Must run while the write locks of every counted collection are held.
    pub(crate) fn commit(self, engine: &Engine, label: &str) -> CoreResult<SequenceNumber> {
        let mut batch = WriteBatch::new();
        for (key, value) in self.writes {
            match value {
                Some(value) => batch.put(key, value),
                None => batch.delete(key),
            }
        }

        for (collection, delta) in self.counts {
            if delta == 0 {
                continue;
            }
            let key = keys::count_key(&collection);
            let current = match engine.get(&key)? {
                Some(value) => keys::decode_count(&value)
                    .map_err(|e| CoreError::decode(&collection, &key, e.to_string()))?,
                None => 0,
            };
            let updated = i64::try_from(current).unwrap_or(i64::MAX).saturating_add(delta);
            match updated {
                n if n < 0 => {
                    return Err(CoreError::integrity(
                        &collection,
                        None,
                        &key,
                        format!("row count {current} cannot absorb delta {delta}"),
                    ))
                }
                0 => batch.delete(key),
                n => batch.put(key, keys::encode_count(n.unsigned_abs())),
            }
        }

        let ops = batch.len();
        let seq = engine.write(batch)?;
        debug!(collection = label, ops, seq = seq.as_u64(), "committed transaction");
        Ok(seq)
    }
}

/// A transaction against one collection.
///
/// Holds the collection's write lock from [`Collection::open_transaction`]
/// until [`commit`](Self::commit), [`discard`](Self::discard) or drop.
/// Reads through the transaction see its own pending writes. Dropping an
/// uncommitted transaction discards it.
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
///
/// let mut txn = people.open_transaction().unwrap();
/// txn.insert(&Person { name: "foo".into(), age: 42 }).unwrap();
/// txn.insert(&Person { name: "bar".into(), age: 7 }).unwrap();
/// assert_eq!(txn.find_by_id(b"foo").unwrap().age, 42);
/// txn.commit().unwrap();
///
/// assert_eq!(people.count().unwrap(), 2);
/// ```
pub struct Transaction<M: Model> {
    collection: Collection<M>,
    writes: WriteSet,
    _guard: GateGuard,
}

impl<M: Model> Transaction<M> {
    pub(crate) fn open(collection: Collection<M>) -> CoreResult<Self> {
        collection.shared.ensure_open()?;
        let guard = collection.shared.gate.acquire();
        Ok(Self {
            collection,
            writes: WriteSet::default(),
            _guard: guard,
        })
    }

    /// Queues an insert of `model`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::AlreadyExists`] if the ID is taken, counting
    /// this transaction's own pending writes.
    pub fn insert(&mut self, model: &M) -> CoreResult<()> {
        self.writes.insert(&self.collection.shared, model)
    }

    /// Queues an update of `model`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if the ID is absent.
    pub fn update(&mut self, model: &M) -> CoreResult<()> {
        self.writes.update(&self.collection.shared, model)
    }

    /// Queues a delete of model `id`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if the ID is absent.
    pub fn delete(&mut self, id: &[u8]) -> CoreResult<()> {
        self.writes.delete(&self.collection.shared, id)
    }

    /// Returns model `id` as this transaction sees it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if the ID is absent.
    pub fn find_by_id(&self, id: &[u8]) -> CoreResult<M> {
        self.writes
            .find(&self.collection.shared, id)?
            .ok_or_else(|| CoreError::not_found(self.collection.name(), id))
    }

    /// Returns the number of queued mutations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.writes.len() == 0
    }

    /// Applies every queued mutation atomically and releases the lock.
    ///
    /// # Errors
    ///
    /// On failure nothing is applied and the lock is still released.
    pub fn commit(self) -> CoreResult<SequenceNumber> {
        let Self {
            collection,
            writes,
            _guard,
        } = self;
        collection.shared.ensure_open()?;
        writes.commit(&collection.shared.engine, collection.name())
    }

    /// Drops every queued mutation and releases the lock.
    pub fn discard(self) {
        debug!(
            collection = %self.collection.name(),
            ops = self.writes.len(),
            "discarded transaction"
        );
    }
}

/// A transaction spanning every collection.
///
/// Opening one takes the database-wide lock, then the write lock of every
/// registered collection in registration order, then the registry lock.
/// No other writer or registration can run until it ends.
///
/// A thread holding a [`Transaction`] must not open a global transaction,
/// and a thread holding a global transaction must not register a
/// collection; either would wait on its own lock.
pub struct GlobalTransaction {
    engine: Engine,
    closed: Arc<AtomicBool>,
    writes: WriteSet,
    collection_guards: Vec<GateGuard>,
    _registry: GateGuard,
    _global: GateGuard,
}

impl GlobalTransaction {
    pub(crate) fn new(
        engine: Engine,
        closed: Arc<AtomicBool>,
        global: GateGuard,
        registry: GateGuard,
        collection_guards: Vec<GateGuard>,
    ) -> Self {
        Self {
            engine,
            closed,
            writes: WriteSet::default(),
            collection_guards,
            _registry: registry,
            _global: global,
        }
    }

    fn locked<'a, M: Model>(
        &self,
        collection: &'a Collection<M>,
    ) -> CoreResult<&'a CollectionShared<M>> {
        let shared = &collection.shared;
        if self
            .collection_guards
            .iter()
            .any(|guard| guard.guards(&shared.gate))
        {
            Ok(shared)
        } else {
            Err(CoreError::CollectionNotFound {
                name: shared.name.clone(),
            })
        }
    }

    /// Queues an insert of `model` into `collection`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::AlreadyExists`] if the ID is taken, or
    /// [`CoreError::CollectionNotFound`] if `collection` belongs to another
    /// database.
    pub fn insert<M: Model>(&mut self, collection: &Collection<M>, model: &M) -> CoreResult<()> {
        let shared = self.locked(collection)?;
        self.writes.insert(shared, model)
    }

    /// Queues an update of `model` in `collection`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if the ID is absent.
    pub fn update<M: Model>(&mut self, collection: &Collection<M>, model: &M) -> CoreResult<()> {
        let shared = self.locked(collection)?;
        self.writes.update(shared, model)
    }

    /// Queues a delete of model `id` from `collection`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if the ID is absent.
    pub fn delete<M: Model>(&mut self, collection: &Collection<M>, id: &[u8]) -> CoreResult<()> {
        let shared = self.locked(collection)?;
        self.writes.delete(shared, id)
    }

    /// Returns model `id` of `collection` as this transaction sees it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if the ID is absent.
    pub fn find_by_id<M: Model>(&self, collection: &Collection<M>, id: &[u8]) -> CoreResult<M> {
        let shared = self.locked(collection)?;
        self.writes
            .find(shared, id)?
            .ok_or_else(|| CoreError::not_found(&shared.name, id))
    }

    /// Returns the number of queued mutations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.writes.len() == 0
    }

    /// Applies every queued mutation across all collections atomically.
    ///
    /// # Errors
    ///
    /// On failure nothing is applied.
    pub fn commit(self) -> CoreResult<SequenceNumber> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CoreError::DatabaseClosed);
        }
        self.writes.commit(&self.engine, "(global)")
    }

    /// Drops every queued mutation and releases all locks.
    pub fn discard(self) {
        debug!(ops = self.writes.len(), "discarded global transaction");
    }
}
