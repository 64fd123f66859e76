//! Database facade and collection registry.

use crate::collection::{Collection, CollectionShared, ErasedCollection};
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::lock::WriteGate;
use crate::model::Model;
use crate::snapshot::DbSnapshot;
use crate::transaction::GlobalTransaction;
use meshdb_storage::{Engine, StorageBackend};
use parking_lot::RwLock;
use std::any::{type_name, Any, TypeId};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

struct Registered {
    name: String,
    type_id: TypeId,
    type_name: &'static str,
    erased: Arc<dyn ErasedCollection>,
    typed: Arc<dyn Any + Send + Sync>,
}

struct DatabaseInner {
    config: Config,
    engine: Engine,
    closed: Arc<AtomicBool>,
    /// Serializes global transactions.
    global: Arc<WriteGate>,
    /// Taken by registration; held by a global transaction once it owns
    /// every collection lock.
    registry: Arc<WriteGate>,
    /// Registered collections in registration order.
    collections: RwLock<Vec<Registered>>,
}

/// The main database handle.
///
/// `Database` owns the storage engine, the collection registry and the
/// database-wide lock. Handles are cheap to clone and may be shared across
/// threads.
///
/// # Opening a Database
///
/// ```rust,no_run
/// use meshdb_core::Database;
/// use std::path::Path;
///
/// let db = Database::open(Path::new("orders_db")).unwrap();
/// // ...
/// db.close().unwrap();
/// ```
///
/// # Locking
///
/// Each collection has a write lock held by its open transaction. An open
/// [`GlobalTransaction`] holds every collection's write lock and the
/// registry lock, so [`register_collection`](Self::register_collection)
/// waits for it to end. While a global transaction is still waiting for
/// collection locks, registration goes ahead and the new collection joins
/// the set it waits for. Reads and snapshots take no locks.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl Database {
    /// Opens or creates a database in the directory `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory is locked by another process or
    /// its commit log is corrupted.
    pub fn open(path: &Path) -> CoreResult<Self> {
        Self::open_with_config(path, Config::default())
    }

    /// Opens a database with custom configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory is missing and `create_if_missing` is false
    /// - The database exists and `error_if_exists` is true
    /// - Another process holds the lock
    /// - The commit log is corrupted
    pub fn open_with_config(path: &Path, config: Config) -> CoreResult<Self> {
        let engine = Engine::open(path, config.engine_options())?;
        info!(path = %path.display(), seq = engine.latest_seq().as_u64(), "opened database");
        Ok(Self::from_engine(engine, config))
    }

    /// Opens a database over an arbitrary storage backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend content is corrupted.
    pub fn open_with_backend(backend: Box<dyn StorageBackend>, config: Config) -> CoreResult<Self> {
        let engine = Engine::with_backend(backend, config.engine_options())?;
        Ok(Self::from_engine(engine, config))
    }

    /// Creates a non-persistent database.
    ///
    /// # Errors
    ///
    /// Never fails today; the signature matches the other constructors.
    pub fn open_in_memory() -> CoreResult<Self> {
        Ok(Self::from_engine(Engine::in_memory(), Config::default()))
    }

    fn from_engine(engine: Engine, config: Config) -> Self {
        Self {
            inner: Arc::new(DatabaseInner {
                config,
                engine,
                closed: Arc::new(AtomicBool::new(false)),
                global: WriteGate::new(),
                registry: WriteGate::new(),
                collections: RwLock::new(Vec::new()),
            }),
        }
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            Err(CoreError::DatabaseClosed)
        } else {
            Ok(())
        }
    }

    /// Registers a collection of `M` under `name`.
    ///
    /// Blocks while a global transaction is open, so a thread holding a
    /// [`GlobalTransaction`] must not register collections.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CollectionExists`] if the name is taken, even
    /// by a collection of the same model type.
    pub fn register_collection<M: Model>(&self, name: &str) -> CoreResult<Collection<M>> {
        self.ensure_open()?;
        let _registry = self.inner.registry.acquire();
        let mut collections = self.inner.collections.write();
        if collections.iter().any(|c| c.name == name) {
            return Err(CoreError::CollectionExists {
                name: name.to_string(),
            });
        }

        let shared = Arc::new(CollectionShared::<M>::new(
            name,
            self.inner.engine.clone(),
            Arc::clone(&self.inner.closed),
        ));
        collections.push(Registered {
            name: name.to_string(),
            type_id: TypeId::of::<M>(),
            type_name: type_name::<M>(),
            erased: shared.clone(),
            typed: shared.clone(),
        });
        debug!(collection = name, model = type_name::<M>(), "registered collection");
        Ok(Collection::from_shared(shared))
    }

    /// Returns the registered collection `name`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CollectionNotFound`] if no collection has that
    /// name, or [`CoreError::TypeMismatch`] if it holds another model type.
    pub fn collection<M: Model>(&self, name: &str) -> CoreResult<Collection<M>> {
        let collections = self.inner.collections.read();
        let entry = collections
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| CoreError::CollectionNotFound {
                name: name.to_string(),
            })?;
        let mismatch = || CoreError::TypeMismatch {
            collection: name.to_string(),
            expected: entry.type_name,
            actual: type_name::<M>(),
        };
        if entry.type_id != TypeId::of::<M>() {
            return Err(mismatch());
        }
        let shared = Arc::clone(&entry.typed)
            .downcast::<CollectionShared<M>>()
            .map_err(|_| mismatch())?;
        Ok(Collection::from_shared(shared))
    }

    /// Returns the names of all registered collections in registration
    /// order.
    #[must_use]
    pub fn collection_names(&self) -> Vec<String> {
        self.inner
            .collections
            .read()
            .iter()
            .map(|c| c.name.clone())
            .collect()
    }

    /// Opens a transaction over every collection.
    ///
    /// Blocks until no other global transaction or registration is running
    /// and every collection's write lock is free. Collection locks are taken
    /// in registration order.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DatabaseClosed`] if the database is closed.
    pub fn open_global_transaction(&self) -> CoreResult<GlobalTransaction> {
        self.ensure_open()?;
        let global = self.inner.global.acquire();
        let mut guards = Vec::new();
        // Collection locks are taken without the registry lock, so a
        // registration never waits behind a blocked global transaction.
        // Collections only ever append, so the next batch to lock is the
        // tail past what is already held.
        let registry = loop {
            let registry = self.inner.registry.acquire();
            let pending: Vec<Arc<WriteGate>> = self.inner.collections.read()[guards.len()..]
                .iter()
                .map(|c| Arc::clone(c.erased.gate()))
                .collect();
            if pending.is_empty() {
                break registry;
            }
            drop(registry);
            guards.extend(pending.iter().map(WriteGate::acquire));
        };
        debug!(collections = guards.len(), "opened global transaction");
        Ok(GlobalTransaction::new(
            self.inner.engine.clone(),
            Arc::clone(&self.inner.closed),
            global,
            registry,
            guards,
        ))
    }

    /// Pins the current state of every collection.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DatabaseClosed`] if the database is closed.
    pub fn snapshot(&self) -> CoreResult<DbSnapshot> {
        self.ensure_open()?;
        Ok(DbSnapshot::new(self.inner.engine.snapshot()))
    }

    /// Audits every registered collection against one snapshot.
    ///
    /// # Errors
    ///
    /// Returns the first [`CoreError::Integrity`] violation found.
    pub fn check_integrity(&self) -> CoreResult<()> {
        self.ensure_open()?;
        let snapshot = self.inner.engine.snapshot();
        let collections: Vec<Arc<dyn ErasedCollection>> = self
            .inner
            .collections
            .read()
            .iter()
            .map(|c| Arc::clone(&c.erased))
            .collect();
        for collection in &collections {
            collection.check_integrity(&snapshot)?;
        }
        info!(
            collections = collections.len(),
            seq = snapshot.sequence().as_u64(),
            "integrity check passed"
        );
        Ok(())
    }

    /// Rewrites the commit log to hold only the live state.
    ///
    /// # Errors
    ///
    /// Returns an error if the rewrite fails.
    pub fn compact(&self) -> CoreResult<()> {
        self.ensure_open()?;
        Ok(self.inner.engine.compact()?)
    }

    /// Returns the underlying engine for raw key access.
    #[must_use]
    pub fn engine(&self) -> &Engine {
        &self.inner.engine
    }

    /// Returns the configuration the database was opened with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Returns true until [`close`](Self::close) is called.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.inner.closed.load(Ordering::SeqCst)
    }

    /// Closes the database.
    ///
    /// Every later operation on it or its collections fails with
    /// [`CoreError::DatabaseClosed`]. Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the final sync fails.
    pub fn close(&self) -> CoreResult<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.engine.close()?;
        info!("closed database");
        Ok(())
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("collections", &self.collection_names())
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}
