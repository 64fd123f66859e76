//! Test fixtures and database helpers.
//!
//! Provides sample models, convenience functions for setting up test
//! databases and a few pre-populated scenarios.

use meshdb_core::{from_cbor, to_cbor, Collection, CoreResult, Database, Index, Model};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// A person, identified by name and indexed by age.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    /// Name, used as the ID.
    pub name: String,
    /// Age in years.
    pub age: u32,
}

impl Person {
    /// Creates a person.
    pub fn new(name: &str, age: u32) -> Self {
        Self {
            name: name.to_string(),
            age,
        }
    }
}

impl Model for Person {
    fn id(&self) -> Vec<u8> {
        self.name.as_bytes().to_vec()
    }

    fn encode(&self) -> CoreResult<Vec<u8>> {
        to_cbor(self)
    }

    fn decode(bytes: &[u8]) -> CoreResult<Self> {
        from_cbor(bytes)
    }
}

/// An article with any number of tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    /// Slug, used as the ID.
    pub slug: String,
    /// Tags, indexed by a multi-value index.
    pub tags: Vec<String>,
}

impl Article {
    /// Creates an article.
    pub fn new(slug: &str, tags: &[&str]) -> Self {
        Self {
            slug: slug.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }
}

impl Model for Article {
    fn id(&self) -> Vec<u8> {
        self.slug.as_bytes().to_vec()
    }

    fn encode(&self) -> CoreResult<Vec<u8>> {
        to_cbor(self)
    }

    fn decode(bytes: &[u8]) -> CoreResult<Self> {
        from_cbor(bytes)
    }
}

/// Registers `people` with an `age` index.
pub fn people_collection(db: &Database) -> (Collection<Person>, Arc<Index<Person>>) {
    let people = db
        .register_collection::<Person>("people")
        .expect("Failed to register people");
    let age = people
        .add_index("age", |p: &Person| p.age.to_string().into_bytes())
        .expect("Failed to add age index");
    (people, age)
}

/// Registers `articles` with a `tags` multi-index.
pub fn articles_collection(db: &Database) -> (Collection<Article>, Arc<Index<Article>>) {
    let articles = db
        .register_collection::<Article>("articles")
        .expect("Failed to register articles");
    let tags = articles
        .add_multi_index("tags", |a: &Article| {
            a.tags.iter().map(|t| t.as_bytes().to_vec()).collect()
        })
        .expect("Failed to add tags index");
    (articles, tags)
}

/// A test database with automatic cleanup.
pub struct TestDatabase {
    /// The database instance.
    pub db: Database,
    /// The temporary directory (kept alive to prevent cleanup).
    temp_dir: Option<TempDir>,
}

impl TestDatabase {
    /// Creates a new in-memory test database.
    pub fn memory() -> Self {
        Self {
            db: Database::open_in_memory().expect("Failed to open in-memory database"),
            temp_dir: None,
        }
    }

    /// Creates a new file-based test database.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db = Database::open(&temp_dir.path().join("db")).expect("Failed to open file database");
        Self {
            db,
            temp_dir: Some(temp_dir),
        }
    }

    /// Returns the database path if file-based, None if in-memory.
    pub fn path(&self) -> Option<PathBuf> {
        self.temp_dir.as_ref().map(|d| d.path().join("db"))
    }

    /// Closes and reopens a file-based database, returning the new handle.
    ///
    /// Collections must be registered again on the returned handle.
    pub fn reopen(self) -> Self {
        let Some(temp_dir) = self.temp_dir else {
            panic!("Only file databases can be reopened");
        };
        self.db.close().expect("Failed to close database");
        drop(self.db);
        let db = Database::open(&temp_dir.path().join("db")).expect("Failed to reopen database");
        Self {
            db,
            temp_dir: Some(temp_dir),
        }
    }
}

impl std::ops::Deref for TestDatabase {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

/// Runs a test with a temporary in-memory database.
///
/// # Example
///
/// ```rust
/// use meshdb_testkit::with_temp_db;
///
/// with_temp_db(|db| {
///     assert!(db.collection_names().is_empty());
/// });
/// ```
pub fn with_temp_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database) -> R,
{
    let test_db = TestDatabase::memory();
    f(&test_db.db)
}

/// Runs a test with a temporary file-based database.
pub fn with_file_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database, &Path) -> R,
{
    let test_db = TestDatabase::file();
    let path = test_db.path().expect("File database should have a path");
    f(&test_db.db, &path)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// Creates a database holding `count` people named `person-NNNN`, aged
    /// `0..10` in rotation.
    pub fn populated_people(count: usize) -> (TestDatabase, Collection<Person>) {
        let test_db = TestDatabase::memory();
        let (people, _) = people_collection(&test_db);
        let mut txn = people.open_transaction().expect("Failed to open transaction");
        for i in 0..count {
            txn.insert(&Person::new(&format!("person-{i:04}"), (i % 10) as u32))
                .expect("Failed to insert person");
        }
        txn.commit().expect("Failed to commit");
        (test_db, people)
    }

    /// Creates a database with both sample collections populated.
    pub fn mixed_database() -> TestDatabase {
        let test_db = TestDatabase::memory();
        let (people, _) = people_collection(&test_db);
        let (articles, _) = articles_collection(&test_db);

        let mut global = test_db
            .open_global_transaction()
            .expect("Failed to open global transaction");
        for (name, age) in [("ann", 31), ("bob", 42), ("cat", 35)] {
            global
                .insert(&people, &Person::new(name, age))
                .expect("Failed to insert person");
        }
        for (slug, tags) in [("intro", &["rust", "news"][..]), ("recap", &["news"][..])] {
            global
                .insert(&articles, &Article::new(slug, tags))
                .expect("Failed to insert article");
        }
        global.commit().expect("Failed to commit");
        test_db
    }
}
