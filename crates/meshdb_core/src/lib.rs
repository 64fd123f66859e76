//! # MeshDB Core
//!
//! Embedded, indexed document store.
//!
//! This crate provides:
//! - Typed collections of [`Model`]s keyed by caller-assigned IDs
//! - Secondary indexes, single- and multi-valued
//! - Value, range and prefix queries with ordering, offset and limits
//! - Single-collection and global transactions, each one atomic batch
//! - Point-in-time snapshots
//! - An integrity checker for primary data, indexes and row counts
//!
//! Everything is stored in a [`meshdb_storage::Engine`] under the key
//! layout described in [`keys`].
//!
//! ## Example
//!
//! ```rust
//! use meshdb_core::{from_cbor, to_cbor, CoreResult, Database, Model};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, PartialEq, Serialize, Deserialize)]
//! struct Person {
//!     name: String,
//!     age: u32,
//! }
//!
//! impl Model for Person {
//!     fn id(&self) -> Vec<u8> {
//!         self.name.as_bytes().to_vec()
//!     }
//!     fn encode(&self) -> CoreResult<Vec<u8>> {
//!         to_cbor(self)
//!     }
//!     fn decode(bytes: &[u8]) -> CoreResult<Self> {
//!         from_cbor(bytes)
//!     }
//! }
//!
//! let db = Database::open_in_memory().unwrap();
//! let people = db.register_collection::<Person>("people").unwrap();
//! let age = people
//!     .add_index("age", |p: &Person| p.age.to_string().into_bytes())
//!     .unwrap();
//!
//! people.insert(&Person { name: "foo".into(), age: 42 }).unwrap();
//! people.update(&Person { name: "foo".into(), age: 43 }).unwrap();
//!
//! assert!(people.new_query(age.value_filter(b"42")).run().unwrap().is_empty());
//! assert_eq!(people.new_query(age.value_filter(b"43")).count().unwrap(), 1);
//! db.check_integrity().unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod collection;
mod config;
mod database;
mod error;
mod index;
mod integrity;
pub mod keys;
mod lock;
mod model;
mod query;
mod snapshot;
mod transaction;

pub use collection::Collection;
pub use config::Config;
pub use database::Database;
pub use error::{CoreError, CoreResult};
pub use index::{Filter, Index};
pub use keys::ParsedKey;
pub use model::{from_cbor, to_cbor, Model};
pub use query::Query;
pub use snapshot::{CollectionSnapshot, DbSnapshot};
pub use transaction::{GlobalTransaction, Transaction};

pub use meshdb_storage::SequenceNumber;

/// Crate version, as recorded in the package manifest.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
