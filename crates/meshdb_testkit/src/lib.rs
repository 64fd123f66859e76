//! # MeshDB Testkit
//!
//! Test utilities for MeshDB.
//!
//! This crate provides:
//! - Sample models and database fixtures
//! - Property-based test generators using proptest
//! - Concurrent stress drivers
//! - A crash recovery harness that tears the commit log
//!
//! ## Usage
//!
//! ```rust
//! use meshdb_testkit::prelude::*;
//!
//! with_temp_db(|db| {
//!     let (people, age) = people_collection(db);
//!     people.insert(&Person::new("foo", 42)).unwrap();
//!     assert_eq!(people.new_query(age.value_filter(b"42")).count().unwrap(), 1);
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
pub use stress::*;
