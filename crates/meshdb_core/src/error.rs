//! Error types for MeshDB core.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in MeshDB core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage engine error.
    #[error("storage error: {0}")]
    Storage(#[from] meshdb_storage::StorageError),

    /// The targeted model does not exist.
    #[error("model {} not found in collection {collection}", String::from_utf8_lossy(.id))]
    NotFound {
        /// The collection searched.
        collection: String,
        /// The raw model ID.
        id: Vec<u8>,
    },

    /// A model with the same ID already exists.
    #[error("model {} already exists in collection {collection}", String::from_utf8_lossy(.id))]
    AlreadyExists {
        /// The collection written to.
        collection: String,
        /// The raw model ID.
        id: Vec<u8>,
    },

    /// A collection with this name is already registered.
    #[error("collection already exists: {name}")]
    CollectionExists {
        /// Name of the collection.
        name: String,
    },

    /// No collection with this name is registered.
    #[error("collection not found: {name}")]
    CollectionNotFound {
        /// Name of the collection.
        name: String,
    },

    /// The collection is bound to a different model type.
    #[error("collection {collection} holds {expected}, not {actual}")]
    TypeMismatch {
        /// Name of the collection.
        collection: String,
        /// The model type the collection was registered with.
        expected: &'static str,
        /// The model type that was requested.
        actual: &'static str,
    },

    /// An index with this name is already declared on the collection.
    #[error("index {index} already exists on collection {collection}")]
    IndexExists {
        /// Name of the collection.
        collection: String,
        /// Name of the index.
        index: String,
    },

    /// CBOR encoding or decoding failed.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the failure.
        message: String,
    },

    /// A stored payload could not be decoded into the model type.
    #[error(
        "cannot decode {} in collection {collection}: {message}",
        String::from_utf8_lossy(.key)
    )]
    Decode {
        /// Name of the collection.
        collection: String,
        /// The primary key holding the payload.
        key: Vec<u8>,
        /// Description of the failure.
        message: String,
    },

    /// A key does not follow the store's key layout.
    #[error("invalid key: {message}")]
    InvalidKey {
        /// Description of the problem.
        message: String,
    },

    /// The stored data violates a consistency invariant.
    #[error(
        "integrity violation in collection {collection}{}: {message} (key {})",
        .index.as_deref().map(|i| format!(", index {i}")).unwrap_or_default(),
        String::from_utf8_lossy(.key)
    )]
    Integrity {
        /// Name of the collection.
        collection: String,
        /// Name of the index involved, if any.
        index: Option<String>,
        /// The offending key.
        key: Vec<u8>,
        /// Description of the violation.
        message: String,
    },

    /// Database is closed.
    #[error("database is closed")]
    DatabaseClosed,
}

impl CoreError {
    /// Creates a not found error.
    pub fn not_found(collection: impl Into<String>, id: &[u8]) -> Self {
        Self::NotFound {
            collection: collection.into(),
            id: id.to_vec(),
        }
    }

    /// Creates an already exists error.
    pub fn already_exists(collection: impl Into<String>, id: &[u8]) -> Self {
        Self::AlreadyExists {
            collection: collection.into(),
            id: id.to_vec(),
        }
    }

    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates a decode error for the payload stored under `key`.
    pub fn decode(collection: impl Into<String>, key: &[u8], message: impl Into<String>) -> Self {
        Self::Decode {
            collection: collection.into(),
            key: key.to_vec(),
            message: message.into(),
        }
    }

    /// Creates an invalid key error.
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: message.into(),
        }
    }

    /// Creates an integrity error.
    pub fn integrity(
        collection: impl Into<String>,
        index: Option<&str>,
        key: &[u8],
        message: impl Into<String>,
    ) -> Self {
        Self::Integrity {
            collection: collection.into(),
            index: index.map(str::to_string),
            key: key.to_vec(),
            message: message.into(),
        }
    }

    /// Returns true if this is a [`CoreError::NotFound`].
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_context() {
        let err = CoreError::not_found("people", b"foo");
        assert_eq!(err.to_string(), "model foo not found in collection people");
        assert!(err.is_not_found());

        let err = CoreError::integrity("people", Some("age"), b"index:people:age:42:foo", "orphan");
        assert_eq!(
            err.to_string(),
            "integrity violation in collection people, index age: orphan (key index:people:age:42:foo)"
        );

        let err = CoreError::integrity("people", None, b"count:people", "count mismatch");
        assert_eq!(
            err.to_string(),
            "integrity violation in collection people: count mismatch (key count:people)"
        );
    }

    #[test]
    fn storage_errors_convert() {
        let err: CoreError = meshdb_storage::StorageError::Locked.into();
        assert!(matches!(err, CoreError::Storage(_)));
    }
}
