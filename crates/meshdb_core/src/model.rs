//! The model trait and CBOR helpers.

use crate::error::{CoreError, CoreResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A value stored in a [`Collection`](crate::Collection).
///
/// Implementors provide:
/// - `id()`: the unique, caller-assigned identifier
/// - `encode()`: a stable serialized form
/// - `decode()`: the inverse of `encode()`
///
/// The store never looks inside the payload; it only reads models back
/// through `decode` and index getters.
///
/// # Example
///
/// ```rust
/// use meshdb_core::{from_cbor, to_cbor, CoreResult, Model};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Person {
///     name: String,
///     age: u32,
/// }
///
/// impl Model for Person {
///     fn id(&self) -> Vec<u8> {
///         self.name.as_bytes().to_vec()
///     }
///
///     fn encode(&self) -> CoreResult<Vec<u8>> {
///         to_cbor(self)
///     }
///
///     fn decode(bytes: &[u8]) -> CoreResult<Self> {
///         from_cbor(bytes)
///     }
/// }
/// ```
pub trait Model: Sized + Send + Sync + 'static {
    /// Returns the model's identifier.
    ///
    /// The ID must not change over the model's lifetime.
    fn id(&self) -> Vec<u8>;

    /// Encodes the model to bytes.
    fn encode(&self) -> CoreResult<Vec<u8>>;

    /// Decodes a model from bytes produced by [`Model::encode`].
    fn decode(bytes: &[u8]) -> CoreResult<Self>;
}

/// Serializes `value` as CBOR.
///
/// # Errors
///
/// Returns [`CoreError::Codec`] if serialization fails.
pub fn to_cbor<T: Serialize>(value: &T) -> CoreResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf).map_err(|e| CoreError::codec(e.to_string()))?;
    Ok(buf)
}

/// Deserializes a CBOR value.
///
/// # Errors
///
/// Returns [`CoreError::Codec`] if `bytes` is not a valid encoding of `T`.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> CoreResult<T> {
    ciborium::de::from_reader(bytes).map_err(|e| CoreError::codec(e.to_string()))
}

/// Decodes the payload stored under `key`, attributing failures to it.
pub(crate) fn decode_stored<M: Model>(collection: &str, key: &[u8], bytes: &[u8]) -> CoreResult<M> {
    M::decode(bytes).map_err(|e| CoreError::decode(collection, key, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Order {
        hash: String,
        amount: u64,
    }

    impl Model for Order {
        fn id(&self) -> Vec<u8> {
            self.hash.as_bytes().to_vec()
        }

        fn encode(&self) -> CoreResult<Vec<u8>> {
            to_cbor(self)
        }

        fn decode(bytes: &[u8]) -> CoreResult<Self> {
            from_cbor(bytes)
        }
    }

    #[test]
    fn cbor_roundtrip() {
        let order = Order {
            hash: "0xabc".into(),
            amount: 7,
        };
        let bytes = order.encode().unwrap();
        assert_eq!(Order::decode(&bytes).unwrap(), order);
    }

    #[test]
    fn decode_failure_names_key() {
        let err = decode_stored::<Order>("orders", b"model:orders:0xabc", &[0xff, 0x00]).unwrap_err();
        match err {
            CoreError::Decode {
                collection, key, ..
            } => {
                assert_eq!(collection, "orders");
                assert_eq!(key, b"model:orders:0xabc");
            }
            other => panic!("expected decode error, got {other:?}"),
        }
    }
}
