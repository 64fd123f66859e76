//! Key layout on the storage engine.
//!
//! Three disjoint namespaces share the engine's key space:
//!
//! ```text
//! model:<collection>:<id>                      -> encoded model
//! index:<collection>:<index>:<value>:<id>      -> empty
//! count:<collection>                           -> decimal row count
//! ```
//!
//! Every field is [`escape`]d, so `:` only ever appears as a field
//! separator and keys split unambiguously. A count key exists only while
//! its collection holds at least one model.

use crate::error::{CoreError, CoreResult};

/// Namespace of primary keys.
pub const MODEL_NAMESPACE: &str = "model";
/// Namespace of index entries.
pub const INDEX_NAMESPACE: &str = "index";
/// Namespace of row counts.
pub const COUNT_NAMESPACE: &str = "count";

const SEPARATOR: u8 = b':';
const ESCAPE: u8 = b'\\';

/// Escapes `:` as `\c` and `\` as `\\`, leaving every other byte unchanged.
#[must_use]
pub fn escape(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    for &byte in raw {
        match byte {
            SEPARATOR => out.extend_from_slice(b"\\c"),
            ESCAPE => out.extend_from_slice(b"\\\\"),
            other => out.push(other),
        }
    }
    out
}

/// Reverses [`escape`].
///
/// # Errors
///
/// Returns [`CoreError::InvalidKey`] on a trailing lone `\`, an unknown
/// escape sequence or an unescaped `:`.
pub fn unescape(escaped: &[u8]) -> CoreResult<Vec<u8>> {
    let mut out = Vec::with_capacity(escaped.len());
    let mut bytes = escaped.iter().copied();
    while let Some(byte) = bytes.next() {
        match byte {
            ESCAPE => match bytes.next() {
                Some(b'c') => out.push(SEPARATOR),
                Some(ESCAPE) => out.push(ESCAPE),
                Some(other) => {
                    return Err(CoreError::invalid_key(format!(
                        "unknown escape sequence \\{}",
                        char::from(other)
                    )))
                }
                None => return Err(CoreError::invalid_key("trailing escape byte")),
            },
            SEPARATOR => return Err(CoreError::invalid_key("unescaped separator")),
            other => out.push(other),
        }
    }
    Ok(out)
}

fn join(fields: &[&[u8]], trailing_separator: bool) -> Vec<u8> {
    let mut key = Vec::new();
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            key.push(SEPARATOR);
        }
        key.extend_from_slice(field);
    }
    if trailing_separator {
        key.push(SEPARATOR);
    }
    key
}

/// Returns the primary key of model `id` in `collection`.
#[must_use]
pub fn model_key(collection: &str, id: &[u8]) -> Vec<u8> {
    join(
        &[
            MODEL_NAMESPACE.as_bytes(),
            &escape(collection.as_bytes()),
            &escape(id),
        ],
        false,
    )
}

/// Returns the prefix shared by every primary key of `collection`.
#[must_use]
pub fn model_prefix(collection: &str) -> Vec<u8> {
    join(
        &[MODEL_NAMESPACE.as_bytes(), &escape(collection.as_bytes())],
        true,
    )
}

/// Returns the key of one index entry.
#[must_use]
pub fn index_key(collection: &str, index: &str, value: &[u8], id: &[u8]) -> Vec<u8> {
    join(
        &[
            INDEX_NAMESPACE.as_bytes(),
            &escape(collection.as_bytes()),
            &escape(index.as_bytes()),
            &escape(value),
            &escape(id),
        ],
        false,
    )
}

/// Returns the prefix shared by every entry of one index.
#[must_use]
pub fn index_prefix(collection: &str, index: &str) -> Vec<u8> {
    join(
        &[
            INDEX_NAMESPACE.as_bytes(),
            &escape(collection.as_bytes()),
            &escape(index.as_bytes()),
        ],
        true,
    )
}

/// Returns the prefix shared by every index entry of `collection`.
#[must_use]
pub fn collection_index_prefix(collection: &str) -> Vec<u8> {
    join(
        &[INDEX_NAMESPACE.as_bytes(), &escape(collection.as_bytes())],
        true,
    )
}

/// Returns the row count key of `collection`.
#[must_use]
pub fn count_key(collection: &str) -> Vec<u8> {
    join(
        &[COUNT_NAMESPACE.as_bytes(), &escape(collection.as_bytes())],
        false,
    )
}

/// Extracts the raw model ID from a primary or index key.
///
/// # Errors
///
/// Returns an error if the final field is not validly escaped.
pub fn id_from_key(key: &[u8]) -> CoreResult<Vec<u8>> {
    let last = key
        .rsplit(|&b| b == SEPARATOR)
        .next()
        .ok_or_else(|| CoreError::invalid_key("empty key"))?;
    unescape(last)
}

/// Encodes a row count as a count key value.
#[must_use]
pub fn encode_count(count: u64) -> Vec<u8> {
    count.to_string().into_bytes()
}

/// Decodes a count key value.
///
/// # Errors
///
/// Returns an error if `value` is not a decimal number.
pub fn decode_count(value: &[u8]) -> CoreResult<u64> {
    std::str::from_utf8(value)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| {
            CoreError::invalid_key(format!(
                "count value {:?} is not a decimal number",
                String::from_utf8_lossy(value)
            ))
        })
}

/// A key split into its unescaped fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedKey {
    /// A primary key.
    Model {
        /// Collection name.
        collection: String,
        /// Raw model ID.
        id: Vec<u8>,
    },
    /// An index entry.
    Index {
        /// Collection name.
        collection: String,
        /// Index name.
        index: String,
        /// Raw indexed value.
        value: Vec<u8>,
        /// Raw model ID.
        id: Vec<u8>,
    },
    /// A row count key.
    Count {
        /// Collection name.
        collection: String,
    },
}

impl ParsedKey {
    /// Returns the collection the key belongs to.
    #[must_use]
    pub fn collection(&self) -> &str {
        match self {
            Self::Model { collection, .. }
            | Self::Index { collection, .. }
            | Self::Count { collection } => collection,
        }
    }
}

fn name_field(field: &[u8]) -> CoreResult<String> {
    String::from_utf8(unescape(field)?)
        .map_err(|_| CoreError::invalid_key("name field is not valid UTF-8"))
}

/// Splits `key` into its namespace and fields.
///
/// # Errors
///
/// Returns [`CoreError::InvalidKey`] if the namespace is unknown, the field
/// count doesn't match it, or a field is malformed.
pub fn parse_key(key: &[u8]) -> CoreResult<ParsedKey> {
    let fields: Vec<&[u8]> = key.split(|&b| b == SEPARATOR).collect();
    let namespace = fields[0];
    let shape_error = || {
        CoreError::invalid_key(format!(
            "malformed key {:?}",
            String::from_utf8_lossy(key)
        ))
    };

    match (namespace, fields.len()) {
        (ns, 3) if ns == MODEL_NAMESPACE.as_bytes() => Ok(ParsedKey::Model {
            collection: name_field(fields[1])?,
            id: unescape(fields[2])?,
        }),
        (ns, 5) if ns == INDEX_NAMESPACE.as_bytes() => Ok(ParsedKey::Index {
            collection: name_field(fields[1])?,
            index: name_field(fields[2])?,
            value: unescape(fields[3])?,
            id: unescape(fields[4])?,
        }),
        (ns, 2) if ns == COUNT_NAMESPACE.as_bytes() => Ok(ParsedKey::Count {
            collection: name_field(fields[1])?,
        }),
        _ => Err(shape_error()),
    }
}
