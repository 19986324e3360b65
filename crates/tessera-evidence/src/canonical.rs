//! Canonical JSON encoding and SHA-256 helpers.
//!
//! Objects are re-emitted with keys in sorted order at every depth so that
//! the encoding does not depend on struct field order or on whether
//! `serde_json` was built with `preserve_order`.

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::EvidenceError;

/// Encodes `value` as compact JSON with recursively sorted object keys.
///
/// # Errors
///
/// Returns [`EvidenceError::Serialization`] if `value` cannot be represented
/// as JSON (e.g. a map with non-string keys).
pub fn canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, EvidenceError> {
    let value = serde_json::to_value(value).map_err(|e| EvidenceError::Serialization(e.to_string()))?;
    canonical_value_bytes(value)
}

/// Encodes an already-built [`Value`] canonically.
pub(crate) fn canonical_value_bytes(value: Value) -> Result<Vec<u8>, EvidenceError> {
    serde_json::to_vec(&sort_keys(value)).map_err(|e| EvidenceError::Serialization(e.to_string()))
}

fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (key, val) in entries {
                sorted.insert(key, sort_keys(val));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

/// Lowercase hex SHA-256 of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
