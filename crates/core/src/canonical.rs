//! Deterministic JSON encoding used as digest input.
//!
//! Objects are re-keyed through a `BTreeMap` at every depth before handing
//! them to serde_json, so equal values encode to identical bytes regardless
//! of how the map was built or whether `preserve_order` is enabled anywhere
//! in the dependency graph.

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Serializes a borrowed value with object keys in byte order.
struct Sorted<'a>(&'a Value);

impl Serialize for Sorted<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            Value::Array(items) => serializer.collect_seq(items.iter().map(Sorted)),
            Value::Object(map) => sorted(map).serialize(serializer),
            scalar => scalar.serialize(serializer),
        }
    }
}

fn sorted(map: &Map<String, Value>) -> BTreeMap<&str, Sorted<'_>> {
    map.iter().map(|(k, v)| (k.as_str(), Sorted(v))).collect()
}

/// Encode a JSON value canonically.
pub fn to_canonical_bytes(value: &Value) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(&Sorted(value))
}

/// Encode a JSON object canonically.
pub fn canonical_map(map: &Map<String, Value>) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(&sorted(map))
}
