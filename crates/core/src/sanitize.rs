//! Payload sanitization.
//!
//! Credential-like fields are stripped before a payload is hashed or stored,
//! so they never reach the integrity digest or the ledger. Matching is on the
//! exact key name, case-insensitive, at every depth of the payload.

use serde_json::{Map, Value};

/// Keys removed from every payload by default
pub const DEFAULT_DENYLIST: &[&str] = &["password", "token", "secret", "private_key"];

/// Strips denylisted keys from arbitrary payload maps
#[derive(Debug, Clone)]
pub struct Sanitizer {
    denylist: Vec<String>,
}

impl Sanitizer {
    /// Create a sanitizer with a custom denylist
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            denylist: keys
                .into_iter()
                .map(|k| k.as_ref().to_ascii_lowercase())
                .collect(),
        }
    }

    /// Whether a key is denylisted
    pub fn is_denylisted(&self, key: &str) -> bool {
        let key = key.to_ascii_lowercase();
        self.denylist.iter().any(|denied| *denied == key)
    }

    /// Remove denylisted keys. Total and idempotent.
    pub fn sanitize(&self, payload: Map<String, Value>) -> Map<String, Value> {
        payload
            .into_iter()
            .filter(|(key, _)| !self.is_denylisted(key))
            .map(|(key, value)| (key, self.scrub(value)))
            .collect()
    }

    fn scrub(&self, value: Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(self.sanitize(map)),
            Value::Array(items) => Value::Array(items.into_iter().map(|v| self.scrub(v)).collect()),
            other => other,
        }
    }
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self::new(DEFAULT_DENYLIST)
    }
}
