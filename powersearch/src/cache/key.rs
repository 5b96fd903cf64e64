//! Deterministic fingerprints for cacheable operations.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Fingerprint of a tool invocation: `"{tool}:{sha256(canonical params)}"`.
///
/// Parameters are canonicalized (object keys sorted recursively) before
/// hashing, so field order in the request never changes the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    /// Computes the key for `tool` invoked with `params`.
    #[must_use]
    pub fn compute(tool: &str, params: &serde_json::Value) -> Self {
        let canonical = canonicalize(params);
        let mut hasher = Sha256::new();
        hasher.update(tool.as_bytes());
        hasher.update([0u8]);
        hasher.update(canonical.to_string().as_bytes());
        Self(format!("{tool}:{}", hex::encode(hasher.finalize())))
    }

    /// Computes the key from any serializable parameter set.
    pub fn for_params<T: Serialize>(tool: &str, params: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::compute(tool, &serde_json::to_value(params)?))
    }

    /// The tool name portion.
    #[must_use]
    pub fn tool(&self) -> &str {
        self.0.split_once(':').map_or(self.0.as_str(), |(tool, _)| tool)
    }

    /// The key as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The key prefixed with a collection namespace.
    #[must_use]
    pub fn namespaced(&self, collection: &str) -> String {
        format!("{collection}:{}", self.0)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Returns a copy of `value` with every object's keys in sorted order.
fn canonicalize(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut entries: Vec<(&String, &serde_json::Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut sorted = serde_json::Map::with_capacity(entries.len());
            for (k, v) in entries {
                sorted.insert(k.clone(), canonicalize(v));
            }
            serde_json::Value::Object(sorted)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(canonicalize).collect())
        }
        other => other.clone(),
    }
}
