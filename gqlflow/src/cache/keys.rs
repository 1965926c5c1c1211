//! Record identity and field key evaluation.

use crate::core::Variables;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Id of the record holding root fields.
pub const ROOT_ID: &str = "_ROOT_";

static VARIABLE_REF: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)").ok());

/// Settings of the in-memory cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Key fields used when a type has no entry in `type_keys`.
    pub default_keys: Vec<String>,
    /// Per-type key fields.
    pub type_keys: HashMap<String, Vec<String>>,
    /// Garbage collection ticks an unreferenced field survives.
    pub buffer_size: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_keys: vec!["id".to_string()],
            type_keys: HashMap::new(),
            buffer_size: 10,
        }
    }
}

impl CacheConfig {
    /// Returns the key fields of a type.
    #[must_use]
    pub fn keys_for(&self, type_name: &str) -> &[String] {
        self.type_keys
            .get(type_name)
            .map_or(self.default_keys.as_slice(), Vec::as_slice)
    }

    /// Computes the normalized id of an object, if its key fields are all present.
    #[must_use]
    pub fn record_id(&self, type_name: &str, data: &serde_json::Map<String, Value>) -> Option<String> {
        let keys = self.keys_for(type_name);
        if keys.is_empty() {
            return None;
        }
        let mut parts = Vec::with_capacity(keys.len());
        for key in keys {
            match data.get(key)? {
                Value::String(s) => parts.push(s.clone()),
                Value::Number(n) => parts.push(n.to_string()),
                _ => return None,
            }
        }
        Some(format!("{}:{}", type_name, parts.join(":")))
    }
}

/// Substitutes `$variable` references in a storage key.
///
/// Values are rendered as JSON; absent variables render as `undefined`.
#[must_use]
pub fn evaluate_key(key_raw: &str, variables: &Variables) -> String {
    let Some(pattern) = VARIABLE_REF.as_ref() else {
        return key_raw.to_string();
    };
    pattern
        .replace_all(key_raw, |caps: &regex::Captures<'_>| {
            variables
                .get(&caps[1])
                .map_or_else(|| "undefined".to_string(), Value::to_string)
        })
        .into_owned()
}
