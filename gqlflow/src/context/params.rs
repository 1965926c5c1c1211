//! Stage-to-stage bags carried by the request context.

use crate::cache::{LayerId, SubscriberId};
use serde_json::Value;

/// Stuff key holding a mutation's optimistic response.
pub const OPTIMISTIC_RESPONSE: &str = "optimisticResponse";

/// Stuff key holding the optimistic key invocation id of a mutation.
pub const MUTATION_ID: &str = "mutationID";

/// Free-form bag used by stages to pass derived data down the chain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stuff(serde_json::Map<String, Value>);

impl Stuff {
    /// Creates an empty bag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry, replacing any previous value.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.0.insert(key.into(), value);
        self
    }

    /// Gets an entry.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Returns true if the key is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Returns a copy with `other`'s entries layered on top.
    #[must_use]
    pub fn merged(&self, other: &Self) -> Self {
        let mut merged = self.0.clone();
        for (key, value) in &other.0 {
            merged.insert(key.clone(), value.clone());
        }
        Self(merged)
    }

    /// Returns a copy without the given keys.
    #[must_use]
    pub fn without(&self, keys: &[&str]) -> Self {
        let mut map = self.0.clone();
        for key in keys {
            map.remove(*key);
        }
        Self(map)
    }

    /// Returns the optimistic response, if one was supplied.
    #[must_use]
    pub fn optimistic_response(&self) -> Option<&Value> {
        self.0.get(OPTIMISTIC_RESPONSE).filter(|v| !v.is_null())
    }

    /// Returns the optimistic key invocation id.
    #[must_use]
    pub fn mutation_id(&self) -> Option<u64> {
        self.0.get(MUTATION_ID).and_then(Value::as_u64)
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the bag is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<serde_json::Map<String, Value>> for Stuff {
    fn from(map: serde_json::Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Cache-facing parameters of one invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheParams {
    /// Layer that cache writes of this invocation target.
    pub layer: Option<LayerId>,
    /// Subscribers to refresh after the next write.
    pub notify_subscribers: Vec<SubscriberId>,
    /// Refresh `notify_subscribers` even if the write changes nothing they read.
    pub force_notify: bool,
    /// Skip cache reads.
    pub disable_read: bool,
    /// Skip cache writes.
    pub disable_write: bool,
    /// Do not subscribe the store to cache updates.
    pub disable_subscriptions: bool,
    /// Overrides the cache policy stage's server-side fallback.
    pub server_side_fallback: Option<bool>,
}

impl CacheParams {
    /// Creates default parameters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Disables cache reads.
    #[must_use]
    pub fn without_read(mut self) -> Self {
        self.disable_read = true;
        self
    }

    /// Disables cache writes.
    #[must_use]
    pub fn without_write(mut self) -> Self {
        self.disable_write = true;
        self
    }

    /// Targets a layer.
    #[must_use]
    pub fn with_layer(mut self, layer: LayerId) -> Self {
        self.layer = Some(layer);
        self
    }
}
