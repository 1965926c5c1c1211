//! The cache collaborator.
//!
//! The pipeline talks to the cache only through the [`Cache`] trait. An
//! in-memory normalized implementation is provided by [`InMemoryCache`].

mod keys;
mod memory;
#[cfg(test)]
mod memory_tests;

pub use keys::{evaluate_key, CacheConfig, ROOT_ID};
pub use memory::InMemoryCache;

use crate::core::{Selection, Variables};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Identifies a cache layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId(pub u64);

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "layer-{}", self.0)
    }
}

/// Identifies an active cache subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(pub u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subscriber-{}", self.0)
    }
}

/// Result of reading a selection out of the cache.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheReadResult {
    /// The data, or `None` when nothing usable was cached.
    pub data: Option<Value>,
    /// True if some selected fields were missing.
    pub partial: bool,
    /// True if some selected fields were marked stale.
    pub stale: bool,
}

impl CacheReadResult {
    /// Returns true if the read produced data.
    #[must_use]
    pub fn is_hit(&self) -> bool {
        self.data.is_some()
    }
}

/// A write into the cache.
#[derive(Debug, Clone)]
pub struct CacheWrite {
    /// Selection describing `data`.
    pub selection: Arc<Selection>,
    /// Marshaled response data.
    pub data: Value,
    /// Marshaled variables used to evaluate field keys.
    pub variables: Variables,
    /// Target layer; `None` lets the cache choose.
    pub layer: Option<LayerId>,
    /// Subscribers to refresh after this write.
    pub notify_subscribers: Vec<SubscriberId>,
    /// Refresh `notify_subscribers` even if their data did not change.
    pub force_notify: bool,
}

impl CacheWrite {
    /// Creates a write with no layer and no forced notifications.
    #[must_use]
    pub fn new(selection: Arc<Selection>, data: Value, variables: Variables) -> Self {
        Self {
            selection,
            data,
            variables,
            layer: None,
            notify_subscribers: Vec::new(),
            force_notify: false,
        }
    }

    /// Targets a layer.
    #[must_use]
    pub fn in_layer(mut self, layer: Option<LayerId>) -> Self {
        self.layer = layer;
        self
    }

    /// Forces a refresh of the given subscribers.
    #[must_use]
    pub fn notifying(mut self, subscribers: Vec<SubscriberId>, force: bool) -> Self {
        self.notify_subscribers = subscribers;
        self.force_notify = force;
        self
    }
}

/// Callback invoked with fresh data when a subscription's selection changes.
pub type SetFn = Arc<dyn Fn(Value) + Send + Sync>;

/// A cache-side registration of a selection.
#[derive(Clone)]
pub struct SubscriptionSpec {
    /// Selection to watch.
    pub selection: Arc<Selection>,
    /// Record the selection is read from; `None` means the root record.
    pub parent_id: Option<String>,
    /// Called with the new data whenever it changes.
    pub set: SetFn,
}

impl fmt::Debug for SubscriptionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionSpec")
            .field("fields", &self.selection.fields.keys().collect::<Vec<_>>())
            .field("parent_id", &self.parent_id)
            .finish_non_exhaustive()
    }
}

/// Storage the pipeline reads from and writes to.
///
/// Implementations are shared between every document store of a client and
/// must be safe to call from any task. Calls are synchronous and never hold
/// internal locks while invoking subscriber callbacks.
#[cfg_attr(test, mockall::automock)]
pub trait Cache: Send + Sync {
    /// Reads a selection from the root record.
    fn read(&self, selection: &Selection, variables: &Variables) -> CacheReadResult;

    /// Writes data and returns the subscribers whose selections touch it.
    fn write(&self, write: CacheWrite) -> Vec<SubscriberId>;

    /// Registers a subscription. Its `set` callback fires on every change.
    fn subscribe(&self, spec: SubscriptionSpec, variables: &Variables) -> SubscriberId;

    /// Removes a subscription. Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriberId);

    /// Pushes a new layer on top of the stack.
    fn create_layer(&self, optimistic: bool) -> LayerId;

    /// Discards every write held by a layer.
    fn clear_layer(&self, layer: LayerId);

    /// Marks a layer confirmed and merges confirmed layers into the base.
    fn resolve_layer(&self, layer: LayerId);

    /// Ages unreferenced data and evicts what outlived the buffer.
    fn collect_garbage(&self);

    /// Marks every record of a type stale, or only one field of each.
    fn mark_type_stale(&self, type_name: &str, field: Option<String>);

    /// Marks one record stale, or only one of its fields.
    fn mark_record_stale(&self, id: &str, field: Option<String>);
}
