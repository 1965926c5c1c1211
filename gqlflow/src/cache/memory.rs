//! In-memory normalized cache with optimistic layers.

use super::{
    evaluate_key, Cache, CacheConfig, CacheReadResult, CacheWrite, LayerId, SetFn, SubscriberId,
    SubscriptionSpec, ROOT_ID,
};
use crate::core::{FieldSelection, Selection, Variables};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
enum Link {
    Null,
    Record(String),
    List(Vec<Link>),
}

#[derive(Debug, Clone, PartialEq)]
enum Stored {
    Scalar(Value),
    Link(Link),
}

type Fields = HashMap<String, Stored>;

#[derive(Debug)]
struct Layer {
    id: LayerId,
    optimistic: bool,
    records: HashMap<String, Fields>,
}

impl Layer {
    fn new(id: LayerId, optimistic: bool) -> Self {
        Self {
            id,
            optimistic,
            records: HashMap::new(),
        }
    }

    fn get(&self, record: &str, field: &str) -> Option<&Stored> {
        self.records.get(record).and_then(|fields| fields.get(field))
    }

    fn set(&mut self, record: &str, field: String, value: Stored) {
        self.records
            .entry(record.to_string())
            .or_default()
            .insert(field, value);
    }

    fn absorb(&mut self, upper: Layer) {
        for (record, fields) in upper.records {
            self.records.entry(record).or_default().extend(fields);
        }
    }
}

struct Subscriber {
    spec: SubscriptionSpec,
    variables: Variables,
    deps: HashSet<String>,
    last: Option<Value>,
}

#[derive(Default)]
struct ReadAcc {
    found: bool,
    partial: bool,
    stale: bool,
    deps: HashSet<String>,
}

/// Read-only view over the layer stack.
struct Reader<'a> {
    layers: &'a [Layer],
    stale: &'a HashSet<(String, String)>,
}

impl Reader<'_> {
    fn lookup(&self, record: &str, field: &str) -> Option<&Stored> {
        self.layers.iter().rev().find_map(|layer| layer.get(record, field))
    }

    fn read(&self, parent: &str, selection: &Selection, variables: &Variables) -> (CacheReadResult, HashSet<String>) {
        let mut acc = ReadAcc::default();
        let data = self.read_record(parent, selection, variables, &mut acc);
        let result = CacheReadResult {
            data: if acc.found { data } else { None },
            partial: acc.partial,
            stale: acc.stale,
        };
        (result, acc.deps)
    }

    /// Returns `None` when a non-null field is null, nulling the parent.
    fn read_record(
        &self,
        record: &str,
        selection: &Selection,
        variables: &Variables,
        acc: &mut ReadAcc,
    ) -> Option<Value> {
        acc.deps.insert(record.to_string());
        let mut out = Map::new();
        for (response_key, field) in &selection.fields {
            let key = evaluate_key(field.storage_key(response_key), variables);
            if self.stale.contains(&(record.to_string(), key.clone())) {
                acc.stale = true;
            }
            let value = match self.lookup(record, &key) {
                None => {
                    acc.partial = true;
                    Value::Null
                }
                Some(Stored::Scalar(value)) => {
                    acc.found = true;
                    value.clone()
                }
                Some(Stored::Link(link)) => {
                    acc.found = true;
                    self.read_link(link, field, variables, acc)
                }
            };
            if value.is_null() && !field.nullable {
                return None;
            }
            out.insert(response_key.clone(), value);
        }
        Some(Value::Object(out))
    }

    fn read_link(&self, link: &Link, field: &FieldSelection, variables: &Variables, acc: &mut ReadAcc) -> Value {
        match link {
            Link::Null => Value::Null,
            Link::Record(id) => match &field.selection {
                Some(selection) => self
                    .read_record(id, selection, variables, acc)
                    .unwrap_or(Value::Null),
                None => Value::Null,
            },
            Link::List(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.read_link(item, field, variables, acc))
                    .collect(),
            ),
        }
    }
}

struct State {
    layers: Vec<Layer>,
    next_layer: u64,
    types: HashMap<String, String>,
    stale: HashSet<(String, String)>,
    lifetimes: HashMap<(String, String), u32>,
    subscribers: HashMap<SubscriberId, Subscriber>,
    next_subscriber: u64,
}

impl State {
    fn new() -> Self {
        Self {
            layers: vec![Layer::new(LayerId(0), false)],
            next_layer: 1,
            types: HashMap::new(),
            stale: HashSet::new(),
            lifetimes: HashMap::new(),
            subscribers: HashMap::new(),
            next_subscriber: 1,
        }
    }

    fn reader(&self) -> Reader<'_> {
        Reader {
            layers: &self.layers,
            stale: &self.stale,
        }
    }

    fn layer_index(&self, id: LayerId) -> Option<usize> {
        self.layers.iter().position(|layer| layer.id == id)
    }

    fn push_layer(&mut self, optimistic: bool) -> usize {
        let id = LayerId(self.next_layer);
        self.next_layer += 1;
        self.layers.push(Layer::new(id, optimistic));
        self.layers.len() - 1
    }

    /// Picks the layer a write lands in.
    fn target_layer(&mut self, requested: Option<LayerId>) -> usize {
        if let Some(id) = requested {
            if let Some(index) = self.layer_index(id) {
                return index;
            }
            warn!(layer = %id, "Write targets a merged layer, using the top layer");
        }
        let top = self.layers.len() - 1;
        if self.layers[top].optimistic {
            self.push_layer(false)
        } else {
            top
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn write_record(
        &mut self,
        config: &CacheConfig,
        layer: usize,
        record: &str,
        selection: &Selection,
        data: &Map<String, Value>,
        variables: &Variables,
        touched: &mut HashSet<String>,
    ) {
        touched.insert(record.to_string());
        for (response_key, field) in &selection.fields {
            let Some(value) = data.get(response_key) else {
                continue;
            };
            let key = evaluate_key(field.storage_key(response_key), variables);
            let stored = match &field.selection {
                None => Stored::Scalar(value.clone()),
                Some(inner) => {
                    let path = format!("{record}.{key}");
                    Stored::Link(self.write_link(config, layer, &path, field, inner, value, variables, touched))
                }
            };
            let slot = (record.to_string(), key.clone());
            self.stale.remove(&slot);
            self.lifetimes.remove(&slot);
            self.layers[layer].set(record, key, stored);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn write_link(
        &mut self,
        config: &CacheConfig,
        layer: usize,
        path: &str,
        field: &FieldSelection,
        selection: &Selection,
        value: &Value,
        variables: &Variables,
        touched: &mut HashSet<String>,
    ) -> Link {
        match value {
            Value::Array(items) => Link::List(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| {
                        let item_path = format!("{path}[{i}]");
                        self.write_link(config, layer, &item_path, field, selection, item, variables, touched)
                    })
                    .collect(),
            ),
            Value::Object(object) => {
                let type_name = object
                    .get("__typename")
                    .and_then(Value::as_str)
                    .unwrap_or(&field.type_name)
                    .to_string();
                let id = config
                    .record_id(&type_name, object)
                    .unwrap_or_else(|| path.to_string());
                self.types.insert(id.clone(), type_name);
                self.write_record(config, layer, &id, selection, object, variables, touched);
                Link::Record(id)
            }
            _ => Link::Null,
        }
    }

    /// Re-reads affected subscribers and returns the callbacks to fire.
    fn notifications(&mut self, touched: &HashSet<String>, forced: &[SubscriberId]) -> Vec<(SetFn, Value)> {
        let reader = Reader {
            layers: &self.layers,
            stale: &self.stale,
        };
        let mut out = Vec::new();
        for (id, subscriber) in &mut self.subscribers {
            let force = forced.contains(id);
            if !force && subscriber.deps.is_disjoint(touched) {
                continue;
            }
            let parent = subscriber.spec.parent_id.as_deref().unwrap_or(ROOT_ID);
            let (result, deps) = reader.read(parent, &subscriber.spec.selection, &subscriber.variables);
            subscriber.deps = deps;
            let value = result.data.unwrap_or(Value::Null);
            if force || subscriber.last.as_ref() != Some(&value) {
                subscriber.last = Some(value.clone());
                out.push((subscriber.spec.set.clone(), value));
            }
        }
        out
    }

    fn affected(&self, touched: &HashSet<String>) -> Vec<SubscriberId> {
        let mut ids: Vec<_> = self
            .subscribers
            .iter()
            .filter(|(_, s)| !s.deps.is_disjoint(touched))
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }

    fn field_keys(&self, record: &str) -> HashSet<String> {
        self.layers
            .iter()
            .filter_map(|layer| layer.records.get(record))
            .flat_map(|fields| fields.keys().cloned())
            .collect()
    }

    fn mark_stale(&mut self, record: &str, field: Option<&str>) {
        for key in self.field_keys(record) {
            let matches = match field {
                None => true,
                Some(name) => key == name || key.starts_with(&format!("{name}(")),
            };
            if matches {
                self.stale.insert((record.to_string(), key));
            }
        }
    }
}

/// A normalized in-memory [`Cache`].
///
/// Objects whose key fields are present are stored once under `Type:key`;
/// other objects are embedded under their path from the parent record.
/// Layer 0 is the base store.
pub struct InMemoryCache {
    config: CacheConfig,
    state: Mutex<State>,
}

impl fmt::Debug for InMemoryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("InMemoryCache")
            .field("layers", &state.layers.len())
            .field("records", &state.types.len())
            .field("subscribers", &state.subscribers.len())
            .finish()
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl InMemoryCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            state: Mutex::new(State::new()),
        }
    }

    /// Returns the cache settings.
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Returns the number of layers, base included.
    #[must_use]
    pub fn layer_count(&self) -> usize {
        self.state.lock().layers.len()
    }

    /// Returns the number of active subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    /// Reads a selection starting at an arbitrary record.
    #[must_use]
    pub fn read_from(&self, parent: &str, selection: &Selection, variables: &Variables) -> CacheReadResult {
        self.state.lock().reader().read(parent, selection, variables).0
    }

    /// Returns every visible field of every record, layers applied.
    ///
    /// Links render as `{"__ref": id}`.
    #[must_use]
    pub fn snapshot(&self) -> Value {
        let state = self.state.lock();
        let mut records: BTreeMap<String, BTreeMap<String, Value>> = BTreeMap::new();
        for layer in &state.layers {
            for (id, fields) in &layer.records {
                let entry = records.entry(id.clone()).or_default();
                for (key, stored) in fields {
                    entry.insert(key.clone(), render(stored));
                }
            }
        }
        serde_json::to_value(records).unwrap_or(Value::Null)
    }

    fn fire(callbacks: Vec<(SetFn, Value)>) {
        for (set, value) in callbacks {
            set(value);
        }
    }
}

fn render(stored: &Stored) -> Value {
    fn link(target: &Link) -> Value {
        match target {
            Link::Null => Value::Null,
            Link::Record(id) => serde_json::json!({ "__ref": id }),
            Link::List(items) => Value::Array(items.iter().map(link).collect()),
        }
    }
    match stored {
        Stored::Scalar(value) => value.clone(),
        Stored::Link(l) => link(l),
    }
}

impl Cache for InMemoryCache {
    fn read(&self, selection: &Selection, variables: &Variables) -> CacheReadResult {
        self.read_from(ROOT_ID, selection, variables)
    }

    fn write(&self, write: CacheWrite) -> Vec<SubscriberId> {
        let Value::Object(data) = &write.data else {
            return Vec::new();
        };
        let (affected, callbacks) = {
            let mut state = self.state.lock();
            let layer = state.target_layer(write.layer);
            let mut touched = HashSet::new();
            state.write_record(
                &self.config,
                layer,
                ROOT_ID,
                &write.selection,
                data,
                &write.variables,
                &mut touched,
            );
            let affected = state.affected(&touched);
            let forced = if write.force_notify {
                write.notify_subscribers.as_slice()
            } else {
                &[]
            };
            let callbacks = state.notifications(&touched, forced);
            (affected, callbacks)
        };
        debug!(notified = callbacks.len(), "Cache write");
        Self::fire(callbacks);
        affected
    }

    fn subscribe(&self, spec: SubscriptionSpec, variables: &Variables) -> SubscriberId {
        let mut state = self.state.lock();
        let parent = spec.parent_id.clone().unwrap_or_else(|| ROOT_ID.to_string());
        let (result, deps) = state.reader().read(&parent, &spec.selection, variables);
        let id = SubscriberId(state.next_subscriber);
        state.next_subscriber += 1;
        state.subscribers.insert(
            id,
            Subscriber {
                spec,
                variables: variables.clone(),
                deps,
                last: result.data,
            },
        );
        id
    }

    fn unsubscribe(&self, id: SubscriberId) {
        self.state.lock().subscribers.remove(&id);
    }

    fn create_layer(&self, optimistic: bool) -> LayerId {
        let mut state = self.state.lock();
        let index = state.push_layer(optimistic);
        state.layers[index].id
    }

    fn clear_layer(&self, layer: LayerId) {
        let callbacks = {
            let mut state = self.state.lock();
            let Some(index) = state.layer_index(layer) else {
                debug!(layer = %layer, "Clearing a layer that no longer exists");
                return;
            };
            let touched: HashSet<String> = state.layers[index].records.drain().map(|(id, _)| id).collect();
            state.notifications(&touched, &[])
        };
        Self::fire(callbacks);
    }

    fn resolve_layer(&self, layer: LayerId) {
        let mut state = self.state.lock();
        let Some(index) = state.layer_index(layer) else {
            debug!(layer = %layer, "Resolving a layer that no longer exists");
            return;
        };
        state.layers[index].optimistic = false;
        while state.layers.len() > 1 && !state.layers[1].optimistic {
            let upper = state.layers.remove(1);
            state.layers[0].absorb(upper);
        }
    }

    fn collect_garbage(&self) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let referenced: HashSet<&String> = state.subscribers.values().flat_map(|s| s.deps.iter()).collect();
        let buffer = self.config.buffer_size;
        let mut evicted = 0usize;

        for (record, fields) in &mut state.layers[0].records {
            if referenced.contains(record) {
                for key in fields.keys() {
                    state.lifetimes.remove(&(record.clone(), key.clone()));
                }
                continue;
            }
            fields.retain(|key, _| {
                let age = state.lifetimes.entry((record.clone(), key.clone())).or_insert(0);
                *age += 1;
                if *age > buffer {
                    evicted += 1;
                    false
                } else {
                    true
                }
            });
        }

        let layers = &mut state.layers;
        layers[0].records.retain(|_, fields| !fields.is_empty());
        let live: HashSet<String> = layers
            .iter()
            .flat_map(|layer| layer.records.keys().cloned())
            .collect();
        state.types.retain(|id, _| live.contains(id));
        state.lifetimes.retain(|(id, _), _| live.contains(id));
        if evicted > 0 {
            debug!(evicted, "Garbage collected cache fields");
        }
    }

    fn mark_type_stale(&self, type_name: &str, field: Option<String>) {
        let mut state = self.state.lock();
        let records: Vec<String> = state
            .types
            .iter()
            .filter(|(_, t)| t.as_str() == type_name)
            .map(|(id, _)| id.clone())
            .collect();
        for record in records {
            state.mark_stale(&record, field.as_deref());
        }
    }

    fn mark_record_stale(&self, id: &str, field: Option<String>) {
        self.state.lock().mark_stale(id, field.as_deref());
    }
}
