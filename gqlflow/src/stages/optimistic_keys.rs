//! Placeholder identifiers for optimistic responses.
//!
//! A mutation can promise an id before the server assigns it.
//! [`OptimisticKeyStage`] mints a placeholder for every field flagged as an
//! optimistic key, ahead of the mutation's layer write. [`PendingKeyStage`]
//! sits after the mutation stage and holds back any chain whose variables
//! carry a pending placeholder until the minting mutation's response supplies
//! the real value.
//!
//! String keys carry [`OPTIMISTIC_KEY_PREFIX`] and are recognised anywhere.
//! Negative `Int` keys are only recognised at variable positions the
//! document's input types declare as `Int`.

use crate::context::{Context, MUTATION_ID, OPTIMISTIC_RESPONSE};
use crate::core::{InputObject, Selection, Variables};
use crate::errors::ClientError;
use crate::pipeline::{EnterHandlers, ExitHandlers, HookSet, Plugin, ThrowHandlers};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

/// Prefix of minted string keys.
pub const OPTIMISTIC_KEY_PREFIX: &str = "__optimistic__:";

#[derive(Default)]
struct Registry {
    /// Pending key (JSON text) to the chains waiting for its real value.
    waiters: HashMap<String, Vec<oneshot::Sender<Value>>>,
    /// Mutation invocation to the response paths of the keys it minted.
    minted: HashMap<u64, BTreeMap<String, Value>>,
}

/// A chain waiting for one pending key.
#[derive(Debug)]
pub struct PendingKey {
    /// The placeholder found in the variables.
    pub key: Value,
    /// Receives the real value. Closed if the key is abandoned.
    pub receiver: oneshot::Receiver<Value>,
}

/// Optimistic keys of one client: which are pending and who waits on them.
pub struct OptimisticKeys {
    registry: Mutex<Registry>,
    invocations: AtomicU64,
    next_int: AtomicI64,
}

impl Default for OptimisticKeys {
    fn default() -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            invocations: AtomicU64::new(1),
            next_int: AtomicI64::new(-1),
        }
    }
}

impl fmt::Debug for OptimisticKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.registry.lock();
        f.debug_struct("OptimisticKeys")
            .field("pending", &registry.waiters.len())
            .field("invocations", &registry.minted.len())
            .finish()
    }
}

impl OptimisticKeys {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a fresh mutation invocation id.
    pub fn next_invocation(&self) -> u64 {
        self.invocations.fetch_add(1, Ordering::Relaxed)
    }

    /// Mints a placeholder for a field of the given GraphQL type.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::OptimisticKey` for types that cannot hold one.
    pub fn mint(&self, field: &str, type_name: &str) -> Result<Value, ClientError> {
        match type_name {
            "ID" | "String" => Ok(json!(format!("{OPTIMISTIC_KEY_PREFIX}{}", Uuid::new_v4()))),
            "Int" => Ok(json!(self.next_int.fetch_sub(1, Ordering::Relaxed))),
            other => Err(ClientError::optimistic_key(
                field,
                format!("type {other} cannot hold an optimistic key"),
            )),
        }
    }

    /// Fills every missing optimistic key field of `response` with a fresh
    /// placeholder and registers the placeholders as pending for `invocation`.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::OptimisticKey` if a key cannot be minted. Nothing
    /// is registered in that case.
    pub fn augment(&self, invocation: u64, selection: &Selection, response: &Value) -> Result<Value, ClientError> {
        let mut response = response.clone();
        let mut minted = Vec::new();
        self.fill(selection, &mut response, &mut Vec::new(), &mut minted)?;

        if !minted.is_empty() {
            let mut registry = self.registry.lock();
            for (_, key) in &minted {
                registry.waiters.entry(key.to_string()).or_default();
            }
            registry.minted.insert(invocation, minted.into_iter().collect());
        }
        Ok(response)
    }

    fn fill(
        &self,
        selection: &Selection,
        value: &mut Value,
        path: &mut Vec<String>,
        minted: &mut Vec<(String, Value)>,
    ) -> Result<(), ClientError> {
        match value {
            Value::Array(items) => {
                for (index, item) in items.iter_mut().enumerate() {
                    path.push(index.to_string());
                    self.fill(selection, item, path, minted)?;
                    path.pop();
                }
            }
            Value::Object(object) => {
                for (response_key, field) in &selection.fields {
                    path.push(response_key.clone());
                    if field.optimistic_key && object.get(response_key).map_or(true, Value::is_null) {
                        let key = self.mint(response_key, &field.type_name)?;
                        object.insert(response_key.clone(), key.clone());
                        minted.push((path.join("."), key));
                    }
                    if let (Some(nested), Some(child)) = (&field.selection, object.get_mut(response_key)) {
                        self.fill(nested, child, path, minted)?;
                    }
                    path.pop();
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Returns true if `key` is waiting for its real value.
    #[must_use]
    pub fn is_pending(&self, key: &Value) -> bool {
        self.registry.lock().waiters.contains_key(&key.to_string())
    }

    /// Returns the number of pending keys.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.registry.lock().waiters.len()
    }

    /// Registers a waiter for every pending key referenced by `variables`.
    ///
    /// `input` types the variables. Without it only prefixed string keys
    /// can match.
    pub fn wait_for(&self, variables: &Variables, input: Option<&InputObject>) -> Vec<PendingKey> {
        let mut registry = self.registry.lock();
        if registry.waiters.is_empty() {
            return Vec::new();
        }
        let mut found = Vec::new();
        for (name, value) in variables {
            let at = KeyPosition::variable(input, name);
            collect_pending(value, at, &registry.waiters, &mut found);
        }
        found
            .into_iter()
            .filter_map(|key| {
                let (sender, receiver) = oneshot::channel();
                registry.waiters.get_mut(&key.to_string())?.push(sender);
                Some(PendingKey { key, receiver })
            })
            .collect()
    }

    /// Hands the real values found in a mutation response to every waiter
    /// and forgets the invocation's keys. Keys the response lacks are
    /// abandoned. Returns the number of keys resolved.
    pub fn settle(&self, invocation: u64, data: Option<&Value>) -> usize {
        let mut registry = self.registry.lock();
        let Some(paths) = registry.minted.remove(&invocation) else {
            return 0;
        };
        let mut resolved = 0;
        for (path, key) in paths {
            let waiters = registry.waiters.remove(&key.to_string()).unwrap_or_default();
            match data.and_then(|data| lookup(data, &path)).filter(|v| !v.is_null()) {
                Some(real) => {
                    resolved += 1;
                    for waiter in waiters {
                        // The waiting chain may have been abandoned.
                        let _ = waiter.send(real.clone());
                    }
                }
                None => {
                    warn!(path = %path, key = %key, "Mutation response carries no value for an optimistic key");
                }
            }
        }
        resolved
    }

    /// Abandons every key still pending for `invocation`. Waiting chains
    /// observe a closed channel.
    pub fn abandon(&self, invocation: u64) -> usize {
        let mut registry = self.registry.lock();
        let Some(paths) = registry.minted.remove(&invocation) else {
            return 0;
        };
        for key in paths.values() {
            registry.waiters.remove(&key.to_string());
        }
        paths.len()
    }
}

/// The declared type of a position in a variables tree.
#[derive(Clone, Copy)]
struct KeyPosition<'a> {
    input: Option<&'a InputObject>,
    type_name: Option<&'a str>,
}

impl<'a> KeyPosition<'a> {
    fn variable(input: Option<&'a InputObject>, name: &str) -> Self {
        let type_name = input
            .and_then(|input| input.fields.get(name))
            .map(String::as_str)
            .map(base_type);
        Self { input, type_name }
    }

    fn field(self, name: &str) -> Self {
        let type_name = self
            .type_name
            .and_then(|t| self.input?.types.get(t))
            .and_then(|fields| fields.get(name))
            .map(String::as_str)
            .map(base_type);
        Self { type_name, ..self }
    }

    /// Returns true if a placeholder could sit at this position as `value`.
    fn may_hold(self, value: &Value) -> bool {
        match value {
            Value::String(text) => text.starts_with(OPTIMISTIC_KEY_PREFIX),
            Value::Number(_) => self.type_name == Some("Int"),
            _ => false,
        }
    }
}

/// Strips list and non-null markers from a GraphQL type reference.
fn base_type(type_name: &str) -> &str {
    type_name.trim_matches(|c| matches!(c, '[' | ']' | '!'))
}

fn collect_pending(
    value: &Value,
    at: KeyPosition<'_>,
    waiters: &HashMap<String, Vec<oneshot::Sender<Value>>>,
    found: &mut Vec<Value>,
) {
    match value {
        Value::Array(items) => items.iter().for_each(|item| collect_pending(item, at, waiters, found)),
        Value::Object(object) => object
            .iter()
            .for_each(|(name, item)| collect_pending(item, at.field(name), waiters, found)),
        other => {
            if at.may_hold(other) && waiters.contains_key(&other.to_string()) && !found.contains(other) {
                found.push(other.clone());
            }
        }
    }
}

fn lookup<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(data, |current, segment| match current {
        Value::Object(object) => object.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Replaces every placeholder with its real value.
fn substitute(value: &mut Value, at: KeyPosition<'_>, replacements: &[(Value, Value)]) {
    match value {
        Value::Array(items) => items.iter_mut().for_each(|item| substitute(item, at, replacements)),
        Value::Object(object) => object
            .iter_mut()
            .for_each(|(name, item)| substitute(item, at.field(name), replacements)),
        other => {
            if !at.may_hold(other) {
                return;
            }
            if let Some((_, real)) = replacements.iter().find(|(key, _)| key == other) {
                *other = real.clone();
            }
        }
    }
}

fn substitute_variables(
    variables: Variables,
    input: Option<&InputObject>,
    replacements: &[(Value, Value)],
) -> Variables {
    variables
        .into_iter()
        .map(|(name, mut value)| {
            substitute(&mut value, KeyPosition::variable(input, &name), replacements);
            (name, value)
        })
        .collect()
}

/// Mints optimistic keys for mutations and holds back chains that need them.
#[derive(Debug)]
pub struct OptimisticKeyStage {
    keys: Arc<OptimisticKeys>,
}

impl OptimisticKeyStage {
    /// Creates the stage over a client's key registry.
    #[must_use]
    pub fn new(keys: Arc<OptimisticKeys>) -> Self {
        Self { keys }
    }
}

#[async_trait]
impl Plugin for OptimisticKeyStage {
    fn name(&self) -> &str {
        "optimistic_keys"
    }

    fn hooks(&self) -> HookSet {
        HookSet::START | HookSet::AFTER_NETWORK | HookSet::END | HookSet::THROW
    }

    async fn start(&self, ctx: Context, handlers: EnterHandlers) -> Result<(), ClientError> {
        let artifact = ctx.artifact().clone();
        let response = ctx.stuff().optimistic_response().cloned();
        let ctx = match response {
            Some(response) if artifact.is_mutation() && artifact.optimistic_keys => {
                let invocation = self.keys.next_invocation();
                let response = self.keys.augment(invocation, &artifact.selection, &response)?;
                ctx.with_stuff_entry(MUTATION_ID, json!(invocation))
                    .with_stuff_entry(OPTIMISTIC_RESPONSE, response)
            }
            _ => ctx,
        };
        handlers.next(ctx).await;
        Ok(())
    }

    async fn after_network(&self, ctx: Context, handlers: ExitHandlers) -> Result<(), ClientError> {
        if let Some(invocation) = ctx.stuff().mutation_id() {
            let resolved = self.keys.settle(invocation, handlers.value().data.as_ref());
            debug!(invocation, resolved, "Settled optimistic keys");
        }
        handlers.resolve(ctx).await;
        Ok(())
    }

    async fn end(&self, ctx: Context, handlers: ExitHandlers) -> Result<(), ClientError> {
        if let Some(invocation) = ctx.stuff().mutation_id() {
            self.keys.abandon(invocation);
        }
        handlers.resolve(ctx).await;
        Ok(())
    }

    async fn throw(&self, ctx: Context, handlers: ThrowHandlers) -> Result<(), ClientError> {
        if let Some(invocation) = ctx.stuff().mutation_id() {
            let abandoned = self.keys.abandon(invocation);
            if abandoned > 0 {
                warn!(invocation, abandoned, "Mutation failed, abandoning its optimistic keys");
            }
        }
        Err(handlers.error().clone())
    }
}

/// Holds back chains whose variables reference a pending optimistic key.
///
/// Must sit after the mutation stage: an abandoned key fails the chain here,
/// and the error walk only reaches throw hooks at or below this index.
#[derive(Debug)]
pub struct PendingKeyStage {
    keys: Arc<OptimisticKeys>,
}

impl PendingKeyStage {
    /// Creates the stage over a client's key registry.
    #[must_use]
    pub fn new(keys: Arc<OptimisticKeys>) -> Self {
        Self { keys }
    }
}

#[async_trait]
impl Plugin for PendingKeyStage {
    fn name(&self) -> &str {
        "pending_keys"
    }

    fn hooks(&self) -> HookSet {
        HookSet::BEFORE_NETWORK
    }

    async fn before_network(&self, ctx: Context, handlers: EnterHandlers) -> Result<(), ClientError> {
        let input = ctx.artifact().input.clone();
        let pending = match ctx.variables() {
            Some(variables) => self.keys.wait_for(variables, input.as_ref()),
            None => Vec::new(),
        };
        if pending.is_empty() {
            handlers.next(ctx).await;
            return Ok(());
        }

        debug!(
            document = %ctx.artifact().name,
            keys = pending.len(),
            "Waiting for optimistic keys"
        );
        let mut replacements = Vec::with_capacity(pending.len());
        for PendingKey { key, receiver } in pending {
            let real = receiver
                .await
                .map_err(|_| ClientError::OptimisticKeyAbandoned { key: key.to_string() })?;
            replacements.push((key, real));
        }
        let variables = substitute_variables(ctx.variables_or_empty(), input.as_ref(), &replacements);
        handlers.next(ctx.with_variables(variables)).await;
        Ok(())
    }
}
