//! Document stores: one artifact, one plugin chain, one observable value.

use super::engine::{self, Run};
use super::phase::{Cursor, PhaseTable};
use super::plugin::Plugin;
use crate::client::Client;
use crate::context::{CacheParams, Context, Stuff, MUTATION_ID, OPTIMISTIC_RESPONSE};
use crate::core::{Artifact, CachePolicy, PaginationMethod, QueryResult, Variables};
use crate::errors::ClientError;
use crate::events::{self, PAGINATION_HAZARD, PIPELINE_SEND};
use crate::network::Fetch;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::warn;

/// Identifies a state listener registered with [`DocumentStore::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&QueryResult) + Send + Sync>;

/// The published value and its listeners.
struct StateCell {
    value: Mutex<QueryResult>,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_listener: AtomicU64,
}

impl StateCell {
    fn new(initial: QueryResult) -> Self {
        Self {
            value: Mutex::new(initial),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
        }
    }

    fn get(&self) -> QueryResult {
        self.value.lock().clone()
    }

    fn set(&self, value: QueryResult) {
        *self.value.lock() = value.clone();
        self.notify(&value);
    }

    fn update(&self, update: impl FnOnce(QueryResult) -> QueryResult) {
        let value = {
            let mut guard = self.value.lock();
            let next = update(guard.clone());
            *guard = next.clone();
            next
        };
        self.notify(&value);
    }

    fn notify(&self, value: &QueryResult) {
        let listeners: Vec<Listener> = self.listeners.lock().iter().map(|(_, l)| l.clone()).collect();
        for listener in listeners {
            listener(value);
        }
    }

    fn listen(&self, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, listener));
        id
    }

    fn unlisten(&self, id: ListenerId) {
        self.listeners.lock().retain(|(other, _)| *other != id);
    }
}

#[derive(Default)]
struct LastRun {
    variables: Option<Variables>,
    context: Option<Context>,
}

pub(crate) struct StoreInner {
    client: Client,
    artifact: Arc<Artifact>,
    plugins: Vec<Arc<dyn Plugin>>,
    table: PhaseTable,
    initial: QueryResult,
    state: StateCell,
    last: Mutex<LastRun>,
    sends: AtomicU64,
}

impl StoreInner {
    pub(crate) fn artifact(&self) -> &Arc<Artifact> {
        &self.artifact
    }

    pub(crate) fn client(&self) -> &Client {
        &self.client
    }

    pub(crate) fn table(&self) -> &PhaseTable {
        &self.table
    }

    pub(crate) fn plugin(&self, index: usize) -> &Arc<dyn Plugin> {
        &self.plugins[index]
    }

    pub(crate) fn state(&self) -> QueryResult {
        self.state.get()
    }

    pub(crate) fn publish(&self, value: QueryResult) {
        self.state.set(value);
    }

    pub(crate) fn update_state(&self, update: impl FnOnce(QueryResult) -> QueryResult) {
        self.state.update(update);
    }

    pub(crate) fn initial_value(&self) -> QueryResult {
        self.initial.clone()
    }

    /// The published value with its data converted back to wire form.
    pub(crate) fn marshaled_state(&self) -> QueryResult {
        let mut state = self.state.get();
        if let Some(data) = state.data.take() {
            let scalars = self.client.scalars();
            state.data = Some(scalars.marshal_selection(&self.artifact.selection, &data));
        }
        state
    }

    pub(crate) fn last_variables(&self) -> Option<Variables> {
        self.last.lock().variables.clone()
    }

    /// Remembers a completed chain for change detection on the next send.
    pub(crate) fn record(&self, ctx: &Context) {
        let variables = ctx.marshaled_variables(self.client.scalars()).clone();
        let mut last = self.last.lock();
        last.variables = Some(variables);
        last.context = Some(ctx.clone());
    }

    pub(crate) fn emit(&self, event_type: &str, fields: impl IntoIterator<Item = (&'static str, Value)>) {
        self.client
            .event_sink()
            .try_emit(event_type, Some(events::payload(&self.artifact.name, fields)));
    }
}

/// Arguments of [`DocumentStore::send`].
#[derive(Clone, Default)]
pub struct SendParams {
    /// New variables. `None` keeps the previous ones.
    pub variables: Option<Variables>,
    /// Cache policy override.
    pub policy: Option<CachePolicy>,
    /// Caller session. `None` keeps the previous one.
    pub session: Option<Value>,
    /// Caller metadata. `None` keeps the previous one.
    pub metadata: Option<Value>,
    /// Fetch override.
    pub fetch: Option<Arc<dyn Fetch>>,
    /// Per-request transport overrides.
    pub fetch_params: Option<Value>,
    /// Entries merged over the previous send's stuff.
    pub stuff: Option<Stuff>,
    /// Cache parameters.
    pub cache_params: Option<CacheParams>,
    /// Runs the chain as a setup probe.
    pub setup: bool,
}

impl SendParams {
    /// Creates empty parameters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the variables.
    #[must_use]
    pub fn with_variables(mut self, variables: Variables) -> Self {
        self.variables = Some(variables);
        self
    }

    /// Sets the cache policy.
    #[must_use]
    pub fn with_policy(mut self, policy: CachePolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Sets the session.
    #[must_use]
    pub fn with_session(mut self, session: Value) -> Self {
        self.session = Some(session);
        self
    }

    /// Sets the metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Overrides the fetch function.
    #[must_use]
    pub fn with_fetch(mut self, fetch: Arc<dyn Fetch>) -> Self {
        self.fetch = Some(fetch);
        self
    }

    /// Sets transport overrides.
    #[must_use]
    pub fn with_fetch_params(mut self, fetch_params: Value) -> Self {
        self.fetch_params = Some(fetch_params);
        self
    }

    /// Adds a stuff entry.
    #[must_use]
    pub fn with_stuff_entry(mut self, key: impl Into<String>, value: Value) -> Self {
        self.stuff = Some(self.stuff.take().unwrap_or_default().with(key, value));
        self
    }

    /// Supplies an optimistic response for a mutation.
    #[must_use]
    pub fn with_optimistic_response(self, response: Value) -> Self {
        self.with_stuff_entry(OPTIMISTIC_RESPONSE, response)
    }

    /// Sets the cache parameters.
    #[must_use]
    pub fn with_cache_params(mut self, cache_params: CacheParams) -> Self {
        self.cache_params = Some(cache_params);
        self
    }

    /// Marks the send as a setup probe.
    #[must_use]
    pub fn setup(mut self) -> Self {
        self.setup = true;
        self
    }
}

impl fmt::Debug for SendParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendParams")
            .field("variables", &self.variables)
            .field("policy", &self.policy)
            .field("has_fetch", &self.fetch.is_some())
            .field("stuff", &self.stuff)
            .field("cache_params", &self.cache_params)
            .field("setup", &self.setup)
            .finish_non_exhaustive()
    }
}

/// Runs one document through its plugin chain and holds the latest result.
///
/// Many `send()` calls may be in flight at once; each settles exactly once.
/// Chains run on their own task, so dropping a `send()` future does not
/// stop the chain.
#[derive(Clone)]
pub struct DocumentStore {
    inner: Arc<StoreInner>,
}

impl fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentStore")
            .field("document", &self.inner.artifact.name)
            .field("plugins", &self.plugin_names())
            .finish_non_exhaustive()
    }
}

impl DocumentStore {
    pub(crate) fn new(client: Client, artifact: Arc<Artifact>, plugins: Vec<Arc<dyn Plugin>>) -> Self {
        let table = PhaseTable::new(plugins.iter().map(|p| p.hooks()).collect());
        let initial = QueryResult::empty();
        Self {
            inner: Arc::new(StoreInner {
                client,
                artifact,
                plugins,
                table,
                state: StateCell::new(initial.clone()),
                initial,
                last: Mutex::new(LastRun::default()),
                sends: AtomicU64::new(0),
            }),
        }
    }

    /// Returns the document name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.artifact.name
    }

    /// Returns the artifact.
    #[must_use]
    pub fn artifact(&self) -> &Arc<Artifact> {
        &self.inner.artifact
    }

    /// Returns the plugin names in chain order.
    #[must_use]
    pub fn plugin_names(&self) -> Vec<String> {
        self.inner.plugins.iter().map(|p| p.name().to_string()).collect()
    }

    /// Returns the published value.
    #[must_use]
    pub fn state(&self) -> QueryResult {
        self.inner.state()
    }

    /// Registers a listener. It is called with the current value right away
    /// and again on every publish.
    pub fn subscribe(&self, listener: impl Fn(&QueryResult) + Send + Sync + 'static) -> ListenerId {
        let listener: Listener = Arc::new(listener);
        listener(&self.inner.state());
        self.inner.state.listen(listener)
    }

    /// Removes a listener.
    pub fn unsubscribe(&self, id: ListenerId) {
        self.inner.state.unlisten(id);
    }

    /// Runs the document through the chain.
    ///
    /// # Errors
    ///
    /// Returns the error of the first failure no throw hook intercepted,
    /// `ClientError::MissingResolver` if no stage resolved, or
    /// `ClientError::Dropped` if the chain was abandoned.
    pub async fn send(&self, params: SendParams) -> Result<QueryResult, ClientError> {
        self.warn_on_pagination_hazard(&params);
        let setup = params.setup;
        let ctx = self.build_context(params);
        let seq = self.inner.sends.fetch_add(1, Ordering::Relaxed) + 1;
        self.inner.emit(
            PIPELINE_SEND,
            [
                ("send", json!(seq)),
                ("policy", json!(ctx.policy().to_string())),
                ("setup", json!(setup)),
            ],
        );

        let (sender, receiver) = oneshot::channel();
        let run = Arc::new(Run::new(self.inner.clone(), sender, setup, seq));
        tokio::spawn(engine::drive(run, Cursor::start(), ctx, None));

        receiver.await.unwrap_or_else(|_| {
            Err(ClientError::Dropped {
                document: self.inner.artifact.name.clone(),
            })
        })
    }

    /// Releases resources held by the plugins, handing each the last
    /// completed run's context.
    pub async fn cleanup(&self) {
        let ctx = self
            .inner
            .last
            .lock()
            .context
            .clone()
            .unwrap_or_else(|| Context::new(self.inner.artifact.clone()));
        for plugin in &self.inner.plugins {
            plugin.cleanup(ctx.clone()).await;
        }
    }

    fn build_context(&self, params: SendParams) -> Context {
        let inner = &self.inner;
        let last = inner.last.lock().context.clone();
        let base = Context::new(inner.artifact.clone());

        let ctx = match (params.variables, &last) {
            (Some(variables), _) => base.with_variables(variables),
            (None, Some(last)) => base.with_variables_of(last),
            (None, None) => base,
        };

        let policy = params
            .policy
            .or(inner.artifact.policy)
            .unwrap_or(inner.client.config().default_policy);

        let inherited = last
            .as_ref()
            .map(|l| l.stuff().without(&[OPTIMISTIC_RESPONSE, MUTATION_ID]))
            .unwrap_or_default();
        let stuff = match &params.stuff {
            Some(stuff) => inherited.merged(stuff),
            None => inherited,
        };

        let session = params.session.or_else(|| last.as_ref().and_then(|l| l.session().cloned()));
        let metadata = params.metadata.or_else(|| last.as_ref().and_then(|l| l.metadata().cloned()));

        let mut ctx = ctx
            .with_policy(policy)
            .with_stuff(stuff)
            .with_session(session)
            .with_metadata(metadata)
            .with_fetch_params(params.fetch_params)
            .with_cache_params(params.cache_params.unwrap_or_default());
        if let Some(fetch) = params.fetch.or_else(|| inner.client.fetch().cloned()) {
            ctx = ctx.with_fetch(fetch);
        }
        ctx
    }

    /// Warns when a cursor-paginated document that already holds data is
    /// sent without any cursor variable. Reported as a warning and a
    /// [`PAGINATION_HAZARD`] event, never as an error.
    fn warn_on_pagination_hazard(&self, params: &SendParams) {
        let Some(refetch) = &self.inner.artifact.refetch else {
            return;
        };
        let Some(variables) = &params.variables else {
            return;
        };
        if !refetch.paginated || refetch.method != PaginationMethod::Cursor {
            return;
        }
        let has_data = self.inner.state().data.is_some();
        let has_cursor = refetch.cursor_variables().iter().any(|v| variables.contains_key(*v));
        if has_data && !has_cursor {
            warn!(
                document = %self.inner.artifact.name,
                "Sending a paginated document without a cursor refetches from the first page \
                 and may drop already loaded pages"
            );
            self.inner.emit(
                PAGINATION_HAZARD,
                [("cursors", json!(refetch.cursor_variables()))],
            );
        }
    }
}
