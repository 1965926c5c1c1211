//! Scripted collaborators for exercising document stores.

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::context::Context;
use crate::core::{GraphQlResponse, QueryResult};
use crate::errors::ClientError;
use crate::network::{Fetch, FetchRequest, ResponseStream, SubscriptionTransport, TransportFactory};
use crate::pipeline::{EnterHandlers, ExitHandlers, HookSet, Phase, Plugin, ThrowHandlers};

/// A fetch that replays queued responses and records every request.
#[derive(Debug, Default)]
pub struct ScriptedFetch {
    responses: Mutex<VecDeque<Result<GraphQlResponse, ClientError>>>,
    fallback: Option<GraphQlResponse>,
    requests: Mutex<Vec<FetchRequest>>,
    gate: Option<Semaphore>,
}

impl ScriptedFetch {
    /// Creates a fetch with nothing queued.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a fetch that answers every request with `response`.
    #[must_use]
    pub fn always(response: GraphQlResponse) -> Self {
        Self {
            fallback: Some(response),
            ..Self::default()
        }
    }

    /// Queues a response.
    #[must_use]
    pub fn respond(self, response: GraphQlResponse) -> Self {
        self.responses.lock().push_back(Ok(response));
        self
    }

    /// Queues a transport failure.
    #[must_use]
    pub fn fail(self, error: ClientError) -> Self {
        self.responses.lock().push_back(Err(error));
        self
    }

    /// Holds every request until [`ScriptedFetch::release`] lets it through.
    #[must_use]
    pub fn paused(mut self) -> Self {
        self.gate = Some(Semaphore::new(0));
        self
    }

    /// Lets one held request through.
    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }

    /// Returns the number of requests received.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    /// Returns every request received.
    #[must_use]
    pub fn requests(&self) -> Vec<FetchRequest> {
        self.requests.lock().clone()
    }

    /// Returns the most recent request.
    #[must_use]
    pub fn last_request(&self) -> Option<FetchRequest> {
        self.requests.lock().last().cloned()
    }
}

#[async_trait]
impl Fetch for ScriptedFetch {
    async fn fetch(&self, request: FetchRequest) -> Result<GraphQlResponse, ClientError> {
        self.requests.lock().push(request);
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|e| ClientError::Network(e.to_string()))?
                .forget();
        }
        let next = self.responses.lock().pop_front();
        match (next, &self.fallback) {
            (Some(outcome), _) => outcome,
            (None, Some(fallback)) => Ok(fallback.clone()),
            (None, None) => Err(ClientError::Network("no scripted response left".to_string())),
        }
    }
}

/// What a [`RecordingPlugin`] does with an error handed to its throw hook.
#[derive(Debug, Clone)]
pub enum ThrowAction {
    /// Hands the error on.
    Rethrow,
    /// Retries forward from the plugin after this one.
    Retry,
    /// Recovers with a value.
    Resolve(QueryResult),
}

/// A plugin that appends `name:phase` to a shared log for every handler call.
pub struct RecordingPlugin {
    name: String,
    hooks: HookSet,
    log: Arc<Mutex<Vec<String>>>,
    network_value: Option<QueryResult>,
    replays: usize,
    failing: Option<Phase>,
    failures_left: AtomicUsize,
    on_throw: ThrowAction,
}

impl RecordingPlugin {
    /// Creates a plugin implementing every phase and passing straight through.
    #[must_use]
    pub fn new(name: impl Into<String>, log: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            name: name.into(),
            hooks: HookSet::START
                | HookSet::BEFORE_NETWORK
                | HookSet::NETWORK
                | HookSet::AFTER_NETWORK
                | HookSet::END,
            log,
            network_value: None,
            replays: 1,
            failing: None,
            failures_left: AtomicUsize::new(0),
            on_throw: ThrowAction::Rethrow,
        }
    }

    /// Restricts the handlers the plugin declares.
    #[must_use]
    pub fn with_hooks(mut self, hooks: HookSet) -> Self {
        self.hooks = hooks;
        self
    }

    /// Resolves the chain from the network phase with `value`.
    #[must_use]
    pub fn resolving(mut self, value: QueryResult) -> Self {
        self.network_value = Some(value);
        self
    }

    /// Resolves `times` times in a row from the network phase.
    #[must_use]
    pub fn replaying(mut self, times: usize) -> Self {
        self.replays = times;
        self
    }

    /// Fails the first `times` calls of `phase`.
    #[must_use]
    pub fn failing_in(mut self, phase: Phase, times: usize) -> Self {
        self.failing = Some(phase);
        self.failures_left = AtomicUsize::new(times);
        self
    }

    /// Declares a throw hook with the given behavior.
    #[must_use]
    pub fn catching(mut self, action: ThrowAction) -> Self {
        self.hooks = self.hooks | HookSet::THROW;
        self.on_throw = action;
        self
    }

    fn enter(&self, phase: Phase) -> Result<(), ClientError> {
        self.log.lock().push(format!("{}:{}", self.name, phase));
        if self.failing == Some(phase)
            && self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Err(ClientError::plugin(
                self.name.clone(),
                anyhow::anyhow!("scripted failure in {phase}"),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Plugin for RecordingPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn hooks(&self) -> HookSet {
        self.hooks
    }

    async fn start(&self, ctx: Context, handlers: EnterHandlers) -> Result<(), ClientError> {
        self.enter(Phase::Start)?;
        handlers.next(ctx).await;
        Ok(())
    }

    async fn before_network(&self, ctx: Context, handlers: EnterHandlers) -> Result<(), ClientError> {
        self.enter(Phase::BeforeNetwork)?;
        handlers.next(ctx).await;
        Ok(())
    }

    async fn network(&self, ctx: Context, handlers: EnterHandlers) -> Result<(), ClientError> {
        self.enter(Phase::Network)?;
        match &self.network_value {
            Some(value) => {
                for _ in 0..self.replays {
                    handlers.resolve(ctx.clone(), value.clone()).await;
                }
            }
            None => handlers.next(ctx).await,
        }
        Ok(())
    }

    async fn after_network(&self, ctx: Context, handlers: ExitHandlers) -> Result<(), ClientError> {
        self.enter(Phase::AfterNetwork)?;
        handlers.resolve(ctx).await;
        Ok(())
    }

    async fn end(&self, ctx: Context, handlers: ExitHandlers) -> Result<(), ClientError> {
        self.enter(Phase::End)?;
        handlers.resolve(ctx).await;
        Ok(())
    }

    async fn cleanup(&self, ctx: Context) {
        let variables = Value::Object(ctx.variables_or_empty());
        self.log.lock().push(format!("{}:cleanup {variables}", self.name));
    }

    async fn throw(&self, ctx: Context, handlers: ThrowHandlers) -> Result<(), ClientError> {
        self.log.lock().push(format!("{}:throw", self.name));
        match &self.on_throw {
            ThrowAction::Rethrow => Err(handlers.error().clone()),
            ThrowAction::Retry => {
                handlers.next(ctx).await;
                Ok(())
            }
            ThrowAction::Resolve(value) => {
                handlers.resolve(ctx, value.clone()).await;
                Ok(())
            }
        }
    }
}

/// A subscription transport fed by the test.
#[derive(Default)]
pub struct ChannelTransport {
    senders: Mutex<Vec<mpsc::UnboundedSender<Result<GraphQlResponse, ClientError>>>>,
    requests: Mutex<Vec<FetchRequest>>,
    builds: AtomicUsize,
    yielding: bool,
}

impl ChannelTransport {
    /// Creates a transport with no open subscriptions.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Creates a transport that yields to the scheduler inside `subscribe`,
    /// letting concurrent opens interleave.
    #[must_use]
    pub fn yielding() -> Arc<Self> {
        Arc::new(Self {
            yielding: true,
            ..Self::default()
        })
    }

    /// Returns a factory that hands out this transport and counts the builds.
    #[must_use]
    pub fn factory(self: &Arc<Self>) -> TransportFactory {
        let transport = self.clone();
        Arc::new(move |_session: Option<&Value>| {
            transport.builds.fetch_add(1, Ordering::SeqCst);
            transport.clone() as Arc<dyn SubscriptionTransport>
        })
    }

    /// Pushes a response to the most recent subscription.
    pub fn push(&self, response: GraphQlResponse) -> bool {
        self.send(Ok(response))
    }

    /// Fails the most recent subscription.
    pub fn fail(&self, error: ClientError) -> bool {
        self.send(Err(error))
    }

    fn send(&self, item: Result<GraphQlResponse, ClientError>) -> bool {
        self.senders
            .lock()
            .last()
            .is_some_and(|sender| sender.unbounded_send(item).is_ok())
    }

    /// Returns the number of subscriptions opened.
    #[must_use]
    pub fn subscriptions(&self) -> usize {
        self.senders.lock().len()
    }

    /// Returns the number of subscriptions still being listened to.
    #[must_use]
    pub fn open_subscriptions(&self) -> usize {
        self.senders.lock().iter().filter(|s| !s.is_closed()).count()
    }

    /// Returns the number of times the factory built the transport.
    #[must_use]
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    /// Returns every subscription request.
    #[must_use]
    pub fn requests(&self) -> Vec<FetchRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl SubscriptionTransport for ChannelTransport {
    async fn subscribe(&self, request: FetchRequest) -> Result<ResponseStream, ClientError> {
        let (sender, receiver) = mpsc::unbounded();
        self.requests.lock().push(request);
        self.senders.lock().push(sender);
        if self.yielding {
            tokio::task::yield_now().await;
        }
        Ok(receiver.boxed())
    }
}
