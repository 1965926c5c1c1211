//! Keeps query stores in sync with the cache.

use crate::cache::{Cache, SubscriberId, SubscriptionSpec};
use crate::context::Context;
use crate::core::{QueryResult, Variables};
use crate::errors::ClientError;
use crate::pipeline::{EnterHandlers, ExitHandlers, HookSet, Plugin};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Default)]
struct QueryState {
    /// Variables of the last completed send, merged under the next ones.
    last_variables: Option<Variables>,
    subscription: Option<SubscriberId>,
}

/// Merges previous variables into partial updates and re-subscribes the store
/// to its selection whenever the variables change. Cache updates are replayed
/// from the end phase with `source = cache`.
pub struct QueryStage {
    cache: Arc<dyn Cache>,
    state: Mutex<QueryState>,
}

impl fmt::Debug for QueryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryStage")
            .field("subscription", &self.state.lock().subscription)
            .finish_non_exhaustive()
    }
}

impl QueryStage {
    /// Creates the stage over `cache`.
    #[must_use]
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self {
            cache,
            state: Mutex::new(QueryState::default()),
        }
    }

    /// Returns the active cache subscription, if any.
    #[must_use]
    pub fn subscription(&self) -> Option<SubscriberId> {
        self.state.lock().subscription
    }

    fn subscribe(&self, ctx: &Context, handlers: &ExitHandlers, variables: Variables) {
        let replay = handlers.clone();
        let replay_ctx = ctx.clone();
        let document = ctx.artifact().name.clone();
        let set = Arc::new(move |data: Value| {
            let value = QueryResult::from_cache(Some(data), false, false, replay_ctx.variables().cloned());
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    runtime.spawn(replay.resolve_with(replay_ctx.clone(), value));
                }
                Err(_) => warn!(document = %document, "Cache update outside a runtime, dropping it"),
            }
        });
        let spec = SubscriptionSpec {
            selection: Arc::new(ctx.artifact().selection.clone()),
            parent_id: None,
            set,
        };

        let mut state = self.state.lock();
        if let Some(previous) = state.subscription.take() {
            self.cache.unsubscribe(previous);
        }
        let id = self.cache.subscribe(spec, &variables);
        debug!(document = %ctx.artifact().name, subscriber = %id, "Subscribed to cache");
        state.subscription = Some(id);
    }
}

#[async_trait]
impl Plugin for QueryStage {
    fn name(&self) -> &str {
        "query"
    }

    fn hooks(&self) -> HookSet {
        HookSet::START | HookSet::END
    }

    async fn start(&self, ctx: Context, handlers: EnterHandlers) -> Result<(), ClientError> {
        let merged = {
            let last = self.state.lock().last_variables.clone();
            match (last, ctx.variables()) {
                (Some(mut merged), Some(current)) => {
                    merged.extend(current.clone());
                    (&merged != current).then_some(merged)
                }
                _ => None,
            }
        };
        let ctx = match merged {
            Some(variables) => ctx.with_variables(variables),
            None => ctx,
        };
        handlers.next(ctx).await;
        Ok(())
    }

    async fn end(&self, ctx: Context, handlers: ExitHandlers) -> Result<(), ClientError> {
        if handlers.variables_changed(&ctx) && !ctx.cache_params().disable_subscriptions {
            self.subscribe(&ctx, &handlers, handlers.marshal_variables(&ctx));
        }
        self.state.lock().last_variables = ctx.variables().cloned();
        handlers.resolve(ctx).await;
        Ok(())
    }

    async fn cleanup(&self, ctx: Context) {
        if let Some(id) = self.state.lock().subscription.take() {
            self.cache.unsubscribe(id);
            debug!(document = %ctx.artifact().name, "Unsubscribed from cache");
        }
    }
}
