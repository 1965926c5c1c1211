//! Serving documents from the cache according to their cache policy.

use crate::cache::{Cache, CacheWrite, InMemoryCache};
use crate::context::Context;
use crate::core::{CachePolicy, DataSource, QueryResult};
use crate::errors::ClientError;
use crate::pipeline::{EnterHandlers, ExitHandlers, HookSet, Plugin};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Decides per send whether the cache answers, the network answers, or both,
/// and writes network responses back into the cache.
pub struct CachePolicyStage {
    cache: Arc<dyn Cache>,
    enabled: bool,
    set_fetching: bool,
    server: bool,
    server_side_fallback: bool,
}

impl fmt::Debug for CachePolicyStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachePolicyStage")
            .field("enabled", &self.enabled)
            .field("set_fetching", &self.set_fetching)
            .field("server", &self.server)
            .field("server_side_fallback", &self.server_side_fallback)
            .finish_non_exhaustive()
    }
}

impl CachePolicyStage {
    /// Creates an enabled stage over `cache` that publishes loading state.
    #[must_use]
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self {
            cache,
            enabled: true,
            set_fetching: true,
            server: false,
            server_side_fallback: true,
        }
    }

    /// Turns the stage into a pass-through.
    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Controls whether a `fetching` placeholder is published before the network.
    #[must_use]
    pub fn with_set_fetching(mut self, set_fetching: bool) -> Self {
        self.set_fetching = set_fetching;
        self
    }

    /// Marks the stage as running on a server. With `fallback`, responses are
    /// written to a throwaway cache instead of the shared one.
    #[must_use]
    pub fn on_server(mut self, fallback: bool) -> Self {
        self.server = true;
        self.server_side_fallback = fallback;
        self
    }

    fn collect_garbage_soon(&self) {
        let cache = self.cache.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            cache.collect_garbage();
        });
    }
}

#[async_trait]
impl Plugin for CachePolicyStage {
    fn name(&self) -> &str {
        "cache_policy"
    }

    fn hooks(&self) -> HookSet {
        HookSet::NETWORK | HookSet::AFTER_NETWORK
    }

    async fn network(&self, ctx: Context, handlers: EnterHandlers) -> Result<(), ClientError> {
        let artifact = ctx.artifact().clone();
        let policy = ctx.policy();
        let mut served = false;

        if self.enabled && artifact.is_query() && !ctx.cache_params().disable_read && policy.reads_cache() {
            let read = self.cache.read(&artifact.selection, &handlers.marshal_variables(&ctx));
            let allowed = !read.partial || artifact.partial || handlers.client().config().default_partial;
            debug!(
                document = %artifact.name,
                policy = %policy,
                hit = read.is_hit(),
                partial = read.partial,
                stale = read.stale,
                "Read cache"
            );

            if policy == CachePolicy::CacheOnly {
                let data = if allowed { read.data } else { handlers.initial_value().data };
                let value = QueryResult::from_cache(data, read.partial, read.stale, ctx.variables().cloned());
                handlers.resolve(ctx, value).await;
                return Ok(());
            }

            served = read.is_hit() && allowed;
            if served {
                let fresh = !read.partial && !read.stale;
                let value = QueryResult::from_cache(read.data, read.partial, read.stale, ctx.variables().cloned());
                handlers.resolve(ctx.clone(), value).await;
                if fresh && policy != CachePolicy::CacheAndNetwork {
                    return Ok(());
                }
            }
        }

        if self.enabled && self.set_fetching && !served {
            handlers.update_state(|state| state.with_fetching(true));
        }
        self.collect_garbage_soon();
        handlers.next(ctx).await;
        Ok(())
    }

    async fn after_network(&self, ctx: Context, handlers: ExitHandlers) -> Result<(), ClientError> {
        let params = ctx.cache_params();
        let mut value = handlers.value().clone();
        let writes = self.enabled
            && value.source != Some(DataSource::Cache)
            && !params.disable_write
            && ctx.policy().writes_cache();
        let Some(data) = value.data.clone().filter(|_| writes) else {
            handlers.resolve(ctx).await;
            return Ok(());
        };

        let artifact = ctx.artifact();
        let variables = handlers.marshal_variables(&ctx);
        let server_side = self.server && params.server_side_fallback.unwrap_or(self.server_side_fallback);
        let (target, layer): (Arc<dyn Cache>, _) = if server_side {
            let scratch = InMemoryCache::new(handlers.client().config().cache_config());
            (Arc::new(scratch), None)
        } else {
            (self.cache.clone(), params.layer)
        };

        let selection = Arc::new(artifact.selection.clone());
        let write = CacheWrite::new(selection.clone(), data, variables.clone())
            .in_layer(layer)
            .notifying(params.notify_subscribers.clone(), params.force_notify);
        let notified = target.write(write);
        debug!(
            document = %artifact.name,
            layer = ?layer,
            notified = notified.len(),
            server_side,
            "Wrote response to cache"
        );

        // Read back so cached and network values take the same shape.
        if let Some(data) = target.read(&selection, &variables).data {
            value.data = Some(data);
        }
        handlers.resolve_with(ctx, value).await;
        Ok(())
    }
}
