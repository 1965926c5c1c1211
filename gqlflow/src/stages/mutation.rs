//! Optimistic cache layers for mutations.
//!
//! Every mutation invocation gets its own optimistic layer, with or without an
//! optimistic response, so a mutation and any racing query are ordered. The
//! layer is cleared once the real response arrives, then either merged into
//! the base (success) or discarded (errors).

use crate::cache::{Cache, CacheWrite, LayerId};
use crate::context::Context;
use crate::errors::ClientError;
use crate::pipeline::{EnterHandlers, ExitHandlers, HookSet, Plugin, ThrowHandlers};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Owns the full lifecycle of each mutation's optimistic layer.
pub struct MutationStage {
    cache: Arc<dyn Cache>,
}

impl fmt::Debug for MutationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationStage").finish_non_exhaustive()
    }
}

impl MutationStage {
    /// Creates the stage over `cache`.
    #[must_use]
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self { cache }
    }

    fn release(&self, layer: LayerId) {
        self.cache.clear_layer(layer);
        self.cache.resolve_layer(layer);
    }
}

#[async_trait]
impl Plugin for MutationStage {
    fn name(&self) -> &str {
        "mutation"
    }

    fn hooks(&self) -> HookSet {
        HookSet::START | HookSet::AFTER_NETWORK | HookSet::END | HookSet::THROW
    }

    async fn start(&self, ctx: Context, handlers: EnterHandlers) -> Result<(), ClientError> {
        let artifact = ctx.artifact().clone();
        if !artifact.is_mutation() {
            handlers.next(ctx).await;
            return Ok(());
        }

        let layer = self.cache.create_layer(true);
        let mut notify = Vec::new();
        if let Some(response) = ctx.stuff().optimistic_response() {
            let data = handlers
                .client()
                .scalars()
                .marshal_selection(&artifact.selection, response);
            let write = CacheWrite::new(Arc::new(artifact.selection.clone()), data, handlers.marshal_variables(&ctx))
                .in_layer(Some(layer));
            notify = self.cache.write(write);
        }
        debug!(
            document = %artifact.name,
            layer = %layer,
            notify = notify.len(),
            "Opened optimistic layer"
        );

        let mut params = ctx.cache_params().clone();
        params.layer = Some(layer);
        params.notify_subscribers = notify;
        params.force_notify = true;
        handlers.next(ctx.with_cache_params(params)).await;
        Ok(())
    }

    async fn after_network(&self, ctx: Context, handlers: ExitHandlers) -> Result<(), ClientError> {
        if let Some(layer) = ctx.cache_params().layer.filter(|_| ctx.artifact().is_mutation()) {
            self.cache.clear_layer(layer);
        }
        handlers.resolve(ctx).await;
        Ok(())
    }

    async fn end(&self, ctx: Context, handlers: ExitHandlers) -> Result<(), ClientError> {
        if let Some(layer) = ctx.cache_params().layer.filter(|_| ctx.artifact().is_mutation()) {
            if handlers.value().has_errors() {
                debug!(document = %ctx.artifact().name, layer = %layer, "Rolling back optimistic layer");
                self.cache.clear_layer(layer);
            }
            self.cache.resolve_layer(layer);
        }
        handlers.resolve(ctx).await;
        Ok(())
    }

    async fn throw(&self, ctx: Context, handlers: ThrowHandlers) -> Result<(), ClientError> {
        if let Some(layer) = ctx.cache_params().layer.filter(|_| ctx.artifact().is_mutation()) {
            self.release(layer);
        }
        Err(handlers.error().clone())
    }
}
