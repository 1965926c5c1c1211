//! The contract every pipeline stage implements.

use super::handlers::{EnterHandlers, ExitHandlers, ThrowHandlers};
use super::phase::HookSet;
use crate::context::Context;
use crate::errors::ClientError;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// A stage of the document pipeline.
///
/// A plugin declares the handlers it implements through [`Plugin::hooks`];
/// the engine only invokes those. Enter handlers (`start`, `before_network`,
/// `network`) continue with `next` or turn the walk around with `resolve`.
/// Exit handlers (`after_network`, `end`) continue with `resolve`.
///
/// A handler that returns without calling either leaves the chain pending
/// until the handler objects it kept are used. Returning `Err` starts the
/// error walk from this plugin.
///
/// One plugin instance serves every `send()` of its document store, so any
/// state it holds is shared between concurrent invocations.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Returns the plugin name used in logs and events.
    fn name(&self) -> &str;

    /// Returns the handlers this plugin implements.
    fn hooks(&self) -> HookSet;

    /// First forward phase.
    async fn start(&self, ctx: Context, handlers: EnterHandlers) -> Result<(), ClientError> {
        handlers.next(ctx).await;
        Ok(())
    }

    /// Forward phase right before the network.
    async fn before_network(&self, ctx: Context, handlers: EnterHandlers) -> Result<(), ClientError> {
        handlers.next(ctx).await;
        Ok(())
    }

    /// Forward phase that produces data.
    async fn network(&self, ctx: Context, handlers: EnterHandlers) -> Result<(), ClientError> {
        handlers.next(ctx).await;
        Ok(())
    }

    /// First backward phase.
    async fn after_network(&self, ctx: Context, handlers: ExitHandlers) -> Result<(), ClientError> {
        handlers.resolve(ctx).await;
        Ok(())
    }

    /// Last backward phase.
    async fn end(&self, ctx: Context, handlers: ExitHandlers) -> Result<(), ClientError> {
        handlers.resolve(ctx).await;
        Ok(())
    }

    /// Intercepts an error raised at or after this plugin.
    ///
    /// Call `next` to retry forward or `resolve` to recover with a value.
    /// Returning `Err` hands the error to the previous plugin's hook.
    async fn throw(&self, _ctx: Context, handlers: ThrowHandlers) -> Result<(), ClientError> {
        Err(handlers.error().clone())
    }

    /// Releases resources held by the plugin.
    ///
    /// `ctx` is the context of the store's last completed run, or a bare
    /// context for a store that never completed one.
    async fn cleanup(&self, _ctx: Context) {}
}

impl fmt::Debug for dyn Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("name", &self.name())
            .field("hooks", &self.hooks())
            .finish()
    }
}

/// Creates a fresh plugin instance for each document store.
pub type PluginFactory = Arc<dyn Fn() -> Arc<dyn Plugin> + Send + Sync>;

/// Wraps a constructor into a [`PluginFactory`].
pub fn factory<P, F>(make: F) -> PluginFactory
where
    P: Plugin + 'static,
    F: Fn() -> P + Send + Sync + 'static,
{
    Arc::new(move || Arc::new(make()) as Arc<dyn Plugin>)
}
