//! Handler objects passed to plugin phase methods.
//!
//! Handlers are cheap to clone and own everything they need, so a plugin may
//! keep them past the end of its handler and continue the chain later, as
//! often as it likes. Only the first completion of a `send()` settles the
//! caller; later ones only publish state.

use super::engine::{self, Run};
use super::phase::{Event, Phase, Position};
use crate::client::Client;
use crate::context::Context;
use crate::core::{Artifact, QueryResult, Variables};
use crate::errors::ClientError;
use futures::future::BoxFuture;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// Services available to every handler.
#[derive(Clone)]
pub struct Handlers {
    run: Arc<Run>,
    position: Position,
}

impl Handlers {
    pub(crate) fn new(run: Arc<Run>, position: Position) -> Self {
        Self { run, position }
    }

    /// Returns where this handler runs.
    #[must_use]
    pub fn position(&self) -> Position {
        self.position
    }

    /// Returns the phase this handler runs in.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.position.phase
    }

    /// Returns the document's artifact.
    #[must_use]
    pub fn artifact(&self) -> &Arc<Artifact> {
        self.run.store().artifact()
    }

    /// Returns the client owning the document store.
    #[must_use]
    pub fn client(&self) -> &Client {
        self.run.store().client()
    }

    /// Returns the currently published value.
    #[must_use]
    pub fn state(&self) -> QueryResult {
        self.run.store().state()
    }

    /// Returns the published value in wire form, ready to travel backward.
    #[must_use]
    pub fn current_value(&self) -> QueryResult {
        self.run.store().marshaled_state()
    }

    /// Publishes a new value derived from the current one.
    pub fn update_state(&self, update: impl FnOnce(QueryResult) -> QueryResult) {
        self.run.store().update_state(update);
    }

    /// Returns the value the store starts with.
    #[must_use]
    pub fn initial_value(&self) -> QueryResult {
        self.run.store().initial_value()
    }

    /// Returns the context's variables marshaled for the wire.
    #[must_use]
    pub fn marshal_variables(&self, ctx: &Context) -> Variables {
        ctx.marshaled_variables(self.client().scalars()).clone()
    }

    /// Returns true if the marshaled variables differ from those of the last
    /// completed chain.
    #[must_use]
    pub fn variables_changed(&self, ctx: &Context) -> bool {
        let current = self.marshal_variables(ctx);
        self.run.store().last_variables().as_ref() != Some(&current)
    }

    /// Returns true if this chain runs as a setup probe.
    #[must_use]
    pub fn is_setup(&self) -> bool {
        self.run.is_setup()
    }
}

impl fmt::Debug for Handlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handlers")
            .field("document", &self.artifact().name)
            .field("position", &self.position)
            .finish_non_exhaustive()
    }
}

/// Handlers of the forward phases.
#[derive(Clone, Debug)]
pub struct EnterHandlers {
    base: Handlers,
}

impl EnterHandlers {
    pub(crate) fn new(base: Handlers) -> Self {
        Self { base }
    }

    /// Continues with the next plugin in this phase.
    pub fn next(&self, ctx: Context) -> BoxFuture<'static, ()> {
        engine::advance(self.base.run.clone(), self.base.position, Event::Next, ctx, None)
    }

    /// Turns the walk around, handing `value` to the backward phases.
    pub fn resolve(&self, ctx: Context, value: QueryResult) -> BoxFuture<'static, ()> {
        engine::advance(self.base.run.clone(), self.base.position, Event::Resolve, ctx, Some(value))
    }
}

impl Deref for EnterHandlers {
    type Target = Handlers;

    fn deref(&self) -> &Handlers {
        &self.base
    }
}

/// Handlers of the backward phases.
#[derive(Clone, Debug)]
pub struct ExitHandlers {
    base: Handlers,
    value: QueryResult,
}

impl ExitHandlers {
    pub(crate) fn new(base: Handlers, value: QueryResult) -> Self {
        Self { base, value }
    }

    /// Returns the value travelling backward.
    #[must_use]
    pub fn value(&self) -> &QueryResult {
        &self.value
    }

    /// Continues backward with the carried value.
    pub fn resolve(&self, ctx: Context) -> BoxFuture<'static, ()> {
        self.resolve_with(ctx, self.value.clone())
    }

    /// Continues backward with a replacement value.
    pub fn resolve_with(&self, ctx: Context, value: QueryResult) -> BoxFuture<'static, ()> {
        engine::advance(self.base.run.clone(), self.base.position, Event::Resolve, ctx, Some(value))
    }
}

impl Deref for ExitHandlers {
    type Target = Handlers;

    fn deref(&self) -> &Handlers {
        &self.base
    }
}

/// Handlers of a throw hook.
#[derive(Clone, Debug)]
pub struct ThrowHandlers {
    base: Handlers,
    error: ClientError,
}

impl ThrowHandlers {
    pub(crate) fn new(base: Handlers, error: ClientError) -> Self {
        Self { base, error }
    }

    /// Returns the error being propagated.
    #[must_use]
    pub fn error(&self) -> &ClientError {
        &self.error
    }

    /// Retries forward from the plugin after this one.
    pub fn next(&self, ctx: Context) -> BoxFuture<'static, ()> {
        engine::advance(self.base.run.clone(), self.base.position, Event::ThrowNext, ctx, None)
    }

    /// Recovers with a value, resuming backward from the plugin after this one.
    pub fn resolve(&self, ctx: Context, value: QueryResult) -> BoxFuture<'static, ()> {
        engine::advance(
            self.base.run.clone(),
            self.base.position,
            Event::ThrowResolve,
            ctx,
            Some(value),
        )
    }
}

impl Deref for ThrowHandlers {
    type Target = Handlers;

    fn deref(&self) -> &Handlers {
        &self.base
    }
}
