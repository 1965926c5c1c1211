//! Drives a chain through the phase state machine.
//!
//! Continuations return boxed futures: every handler call re-enters here,
//! so the walk is a recursion through plugin handlers.

use super::handlers::{EnterHandlers, ExitHandlers, Handlers, ThrowHandlers};
use super::phase::{seek, Cursor, Event, Phase, Position, Step};
use super::store::StoreInner;
use crate::context::Context;
use crate::core::QueryResult;
use crate::errors::ClientError;
use crate::events::{PIPELINE_REJECTED, PIPELINE_RESOLVED, STAGE_ENTER, STAGE_EXIT, STAGE_THROW};
use crate::observability::SpanTimer;
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Settles the caller of one `send()`.
pub(crate) type Settle = oneshot::Sender<Result<QueryResult, ClientError>>;

/// State of one `send()` invocation shared by all of its handlers.
pub(crate) struct Run {
    store: Arc<StoreInner>,
    resolver: Mutex<Option<Settle>>,
    setup: bool,
    seq: u64,
}

impl Run {
    pub(crate) fn new(store: Arc<StoreInner>, resolver: Settle, setup: bool, seq: u64) -> Self {
        Self {
            store,
            resolver: Mutex::new(Some(resolver)),
            setup,
            seq,
        }
    }

    pub(crate) fn store(&self) -> &StoreInner {
        &self.store
    }

    pub(crate) fn is_setup(&self) -> bool {
        self.setup
    }

    /// Hands the outcome to the caller. Returns false if it was already settled.
    fn settle(&self, outcome: Result<QueryResult, ClientError>) -> bool {
        match self.resolver.lock().take() {
            Some(sender) => {
                // The caller may have stopped waiting.
                let _ = sender.send(outcome);
                true
            }
            None => false,
        }
    }
}

/// Continues from a handler at `from` that signalled `event`.
pub(crate) fn advance(
    run: Arc<Run>,
    from: Position,
    event: Event,
    ctx: Context,
    value: Option<QueryResult>,
) -> BoxFuture<'static, ()> {
    let cursor = from.advance(event, run.store().table().len());
    drive(run, cursor, ctx, value)
}

/// Invokes the next handler found from `cursor`.
pub(crate) fn drive(
    run: Arc<Run>,
    cursor: Cursor,
    ctx: Context,
    value: Option<QueryResult>,
) -> BoxFuture<'static, ()> {
    async move {
        match seek(run.store().table(), cursor) {
            Step::Invoke(position) => invoke(run, position, ctx, value).await,
            Step::Exhausted if run.setup => {
                let current = run.store().marshaled_state();
                let len = run.store().table().len();
                drive(run, Cursor::backward_from_end(len), ctx, Some(current)).await;
            }
            Step::Exhausted => {
                let document = run.store().artifact().name.clone();
                reject(&run, ClientError::MissingResolver { document });
            }
            Step::Complete => complete(&run, &ctx, value),
            Step::Unhandled => {
                debug!(cursor = ?cursor, "No handler for a non-error cursor");
            }
        }
    }
    .boxed()
}

async fn invoke(run: Arc<Run>, position: Position, ctx: Context, value: Option<QueryResult>) {
    let store = run.store();
    let plugin = store.plugin(position.index).clone();
    let stage = plugin.name().to_string();
    let event = if position.phase.is_forward() {
        STAGE_ENTER
    } else {
        STAGE_EXIT
    };
    store.emit(
        event,
        [
            ("stage", json!(stage)),
            ("phase", json!(position.phase.as_str())),
            ("index", json!(position.index)),
            ("send", json!(run.seq)),
        ],
    );

    let timer = SpanTimer::start(&stage);
    let handlers = Handlers::new(run.clone(), position);
    let result = match position.phase {
        Phase::Start => plugin.start(ctx.clone(), EnterHandlers::new(handlers)).await,
        Phase::BeforeNetwork => {
            plugin
                .before_network(ctx.clone(), EnterHandlers::new(handlers))
                .await
        }
        Phase::Network => plugin.network(ctx.clone(), EnterHandlers::new(handlers)).await,
        Phase::AfterNetwork => {
            let value = value.unwrap_or_else(|| store.marshaled_state());
            plugin
                .after_network(ctx.clone(), ExitHandlers::new(handlers, value))
                .await
        }
        Phase::End => {
            let value = value.unwrap_or_else(|| store.marshaled_state());
            plugin.end(ctx.clone(), ExitHandlers::new(handlers, value)).await
        }
    };
    debug!(
        document = %store.artifact().name,
        stage = %timer.name(),
        position = %position,
        elapsed_ms = timer.elapsed_ms(),
        "Stage handler settled"
    );

    if let Err(error) = result {
        warn!(
            document = %store.artifact().name,
            stage = %stage,
            position = %position,
            error = %error,
            "Stage failed"
        );
        unwind(run, position.fail(), ctx, error).await;
    }
}

/// Walks throw hooks from `cursor` until one takes the error.
fn unwind(run: Arc<Run>, cursor: Cursor, ctx: Context, error: ClientError) -> BoxFuture<'static, ()> {
    async move {
        let Step::Invoke(position) = seek(run.store().table(), cursor) else {
            reject(&run, error);
            return;
        };
        let plugin = run.store().plugin(position.index).clone();
        run.store().emit(
            STAGE_THROW,
            [
                ("stage", json!(plugin.name())),
                ("phase", json!(position.phase.as_str())),
                ("index", json!(position.index)),
                ("error", json!(error.to_string())),
            ],
        );
        let handlers = ThrowHandlers::new(Handlers::new(run.clone(), position), error);
        if let Err(error) = plugin.throw(ctx.clone(), handlers).await {
            let below = Cursor::Error {
                phase: position.phase,
                until: position.index,
            };
            unwind(run, below, ctx, error).await;
        }
    }
    .boxed()
}

fn complete(run: &Run, ctx: &Context, value: Option<QueryResult>) {
    let store = run.store();
    let mut result = value.unwrap_or_else(|| store.marshaled_state());
    if let Some(data) = result.data.take() {
        let scalars = store.client().scalars();
        result.data = Some(scalars.unmarshal_selection(&store.artifact().selection, &data));
    }

    store.publish(result.clone());
    store.record(ctx);
    let source = result.source.map(|s| s.to_string());
    let settled = run.settle(Ok(result));
    store.emit(
        PIPELINE_RESOLVED,
        [
            ("send", json!(run.seq)),
            ("settled", json!(settled)),
            ("source", json!(source)),
        ],
    );
}

fn reject(run: &Run, error: ClientError) {
    let store = run.store();
    store.emit(
        PIPELINE_REJECTED,
        [
            ("send", json!(run.seq)),
            ("code", json!(error.code())),
            ("error", json!(error.to_string())),
        ],
    );
    if store.state().fetching {
        store.update_state(|state| state.with_fetching(false));
    }
    if !run.settle(Err(error.clone())) {
        warn!(
            document = %store.artifact().name,
            error = %error,
            "Chain failed after its send already settled"
        );
    }
}
