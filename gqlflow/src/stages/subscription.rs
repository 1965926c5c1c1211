//! Live subscriptions.
//!
//! The only stage that owns an external resource: the open stream is kept
//! across sends and torn down on `cleanup`.

use super::fetch::build_request;
use crate::context::Context;
use crate::core::{DataSource, GraphQlError, QueryResult};
use crate::errors::ClientError;
use crate::network::{ResponseStream, SubscriptionTransport, TransportFactory};
use crate::pipeline::{EnterHandlers, HookSet, Plugin};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Default)]
struct Live {
    /// Fetch params, session and metadata the open stream was created with.
    check: Option<String>,
    transport: Option<Arc<dyn SubscriptionTransport>>,
    task: Option<JoinHandle<()>>,
    /// Bumped on every open and cleanup. A stream may only be installed by
    /// the open that still holds the current generation.
    generation: u64,
}

impl Live {
    fn close(&mut self) {
        self.generation += 1;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Opens a subscription through the client's transport and resolves the
/// chain with every pushed response.
pub struct SubscriptionStage {
    factory: Option<TransportFactory>,
    server: bool,
    live: Mutex<Live>,
}

impl fmt::Debug for SubscriptionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let live = self.live.lock();
        f.debug_struct("SubscriptionStage")
            .field("server", &self.server)
            .field("open", &live.task.is_some())
            .finish_non_exhaustive()
    }
}

impl SubscriptionStage {
    /// Creates the stage. Without a factory every send fails.
    #[must_use]
    pub fn new(factory: Option<TransportFactory>) -> Self {
        Self {
            factory,
            server: false,
            live: Mutex::new(Live::default()),
        }
    }

    /// Marks the stage as running on a server, where no stream is opened.
    #[must_use]
    pub fn on_server(mut self) -> Self {
        self.server = true;
        self
    }

    /// Returns true while a stream is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.live.lock().task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

fn pushed(ctx: &Context, data: Option<serde_json::Value>, errors: Option<Vec<GraphQlError>>) -> QueryResult {
    QueryResult {
        data,
        errors,
        fetching: false,
        partial: true,
        stale: false,
        source: Some(DataSource::Network),
        variables: ctx.variables().cloned(),
    }
}

async fn pump(mut stream: ResponseStream, ctx: Context, handlers: EnterHandlers) {
    while let Some(item) = stream.next().await {
        match item {
            Ok(response) => {
                let value = pushed(&ctx, response.data, response.errors);
                handlers.resolve(ctx.clone(), value).await;
            }
            Err(error) => {
                warn!(document = %ctx.artifact().name, error = %error, "Subscription failed");
                let value = pushed(&ctx, None, Some(vec![GraphQlError::new(error.to_string())]));
                handlers.resolve(ctx.clone(), value).await;
                break;
            }
        }
    }
}

#[async_trait]
impl Plugin for SubscriptionStage {
    fn name(&self) -> &str {
        "subscription"
    }

    fn hooks(&self) -> HookSet {
        HookSet::START | HookSet::NETWORK
    }

    async fn start(&self, ctx: Context, handlers: EnterHandlers) -> Result<(), ClientError> {
        if self.server {
            let initial = handlers.initial_value();
            handlers.resolve(ctx, initial).await;
        } else {
            handlers.next(ctx).await;
        }
        Ok(())
    }

    async fn network(&self, ctx: Context, handlers: EnterHandlers) -> Result<(), ClientError> {
        let factory = self.factory.clone().ok_or_else(|| {
            ClientError::Subscription(format!(
                "no subscription transport configured for '{}'",
                ctx.artifact().name
            ))
        })?;
        let check = json!({
            "fetchParams": ctx.fetch_params(),
            "session": ctx.session(),
            "metadata": ctx.metadata(),
        })
        .to_string();

        let opening = {
            let mut live = self.live.lock();
            let changed = live.check.as_deref() != Some(check.as_str());
            let open = live.task.as_ref().is_some_and(|t| !t.is_finished());
            if !changed && open && !handlers.variables_changed(&ctx) {
                None
            } else {
                live.close();
                live.check = Some(check);
                if changed || live.transport.is_none() {
                    live.transport = Some(factory(ctx.session()));
                }
                live.transport.clone().map(|transport| (transport, live.generation))
            }
        };
        let Some((transport, generation)) = opening else {
            debug!(document = %ctx.artifact().name, "Subscription inputs unchanged, keeping stream");
            let current = handlers.current_value();
            handlers.resolve(ctx, current).await;
            return Ok(());
        };

        let request = build_request(&ctx, &handlers.marshal_variables(&ctx))?;
        let stream = transport.subscribe(request).await?;

        let installed = {
            let mut live = self.live.lock();
            if live.generation == generation {
                live.task = Some(tokio::spawn(pump(stream, ctx.clone(), handlers.clone())));
                true
            } else {
                drop(stream);
                false
            }
        };
        if installed {
            debug!(document = %ctx.artifact().name, "Opened subscription");
        } else {
            debug!(document = %ctx.artifact().name, "Subscription superseded while opening");
            let current = handlers.current_value();
            handlers.resolve(ctx, current).await;
        }
        Ok(())
    }

    async fn cleanup(&self, ctx: Context) {
        {
            let mut live = self.live.lock();
            live.close();
            live.check = None;
        }
        debug!(document = %ctx.artifact().name, "Closed subscription");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Client, ClientConfig, Environment};
    use crate::core::GraphQlResponse;
    use crate::pipeline::SendParams;
    use crate::testing::{user_subscription, variables, ChannelTransport};
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn renamed(name: &str) -> GraphQlResponse {
        GraphQlResponse::data(json!({"userRenamed": {"id": "1", "name": name}}))
    }

    fn watch(id: &str) -> SendParams {
        SendParams::new().with_variables(variables(json!({"id": id})))
    }

    async fn eventually(condition: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(1), async {
            while !condition() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_pushes_resolve_and_republish() {
        let transport = ChannelTransport::new();
        let client = Client::builder().transport(transport.factory()).build().unwrap();
        let store = client.store(user_subscription());

        let pending = tokio::spawn({
            let store = store.clone();
            async move { store.send(watch("1")).await }
        });
        eventually(|| transport.subscriptions() == 1).await;
        assert!(transport.push(renamed("Ada")));

        let first = pending.await.unwrap().unwrap();
        assert!(first.partial);
        assert_eq!(first.source, Some(DataSource::Network));
        assert_eq!(first.data.unwrap()["userRenamed"]["name"], json!("Ada"));

        let (tx, mut rx) = mpsc::unbounded_channel();
        store.subscribe(move |value| {
            let _ = tx.send(value.clone());
        });
        rx.recv().await.unwrap();
        transport.push(renamed("Grace"));
        let update = rx.recv().await.unwrap();
        assert_eq!(update.data.unwrap()["userRenamed"]["name"], json!("Grace"));
        assert_eq!(transport.requests()[0].variables["id"], json!("1"));
    }

    #[tokio::test]
    async fn test_unchanged_inputs_keep_stream() {
        let transport = ChannelTransport::new();
        let client = Client::builder().transport(transport.factory()).build().unwrap();
        let store = client.store(user_subscription());

        let pending = tokio::spawn({
            let store = store.clone();
            async move { store.send(watch("1")).await }
        });
        eventually(|| transport.subscriptions() == 1).await;
        transport.push(renamed("Ada"));
        pending.await.unwrap().unwrap();

        let again = store.send(watch("1")).await.unwrap();
        assert_eq!(again.data.unwrap()["userRenamed"]["name"], json!("Ada"));
        assert_eq!(transport.subscriptions(), 1);
        assert_eq!(transport.builds(), 1);
    }

    #[tokio::test]
    async fn test_new_variables_reopen_and_session_rebuilds() {
        let transport = ChannelTransport::new();
        let client = Client::builder().transport(transport.factory()).build().unwrap();
        let store = client.store(user_subscription());

        let first = tokio::spawn({
            let store = store.clone();
            async move { store.send(watch("1")).await }
        });
        eventually(|| transport.subscriptions() == 1).await;
        transport.push(renamed("Ada"));
        first.await.unwrap().unwrap();

        let second = tokio::spawn({
            let store = store.clone();
            async move { store.send(watch("2")).await }
        });
        eventually(|| transport.subscriptions() == 2).await;
        eventually(|| transport.open_subscriptions() == 1).await;
        assert_eq!(transport.builds(), 1);
        transport.push(renamed("Bo"));
        second.await.unwrap().unwrap();

        let third = tokio::spawn({
            let store = store.clone();
            async move { store.send(watch("2").with_session(json!({"token": "new"}))).await }
        });
        eventually(|| transport.subscriptions() == 3).await;
        assert_eq!(transport.builds(), 2);
        transport.push(renamed("Cy"));
        third.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_cleanup_closes_stream() {
        let transport = ChannelTransport::new();
        let client = Client::builder().transport(transport.factory()).build().unwrap();
        let store = client.store(user_subscription());

        let pending = tokio::spawn({
            let store = store.clone();
            async move { store.send(watch("1")).await }
        });
        eventually(|| transport.subscriptions() == 1).await;
        transport.push(renamed("Ada"));
        pending.await.unwrap().unwrap();

        store.cleanup().await;
        eventually(|| transport.open_subscriptions() == 0).await;
    }

    #[tokio::test]
    async fn test_concurrent_opens_keep_one_stream() {
        let transport = ChannelTransport::yielding();
        let client = Client::builder().transport(transport.factory()).build().unwrap();
        let store = client.store(user_subscription());

        let first = tokio::spawn({
            let store = store.clone();
            async move { store.send(watch("1")).await }
        });
        let second = tokio::spawn({
            let store = store.clone();
            async move { store.send(watch("2")).await }
        });
        eventually(|| transport.subscriptions() == 2).await;
        eventually(|| transport.open_subscriptions() == 1).await;
        assert!(first.await.unwrap().is_ok());

        assert!(transport.push(renamed("Bo")));
        let latest = second.await.unwrap().unwrap();
        assert_eq!(latest.data.unwrap()["userRenamed"]["name"], json!("Bo"));

        store.cleanup().await;
        eventually(|| transport.open_subscriptions() == 0).await;
    }

    #[tokio::test]
    async fn test_stream_error_becomes_result_error() {
        let transport = ChannelTransport::new();
        let client = Client::builder().transport(transport.factory()).build().unwrap();
        let store = client.store(user_subscription());

        let pending = tokio::spawn({
            let store = store.clone();
            async move { store.send(watch("1")).await }
        });
        eventually(|| transport.subscriptions() == 1).await;
        transport.fail(ClientError::Subscription("socket closed".into()));

        let result = pending.await.unwrap().unwrap();
        assert!(result.has_errors());
        assert!(result.errors.unwrap()[0].message.contains("socket closed"));
    }

    #[tokio::test]
    async fn test_server_resolves_initial_value() {
        let transport = ChannelTransport::new();
        let client = Client::builder()
            .config(ClientConfig::new().with_environment(Environment::Server))
            .transport(transport.factory())
            .build()
            .unwrap();
        let store = client.store(user_subscription());

        let result = store.send(watch("1")).await.unwrap();
        assert_eq!(result.data, None);
        assert_eq!(transport.subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_missing_transport_fails() {
        let client = Client::builder().build().unwrap();
        let err = client.store(user_subscription()).send(watch("1")).await.unwrap_err();
        assert_eq!(err.code(), "SUBSCRIPTION");
    }
}
