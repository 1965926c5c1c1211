//! End-to-end tests of document stores running real chains.

#[cfg(test)]
mod tests {
    use crate::cache::Cache;
    use crate::context::Context;
    use crate::core::{
        Artifact, ArtifactKind, CachePolicy, DataSource, FieldSelection, GraphQlResponse,
        PaginationMethod, QueryResult, RefetchInfo, Selection,
    };
    use crate::errors::ClientError;
    use crate::events::{PAGINATION_HAZARD, PIPELINE_REJECTED, PIPELINE_RESOLVED};
    use crate::pipeline::{EnterHandlers, HookSet, Phase, Plugin, SendParams};
    use crate::stages::OPTIMISTIC_KEY_PREFIX;
    use crate::testing::{
        assert_data, assert_from_cache, assert_from_network, assert_settled, create_user_mutation,
        rename_user_mutation, user_data, user_query, variables, RecordingPlugin, ScriptedFetch,
        TestClient, ThrowAction,
    };
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use std::future::Future;
    use std::task::Poll;
    use tokio_test::task::{self, Spawn};
    use tokio_test::{assert_err, assert_ok, assert_pending};

    type Log = Arc<Mutex<Vec<String>>>;

    fn log() -> Log {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn by_id(id: &str) -> SendParams {
        SendParams::new().with_variables(variables(json!({"id": id})))
    }

    fn network_value(id: &str, name: &str) -> QueryResult {
        QueryResult::from_network(GraphQlResponse::data(user_data(id, name)), None)
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

    async fn ready<F: Future>(task: &mut Spawn<F>) -> F::Output {
        tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if let Poll::Ready(output) = task.poll() {
                    return output;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap()
    }

    /// Takes the network handler and never continues.
    struct Stall;

    #[async_trait]
    impl Plugin for Stall {
        fn name(&self) -> &str {
            "stall"
        }

        fn hooks(&self) -> HookSet {
            HookSet::NETWORK
        }

        async fn network(&self, _ctx: Context, _handlers: EnterHandlers) -> Result<(), ClientError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_phase_order() {
        let test = TestClient::new(ScriptedFetch::new());
        let log = log();
        let store = test.client.store_with(
            user_query(),
            vec![
                Arc::new(RecordingPlugin::new("a", log.clone())),
                Arc::new(RecordingPlugin::new("b", log.clone())),
                Arc::new(RecordingPlugin::new("c", log.clone()).resolving(network_value("1", "Ada"))),
            ],
        );

        let result = store.send(by_id("1")).await.unwrap();
        assert_data(&result, &user_data("1", "Ada"));
        assert_eq!(
            *log.lock(),
            vec![
                "a:start",
                "b:start",
                "c:start",
                "a:beforeNetwork",
                "b:beforeNetwork",
                "c:beforeNetwork",
                "a:network",
                "b:network",
                "c:network",
                "b:afterNetwork",
                "a:afterNetwork",
                "c:end",
                "b:end",
                "a:end",
            ]
        );
    }

    #[tokio::test]
    async fn test_repeated_resolves_settle_once() {
        let test = TestClient::new(ScriptedFetch::new());
        let store = test.client.store_with(
            user_query(),
            vec![Arc::new(
                RecordingPlugin::new("source", log())
                    .resolving(network_value("1", "Ada"))
                    .replaying(3),
            )],
        );

        store.send(by_id("1")).await.unwrap();
        eventually(|| test.events.events_of_type(PIPELINE_RESOLVED).len() == 3).await;

        let settled: Vec<bool> = test
            .events
            .events_of_type(PIPELINE_RESOLVED)
            .into_iter()
            .map(|(_, data)| data.unwrap()["settled"].as_bool().unwrap())
            .collect();
        assert_eq!(settled, vec![true, false, false]);
    }

    #[tokio::test]
    async fn test_unresolved_chain_is_missing_resolver() {
        let test = TestClient::new(ScriptedFetch::new());
        let store = test
            .client
            .store_with(user_query(), vec![Arc::new(RecordingPlugin::new("idle", log()))]);

        let err = store.send(by_id("1")).await.unwrap_err();
        assert!(matches!(err, ClientError::MissingResolver { ref document } if document == "User"));
        assert_eq!(test.events.events_of_type(PIPELINE_REJECTED).len(), 1);
    }

    #[tokio::test]
    async fn test_setup_probe_resolves_with_current_value() {
        let test = TestClient::new(ScriptedFetch::new());
        let log = log();
        let store = test
            .client
            .store_with(user_query(), vec![Arc::new(RecordingPlugin::new("idle", log.clone()))]);

        let result = store.send(by_id("1").setup()).await.unwrap();
        assert_eq!(result.data, None);
        assert!(log.lock().contains(&"idle:afterNetwork".to_string()));
        assert!(log.lock().contains(&"idle:end".to_string()));
    }

    #[tokio::test]
    async fn test_abandoned_chain_is_dropped() {
        let test = TestClient::new(ScriptedFetch::new());
        let store = test.client.store_with(user_query(), vec![Arc::new(Stall)]);

        let err = store.send(by_id("1")).await.unwrap_err();
        assert_eq!(err.code(), "PIPELINE-DROPPED");
    }

    #[tokio::test]
    async fn test_throw_hook_retries_forward() {
        let test = TestClient::new(ScriptedFetch::new());
        let log = log();
        let store = test.client.store_with(
            user_query(),
            vec![
                Arc::new(RecordingPlugin::new("guard", log.clone()).catching(ThrowAction::Retry)),
                Arc::new(
                    RecordingPlugin::new("flaky", log.clone())
                        .failing_in(Phase::Network, 1)
                        .resolving(network_value("1", "Ada")),
                ),
            ],
        );

        let result = store.send(by_id("1")).await.unwrap();
        assert_data(&result, &user_data("1", "Ada"));
        let log = log.lock();
        assert!(log.contains(&"guard:throw".to_string()));
        assert_eq!(log.iter().filter(|e| *e == "flaky:network").count(), 2);
    }

    #[tokio::test]
    async fn test_throw_hook_recovers_with_value() {
        let test = TestClient::new(ScriptedFetch::new());
        let log = log();
        let store = test.client.store_with(
            user_query(),
            vec![
                Arc::new(
                    RecordingPlugin::new("guard", log.clone())
                        .catching(ThrowAction::Resolve(network_value("0", "Fallback"))),
                ),
                Arc::new(RecordingPlugin::new("broken", log.clone()).failing_in(Phase::Network, 1)),
            ],
        );

        let result = store.send(by_id("1")).await.unwrap();
        assert_data(&result, &user_data("0", "Fallback"));
        let log = log.lock();
        let tail: Vec<&str> = log
            .iter()
            .skip_while(|e| *e != "guard:throw")
            .map(String::as_str)
            .collect();
        assert_eq!(
            tail,
            vec![
                "guard:throw",
                "broken:afterNetwork",
                "guard:afterNetwork",
                "broken:end",
                "guard:end",
            ]
        );
    }

    #[tokio::test]
    async fn test_uncaught_failure_rejects() {
        let test = TestClient::new(ScriptedFetch::new());
        let store = test.client.store_with(
            user_query(),
            vec![Arc::new(RecordingPlugin::new("boom", log()).failing_in(Phase::Start, 1))],
        );

        let err = store.send(by_id("1")).await.unwrap_err();
        assert_eq!(err.code(), "PLUGIN");
        let rejected = test.events.events_of_type(PIPELINE_REJECTED);
        assert_eq!(rejected[0].1.as_ref().unwrap()["code"], json!("PLUGIN"));
    }

    #[tokio::test]
    async fn test_cache_policies() {
        let test = TestClient::new(ScriptedFetch::always(GraphQlResponse::data(user_data("1", "Ada"))));
        let store = test.client.store(user_query());

        let missing = store
            .send(by_id("1").with_policy(CachePolicy::CacheOnly))
            .await
            .unwrap();
        assert_eq!(missing.data, None);
        assert_eq!(test.fetch.calls(), 0);

        let first = store.send(by_id("1")).await.unwrap();
        assert_from_network(&first);
        assert_settled(&first);
        assert_eq!(test.fetch.calls(), 1);

        let cached = store.send(by_id("1")).await.unwrap();
        assert_from_cache(&cached);
        assert_eq!(test.fetch.calls(), 1);

        let forced = store
            .send(by_id("1").with_policy(CachePolicy::NetworkOnly))
            .await
            .unwrap();
        assert_from_network(&forced);
        assert_eq!(test.fetch.calls(), 2);

        let both = store
            .send(by_id("1").with_policy(CachePolicy::CacheAndNetwork))
            .await
            .unwrap();
        assert_from_cache(&both);
        eventually(|| test.fetch.calls() == 3).await;
        eventually(|| store.state().source == Some(DataSource::Network)).await;
    }

    #[tokio::test]
    async fn test_fetching_published_once_for_cold_cache() {
        let test = TestClient::new(
            ScriptedFetch::new()
                .respond(GraphQlResponse::data(user_data("1", "Ada")))
                .respond(GraphQlResponse::data(user_data("1", "Ada Lovelace"))),
        );
        let store = test.client.store(user_query());
        let fetching = Arc::new(Mutex::new(0_usize));
        store.subscribe({
            let fetching = fetching.clone();
            move |value: &QueryResult| {
                if value.fetching {
                    *fetching.lock() += 1;
                }
            }
        });
        let send = || by_id("1").with_policy(CachePolicy::CacheOrNetwork);

        let cold = store.send(send()).await.unwrap();
        assert_from_network(&cold);
        assert_eq!(test.fetch.calls(), 1);
        assert_eq!(*fetching.lock(), 1);
        assert!(!store.state().fetching);

        let warm = store.send(send()).await.unwrap();
        assert_from_cache(&warm);
        assert_eq!(test.fetch.calls(), 1);
        assert_eq!(*fetching.lock(), 1);

        test.cache.mark_type_stale("User", None);
        let stale = store.send(send()).await.unwrap();
        assert_from_cache(&stale);
        assert!(stale.stale);
        eventually(|| test.fetch.calls() == 2).await;
        eventually(|| {
            let state = store.state();
            !state.stale && state.data == Some(user_data("1", "Ada Lovelace"))
        })
        .await;
        assert_eq!(*fetching.lock(), 1);
    }

    #[tokio::test]
    async fn test_no_cache_leaves_cache_untouched() {
        let test = TestClient::new(ScriptedFetch::always(GraphQlResponse::data(user_data("1", "Ada"))));
        let store = test.client.store(user_query());

        let result = store
            .send(by_id("1").with_policy(CachePolicy::NoCache))
            .await
            .unwrap();
        assert_from_network(&result);

        let cached = store
            .send(by_id("1").with_policy(CachePolicy::CacheOnly))
            .await
            .unwrap();
        assert_eq!(cached.data, None);
    }

    async fn next_matching(
        rx: &mut mpsc::UnboundedReceiver<QueryResult>,
        want: fn(&QueryResult) -> bool,
    ) -> QueryResult {
        loop {
            let value = rx.recv().await.unwrap();
            if want(&value) {
                return value;
            }
        }
    }

    #[tokio::test]
    async fn test_stale_data_served_then_refreshed() {
        let test = TestClient::new(
            ScriptedFetch::new()
                .respond(GraphQlResponse::data(user_data("1", "Ada")))
                .respond(GraphQlResponse::data(user_data("1", "Ada Lovelace"))),
        );
        let store = test.client.store(user_query());
        store.send(by_id("1")).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        store.subscribe(move |value| {
            let _ = tx.send(value.clone());
        });
        rx.recv().await.unwrap();

        test.cache.mark_type_stale("User", None);
        store.send(by_id("1")).await.unwrap();

        let stale = tokio::time::timeout(
            Duration::from_secs(1),
            next_matching(&mut rx, |v| v.stale && v.source == Some(DataSource::Cache)),
        )
        .await
        .unwrap();
        assert_data(&stale, &user_data("1", "Ada"));

        let fresh = tokio::time::timeout(
            Duration::from_secs(1),
            next_matching(&mut rx, |v| v.source == Some(DataSource::Network)),
        )
        .await
        .unwrap();
        assert_data(&fresh, &user_data("1", "Ada Lovelace"));
        assert_eq!(test.fetch.calls(), 2);
    }

    #[tokio::test]
    async fn test_later_sends_reuse_inputs() {
        let test = TestClient::new(ScriptedFetch::always(GraphQlResponse::data(user_data("1", "Ada"))));
        let store = test.client.store(user_query());

        store
            .send(by_id("1").with_session(json!({"token": "t"})).with_policy(CachePolicy::NetworkOnly))
            .await
            .unwrap();
        store
            .send(SendParams::new().with_policy(CachePolicy::NetworkOnly))
            .await
            .unwrap();

        let request = test.fetch.last_request().unwrap();
        assert_eq!(request.variables, variables(json!({"id": "1"})));
        assert_eq!(request.session, Some(json!({"token": "t"})));
    }

    #[tokio::test]
    async fn test_paginated_send_without_cursor_warns_and_runs() {
        let test = TestClient::new(ScriptedFetch::always(GraphQlResponse::data(user_data("1", "Ada"))));
        let artifact = user_query().with_refetch(RefetchInfo {
            paginated: true,
            method: PaginationMethod::Cursor,
            page_size: Some(10),
            path: vec!["user".to_string()],
            target_type: None,
        });
        let store = test.client.store(artifact);

        store.send(by_id("1")).await.unwrap();
        assert!(test.events.events_of_type(PAGINATION_HAZARD).is_empty());

        let again = store
            .send(by_id("1").with_policy(CachePolicy::NetworkOnly))
            .await
            .unwrap();
        assert_from_network(&again);
        let hazards = test.events.events_of_type(PAGINATION_HAZARD);
        assert_eq!(hazards.len(), 1);
        assert_eq!(hazards[0].1.as_ref().unwrap()["cursors"], json!(["after", "before"]));

        let paged = SendParams::new()
            .with_variables(variables(json!({"id": "1", "after": "c1"})))
            .with_policy(CachePolicy::NetworkOnly);
        store.send(paged).await.unwrap();
        assert_eq!(test.events.events_of_type(PAGINATION_HAZARD).len(), 1);
    }

    fn placeholder_in(snapshot: &Value) -> Option<String> {
        snapshot
            .as_object()?
            .values()
            .filter_map(|record| record["id"].as_str())
            .find(|id| id.starts_with(OPTIMISTIC_KEY_PREFIX))
            .map(str::to_string)
    }

    #[tokio::test]
    async fn test_dependent_mutation_waits_for_real_key() {
        let test = TestClient::new(
            ScriptedFetch::new()
                .respond(GraphQlResponse::data(json!({"createUser": {"id": "42", "name": "Ada"}})))
                .respond(GraphQlResponse::data(json!({"renameUser": {"id": "42", "name": "Bo"}})))
                .paused(),
        );
        let create = test.client.store(create_user_mutation());
        let first = tokio::spawn({
            let create = create.clone();
            async move {
                create
                    .send(
                        SendParams::new()
                            .with_variables(variables(json!({"name": "Ada"})))
                            .with_optimistic_response(json!({"createUser": {"name": "Ada"}})),
                    )
                    .await
            }
        });
        eventually(|| test.fetch.calls() == 1).await;
        let placeholder = placeholder_in(&test.cache.snapshot()).unwrap();

        let rename = test.client.store(rename_user_mutation());
        let mut second = task::spawn(
            rename.send(SendParams::new().with_variables(variables(json!({"id": placeholder, "name": "Bo"})))),
        );
        assert_pending!(second.poll());
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
        assert_eq!(test.fetch.calls(), 1);
        assert_pending!(second.poll());

        test.fetch.release();
        assert_ok!(first.await.unwrap());
        eventually(|| test.fetch.calls() == 2).await;
        test.fetch.release();
        assert_ok!(ready(&mut second).await);

        let request = test.fetch.last_request().unwrap();
        assert_eq!(request.variables["id"], json!("42"));
        assert_eq!(test.client.optimistic_keys().pending_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_mutation_rejects_dependents() {
        let test = TestClient::new(
            ScriptedFetch::new()
                .fail(ClientError::Network("connection reset".to_string()))
                .paused(),
        );
        let create = test.client.store(create_user_mutation());
        let first = tokio::spawn({
            let create = create.clone();
            async move {
                create
                    .send(
                        SendParams::new()
                            .with_variables(variables(json!({"name": "Ada"})))
                            .with_optimistic_response(json!({"createUser": {"name": "Ada"}})),
                    )
                    .await
            }
        });
        eventually(|| test.fetch.calls() == 1).await;
        let placeholder = placeholder_in(&test.cache.snapshot()).unwrap();

        let rename = test.client.store(rename_user_mutation());
        let second = tokio::spawn(async move {
            rename
                .send(SendParams::new().with_variables(variables(json!({"id": placeholder, "name": "Bo"}))))
                .await
        });
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }

        test.fetch.release();
        assert_eq!(assert_err!(first.await.unwrap()).code(), "NETWORK");
        let err = assert_err!(second.await.unwrap());
        assert_eq!(err.code(), "OPTIMISTIC-KEY-ABANDONED");
        assert_eq!(test.fetch.calls(), 1);
        assert_eq!(test.cache.layer_count(), 1);
    }

    #[tokio::test]
    async fn test_negative_numbers_do_not_wait_on_int_keys() {
        let test = TestClient::new(
            ScriptedFetch::always(GraphQlResponse::data(user_data("1", "Ada")))
                .respond(GraphQlResponse::data(json!({"createCounter": {"id": 5}})))
                .paused(),
        );
        let counter = Artifact::new(
            ArtifactKind::Mutation,
            "CreateCounter",
            "mutation CreateCounter { createCounter { id } }",
            Selection::new().field(
                "createCounter",
                FieldSelection::object(
                    "Counter",
                    Selection::new().field("id", FieldSelection::scalar("Int").optimistic_key()),
                ),
            ),
        )
        .with_optimistic_keys(true);
        let create = test.client.store(counter);
        let first = tokio::spawn(async move {
            create
                .send(SendParams::new().with_optimistic_response(json!({"createCounter": {}})))
                .await
        });
        eventually(|| test.fetch.calls() == 1).await;
        assert_eq!(test.client.optimistic_keys().pending_count(), 1);

        let query = test.client.store(user_query());
        let second = tokio::spawn(async move {
            query
                .send(SendParams::new().with_variables(variables(json!({"id": "1", "offset": -1}))))
                .await
        });
        eventually(|| test.fetch.calls() == 2).await;

        test.fetch.release();
        test.fetch.release();
        assert_ok!(first.await.unwrap());
        assert_ok!(second.await.unwrap());
        assert_eq!(test.fetch.requests()[1].variables["offset"], json!(-1));
    }

    #[tokio::test]
    async fn test_listeners_follow_publishes() {
        let test = TestClient::new(ScriptedFetch::always(GraphQlResponse::data(user_data("1", "Ada"))));
        let store = test.client.store(user_query());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let id = store.subscribe({
            let seen = seen.clone();
            move |value: &QueryResult| seen.lock().push(value.data.clone())
        });
        assert_eq!(seen.lock().len(), 1);

        store.send(by_id("1")).await.unwrap();
        let after_first = seen.lock().len();
        assert!(after_first > 1);
        assert_eq!(seen.lock().last().cloned().flatten(), Some(user_data("1", "Ada")));

        store.unsubscribe(id);
        store
            .send(by_id("1").with_policy(CachePolicy::NetworkOnly))
            .await
            .unwrap();
        assert_eq!(seen.lock().len(), after_first);
    }

    #[tokio::test]
    async fn test_cleanup_receives_last_context() {
        let test = TestClient::new(ScriptedFetch::new());
        let log = log();
        let store = test.client.store_with(
            user_query(),
            vec![Arc::new(
                RecordingPlugin::new("rec", log.clone())
                    .with_hooks(HookSet::NETWORK)
                    .resolving(network_value("7", "Ada")),
            )],
        );

        store.cleanup().await;
        assert_eq!(log.lock().last().cloned(), Some("rec:cleanup {}".to_string()));

        store.send(by_id("7")).await.unwrap();
        store.cleanup().await;
        assert_eq!(log.lock().last().cloned(), Some(r#"rec:cleanup {"id":"7"}"#.to_string()));
    }
}
