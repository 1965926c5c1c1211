//! Artifact and client fixtures.

use std::sync::Arc;

use serde_json::{json, Value};

use super::ScriptedFetch;
use crate::cache::InMemoryCache;
use crate::client::{Client, ClientConfig};
use crate::core::{Artifact, ArtifactKind, FieldSelection, Selection, Variables};
use crate::events::CollectingEventSink;

fn user_fields() -> Selection {
    Selection::new()
        .field("id", FieldSelection::scalar("ID").non_null())
        .field("name", FieldSelection::scalar("String"))
}

/// `query User($id: ID!) { user(id: $id) { id name } }`
#[must_use]
pub fn user_query() -> Artifact {
    Artifact::new(
        ArtifactKind::Query,
        "User",
        "query User($id: ID!) { user(id: $id) { id name } }",
        Selection::new().field(
            "user",
            FieldSelection::object("User", user_fields()).with_key("user(id: $id)"),
        ),
    )
}

/// `mutation CreateUser($name: String!) { createUser(name: $name) { id name } }`
/// with `id` minted as an optimistic key.
#[must_use]
pub fn create_user_mutation() -> Artifact {
    Artifact::new(
        ArtifactKind::Mutation,
        "CreateUser",
        "mutation CreateUser($name: String!) { createUser(name: $name) { id name } }",
        Selection::new().field(
            "createUser",
            FieldSelection::object(
                "User",
                Selection::new()
                    .field("id", FieldSelection::scalar("ID").optimistic_key())
                    .field("name", FieldSelection::scalar("String")),
            )
            .with_key("createUser(name: $name)"),
        ),
    )
    .with_optimistic_keys(true)
}

/// `mutation RenameUser($id: ID!, $name: String!) { renameUser(id: $id, name: $name) { id name } }`
#[must_use]
pub fn rename_user_mutation() -> Artifact {
    Artifact::new(
        ArtifactKind::Mutation,
        "RenameUser",
        "mutation RenameUser($id: ID!, $name: String!) { renameUser(id: $id, name: $name) { id name } }",
        Selection::new().field(
            "renameUser",
            FieldSelection::object("User", user_fields()).with_key("renameUser(id: $id, name: $name)"),
        ),
    )
}

/// `subscription UserRenamed($id: ID!) { userRenamed(id: $id) { id name } }`
#[must_use]
pub fn user_subscription() -> Artifact {
    Artifact::new(
        ArtifactKind::Subscription,
        "UserRenamed",
        "subscription UserRenamed($id: ID!) { userRenamed(id: $id) { id name } }",
        Selection::new().field(
            "userRenamed",
            FieldSelection::object("User", user_fields()).with_key("userRenamed(id: $id)"),
        ),
    )
}

/// Response data of [`user_query`].
#[must_use]
pub fn user_data(id: &str, name: &str) -> Value {
    json!({"user": {"id": id, "name": name}})
}

/// Builds variables from a JSON object literal.
///
/// # Panics
///
/// Panics if `value` is not a JSON object.
#[must_use]
pub fn variables(value: Value) -> Variables {
    match value {
        Value::Object(map) => map,
        other => panic!("variables must be an object, got {other}"),
    }
}

/// A client wired to an in-memory cache, a collecting event sink and `fetch`.
pub struct TestClient {
    /// The client.
    pub client: Client,
    /// Its cache.
    pub cache: Arc<InMemoryCache>,
    /// Its event sink.
    pub events: Arc<CollectingEventSink>,
    /// Its fetch.
    pub fetch: Arc<ScriptedFetch>,
}

impl TestClient {
    /// Builds a client with default configuration.
    ///
    /// # Panics
    ///
    /// Panics if the client cannot be built.
    #[must_use]
    pub fn new(fetch: ScriptedFetch) -> Self {
        Self::with_config(ClientConfig::default(), fetch)
    }

    /// Builds a client with the given configuration.
    ///
    /// # Panics
    ///
    /// Panics if the client cannot be built.
    #[must_use]
    pub fn with_config(config: ClientConfig, fetch: ScriptedFetch) -> Self {
        let cache = Arc::new(InMemoryCache::new(config.cache_config()));
        let events = Arc::new(CollectingEventSink::new());
        let fetch = Arc::new(fetch);
        let client = Client::builder()
            .config(config)
            .cache(cache.clone())
            .event_sink(events.clone())
            .fetch(fetch.clone())
            .build()
            .unwrap_or_else(|e| panic!("test client: {e}"));
        Self {
            client,
            cache,
            events,
            fetch,
        }
    }
}
