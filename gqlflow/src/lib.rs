//! # gqlflow
//!
//! The data layer of a GraphQL client.
//!
//! Every document gets a [`DocumentStore`](pipeline::DocumentStore) that runs
//! each `send()` through a chain of plugins across five phases:
//!
//! - **start / beforeNetwork / network**: walked forward, in chain order
//! - **afterNetwork / end**: walked backward, once some plugin resolves
//!
//! The default chain serves data from a normalized cache according to the
//! request's cache policy, keeps query results in sync with later cache
//! writes, applies optimistic mutation results in removable cache layers and
//! holds back mutations that reference not-yet-known server ids.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use gqlflow::prelude::*;
//!
//! let client = Client::builder()
//!     .config(ClientConfig::new().with_url("https://api.example.com/graphql"))
//!     .build()?;
//!
//! let store = client.store(Artifact::from_json(USER_QUERY)?);
//! store.subscribe(|result| println!("{:?}", result.data));
//!
//! let result = store
//!     .send(SendParams::new().with_variables(variables))
//!     .await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cache;
pub mod client;
pub mod context;
pub mod core;
pub mod errors;
pub mod events;
pub mod network;
pub mod observability;
pub mod pipeline;
pub mod stages;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cache::{Cache, CacheConfig, InMemoryCache};
    pub use crate::client::{Client, ClientBuilder, ClientConfig, Environment, ThrowOn};
    pub use crate::context::{CacheParams, Context, Stuff};
    pub use crate::core::{
        Artifact, ArtifactKind, CachePolicy, DataSource, GraphQlError, GraphQlResponse,
        QueryResult, ScalarRegistry, Variables,
    };
    pub use crate::errors::ClientError;
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::network::{Fetch, FetchRequest, SubscriptionTransport, TransportFactory};
    pub use crate::pipeline::{
        factory, DocumentStore, EnterHandlers, ExitHandlers, HookSet, Plugin, PluginFactory,
        SendParams, ThrowHandlers,
    };
}
