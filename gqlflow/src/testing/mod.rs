//! Testing utilities for gqlflow document stores.
//!
//! This module provides:
//! - A scripted fetch, a recording plugin and a channel-fed subscription transport
//! - Artifact fixtures and a fully wired test client
//! - Assertions on query results

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{assert_data, assert_from_cache, assert_from_network, assert_settled};
pub use fixtures::{
    create_user_mutation, rename_user_mutation, user_data, user_query, user_subscription, variables,
    TestClient,
};
pub use mocks::{ChannelTransport, RecordingPlugin, ScriptedFetch, ThrowAction};
