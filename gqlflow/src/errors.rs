//! Error types for the gqlflow data layer.
//!
//! Stage failures travel through the pipeline's error walk as values, so
//! [`ClientError`] is `Clone`: a `throw` hook receives the error and may hand
//! it back to keep the walk going.

use crate::core::GraphQlError;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// The main error type for gqlflow operations.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// Every forward phase ran and no stage resolved the chain.
    #[error("Document '{document}' was not resolved: the chain is missing a stage that resolves")]
    MissingResolver {
        /// Name of the document being sent.
        document: String,
    },

    /// The transport failed before a GraphQL response was produced.
    #[error("Network error: {0}")]
    Network(String),

    /// The server answered with GraphQL errors and a stage chose to throw them.
    #[error("GraphQL error: {}", format_graphql_errors(.0))]
    GraphQl(Vec<GraphQlError>),

    /// An optimistic key could not be minted.
    #[error("Optimistic key error for field '{field}': {reason}")]
    OptimisticKey {
        /// The response field carrying the key.
        field: String,
        /// Why the key could not be minted.
        reason: String,
    },

    /// The mutation that minted a key failed before the real value arrived.
    #[error("Optimistic key {key} was abandoned by the mutation that minted it")]
    OptimisticKeyAbandoned {
        /// The placeholder value that will never resolve.
        key: String,
    },

    /// A live subscription could not be opened or failed.
    #[error("Subscription error: {0}")]
    Subscription(String),

    /// Error raised by a plugin.
    #[error("Plugin '{plugin}' failed: {cause}")]
    Plugin {
        /// The plugin name.
        plugin: String,
        /// The underlying error.
        cause: Arc<anyhow::Error>,
    },

    /// Invalid client configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The chain was abandoned without resolving or rejecting.
    #[error("Pipeline for '{document}' was dropped before it settled")]
    Dropped {
        /// Name of the document being sent.
        document: String,
    },
}

fn format_graphql_errors(errors: &[GraphQlError]) -> String {
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

impl ClientError {
    /// Wraps an arbitrary error raised inside a plugin.
    pub fn plugin(plugin: impl Into<String>, cause: impl Into<anyhow::Error>) -> Self {
        Self::Plugin {
            plugin: plugin.into(),
            cause: Arc::new(cause.into()),
        }
    }

    /// Creates an optimistic key error.
    #[must_use]
    pub fn optimistic_key(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::OptimisticKey {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Returns a stable machine-readable code for the error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingResolver { .. } => "PIPELINE-MISSING-RESOLVER",
            Self::Network(_) => "NETWORK",
            Self::GraphQl(_) => "GRAPHQL",
            Self::OptimisticKey { .. } => "OPTIMISTIC-KEY",
            Self::OptimisticKeyAbandoned { .. } => "OPTIMISTIC-KEY-ABANDONED",
            Self::Subscription(_) => "SUBSCRIPTION",
            Self::Plugin { .. } => "PLUGIN",
            Self::Config(_) => "CONFIG",
            Self::Serialization(_) => "SERIALIZATION",
            Self::Dropped { .. } => "PIPELINE-DROPPED",
        }
    }

    /// Converts to a dictionary representation for event payloads.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("code".to_string(), serde_json::json!(self.code()));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        if let Self::GraphQl(errors) = self {
            map.insert("errors".to_string(), serde_json::json!(errors));
        }
        map
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
