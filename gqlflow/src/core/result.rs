//! Observable results and GraphQL wire types.

use super::DataSource;
use serde::{Deserialize, Serialize};

/// Variables of a document invocation.
pub type Variables = serde_json::Map<String, serde_json::Value>;

/// An error entry from a GraphQL response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphQlError {
    /// Error message.
    pub message: String,
    /// Response path the error refers to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<serde_json::Value>>,
    /// Server-specific extensions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<serde_json::Value>,
}

impl GraphQlError {
    /// Creates an error with a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: None,
            extensions: None,
        }
    }
}

/// A GraphQL response as produced by a transport.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphQlResponse {
    /// Response data.
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    /// Response errors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<GraphQlError>>,
}

impl GraphQlResponse {
    /// Creates a successful response.
    #[must_use]
    pub fn data(data: serde_json::Value) -> Self {
        Self {
            data: Some(data),
            errors: None,
        }
    }

    /// Creates an error-only response.
    #[must_use]
    pub fn errors(errors: Vec<GraphQlError>) -> Self {
        Self {
            data: None,
            errors: Some(errors),
        }
    }
}

/// The observable result of a document store.
///
/// Exactly one `QueryResult` is the published value of a store at any time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Result data.
    pub data: Option<serde_json::Value>,
    /// GraphQL errors, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<GraphQlError>>,
    /// Whether a request is in flight.
    pub fetching: bool,
    /// Whether the data is missing fields.
    pub partial: bool,
    /// Whether any of the data is marked stale.
    pub stale: bool,
    /// Where the data came from.
    pub source: Option<DataSource>,
    /// Variables that produced the data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<Variables>,
}

impl QueryResult {
    /// The empty, idle result.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// A result built from a network response.
    #[must_use]
    pub fn from_network(response: GraphQlResponse, variables: Option<Variables>) -> Self {
        Self {
            data: response.data,
            errors: response.errors,
            fetching: false,
            partial: false,
            stale: false,
            source: Some(DataSource::Network),
            variables,
        }
    }

    /// A result built from cached data.
    #[must_use]
    pub fn from_cache(
        data: Option<serde_json::Value>,
        partial: bool,
        stale: bool,
        variables: Option<Variables>,
    ) -> Self {
        Self {
            data,
            errors: None,
            fetching: false,
            partial,
            stale,
            source: Some(DataSource::Cache),
            variables,
        }
    }

    /// Sets the fetching flag.
    #[must_use]
    pub fn with_fetching(mut self, fetching: bool) -> Self {
        self.fetching = fetching;
        self
    }

    /// Sets the partial flag.
    #[must_use]
    pub fn with_partial(mut self, partial: bool) -> Self {
        self.partial = partial;
        self
    }

    /// Returns true if the result carries at least one GraphQL error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.errors.as_ref().is_some_and(|e| !e.is_empty())
    }
}
