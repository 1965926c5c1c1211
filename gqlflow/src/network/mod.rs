//! Network transports.
//!
//! The pipeline never talks HTTP directly. The fetch stage hands a
//! [`FetchRequest`] to a [`Fetch`] implementation and the subscription stage
//! opens streams through a [`SubscriptionTransport`].

#[cfg(feature = "http")]
mod http;
mod uploads;

#[cfg(feature = "http")]
pub use http::HttpFetch;
pub use uploads::{extract_files, multipart_map, upload_value, ExtractedFiles, UploadFile, UPLOAD_MARKER};

use crate::core::{GraphQlResponse, Variables};
use crate::errors::ClientError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::{json, Value};
use std::sync::Arc;

/// Everything a transport needs to execute one document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchRequest {
    /// Document text.
    pub text: String,
    /// Document hash, for persisted queries.
    pub hash: String,
    /// Operation name.
    pub operation_name: String,
    /// Marshaled variables with uploads replaced by `null`.
    pub variables: Variables,
    /// Files extracted from the variables.
    pub files: Vec<UploadFile>,
    /// Caller session.
    pub session: Option<Value>,
    /// Caller metadata.
    pub metadata: Option<Value>,
    /// Per-request transport overrides, e.g. `{"headers": {...}}`.
    pub fetch_params: Option<Value>,
}

impl FetchRequest {
    /// Returns the GraphQL-over-HTTP request body.
    #[must_use]
    pub fn body(&self) -> Value {
        json!({
            "query": self.text,
            "variables": self.variables,
            "operationName": self.operation_name,
        })
    }

    /// Returns per-request headers from the fetch params.
    #[must_use]
    pub fn extra_headers(&self) -> Vec<(String, String)> {
        self.fetch_params
            .as_ref()
            .and_then(|params| params.get("headers"))
            .and_then(Value::as_object)
            .map(|headers| {
                headers
                    .iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Executes a document and returns the GraphQL response.
#[async_trait]
pub trait Fetch: Send + Sync {
    /// Sends the request.
    async fn fetch(&self, request: FetchRequest) -> Result<GraphQlResponse, ClientError>;
}

/// Stream of responses pushed by a live subscription.
pub type ResponseStream = BoxStream<'static, Result<GraphQlResponse, ClientError>>;

/// Opens live subscriptions.
#[async_trait]
pub trait SubscriptionTransport: Send + Sync {
    /// Opens a subscription. Dropping the stream closes it.
    async fn subscribe(&self, request: FetchRequest) -> Result<ResponseStream, ClientError>;
}

/// Builds a transport for a session. Called again whenever the session changes.
pub type TransportFactory = Arc<dyn Fn(Option<&Value>) -> Arc<dyn SubscriptionTransport> + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_shape() {
        let request = FetchRequest {
            text: "query A { a }".into(),
            operation_name: "A".into(),
            ..FetchRequest::default()
        };
        assert_eq!(
            request.body(),
            json!({"query": "query A { a }", "variables": {}, "operationName": "A"})
        );
    }

    #[test]
    fn test_extra_headers_from_fetch_params() {
        let request = FetchRequest {
            fetch_params: Some(json!({"headers": {"x-trace": "abc", "bad": 1}})),
            ..FetchRequest::default()
        };
        assert_eq!(request.extra_headers(), vec![("x-trace".to_string(), "abc".to_string())]);
        assert!(FetchRequest::default().extra_headers().is_empty());
    }
}
