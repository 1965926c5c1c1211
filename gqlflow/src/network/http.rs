//! GraphQL over HTTP with `reqwest`.

use super::{multipart_map, Fetch, FetchRequest};
use crate::client::ClientConfig;
use crate::core::GraphQlResponse;
use crate::errors::ClientError;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Posts documents to a GraphQL endpoint.
#[derive(Debug, Clone)]
pub struct HttpFetch {
    client: Client,
    url: String,
    headers: HashMap<String, String>,
}

impl HttpFetch {
    /// Creates a transport for an endpoint.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` if the HTTP client cannot be built.
    pub fn new(
        url: impl Into<String>,
        headers: HashMap<String, String>,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
            headers,
        })
    }

    /// Creates a transport from client configuration.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` if no URL is configured.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ClientError> {
        let url = config
            .url
            .clone()
            .ok_or_else(|| ClientError::Config("no GraphQL endpoint url configured".to_string()))?;
        Self::new(url, config.headers.clone(), config.timeout())
    }

    /// Returns the endpoint.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

fn map_http_error(error: reqwest::Error) -> ClientError {
    if error.is_timeout() {
        ClientError::Network(format!("request timed out: {error}"))
    } else if error.is_connect() {
        ClientError::Network(format!("connection failed: {error}"))
    } else {
        ClientError::Network(error.to_string())
    }
}

#[async_trait]
impl Fetch for HttpFetch {
    async fn fetch(&self, request: FetchRequest) -> Result<GraphQlResponse, ClientError> {
        let mut builder = self.client.post(&self.url);
        for (key, value) in self.headers.iter().map(|(k, v)| (k.clone(), v.clone())).chain(request.extra_headers()) {
            builder = builder.header(key, value);
        }

        builder = if request.files.is_empty() {
            builder.json(&request.body())
        } else {
            let mut form = Form::new()
                .text("operations", request.body().to_string())
                .text("map", multipart_map(&request.files).to_string());
            for (index, file) in request.files.iter().enumerate() {
                let part = Part::bytes(file.data.clone())
                    .file_name(file.filename.clone())
                    .mime_str(&file.content_type)
                    .map_err(map_http_error)?;
                form = form.part(index.to_string(), part);
            }
            builder.multipart(form)
        };

        debug!(operation = %request.operation_name, url = %self.url, "Sending GraphQL request");
        let response = builder.send().await.map_err(map_http_error)?;
        let status = response.status();
        let body: Value = response.json().await.map_err(|e| {
            ClientError::Network(format!("invalid response body (HTTP {status}): {e}"))
        })?;

        if body.get("data").is_none() && body.get("errors").is_none() {
            return Err(ClientError::Network(format!(
                "HTTP {status}: response is not a GraphQL result"
            )));
        }
        Ok(serde_json::from_value(body)?)
    }
}
