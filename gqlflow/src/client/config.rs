//! Client configuration.

use crate::cache::CacheConfig;
use crate::core::{ArtifactKind, CachePolicy};
use crate::errors::ClientError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Where the client runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Long-lived client with live connections.
    #[default]
    Browser,
    /// Per-request client rendering on a server.
    Server,
}

/// Document kinds whose GraphQL errors are turned into failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThrowOn {
    /// Every document.
    All,
    /// Queries.
    Query,
    /// Mutations.
    Mutation,
    /// Subscriptions.
    Subscription,
}

impl ThrowOn {
    /// Returns true if documents of `kind` are covered.
    #[must_use]
    pub fn covers(self, kind: ArtifactKind) -> bool {
        match self {
            Self::All => true,
            Self::Query => kind == ArtifactKind::Query,
            Self::Mutation => kind == ArtifactKind::Mutation,
            Self::Subscription => kind == ArtifactKind::Subscription,
        }
    }
}

/// Configuration of a [`Client`](super::Client).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// GraphQL endpoint used by the default HTTP fetch.
    #[serde(default)]
    pub url: Option<String>,
    /// Headers sent with every request.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Policy of documents that do not declare one.
    #[serde(default)]
    pub default_policy: CachePolicy,
    /// Whether queries accept partial cache data by default.
    #[serde(default)]
    pub default_partial: bool,
    /// Garbage collection ticks an unreferenced cache field survives.
    #[serde(default = "default_buffer_size")]
    pub cache_buffer_size: u32,
    /// Key fields of types without an entry in `type_keys`.
    #[serde(default = "default_keys")]
    pub default_keys: Vec<String>,
    /// Per-type key fields.
    #[serde(default)]
    pub type_keys: HashMap<String, Vec<String>>,
    /// Where the client runs.
    #[serde(default)]
    pub environment: Environment,
    /// Document kinds whose GraphQL errors fail the send.
    #[serde(default)]
    pub throw_on_error: Vec<ThrowOn>,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: f64,
}

fn default_buffer_size() -> u32 {
    10
}

fn default_keys() -> Vec<String> {
    vec!["id".to_string()]
}

fn default_timeout() -> f64 {
    30.0
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: None,
            headers: HashMap::new(),
            default_policy: CachePolicy::default(),
            default_partial: false,
            cache_buffer_size: default_buffer_size(),
            default_keys: default_keys(),
            type_keys: HashMap::new(),
            environment: Environment::default(),
            throw_on_error: Vec::new(),
            timeout_seconds: default_timeout(),
        }
    }
}

impl ClientConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON configuration.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Serialization` for malformed JSON and
    /// `ClientError::Config` if the values do not validate.
    pub fn from_json(json: &str) -> Result<Self, ClientError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Sets the endpoint.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Sets the default cache policy.
    #[must_use]
    pub fn with_default_policy(mut self, policy: CachePolicy) -> Self {
        self.default_policy = policy;
        self
    }

    /// Sets the key fields of a type.
    #[must_use]
    pub fn with_type_keys(mut self, type_name: impl Into<String>, keys: Vec<String>) -> Self {
        self.type_keys.insert(type_name.into(), keys);
        self
    }

    /// Sets the environment.
    #[must_use]
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Fails sends of the given kinds when the server reports errors.
    #[must_use]
    pub fn with_throw_on_error(mut self, kinds: Vec<ThrowOn>) -> Self {
        self.throw_on_error = kinds;
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Returns the request timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_seconds)
    }

    /// Returns true if the client runs on a server.
    #[must_use]
    pub fn is_server(&self) -> bool {
        self.environment == Environment::Server
    }

    /// Returns the settings of the in-memory cache.
    #[must_use]
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            default_keys: self.default_keys.clone(),
            type_keys: self.type_keys.clone(),
            buffer_size: self.cache_buffer_size,
        }
    }

    /// Checks the configuration for values that cannot work.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` describing the first problem found.
    pub fn validate(&self) -> Result<(), ClientError> {
        if !self.timeout_seconds.is_finite() || self.timeout_seconds <= 0.0 {
            return Err(ClientError::Config(format!(
                "timeoutSeconds must be positive, got {}",
                self.timeout_seconds
            )));
        }
        if self.cache_buffer_size == 0 {
            return Err(ClientError::Config("cacheBufferSize must be at least 1".to_string()));
        }
        if let Some(url) = &self.url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ClientError::Config(format!("url must be http(s), got '{url}'")));
            }
        }
        if let Some((type_name, _)) = self.type_keys.iter().find(|(_, keys)| keys.is_empty()) {
            return Err(ClientError::Config(format!("type '{type_name}' has an empty key list")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.default_policy, CachePolicy::CacheOrNetwork);
        assert_eq!(config.default_keys, vec!["id".to_string()]);
        assert_eq!(config.cache_buffer_size, 10);
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = ClientConfig::from_json(
            r#"{
                "url": "https://api.example.com/graphql",
                "defaultPolicy": "NetworkOnly",
                "environment": "server",
                "throwOnError": ["mutation"],
                "typeKeys": {"Book": ["isbn"]}
            }"#,
        )
        .unwrap();

        assert_eq!(config.default_policy, CachePolicy::NetworkOnly);
        assert!(config.is_server());
        assert_eq!(config.throw_on_error, vec![ThrowOn::Mutation]);
        assert_eq!(config.cache_config().keys_for("Book"), ["isbn".to_string()]);
        assert_eq!(config.cache_config().keys_for("User"), ["id".to_string()]);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(ClientConfig::new().with_timeout(0.0).validate().is_err());
        assert!(ClientConfig::new().with_url("ftp://x").validate().is_err());
        assert!(ClientConfig::new()
            .with_type_keys("User", Vec::new())
            .validate()
            .is_err());
    }

    #[test]
    fn test_malformed_json_is_serialization_error() {
        let err = ClientConfig::from_json("{").unwrap_err();
        assert_eq!(err.code(), "SERIALIZATION");
    }

    #[test]
    fn test_throw_on_covers() {
        assert!(ThrowOn::All.covers(ArtifactKind::Subscription));
        assert!(ThrowOn::Query.covers(ArtifactKind::Query));
        assert!(!ThrowOn::Query.covers(ArtifactKind::Mutation));
    }
}
