//! The client: shared collaborators and the factory of document stores.

mod config;

pub use config::{ClientConfig, Environment, ThrowOn};

use crate::cache::{Cache, InMemoryCache};
use crate::core::{Artifact, ArtifactKind, ScalarRegistry};
use crate::errors::ClientError;
use crate::events::{EventSink, NoOpEventSink};
use crate::network::{Fetch, TransportFactory};
use crate::pipeline::{DocumentStore, Plugin, PluginFactory};
use crate::stages::{
    CachePolicyStage, FetchStage, MutationStage, OptimisticKeyStage, OptimisticKeys, PendingKeyStage,
    QueryStage, SubscriptionStage, ThrowOnErrorStage,
};
use std::fmt;
use std::sync::Arc;
use tracing::info;

struct ClientInner {
    config: ClientConfig,
    cache: Arc<dyn Cache>,
    scalars: ScalarRegistry,
    sink: Arc<dyn EventSink>,
    fetch: Option<Arc<dyn Fetch>>,
    transport: Option<TransportFactory>,
    plugins: Vec<PluginFactory>,
    keys: Arc<OptimisticKeys>,
}

/// Owns the cache, the optimistic key registry and everything document stores
/// share. Clones are cheap handles to the same client.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.inner.config)
            .field("scalars", &self.inner.scalars)
            .field("has_fetch", &self.inner.fetch.is_some())
            .field("has_transport", &self.inner.transport.is_some())
            .field("custom_plugins", &self.inner.plugins.len())
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Starts building a client.
    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Returns the cache.
    #[must_use]
    pub fn cache(&self) -> &Arc<dyn Cache> {
        &self.inner.cache
    }

    /// Returns the custom scalar registry.
    #[must_use]
    pub fn scalars(&self) -> &ScalarRegistry {
        &self.inner.scalars
    }

    /// Returns the event sink.
    #[must_use]
    pub fn event_sink(&self) -> &Arc<dyn EventSink> {
        &self.inner.sink
    }

    /// Returns the default fetch, if any.
    #[must_use]
    pub fn fetch(&self) -> Option<&Arc<dyn Fetch>> {
        self.inner.fetch.as_ref()
    }

    /// Returns the optimistic key registry.
    #[must_use]
    pub fn optimistic_keys(&self) -> &Arc<OptimisticKeys> {
        &self.inner.keys
    }

    /// Creates a store running the default chain for the artifact's kind.
    pub fn store(&self, artifact: impl Into<Arc<Artifact>>) -> DocumentStore {
        let artifact = artifact.into();
        let plugins = self.default_plugins(artifact.kind);
        self.store_with(artifact, plugins)
    }

    /// Creates a store running exactly `plugins`.
    pub fn store_with(&self, artifact: impl Into<Arc<Artifact>>, plugins: Vec<Arc<dyn Plugin>>) -> DocumentStore {
        DocumentStore::new(self.clone(), artifact.into(), plugins)
    }

    fn default_plugins(&self, kind: ArtifactKind) -> Vec<Arc<dyn Plugin>> {
        let config = &self.inner.config;
        let cache = self.inner.cache.clone();
        let mut plugins: Vec<Arc<dyn Plugin>> = Vec::new();

        if !config.throw_on_error.is_empty() {
            plugins.push(Arc::new(ThrowOnErrorStage::new(config.throw_on_error.clone())));
        }
        let mut cache_policy = CachePolicyStage::new(cache.clone());
        if config.is_server() {
            cache_policy = cache_policy.on_server(true);
        }
        plugins.push(Arc::new(cache_policy));

        match kind {
            ArtifactKind::Query => plugins.push(Arc::new(QueryStage::new(cache.clone()))),
            ArtifactKind::Subscription => {
                let mut stage = SubscriptionStage::new(self.inner.transport.clone());
                if config.is_server() {
                    stage = stage.on_server();
                }
                plugins.push(Arc::new(stage));
            }
            ArtifactKind::Mutation | ArtifactKind::Fragment => {}
        }

        if kind == ArtifactKind::Mutation {
            plugins.push(Arc::new(OptimisticKeyStage::new(self.inner.keys.clone())));
            plugins.push(Arc::new(MutationStage::new(cache)));
        }
        plugins.push(Arc::new(PendingKeyStage::new(self.inner.keys.clone())));
        plugins.extend(self.inner.plugins.iter().map(|make| make()));
        plugins.push(Arc::new(FetchStage::new()));
        plugins
    }
}

/// Assembles a [`Client`].
#[derive(Default)]
pub struct ClientBuilder {
    config: ClientConfig,
    cache: Option<Arc<dyn Cache>>,
    scalars: ScalarRegistry,
    sink: Option<Arc<dyn EventSink>>,
    fetch: Option<Arc<dyn Fetch>>,
    transport: Option<TransportFactory>,
    plugins: Vec<PluginFactory>,
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("config", &self.config)
            .field("custom_plugins", &self.plugins.len())
            .finish_non_exhaustive()
    }
}

impl ClientBuilder {
    /// Creates a builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the configuration.
    #[must_use]
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Uses `cache` instead of a fresh in-memory cache.
    #[must_use]
    pub fn cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Sets the custom scalar registry.
    #[must_use]
    pub fn scalars(mut self, scalars: ScalarRegistry) -> Self {
        self.scalars = scalars;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Sets the default fetch.
    #[must_use]
    pub fn fetch(mut self, fetch: Arc<dyn Fetch>) -> Self {
        self.fetch = Some(fetch);
        self
    }

    /// Sets the subscription transport factory.
    #[must_use]
    pub fn transport(mut self, factory: TransportFactory) -> Self {
        self.transport = Some(factory);
        self
    }

    /// Adds a custom plugin, placed right before the fetch stage.
    #[must_use]
    pub fn plugin(mut self, factory: PluginFactory) -> Self {
        self.plugins.push(factory);
        self
    }

    /// Builds the client.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` if the configuration does not validate
    /// or the HTTP fetch cannot be created.
    pub fn build(self) -> Result<Client, ClientError> {
        self.config.validate()?;
        let fetch = match self.fetch {
            Some(fetch) => Some(fetch),
            None => default_fetch(&self.config)?,
        };
        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(InMemoryCache::new(self.config.cache_config())));
        info!(
            url = ?self.config.url,
            environment = ?self.config.environment,
            custom_plugins = self.plugins.len(),
            "Built client"
        );
        Ok(Client {
            inner: Arc::new(ClientInner {
                config: self.config,
                cache,
                scalars: self.scalars,
                sink: self.sink.unwrap_or_else(|| Arc::new(NoOpEventSink)),
                fetch,
                transport: self.transport,
                plugins: self.plugins,
                keys: Arc::new(OptimisticKeys::new()),
            }),
        })
    }
}

#[cfg(feature = "http")]
fn default_fetch(config: &ClientConfig) -> Result<Option<Arc<dyn Fetch>>, ClientError> {
    if config.url.is_none() {
        return Ok(None);
    }
    let fetch = crate::network::HttpFetch::from_config(config)?;
    Ok(Some(Arc::new(fetch)))
}

#[cfg(not(feature = "http"))]
#[allow(clippy::unnecessary_wraps)]
fn default_fetch(_config: &ClientConfig) -> Result<Option<Arc<dyn Fetch>>, ClientError> {
    Ok(None)
}
