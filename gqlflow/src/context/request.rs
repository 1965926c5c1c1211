//! The per-invocation request context.

use super::{CacheParams, Stuff};
use crate::core::{Artifact, CachePolicy, ScalarRegistry, Variables};
use crate::network::Fetch;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Immutable state of one `send()` invocation.
///
/// Every change produces a new value, so a stage can never alter what an
/// earlier stage still holds. Clones are cheap: the heavy fields are shared.
///
/// Marshaled variables are cached per variables identity. Clones that keep the
/// same variables share the cache; [`Context::with_variables`] starts a fresh one.
#[derive(Clone)]
pub struct Context {
    artifact: Arc<Artifact>,
    variables: Option<Arc<Variables>>,
    marshaled: Arc<OnceLock<Variables>>,
    policy: CachePolicy,
    fetch: Option<Arc<dyn Fetch>>,
    fetch_params: Option<Value>,
    session: Option<Value>,
    metadata: Option<Value>,
    stuff: Arc<Stuff>,
    cache_params: CacheParams,
}

impl Context {
    /// Creates a context for an artifact with no variables.
    #[must_use]
    pub fn new(artifact: Arc<Artifact>) -> Self {
        let policy = artifact.policy.unwrap_or_default();
        Self {
            artifact,
            variables: None,
            marshaled: Arc::new(OnceLock::new()),
            policy,
            fetch: None,
            fetch_params: None,
            session: None,
            metadata: None,
            stuff: Arc::new(Stuff::new()),
            cache_params: CacheParams::default(),
        }
    }

    /// Returns a copy with new variables.
    #[must_use]
    pub fn with_variables(&self, variables: Variables) -> Self {
        Self {
            variables: Some(Arc::new(variables)),
            marshaled: Arc::new(OnceLock::new()),
            ..self.clone()
        }
    }

    /// Returns a copy holding the same variables as `other`, sharing its
    /// marshaled cache.
    #[must_use]
    pub fn with_variables_of(&self, other: &Self) -> Self {
        Self {
            variables: other.variables.clone(),
            marshaled: other.marshaled.clone(),
            ..self.clone()
        }
    }

    /// Returns a copy with the variables cleared.
    #[must_use]
    pub fn without_variables(&self) -> Self {
        Self {
            variables: None,
            marshaled: Arc::new(OnceLock::new()),
            ..self.clone()
        }
    }

    /// Returns a copy with a different cache policy.
    #[must_use]
    pub fn with_policy(&self, policy: CachePolicy) -> Self {
        Self {
            policy,
            ..self.clone()
        }
    }

    /// Returns a copy using a different fetch function.
    #[must_use]
    pub fn with_fetch(&self, fetch: Arc<dyn Fetch>) -> Self {
        Self {
            fetch: Some(fetch),
            ..self.clone()
        }
    }

    /// Returns a copy with request-init overrides for the transport.
    #[must_use]
    pub fn with_fetch_params(&self, fetch_params: Option<Value>) -> Self {
        Self {
            fetch_params,
            ..self.clone()
        }
    }

    /// Returns a copy with a different session.
    #[must_use]
    pub fn with_session(&self, session: Option<Value>) -> Self {
        Self {
            session,
            ..self.clone()
        }
    }

    /// Returns a copy with different metadata.
    #[must_use]
    pub fn with_metadata(&self, metadata: Option<Value>) -> Self {
        Self {
            metadata,
            ..self.clone()
        }
    }

    /// Returns a copy with a replaced stuff bag.
    #[must_use]
    pub fn with_stuff(&self, stuff: Stuff) -> Self {
        Self {
            stuff: Arc::new(stuff),
            ..self.clone()
        }
    }

    /// Returns a copy with one stuff entry set.
    #[must_use]
    pub fn with_stuff_entry(&self, key: impl Into<String>, value: Value) -> Self {
        self.with_stuff(self.stuff.as_ref().clone().with(key, value))
    }

    /// Returns a copy with replaced cache parameters.
    #[must_use]
    pub fn with_cache_params(&self, cache_params: CacheParams) -> Self {
        Self {
            cache_params,
            ..self.clone()
        }
    }

    /// Returns the artifact.
    #[must_use]
    pub fn artifact(&self) -> &Arc<Artifact> {
        &self.artifact
    }

    /// Returns the raw variables.
    #[must_use]
    pub fn variables(&self) -> Option<&Variables> {
        self.variables.as_deref()
    }

    /// Returns the variables, or an empty map.
    #[must_use]
    pub fn variables_or_empty(&self) -> Variables {
        self.variables.as_deref().cloned().unwrap_or_default()
    }

    /// Returns true if both contexts hold the very same variables value.
    #[must_use]
    pub fn same_variables(&self, other: &Self) -> bool {
        match (&self.variables, &other.variables) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }

    /// Returns the variables marshaled for the wire and the cache.
    ///
    /// Computed once per variables identity.
    #[must_use]
    pub fn marshaled_variables(&self, scalars: &ScalarRegistry) -> &Variables {
        self.marshaled.get_or_init(|| {
            let empty = Variables::new();
            let variables = self.variables.as_deref().unwrap_or(&empty);
            scalars.marshal_inputs(self.artifact.input.as_ref(), variables)
        })
    }

    /// Returns the cache policy.
    #[must_use]
    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    /// Returns the fetch function, if one was injected.
    #[must_use]
    pub fn fetch(&self) -> Option<&Arc<dyn Fetch>> {
        self.fetch.as_ref()
    }

    /// Returns the request-init overrides.
    #[must_use]
    pub fn fetch_params(&self) -> Option<&Value> {
        self.fetch_params.as_ref()
    }

    /// Returns the session.
    #[must_use]
    pub fn session(&self) -> Option<&Value> {
        self.session.as_ref()
    }

    /// Returns the metadata.
    #[must_use]
    pub fn metadata(&self) -> Option<&Value> {
        self.metadata.as_ref()
    }

    /// Returns the stuff bag.
    #[must_use]
    pub fn stuff(&self) -> &Stuff {
        &self.stuff
    }

    /// Returns the cache parameters.
    #[must_use]
    pub fn cache_params(&self) -> &CacheParams {
        &self.cache_params
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("document", &self.artifact.name)
            .field("kind", &self.artifact.kind)
            .field("variables", &self.variables)
            .field("policy", &self.policy)
            .field("has_fetch", &self.fetch.is_some())
            .field("stuff", &self.stuff)
            .field("cache_params", &self.cache_params)
            .finish_non_exhaustive()
    }
}
