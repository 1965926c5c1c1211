//! Document kind, cache policy and data source enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of GraphQL document an artifact describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    /// A query document.
    Query,
    /// A mutation document.
    Mutation,
    /// A subscription document.
    Subscription,
    /// A fragment document.
    Fragment,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Query => write!(f, "query"),
            Self::Mutation => write!(f, "mutation"),
            Self::Subscription => write!(f, "subscription"),
            Self::Fragment => write!(f, "fragment"),
        }
    }
}

/// How a request balances cached data against a network round-trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CachePolicy {
    /// Serve from cache when the cache satisfies the request, otherwise fetch.
    #[default]
    CacheOrNetwork,
    /// Serve from cache only, never touch the network.
    CacheOnly,
    /// Always fetch, ignore the cache on the way in.
    NetworkOnly,
    /// Serve from cache if possible and always fetch as well.
    CacheAndNetwork,
    /// Always fetch and never write the response into the cache.
    NoCache,
}

impl CachePolicy {
    /// Returns true if the policy allows reading from the cache.
    #[must_use]
    pub fn reads_cache(&self) -> bool {
        !matches!(self, Self::NetworkOnly | Self::NoCache)
    }

    /// Returns true if the policy allows writing responses into the cache.
    #[must_use]
    pub fn writes_cache(&self) -> bool {
        !matches!(self, Self::NoCache)
    }
}

impl fmt::Display for CachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CacheOrNetwork => write!(f, "CacheOrNetwork"),
            Self::CacheOnly => write!(f, "CacheOnly"),
            Self::NetworkOnly => write!(f, "NetworkOnly"),
            Self::CacheAndNetwork => write!(f, "CacheAndNetwork"),
            Self::NoCache => write!(f, "NoCache"),
        }
    }
}

/// Where the data of a result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    /// Read out of the local cache.
    Cache,
    /// Received from the server.
    Network,
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cache => write!(f, "cache"),
            Self::Network => write!(f, "network"),
        }
    }
}
