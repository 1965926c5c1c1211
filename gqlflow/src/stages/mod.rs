//! The built-in pipeline stages.
//!
//! A client assembles them into a chain per document kind:
//! - `throw_on_error` (opt-in) first, so it sees the final value
//! - `cache_policy`, then `query` or `subscription`
//! - `optimistic_keys` and `mutation` for mutations, minting before the layer write
//! - `pending_keys` after `mutation`, holding chains on unresolved keys
//! - custom plugins, then `fetch` last

mod cache_policy;
mod fetch;
mod mutation;
mod optimistic_keys;
mod query;
mod subscription;
mod throw_on_error;

pub use cache_policy::CachePolicyStage;
pub use fetch::{build_request, FetchStage};
pub use mutation::MutationStage;
pub use optimistic_keys::{
    OptimisticKeyStage, OptimisticKeys, PendingKey, PendingKeyStage, OPTIMISTIC_KEY_PREFIX,
};
pub use query::QueryStage;
pub use subscription::SubscriptionStage;
pub use throw_on_error::ThrowOnErrorStage;
