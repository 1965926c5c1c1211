//! Request context management.
//!
//! This module provides:
//! - The immutable per-invocation [`Context`]
//! - The stuff bag stages use to hand derived data down the chain
//! - Cache parameters shared with the cache collaborator

#[cfg(test)]
mod context_tests;
mod params;
mod request;

pub use params::{CacheParams, Stuff, MUTATION_ID, OPTIMISTIC_RESPONSE};
pub use request::Context;
