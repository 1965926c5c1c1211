//! Core domain model types for gqlflow.
//!
//! This module contains the fundamental types used throughout the data layer:
//! - Document kind, cache policy and data source enums
//! - Compiled artifacts and their selection trees
//! - Observable results and GraphQL wire types
//! - Custom scalar marshaling

mod artifact;
mod kinds;
mod result;
mod scalars;

pub use artifact::{
    compute_hash, Artifact, FieldSelection, InputObject, PaginationMethod, RefetchInfo, Selection,
    DEFAULT_ROOT_TYPE,
};
pub use kinds::{ArtifactKind, CachePolicy, DataSource};
pub use result::{GraphQlError, GraphQlResponse, QueryResult, Variables};
pub use scalars::{ScalarFn, ScalarHandler, ScalarRegistry};
