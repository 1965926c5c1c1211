//! Test assertions for query results.

use crate::core::{DataSource, QueryResult};

/// Asserts that the result was served from the cache.
pub fn assert_from_cache(result: &QueryResult) {
    assert_eq!(
        result.source,
        Some(DataSource::Cache),
        "Expected a cached result, got {:?}",
        result
    );
}

/// Asserts that the result came from the network.
pub fn assert_from_network(result: &QueryResult) {
    assert_eq!(
        result.source,
        Some(DataSource::Network),
        "Expected a network result, got {:?}",
        result
    );
}

/// Asserts that the result data matches.
pub fn assert_data(result: &QueryResult, expected: &serde_json::Value) {
    assert_eq!(
        result.data.as_ref(),
        Some(expected),
        "Expected data {}, got {:?}",
        expected,
        result.data
    );
}

/// Asserts that the result is settled: not fetching and free of GraphQL errors.
pub fn assert_settled(result: &QueryResult) {
    assert!(!result.fetching, "Expected a settled result, still fetching");
    assert!(
        !result.has_errors(),
        "Expected no errors, got {:?}",
        result.errors
    );
}
