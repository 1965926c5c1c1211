//! Comprehensive tests for context module.

#[cfg(test)]
mod tests {
    use crate::context::{CacheParams, Context, Stuff, MUTATION_ID, OPTIMISTIC_RESPONSE};
    use crate::core::{
        Artifact, ArtifactKind, CachePolicy, InputObject, ScalarRegistry, Selection, Variables,
    };
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn artifact() -> Arc<Artifact> {
        let input = InputObject {
            fields: BTreeMap::from([("when".to_string(), "Date".to_string())]),
            ..InputObject::default()
        };
        Arc::new(
            Artifact::new(ArtifactKind::Query, "Events", "query Events { a }", Selection::new())
                .with_input(input)
                .with_policy(CachePolicy::CacheAndNetwork),
        )
    }

    fn vars(value: serde_json::Value) -> Variables {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_context_defaults_to_artifact_policy() {
        let ctx = Context::new(artifact());
        assert_eq!(ctx.policy(), CachePolicy::CacheAndNetwork);
        assert!(ctx.variables().is_none());
        assert!(ctx.stuff().is_empty());
        assert_eq!(ctx.cache_params(), &CacheParams::default());
    }

    #[test]
    fn test_with_variables_leaves_original_untouched() {
        let original = Context::new(artifact()).with_variables(vars(json!({"a": 1})));
        let updated = original.with_variables(vars(json!({"a": 2})));

        assert_eq!(original.variables().unwrap()["a"], json!(1));
        assert_eq!(updated.variables().unwrap()["a"], json!(2));
        assert!(!original.same_variables(&updated));
    }

    #[test]
    fn test_unrelated_changes_keep_variables_identity() {
        let ctx = Context::new(artifact()).with_variables(vars(json!({"a": 1})));
        let other = ctx.with_policy(CachePolicy::NetworkOnly);
        assert!(ctx.same_variables(&other));
    }

    #[test]
    fn test_marshaled_variables_cached_per_identity() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = calls.clone();
        let scalars = ScalarRegistry::new().register(
            "Date",
            move |v| {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                json!(format!("day-{}", v))
            },
            |v| v.clone(),
        );

        let ctx = Context::new(artifact()).with_variables(vars(json!({"when": 5})));
        let sibling = ctx.with_policy(CachePolicy::NetworkOnly);

        assert_eq!(ctx.marshaled_variables(&scalars)["when"], json!("day-5"));
        assert_eq!(sibling.marshaled_variables(&scalars)["when"], json!("day-5"));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);

        let changed = ctx.with_variables(vars(json!({"when": 6})));
        assert_eq!(changed.marshaled_variables(&scalars)["when"], json!("day-6"));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[test]
    fn test_stuff_entries() {
        let ctx = Context::new(artifact())
            .with_stuff_entry(OPTIMISTIC_RESPONSE, json!({"id": "1"}))
            .with_stuff_entry(MUTATION_ID, json!(7));

        assert_eq!(ctx.stuff().optimistic_response(), Some(&json!({"id": "1"})));
        assert_eq!(ctx.stuff().mutation_id(), Some(7));
    }

    #[test]
    fn test_stuff_merge_prefers_newer_entries() {
        let old = Stuff::new().with("a", json!(1)).with("b", json!(1));
        let new = Stuff::new().with("b", json!(2));
        let merged = old.merged(&new);
        assert_eq!(merged.get("a"), Some(&json!(1)));
        assert_eq!(merged.get("b"), Some(&json!(2)));
    }

    #[test]
    fn test_stuff_without_drops_listed_keys() {
        let stuff = Stuff::new()
            .with(OPTIMISTIC_RESPONSE, json!({}))
            .with(MUTATION_ID, json!(3))
            .with("keep", json!(true));
        let trimmed = stuff.without(&[OPTIMISTIC_RESPONSE, MUTATION_ID]);
        assert_eq!(trimmed.len(), 1);
        assert_eq!(trimmed.get("keep"), Some(&json!(true)));
        assert_eq!(stuff.len(), 3);
    }

    #[test]
    fn test_with_variables_of_shares_marshaled_cache() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = calls.clone();
        let scalars = ScalarRegistry::new().register(
            "Date",
            move |v| {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                v.clone()
            },
            |v| v.clone(),
        );
        let previous = Context::new(artifact()).with_variables(vars(json!({"when": 1})));
        let _ = previous.marshaled_variables(&scalars);

        let next = Context::new(artifact()).with_variables_of(&previous);
        assert!(next.same_variables(&previous));
        let _ = next.marshaled_variables(&scalars);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_null_optimistic_response_is_absent() {
        let stuff = Stuff::new().with(OPTIMISTIC_RESPONSE, json!(null));
        assert!(stuff.optimistic_response().is_none());
    }

    #[test]
    fn test_cache_params_builders() {
        let params = CacheParams::new().without_read().without_write();
        assert!(params.disable_read);
        assert!(params.disable_write);
        assert!(params.layer.is_none());
    }
}
