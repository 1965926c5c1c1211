//! Tests for the in-memory cache.

#[cfg(test)]
mod tests {
    use crate::cache::{Cache, CacheConfig, CacheWrite, InMemoryCache, SubscriptionSpec};
    use crate::core::{FieldSelection, Selection, Variables};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn viewer_selection() -> Arc<Selection> {
        Arc::new(
            Selection::new().field(
                "viewer",
                FieldSelection::object(
                    "User",
                    Selection::new()
                        .field("id", FieldSelection::scalar("ID").non_null())
                        .field("name", FieldSelection::scalar("String")),
                ),
            ),
        )
    }

    fn user_selection() -> Arc<Selection> {
        Arc::new(
            Selection::new().field(
                "user",
                FieldSelection::object(
                    "User",
                    Selection::new()
                        .field("id", FieldSelection::scalar("ID").non_null())
                        .field("name", FieldSelection::scalar("String")),
                )
                .with_key("user(id: $id)"),
            ),
        )
    }

    fn vars(value: Value) -> Variables {
        serde_json::from_value(value).unwrap()
    }

    fn write_viewer(cache: &InMemoryCache, name: &str) {
        cache.write(CacheWrite::new(
            viewer_selection(),
            json!({"viewer": {"id": "1", "name": name}}),
            Variables::new(),
        ));
    }

    fn viewer_name(cache: &InMemoryCache) -> Value {
        cache.read(&viewer_selection(), &Variables::new()).data.unwrap()["viewer"]["name"].clone()
    }

    fn recorder() -> (Arc<Mutex<Vec<Value>>>, SubscriptionSpec) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let spec = SubscriptionSpec {
            selection: viewer_selection(),
            parent_id: None,
            set: Arc::new(move |value| sink.lock().push(value)),
        };
        (seen, spec)
    }

    #[test]
    fn test_empty_cache_is_a_miss() {
        let cache = InMemoryCache::default();
        let result = cache.read(&viewer_selection(), &Variables::new());
        assert!(!result.is_hit());
    }

    #[test]
    fn test_write_then_read() {
        let cache = InMemoryCache::default();
        write_viewer(&cache, "Ada");

        let result = cache.read(&viewer_selection(), &Variables::new());
        assert_eq!(result.data, Some(json!({"viewer": {"id": "1", "name": "Ada"}})));
        assert!(!result.partial);
        assert!(!result.stale);
    }

    #[test]
    fn test_records_are_normalized_across_documents() {
        let cache = InMemoryCache::default();
        write_viewer(&cache, "Ada");
        cache.write(CacheWrite::new(
            user_selection(),
            json!({"user": {"id": "1", "name": "Grace"}}),
            vars(json!({"id": "1"})),
        ));

        assert_eq!(viewer_name(&cache), json!("Grace"));
        assert!(cache.snapshot()["User:1"].is_object());
    }

    #[test]
    fn test_keys_depend_on_variables() {
        let cache = InMemoryCache::default();
        cache.write(CacheWrite::new(
            user_selection(),
            json!({"user": {"id": "1", "name": "Ada"}}),
            vars(json!({"id": "1"})),
        ));

        let hit = cache.read(&user_selection(), &vars(json!({"id": "1"})));
        assert!(hit.is_hit());
        let miss = cache.read(&user_selection(), &vars(json!({"id": "2"})));
        assert!(!miss.is_hit());
    }

    #[test]
    fn test_missing_nullable_field_is_partial() {
        let cache = InMemoryCache::default();
        cache.write(CacheWrite::new(
            viewer_selection(),
            json!({"viewer": {"id": "1"}}),
            Variables::new(),
        ));

        let result = cache.read(&viewer_selection(), &Variables::new());
        assert!(result.partial);
        assert_eq!(result.data, Some(json!({"viewer": {"id": "1", "name": null}})));
    }

    #[test]
    fn test_missing_non_null_field_nulls_parent() {
        let cache = InMemoryCache::default();
        let selection = Arc::new(Selection::new().field(
            "viewer",
            FieldSelection::object(
                "User",
                Selection::new()
                    .field("id", FieldSelection::scalar("ID").non_null())
                    .field("email", FieldSelection::scalar("String").non_null()),
            )
            .non_null(),
        ));
        write_viewer(&cache, "Ada");

        let result = cache.read(&selection, &Variables::new());
        assert!(result.partial);
        assert_eq!(result.data, None);
    }

    #[test]
    fn test_embedded_objects_without_keys() {
        let cache = InMemoryCache::default();
        let selection = Arc::new(Selection::new().field(
            "stats",
            FieldSelection::object("Stats", Selection::new().field("count", FieldSelection::scalar("Int"))),
        ));
        cache.write(CacheWrite::new(selection.clone(), json!({"stats": {"count": 3}}), Variables::new()));

        assert!(cache.snapshot()["_ROOT_.stats"].is_object());
        assert_eq!(cache.read(&selection, &Variables::new()).data, Some(json!({"stats": {"count": 3}})));
    }

    #[test]
    fn test_lists_of_records() {
        let cache = InMemoryCache::default();
        let selection = Arc::new(Selection::new().field(
            "users",
            FieldSelection::object("User", Selection::new().field("id", FieldSelection::scalar("ID"))),
        ));
        let data = json!({"users": [{"id": "1"}, null, {"id": "2"}]});
        cache.write(CacheWrite::new(selection.clone(), data.clone(), Variables::new()));

        assert_eq!(cache.read(&selection, &Variables::new()).data, Some(data));
        assert_eq!(
            cache.snapshot()["_ROOT_"]["users"],
            json!([{"__ref": "User:1"}, null, {"__ref": "User:2"}])
        );
    }

    #[test]
    fn test_optimistic_layer_clear_restores_base() {
        let cache = InMemoryCache::default();
        write_viewer(&cache, "Ada");
        let before = cache.snapshot();

        let layer = cache.create_layer(true);
        cache.write(
            CacheWrite::new(
                viewer_selection(),
                json!({"viewer": {"id": "1", "name": "Optimistic"}}),
                Variables::new(),
            )
            .in_layer(Some(layer)),
        );
        assert_eq!(viewer_name(&cache), json!("Optimistic"));

        cache.clear_layer(layer);
        cache.resolve_layer(layer);
        assert_eq!(viewer_name(&cache), json!("Ada"));
        assert_eq!(cache.snapshot(), before);
        assert_eq!(cache.layer_count(), 1);
    }

    #[test]
    fn test_resolve_layer_merges_into_base() {
        let cache = InMemoryCache::default();
        let layer = cache.create_layer(true);
        cache.write(
            CacheWrite::new(viewer_selection(), json!({"viewer": {"id": "1", "name": "Ada"}}), Variables::new())
                .in_layer(Some(layer)),
        );
        cache.resolve_layer(layer);

        assert_eq!(cache.layer_count(), 1);
        assert_eq!(viewer_name(&cache), json!("Ada"));
    }

    #[test]
    fn test_writes_above_optimistic_layer_win_and_merge_in_order() {
        let cache = InMemoryCache::default();
        let layer = cache.create_layer(true);
        cache.write(
            CacheWrite::new(viewer_selection(), json!({"viewer": {"id": "1", "name": "Guess"}}), Variables::new())
                .in_layer(Some(layer)),
        );

        write_viewer(&cache, "Server");
        assert_eq!(cache.layer_count(), 3);
        assert_eq!(viewer_name(&cache), json!("Server"));

        cache.resolve_layer(layer);
        assert_eq!(cache.layer_count(), 1);
        assert_eq!(viewer_name(&cache), json!("Server"));
    }

    #[test]
    fn test_unknown_layer_is_a_no_op() {
        let cache = InMemoryCache::default();
        let layer = cache.create_layer(true);
        cache.resolve_layer(layer);
        cache.clear_layer(layer);
        cache.resolve_layer(layer);
        assert_eq!(cache.layer_count(), 1);
    }

    #[test]
    fn test_subscribers_see_changes_only() {
        let cache = InMemoryCache::default();
        write_viewer(&cache, "Ada");
        let (seen, spec) = recorder();
        cache.subscribe(spec, &Variables::new());

        write_viewer(&cache, "Ada");
        assert!(seen.lock().is_empty());

        write_viewer(&cache, "Grace");
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(seen.lock()[0]["viewer"]["name"], json!("Grace"));
    }

    #[test]
    fn test_forced_notification() {
        let cache = InMemoryCache::default();
        write_viewer(&cache, "Ada");
        let (seen, spec) = recorder();
        let id = cache.subscribe(spec, &Variables::new());

        cache.write(
            CacheWrite::new(viewer_selection(), json!({"viewer": {"id": "1", "name": "Ada"}}), Variables::new())
                .notifying(vec![id], true),
        );
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_write_reports_affected_subscribers() {
        let cache = InMemoryCache::default();
        write_viewer(&cache, "Ada");
        let (_seen, spec) = recorder();
        let id = cache.subscribe(spec, &Variables::new());

        let affected = cache.write(CacheWrite::new(
            viewer_selection(),
            json!({"viewer": {"id": "1", "name": "Grace"}}),
            Variables::new(),
        ));
        assert_eq!(affected, vec![id]);

        cache.unsubscribe(id);
        assert_eq!(cache.subscriber_count(), 0);
    }

    #[test]
    fn test_clearing_a_layer_notifies() {
        let cache = InMemoryCache::default();
        write_viewer(&cache, "Ada");
        let (seen, spec) = recorder();
        cache.subscribe(spec, &Variables::new());

        let layer = cache.create_layer(true);
        cache.write(
            CacheWrite::new(viewer_selection(), json!({"viewer": {"id": "1", "name": "Guess"}}), Variables::new())
                .in_layer(Some(layer)),
        );
        cache.clear_layer(layer);

        let names: Vec<Value> = seen.lock().iter().map(|v| v["viewer"]["name"].clone()).collect();
        assert_eq!(names, vec![json!("Guess"), json!("Ada")]);
    }

    #[test]
    fn test_type_staleness_cleared_by_write() {
        let cache = InMemoryCache::default();
        write_viewer(&cache, "Ada");

        cache.mark_type_stale("User", None);
        assert!(cache.read(&viewer_selection(), &Variables::new()).stale);

        write_viewer(&cache, "Ada");
        assert!(!cache.read(&viewer_selection(), &Variables::new()).stale);
    }

    #[test]
    fn test_field_staleness() {
        let cache = InMemoryCache::default();
        cache.write(CacheWrite::new(
            user_selection(),
            json!({"user": {"id": "1", "name": "Ada"}}),
            vars(json!({"id": "1"})),
        ));

        cache.mark_record_stale("_ROOT_", Some("user".to_string()));
        assert!(cache.read(&user_selection(), &vars(json!({"id": "1"}))).stale);

        let other = InMemoryCache::default();
        write_viewer(&other, "Ada");
        other.mark_type_stale("User", Some("email".to_string()));
        assert!(!other.read(&viewer_selection(), &Variables::new()).stale);
    }

    #[test]
    fn test_garbage_collection_spares_subscribed_records() {
        let cache = InMemoryCache::new(CacheConfig {
            buffer_size: 2,
            ..CacheConfig::default()
        });
        write_viewer(&cache, "Ada");
        let (_seen, spec) = recorder();
        let id = cache.subscribe(spec, &Variables::new());

        for _ in 0..5 {
            cache.collect_garbage();
        }
        assert!(cache.read(&viewer_selection(), &Variables::new()).is_hit());

        cache.unsubscribe(id);
        for _ in 0..3 {
            cache.collect_garbage();
        }
        assert!(!cache.read(&viewer_selection(), &Variables::new()).is_hit());
    }
}
