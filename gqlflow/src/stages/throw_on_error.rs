//! Turns GraphQL errors in responses into send failures.

use crate::client::ThrowOn;
use crate::context::Context;
use crate::errors::ClientError;
use crate::pipeline::{ExitHandlers, HookSet, Plugin};
use async_trait::async_trait;

/// Fails the send when the final value carries GraphQL errors and the
/// document's kind is covered. Placed first so it sees the final value.
#[derive(Debug, Clone)]
pub struct ThrowOnErrorStage {
    kinds: Vec<ThrowOn>,
}

impl ThrowOnErrorStage {
    /// Creates the stage for the given document kinds.
    #[must_use]
    pub fn new(kinds: Vec<ThrowOn>) -> Self {
        Self { kinds }
    }
}

#[async_trait]
impl Plugin for ThrowOnErrorStage {
    fn name(&self) -> &str {
        "throw_on_error"
    }

    fn hooks(&self) -> HookSet {
        HookSet::END
    }

    async fn end(&self, ctx: Context, handlers: ExitHandlers) -> Result<(), ClientError> {
        let kind = ctx.artifact().kind;
        if self.kinds.iter().any(|k| k.covers(kind)) {
            if let Some(errors) = handlers.value().errors.as_ref().filter(|e| !e.is_empty()) {
                return Err(ClientError::GraphQl(errors.clone()));
            }
        }
        handlers.resolve(ctx).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::client::{ClientConfig, ThrowOn};
    use crate::core::{CachePolicy, GraphQlError, GraphQlResponse};
    use crate::pipeline::SendParams;
    use crate::testing::{user_query, variables, ScriptedFetch, TestClient};
    use serde_json::json;

    fn failing_response() -> GraphQlResponse {
        GraphQlResponse {
            data: Some(json!({"user": null})),
            errors: Some(vec![GraphQlError::new("not allowed")]),
        }
    }

    #[tokio::test]
    async fn test_errors_reject_covered_kinds() {
        let config = ClientConfig::new().with_throw_on_error(vec![ThrowOn::Query]);
        let test = TestClient::with_config(config, ScriptedFetch::always(failing_response()));
        let store = test.client.store(user_query());
        assert_eq!(store.plugin_names()[0], "throw_on_error");

        let err = store
            .send(
                SendParams::new()
                    .with_variables(variables(json!({"id": "1"})))
                    .with_policy(CachePolicy::NetworkOnly),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "GRAPHQL");
        assert!(err.to_string().contains("not allowed"));
    }

    #[tokio::test]
    async fn test_errors_are_data_for_uncovered_kinds() {
        let config = ClientConfig::new().with_throw_on_error(vec![ThrowOn::Mutation]);
        let test = TestClient::with_config(config, ScriptedFetch::always(failing_response()));
        let store = test.client.store(user_query());

        let result = store
            .send(
                SendParams::new()
                    .with_variables(variables(json!({"id": "1"})))
                    .with_policy(CachePolicy::NetworkOnly),
            )
            .await
            .unwrap();
        assert!(result.has_errors());
    }
}
