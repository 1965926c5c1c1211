//! The stage that sends documents over the network.

use crate::context::Context;
use crate::core::{QueryResult, Variables};
use crate::errors::ClientError;
use crate::network::{extract_files, FetchRequest};
use crate::observability::SpanTimer;
use crate::pipeline::{EnterHandlers, HookSet, Plugin};
use async_trait::async_trait;
use tracing::debug;

/// Builds the transport request for a context and its marshaled variables.
///
/// # Errors
///
/// Returns `ClientError::Serialization` if an upload marker is malformed.
pub fn build_request(ctx: &Context, variables: &Variables) -> Result<FetchRequest, ClientError> {
    let extracted = extract_files(variables)?;
    let artifact = ctx.artifact();
    Ok(FetchRequest {
        text: artifact.raw.clone(),
        hash: artifact.hash.clone(),
        operation_name: artifact.name.clone(),
        variables: extracted.variables,
        files: extracted.files,
        session: ctx.session().cloned(),
        metadata: ctx.metadata().cloned(),
        fetch_params: ctx.fetch_params().cloned(),
    })
}

/// Calls the context's fetch and resolves with the server response.
#[derive(Debug, Default)]
pub struct FetchStage;

impl FetchStage {
    /// Creates the stage.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Plugin for FetchStage {
    fn name(&self) -> &str {
        "fetch"
    }

    fn hooks(&self) -> HookSet {
        HookSet::NETWORK
    }

    async fn network(&self, ctx: Context, handlers: EnterHandlers) -> Result<(), ClientError> {
        let fetch = ctx.fetch().cloned().ok_or_else(|| {
            ClientError::Config(format!("no fetch configured for '{}'", ctx.artifact().name))
        })?;
        let request = build_request(&ctx, &handlers.marshal_variables(&ctx))?;

        let timer = SpanTimer::start("fetch");
        let response = fetch.fetch(request).await?;
        debug!(
            document = %ctx.artifact().name,
            elapsed_ms = timer.elapsed_ms(),
            errors = response.errors.as_ref().map_or(0, Vec::len),
            "Fetched document"
        );

        let value = QueryResult::from_network(response, ctx.variables().cloned());
        handlers.resolve(ctx, value).await;
        Ok(())
    }
}
