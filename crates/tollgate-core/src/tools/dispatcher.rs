//! Routes tool calls through the resilience pipeline

use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::handler::{ToolError, ToolOutput};
use super::registry::ToolRegistry;
use crate::pipeline::{Invocation, PipelineError, ResiliencePipeline};

#[derive(Debug, Clone)]
pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    pipeline: Arc<ResiliencePipeline>,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<ToolRegistry>, pipeline: Arc<ResiliencePipeline>) -> Self {
        Self { registry, pipeline }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn pipeline(&self) -> &ResiliencePipeline {
        &self.pipeline
    }

    /// Invoke `tool` on behalf of `client_id`.
    ///
    /// Unknown tools fail before admission so they never consume rate-limit
    /// budget or create a breaker.
    pub async fn dispatch(
        &self,
        tool: &str,
        arguments: Value,
        client_id: &str,
        cancel: &CancellationToken,
    ) -> Result<ToolOutput, PipelineError<ToolError>> {
        let Some(handler) = self.registry.get(tool) else {
            return Err(PipelineError::Operation(ToolError::invalid_arguments(
                format!("unknown tool '{}'", tool),
            )));
        };

        tracing::debug!(tool = %tool, client_id = %client_id, "dispatching tool call");
        self.pipeline
            .execute(Invocation::new(tool, client_id), cancel, |attempt| {
                let handler = handler.clone();
                let arguments = arguments.clone();
                let cancel = cancel.clone();
                async move { handler.call(arguments, attempt, &cancel).await }
            })
            .await
    }
}
