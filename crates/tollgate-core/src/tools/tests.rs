//! Tests for the tool layer

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::pipeline::{OperationPolicy, PipelineError, ResiliencePipeline};
use crate::recovery::backoff::BackoffKind;
use crate::recovery::rate_limiter::{InMemoryStore, RateLimitConfig};
use crate::recovery::retry::RetryConfig;

/// Fails with `error` for the first `failures` calls, then echoes `query`
struct FlakyTool {
    name: &'static str,
    failures: u32,
    error: ToolError,
    calls: AtomicU32,
}

impl FlakyTool {
    fn new(name: &'static str, failures: u32, error: ToolError) -> Arc<Self> {
        Arc::new(Self {
            name,
            failures,
            error,
            calls: AtomicU32::new(0),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolHandler for FlakyTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "echoes its query"
    }

    async fn call(
        &self,
        arguments: Value,
        _attempt: u32,
        _cancel: &CancellationToken,
    ) -> Result<ToolOutput, ToolError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(self.error.clone());
        }
        Ok(ToolOutput::text(require_str(&arguments, "query")?))
    }
}

fn dispatcher(limit: u64, tools: Vec<Arc<FlakyTool>>) -> ToolDispatcher {
    let mut registry = ToolRegistry::new();
    for tool in tools {
        registry.register(tool).unwrap();
    }
    let policy = OperationPolicy::default().with_retry(Some(
        RetryConfig::limited(3)
            .with_strategy(BackoffKind::Constant)
            .with_initial_delay(Duration::from_millis(10)),
    ));
    let pipeline = ResiliencePipeline::builder(
        RateLimitConfig::new(limit, Duration::from_secs(60)),
        Arc::new(InMemoryStore::default()),
    )
    .default_policy(policy)
    .build()
    .unwrap();
    ToolDispatcher::new(Arc::new(registry), Arc::new(pipeline))
}

#[tokio::test(start_paused = true)]
async fn test_unavailable_tool_is_retried() {
    let tool = FlakyTool::new("docs", 2, ToolError::unavailable("toolchain missing"));
    let dispatcher = dispatcher(10, vec![tool.clone()]);

    let output = dispatcher
        .dispatch("docs", json!({"query": "Vec"}), "alice", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(output, ToolOutput::text("Vec"));
    assert_eq!(tool.calls(), 3);
}

#[tokio::test]
async fn test_execution_error_is_not_retried() {
    let tool = FlakyTool::new("docs", 1, ToolError::execution("exit status 2"));
    let dispatcher = dispatcher(10, vec![tool.clone()]);

    let err = dispatcher
        .dispatch("docs", json!({"query": "Vec"}), "alice", &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Operation(ToolError::Execution(_))));
    assert_eq!(tool.calls(), 1);
}

#[tokio::test]
async fn test_unknown_tool_skips_admission() {
    let dispatcher = dispatcher(1, vec![FlakyTool::new("docs", 0, ToolError::Timeout)]);
    let cancel = CancellationToken::new();

    for _ in 0..3 {
        let err = dispatcher
            .dispatch("missing", json!({}), "alice", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Operation(ToolError::InvalidArguments(ref msg)) if msg.contains("missing")
        ));
    }
    assert!(dispatcher.pipeline().breaker("missing").is_none());

    // The single allowed request is still available
    dispatcher
        .dispatch("docs", json!({"query": "x"}), "alice", &cancel)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_rate_limited_dispatch() {
    let tool = FlakyTool::new("docs", 0, ToolError::Timeout);
    let dispatcher = dispatcher(1, vec![tool.clone()]);
    let cancel = CancellationToken::new();

    dispatcher
        .dispatch("docs", json!({"query": "a"}), "alice", &cancel)
        .await
        .unwrap();
    let err = dispatcher
        .dispatch("docs", json!({"query": "b"}), "alice", &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::RateLimited(_)));
    assert_eq!(tool.calls(), 1);
}

#[test]
fn test_registry_rejects_duplicates_and_bad_names() {
    let mut registry = ToolRegistry::new();
    registry
        .register(FlakyTool::new("review", 0, ToolError::Timeout))
        .unwrap();
    registry
        .register(FlakyTool::new("docs", 0, ToolError::Timeout))
        .unwrap();

    let err = registry
        .register(FlakyTool::new("docs", 0, ToolError::Timeout))
        .unwrap_err();
    assert!(err.to_string().contains("already registered"));
    assert!(registry
        .register(FlakyTool::new("a:b", 0, ToolError::Timeout))
        .is_err());
    assert!(registry
        .register(FlakyTool::new("", 0, ToolError::Timeout))
        .is_err());

    let listed: Vec<_> = registry.list().into_iter().map(|d| d.name).collect();
    assert_eq!(listed, vec!["docs", "review"]);
    assert_eq!(registry.len(), 2);
    assert!(registry.contains("docs"));
}

#[test]
fn test_descriptor_uses_default_schema() {
    let descriptor = FlakyTool::new("docs", 0, ToolError::Timeout).descriptor();
    assert_eq!(descriptor.description, "echoes its query");
    assert_eq!(
        serde_json::to_value(&descriptor).unwrap(),
        json!({
            "name": "docs",
            "description": "echoes its query",
            "inputSchema": {"type": "object"}
        })
    );
}
